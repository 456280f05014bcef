//! Simulator configuration.
//!
//! The configuration is one JSON document:
//! ```json
//! {
//!     "time_slot": 2,
//!     "num_cpus": 2,
//!     "ram_size": 1024,
//!     "swap_sizes": [4096, 0, 0, 0],
//!     "processes": [{ "start_time": 0, "program": [{ "op": "alloc", "size": 300, "reg": 0 }] }]
//! }
//! ```
//! Omitted fields take the defaults of [mm::PagingConfig] and an `info` log level.

use core::fmt::{Display, Formatter};
use std::{fs, path::Path, str::FromStr};

use log::LevelFilter;
use mm::{
    AccessMode, LockedMemPhy, MemPhy, MmError, PagingConfig, SwapPool, SystemMemory,
    config::{DEFAULT_ADDR_WIDTH, DEFAULT_PAGE_SIZE, MAX_SWAP_DEVICES},
};
use serde::Deserialize;

use crate::task::process::Instruction;

#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not a valid configuration document.
    Parse(serde_json::Error),
    /// A value is out of range.
    Invalid(String),
    /// The devices could not be built.
    Memory(MmError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read configuration: {}", err),
            ConfigError::Parse(err) => write!(f, "malformed configuration: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
            ConfigError::Memory(err) => write!(f, "cannot boot memory: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<MmError> for ConfigError {
    fn from(err: MmError) -> Self {
        ConfigError::Memory(err)
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_addr_width() -> usize {
    DEFAULT_ADDR_WIDTH
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Processes are queued in ascending start time.
    #[serde(default)]
    pub start_time: u64,
    pub program: Vec<Instruction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    pub time_slot: usize,
    pub num_cpus: usize,
    pub ram_size: usize,
    /// Size of each swap slot in bytes, 0 for an unused slot.
    pub swap_sizes: Vec<usize>,
    #[serde(default)]
    pub active_swap: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_addr_width")]
    pub addr_width: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Swap devices use sequential access.
    #[serde(default)]
    pub sequential_swap: bool,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

impl SimConfig {
    /// Read and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<SimConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        SimConfig::parse(&text)
    }

    pub fn parse(text: &str) -> Result<SimConfig, ConfigError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.time_slot == 0 {
            return Err(ConfigError::Invalid("time_slot must be positive".into()));
        }
        if self.num_cpus == 0 {
            return Err(ConfigError::Invalid("num_cpus must be positive".into()));
        }
        if self.swap_sizes.is_empty() || self.swap_sizes.len() > MAX_SWAP_DEVICES {
            return Err(ConfigError::Invalid(format!(
                "swap_sizes needs 1 to {} entries",
                MAX_SWAP_DEVICES
            )));
        }
        if self.swap_sizes.get(self.active_swap).copied().unwrap_or(0) == 0 {
            return Err(ConfigError::Invalid(format!(
                "active swap {} is not configured",
                self.active_swap
            )));
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level {}", self.log_level)))
    }

    /// Format the RAM and swap devices and bundle them for the address spaces.
    pub fn boot(&self) -> Result<SystemMemory, ConfigError> {
        let paging = PagingConfig::new(self.page_size, self.addr_width)?;
        let swap_mode = if self.sequential_swap {
            AccessMode::Sequential
        } else {
            AccessMode::Random
        };
        let ram = LockedMemPhy::new(MemPhy::new(
            self.ram_size,
            AccessMode::Random,
            self.page_size,
        )?);
        let devices = self
            .swap_sizes
            .iter()
            .map(|&size| match size {
                0 => Ok(None),
                size => Ok(Some(LockedMemPhy::new(MemPhy::new(
                    size,
                    swap_mode,
                    self.page_size,
                )?))),
            })
            .collect::<Result<Vec<_>, MmError>>()?;
        let swap = SwapPool::new(devices, self.active_swap)?;
        Ok(SystemMemory::new(ram, swap, paging)?)
    }
}
