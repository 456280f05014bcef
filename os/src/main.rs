//! Paging memory simulator.
//!
//! Boots a RAM device and a swap pool from a JSON configuration, loads the configured
//! processes into a FIFO run queue and runs them on `num_cpus` simulated processors.

use core::sync::atomic::AtomicUsize;
use std::{env, process::ExitCode, thread};

use log::{LevelFilter, error, info, warn};
use mm::AddressSpace;
use spin::Mutex;

use crate::{
    config::{ConfigError, SimConfig},
    sched::{DefaultScheduler, Scheduler},
    task::{process::Process, processor::Processor},
};

pub mod config;
pub mod logging;
pub mod sched;
pub mod task;

fn main() -> ExitCode {
    let Some(path) = env::args().nth(1) else {
        eprintln!("Usage: os [path to configure file]");
        return ExitCode::FAILURE;
    };
    if let Err(err) = logging::init(LevelFilter::Info) {
        eprintln!("Error initializing logger: {}", err);
        return ExitCode::FAILURE;
    }
    match run(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> Result<(), ConfigError> {
    let config = SimConfig::load(path)?;
    log::set_max_level(config.level_filter()?);
    let mem = config.boot()?;
    info!(
        "Booted {} RAM frames of {} bytes, active swap {}.",
        mem.ram.lock().frame_count(),
        mem.config.page_size(),
        mem.swap.active_id()
    );

    let mut processes = config.processes.clone();
    processes.sort_by_key(|process| process.start_time);
    let queue = Mutex::new(DefaultScheduler::new());
    for process in processes {
        let process = Process::new(process.program, AddressSpace::bootstrap(mem.clone()));
        info!("Loaded a process, PID: {}", process.pid());
        queue.lock().add_to_ready(Box::new(process));
    }
    let live = AtomicUsize::new(queue.lock().len());

    thread::scope(|s| {
        for id in 0..config.num_cpus {
            let (queue, live) = (&queue, &live);
            let processor = Processor::new(id, config.time_slot);
            s.spawn(move || processor.run(queue, live));
        }
    });

    let ram = mem.ram.lock();
    info!(
        "Finished: {} of {} RAM frames free, {} swap frames free.",
        ram.free_count(),
        ram.frame_count(),
        mem.swap.free_count()
    );
    drop(ram);
    if !mem.check_frame_lists() {
        warn!("Frame lists are inconsistent after shutdown.");
    }
    Ok(())
}
