//! Simulated processes and the memory instruction set.

use core::fmt::{Display, Formatter};

use mm::{AddressSpace, MmError, config::DEFAULT_AREA_ID};
use serde::{Deserialize, Serialize};

use crate::task::pid::{Pid, alloc_pid};

/// Number of general purpose registers of a process.
pub const NUM_REGISTERS: usize = 10;

/// One instruction of a simulated program.
///
/// Register indices double as symbol table slots of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Instruction {
    /// Burn one time unit.
    Calc,
    /// Allocate `size` bytes, recording the region in slot `reg` and its address in `reg`.
    Alloc { size: usize, reg: usize },
    /// Release the region of slot `reg`.
    Free { reg: usize },
    /// `regs[dest] = mem[region(source) + offset]`
    Read {
        source: usize,
        offset: usize,
        dest: usize,
    },
    /// `mem[region(dest) + offset] = data`
    Write { data: u8, dest: usize, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The register index is out of range.
    InvalidRegister(usize),
    /// The program counter is past the end of the program.
    Finished,
    Memory(MmError),
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ExecError::InvalidRegister(reg) => write!(f, "invalid register {}", reg),
            ExecError::Finished => f.write_str("process already finished"),
            ExecError::Memory(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<MmError> for ExecError {
    fn from(err: MmError) -> Self {
        ExecError::Memory(err)
    }
}

#[derive(Debug)]
pub struct Process {
    pid: Pid,
    pub regs: [u32; NUM_REGISTERS],
    pc: usize,
    program: Vec<Instruction>,
    space: AddressSpace,
}

impl Process {
    pub fn new(program: Vec<Instruction>, space: AddressSpace) -> Process {
        Process {
            pid: alloc_pid(),
            regs: [0; NUM_REGISTERS],
            pc: 0,
            program,
            space,
        }
    }

    pub fn pid(&self) -> usize {
        self.pid.value()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn is_finished(&self) -> bool {
        self.pc >= self.program.len()
    }

    /// Execute the instruction at the program counter.
    ///
    /// The program counter advances even when the instruction fails.
    pub fn step(&mut self) -> Result<(), ExecError> {
        let inst = *self.program.get(self.pc).ok_or(ExecError::Finished)?;
        self.pc += 1;
        match inst {
            Instruction::Calc => Ok(()),
            Instruction::Alloc { size, reg } => {
                check_reg(reg)?;
                let addr = self.space.alloc(DEFAULT_AREA_ID, reg, size)?;
                self.regs[reg] = addr as u32;
                Ok(())
            }
            Instruction::Free { reg } => {
                check_reg(reg)?;
                Ok(self.space.free(reg)?)
            }
            Instruction::Read {
                source,
                offset,
                dest,
            } => {
                check_reg(source)?;
                check_reg(dest)?;
                let addr = self.space.region_addr(source, offset)?;
                self.regs[dest] = self.space.load(addr)? as u32;
                Ok(())
            }
            Instruction::Write { data, dest, offset } => {
                check_reg(dest)?;
                let addr = self.space.region_addr(dest, offset)?;
                Ok(self.space.store(addr, data)?)
            }
        }
    }

    /// Release the address space.
    pub fn terminate(self) -> Result<(), MmError> {
        self.space.teardown()
    }
}

#[inline(always)]
fn check_reg(reg: usize) -> Result<(), ExecError> {
    if reg >= NUM_REGISTERS {
        return Err(ExecError::InvalidRegister(reg));
    }
    Ok(())
}
