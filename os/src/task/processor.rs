use core::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{debug, info, warn};
use spin::Mutex;

use crate::sched::{DefaultScheduler, Scheduler};

/// A simulated processor draining the shared run queue.
pub struct Processor {
    id: usize,
    time_slot: usize,
}

impl Processor {
    pub fn new(id: usize, time_slot: usize) -> Processor {
        Processor { id, time_slot }
    }

    /// Run processes from `queue` until `live` processes drop to zero.
    ///
    /// A process runs for at most one time slot before it is put back at the tail of the
    /// queue. A finished process is torn down and decrements `live`.
    pub fn run(&self, queue: &Mutex<DefaultScheduler>, live: &AtomicUsize) {
        loop {
            let next = queue.lock().fetch_new();
            let Some(mut process) = next else {
                if live.load(Ordering::Acquire) == 0 {
                    break;
                }
                thread::yield_now();
                continue;
            };
            info!("CPU {}: Dispatched process {:2}", self.id, process.pid());
            for _ in 0..self.time_slot {
                if process.is_finished() {
                    break;
                }
                let pc = process.pc();
                if let Err(err) = process.step() {
                    warn!(
                        "CPU {}: Process {:2} instruction {} failed: {}",
                        self.id,
                        process.pid(),
                        pc,
                        err
                    );
                }
            }
            if process.is_finished() {
                let pid = process.pid();
                info!("CPU {}: Process {:2} has finished", self.id, pid);
                if let Err(err) = (*process).terminate() {
                    warn!("CPU {}: Process {:2} teardown failed: {}", self.id, pid, err);
                }
                live.fetch_sub(1, Ordering::AcqRel);
            } else {
                debug!("CPU {}: Put process {:2} to run queue", self.id, process.pid());
                queue.lock().add_to_ready(process);
            }
        }
        info!("CPU {} stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::process::{Instruction, Process};
    use mm::{
        AccessMode, AddressSpace, LockedMemPhy, MemPhy, PagingConfig, SwapPool, SystemMemory,
    };

    #[test]
    fn test_processors_drain_queue() {
        let config = PagingConfig::new(8, 12).unwrap();
        let ram = LockedMemPhy::new(MemPhy::new(32, AccessMode::Random, 8).unwrap());
        let swap = SwapPool::new(
            vec![Some(LockedMemPhy::new(
                MemPhy::new(128, AccessMode::Random, 8).unwrap(),
            ))],
            0,
        )
        .unwrap();
        let mem = SystemMemory::new(ram, swap, config).unwrap();
        let program = vec![
            Instruction::Alloc { size: 20, reg: 0 },
            Instruction::Write {
                data: 1,
                dest: 0,
                offset: 19,
            },
            Instruction::Read {
                source: 0,
                offset: 19,
                dest: 1,
            },
            Instruction::Free { reg: 0 },
        ];
        let queue = Mutex::new(DefaultScheduler::new());
        for _ in 0..4 {
            let process = Process::new(program.clone(), AddressSpace::bootstrap(mem.clone()));
            queue.lock().add_to_ready(Box::new(process));
        }
        let live = AtomicUsize::new(4);
        thread::scope(|s| {
            for id in 0..2 {
                let (queue, live) = (&queue, &live);
                s.spawn(move || Processor::new(id, 2).run(queue, live));
            }
        });
        assert!(queue.lock().is_empty());
        assert_eq!(live.load(Ordering::Acquire), 0);
        assert_eq!(mem.ram.lock().free_count(), 4);
        assert!(mem.check_frame_lists());
    }
}
