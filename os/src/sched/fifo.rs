use std::collections::VecDeque;

use crate::{sched::Scheduler, task::process::Process};

#[derive(Default)]
pub struct FifoScheduler {
    queue: VecDeque<Box<Process>>,
}

impl FifoScheduler {
    pub fn new() -> FifoScheduler {
        FifoScheduler {
            queue: VecDeque::new(),
        }
    }
}

impl Scheduler for FifoScheduler {
    fn add_to_ready(&mut self, process: Box<Process>) {
        self.queue.push_back(process);
    }

    fn fetch_new(&mut self) -> Option<Box<Process>> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
