use crate::task::process::Process;

mod fifo;
pub type DefaultScheduler = fifo::FifoScheduler;

/// Run queue shared by every processor.
pub trait Scheduler {
    fn add_to_ready(&mut self, process: Box<Process>);
    fn fetch_new(&mut self) -> Option<Box<Process>>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
