pub mod pid;
pub mod process;
pub mod processor;
