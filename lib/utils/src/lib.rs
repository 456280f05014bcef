//! Small helpers shared by the memory-management crates.

pub mod num;
pub mod range;
