//! # Paging-based memory management for the simulator.
//!
//! A small RAM device and up to [config::MAX_SWAP_DEVICES] swap devices are shared by every
//! simulated process. Each process owns an [space::AddressSpace] that translates its virtual
//! pages either to a RAM frame or to a location on one of the swap devices.
//!
//! Bottom-up:
//! - [pte] encodes and decodes page table entries.
//! - [handle] provides the shared and weak handles used to find a frame's owner.
//! - [memphy] emulates one physical storage device and tracks its frames.
//! - [swap] groups the swap devices and the shared [swap::SystemMemory] handles.
//! - [region] keeps the free regions of a segment.
//! - [frame] hands out frames, evicting the oldest resident page when RAM runs out.
//! - [paging] owns the page table and installs translations.
//! - [space] composes all of the above into the per-process address space.
//!
//! ## Locking
//! Locks are always taken in this order: the RAM device, swap devices by ascending id,
//! the page table of the calling space, and finally the page table owning an eviction victim.
//! Only the holder of the RAM lock may lock a page table other than its own.

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod frame;
pub mod handle;
pub mod memphy;
pub mod paging;
pub mod pte;
pub mod region;
pub mod space;
pub mod swap;

pub use config::PagingConfig;
pub use error::MmError;
pub use handle::{Handle, HandleRef};
pub use memphy::{AccessMode, LockedMemPhy, MemPhy};
pub use paging::{FrameOwner, PageTable, SwapSlot};
pub use pte::{PageState, PageTableEntry};
pub use region::{VmArea, VmRegion};
pub use space::AddressSpace;
pub use swap::{SwapPool, SystemMemory};
