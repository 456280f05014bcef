//! Errors raised by the memory-management core.

use core::fmt::{Display, Formatter};

/// Memory-management errors.
///
/// Device failures surface unchanged to the frame allocator, which folds the outcome of a
/// whole multi-frame request into one result. The address-space operations propagate that
/// result without translating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// A frame number is out of range, already free, or not in the expected list.
    InvalidFrame,
    /// A sequential-access primitive was used on a random-access device.
    ModeMismatch,
    /// The device has no free frame left.
    OutOfFrames,
    /// Neither RAM nor the active swap device can satisfy the request.
    OutOfMemory,
    /// The page size does not fit the device (zero frames) or the configuration.
    InvalidPageSize,
    /// The swap slot addressed is not configured.
    NullDevice,
    /// More swap devices were supplied than the pool supports.
    DeviceLimit,
    /// An address lies outside the page table, the segment, or the device.
    InvalidAddress,
    /// The target page is already mapped.
    AlreadyMapped,
    /// Access to a page that is not present.
    PageFault,
    /// The symbol table slot is out of range or holds no region.
    InvalidRegion,
    /// No segment carries the requested id.
    AreaNotFound,
}

impl Display for MmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            MmError::InvalidFrame => "invalid frame number",
            MmError::ModeMismatch => "device access mode mismatch",
            MmError::OutOfFrames => "device out of frames",
            MmError::OutOfMemory => "out of memory in both RAM and swap",
            MmError::InvalidPageSize => "invalid page size",
            MmError::NullDevice => "device not configured",
            MmError::DeviceLimit => "too many swap devices",
            MmError::InvalidAddress => "address out of range",
            MmError::AlreadyMapped => "page already mapped",
            MmError::PageFault => "access to unmapped page",
            MmError::InvalidRegion => "invalid region slot",
            MmError::AreaNotFound => "memory area not found",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for MmError {}
