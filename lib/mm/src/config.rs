//! Paging geometry and fixed limits.

use utils::num::AlignableTo;

use crate::error::MmError;

/// Maximum number of swap devices in a [crate::swap::SwapPool].
pub const MAX_SWAP_DEVICES: usize = 4;

/// Number of slots in the per-space symbol table.
pub const SYMBOL_TABLE_SIZE: usize = 30;

/// Id of the segment created when an address space is bootstrapped.
pub const DEFAULT_AREA_ID: usize = 1;

/// Default page size, 256B.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Default width of a virtual address, 22 bits (4MiB of address space).
pub const DEFAULT_ADDR_WIDTH: usize = 22;

/// Widest virtual address supported.
pub const MAX_ADDR_WIDTH: usize = 32;

/// Page size and virtual address width shared by every device and address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    page_size: usize,
    addr_width: usize,
}

impl PagingConfig {
    /// Create a validated geometry.
    ///
    /// The page size must be non-zero and no larger than the address space.
    pub fn new(page_size: usize, addr_width: usize) -> Result<PagingConfig, MmError> {
        if addr_width == 0 || addr_width > MAX_ADDR_WIDTH {
            return Err(MmError::InvalidAddress);
        }
        if page_size == 0 || page_size > (1 << addr_width) {
            return Err(MmError::InvalidPageSize);
        }
        Ok(PagingConfig {
            page_size,
            addr_width,
        })
    }

    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    pub const fn addr_width(&self) -> usize {
        self.addr_width
    }

    /// Size of the virtual address space in bytes.
    pub const fn addr_space_size(&self) -> usize {
        1 << self.addr_width
    }

    /// Number of page table entries, one per virtual page.
    pub const fn max_pgn(&self) -> usize {
        self.addr_space_size().div_ceil(self.page_size)
    }

    /// Page number of a virtual address.
    #[inline(always)]
    pub const fn pgn(&self, addr: usize) -> usize {
        addr / self.page_size
    }

    /// Offset of a virtual address inside its page.
    #[inline(always)]
    pub const fn offset(&self, addr: usize) -> usize {
        addr % self.page_size
    }

    /// Round a byte count up to whole pages. Fails with [MmError::InvalidAddress] on overflow.
    #[inline(always)]
    pub fn page_align(&self, size: usize) -> Result<usize, MmError> {
        size.align_up(self.page_size).ok_or(MmError::InvalidAddress)
    }

    #[inline(always)]
    pub fn is_page_aligned(&self, addr: usize) -> bool {
        addr.is_aligned_to(self.page_size)
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        PagingConfig {
            page_size: DEFAULT_PAGE_SIZE,
            addr_width: DEFAULT_ADDR_WIDTH,
        }
    }
}
