//! Page table entries.
//!
//! One 32-bit word per virtual page:
//! ```text
//!  31  30  29  28  27        26 25                 13 12            0
//! +---+---+---+---+------------+---------------------+---------------+
//! | P | S | R | D |  reserved  |       unused        |      FPN      |   resident
//! +---+---+---+---+------------+---------------------+---------------+
//! | P | S | R | D |  reserved  |    SWAP OFFSET (21 bits)  |  TYPE   |   swapped
//! +---+---+---+---+------------+---------------------------+---------+
//!                               25                        5 4       0
//! ```
//! `P` present, `S` swapped, `R` reserved, `D` dirty.
//! The frame number and the swap fields overlap; the `S` bit says which one is live.

use bitflags::bitflags;
use core::fmt::{Debug, Formatter};

use crate::error::MmError;

bitflags! {
    /// Status bits of a [PageTableEntry].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// The page is mapped, in RAM or on swap.
        const PRESENT = 1 << 31;
        /// The page lives on a swap device.
        const SWAPPED = 1 << 30;
        /// Reserved for the simulator.
        const RESERVED = 1 << 29;
        /// The page was written since it was last brought into RAM.
        const DIRTY = 1 << 28;
    }
}

const FPN_WIDTH: u32 = 13;
const FPN_SHIFT: u32 = 0;
const SWPTYP_WIDTH: u32 = 5;
const SWPTYP_SHIFT: u32 = 0;
const SWPOFF_WIDTH: u32 = 21;
const SWPOFF_SHIFT: u32 = 5;

/// Largest frame number a resident entry can hold.
pub const MAX_FPN: usize = (1 << FPN_WIDTH) - 1;
/// Largest swap device id a swapped entry can hold.
pub const MAX_SWAP_TYPE: usize = (1 << SWPTYP_WIDTH) - 1;
/// Largest swap offset (in frames) a swapped entry can hold.
pub const MAX_SWAP_OFFSET: usize = (1 << SWPOFF_WIDTH) - 1;

#[inline(always)]
const fn field(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & ((1 << width) - 1)
}

#[inline(always)]
const fn place(value: usize, shift: u32, width: u32) -> u32 {
    ((value as u32) & ((1 << width) - 1)) << shift
}

/// Decoded view of a [PageTableEntry].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not mapped; any access faults.
    Unmapped,
    /// Backed by RAM frame `frame`.
    Resident { frame: usize, dirty: bool },
    /// Backed by frame `offset` of swap device `device`.
    Swapped { device: usize, offset: usize },
}

/// A page table entry. Only mutated through the constructors and setters below.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageTableEntry(u32);

impl PageTableEntry {
    /// An unmapped entry.
    pub const fn empty() -> PageTableEntry {
        PageTableEntry(0)
    }

    /// Reinterpret a raw word.
    pub const fn from_bits(bits: u32) -> PageTableEntry {
        PageTableEntry(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub const fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub const fn is_swapped(&self) -> bool {
        self.flags().contains(PteFlags::SWAPPED)
    }

    pub const fn is_dirty(&self) -> bool {
        self.flags().contains(PteFlags::DIRTY)
    }

    /// Frame number field. Only meaningful on a resident entry.
    pub const fn frame(&self) -> usize {
        field(self.0, FPN_SHIFT, FPN_WIDTH) as usize
    }

    /// Swap device id field. Only meaningful on a swapped entry.
    pub const fn swap_device(&self) -> usize {
        field(self.0, SWPTYP_SHIFT, SWPTYP_WIDTH) as usize
    }

    /// Swap offset field. Only meaningful on a swapped entry.
    pub const fn swap_offset(&self) -> usize {
        field(self.0, SWPOFF_SHIFT, SWPOFF_WIDTH) as usize
    }

    /// Entry for a page resident in RAM frame `frame`: present, not swapped, clean.
    pub const fn resident(frame: usize) -> PageTableEntry {
        debug_assert!(frame <= MAX_FPN);
        PageTableEntry(PteFlags::PRESENT.bits() | place(frame, FPN_SHIFT, FPN_WIDTH))
    }

    /// Entry for a page stored at frame `offset` of swap device `device`.
    pub const fn swapped(device: usize, offset: usize) -> PageTableEntry {
        debug_assert!(device <= MAX_SWAP_TYPE && offset <= MAX_SWAP_OFFSET);
        PageTableEntry(
            PteFlags::PRESENT.bits()
                | PteFlags::SWAPPED.bits()
                | place(device, SWPTYP_SHIFT, SWPTYP_WIDTH)
                | place(offset, SWPOFF_SHIFT, SWPOFF_WIDTH),
        )
    }

    /// Overwrite with a resident mapping of `frame`.
    pub fn set_resident(&mut self, frame: usize) {
        *self = PageTableEntry::resident(frame);
    }

    /// Overwrite with a swapped mapping. Setting the same location twice is a no-op.
    pub fn set_swapped(&mut self, device: usize, offset: usize) {
        *self = PageTableEntry::swapped(device, offset);
    }

    /// General constructor.
    ///
    /// A present, non-swapped entry needs a frame; `None` or a frame wider than the field is
    /// [MmError::InvalidFrame]. A swapped entry whose device or offset does not fit is
    /// rejected the same way. A non-present entry ignores every other argument.
    pub fn init_entry(
        present: bool,
        frame: Option<usize>,
        dirty: bool,
        swapped: bool,
        device: usize,
        offset: usize,
    ) -> Result<PageTableEntry, MmError> {
        if !present {
            return Ok(PageTableEntry::empty());
        }
        let mut entry = if swapped {
            if device > MAX_SWAP_TYPE || offset > MAX_SWAP_OFFSET {
                return Err(MmError::InvalidFrame);
            }
            PageTableEntry::swapped(device, offset)
        } else {
            match frame {
                Some(frame) if frame <= MAX_FPN => PageTableEntry::resident(frame),
                _ => return Err(MmError::InvalidFrame),
            }
        };
        if dirty {
            entry.0 |= PteFlags::DIRTY.bits();
        }
        Ok(entry)
    }

    /// Set the dirty bit of a resident entry. Other entries are left alone.
    pub fn mark_dirty(&mut self) {
        if self.is_present() && !self.is_swapped() {
            self.0 |= PteFlags::DIRTY.bits();
        }
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn decode(&self) -> PageState {
        if !self.is_present() {
            PageState::Unmapped
        } else if self.is_swapped() {
            PageState::Swapped {
                device: self.swap_device(),
                offset: self.swap_offset(),
            }
        } else {
            PageState::Resident {
                frame: self.frame(),
                dirty: self.is_dirty(),
            }
        }
    }
}

impl Debug for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{:#010x}", self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resident_round_trip() {
        for frame in [0, 1, 7, 255, MAX_FPN] {
            let pte = PageTableEntry::resident(frame);
            assert!(pte.is_present());
            assert!(!pte.is_swapped());
            assert!(!pte.is_dirty());
            assert_eq!(
                pte.decode(),
                PageState::Resident {
                    frame,
                    dirty: false
                }
            );
        }
    }

    #[test]
    fn test_swapped_round_trip() {
        for (device, offset) in [(0, 0), (3, 1), (MAX_SWAP_TYPE, MAX_SWAP_OFFSET), (1, 4096)] {
            let pte = PageTableEntry::swapped(device, offset);
            assert!(pte.is_present());
            assert!(pte.is_swapped());
            assert_eq!(pte.decode(), PageState::Swapped { device, offset });
        }
    }

    #[test]
    fn test_set_swapped_overwrites_resident() {
        let mut pte = PageTableEntry::resident(42);
        pte.mark_dirty();
        pte.set_swapped(2, 9);
        pte.set_swapped(2, 9);
        assert_eq!(pte, PageTableEntry::swapped(2, 9));
        assert!(!pte.is_dirty());
    }

    #[test]
    fn test_set_resident_clears_swap_state() {
        let mut pte = PageTableEntry::swapped(3, 1000);
        pte.set_resident(5);
        assert_eq!(pte.bits(), PteFlags::PRESENT.bits() | 5);
    }

    #[test]
    fn test_init_entry_requires_frame() {
        assert_eq!(
            PageTableEntry::init_entry(true, None, false, false, 0, 0),
            Err(MmError::InvalidFrame)
        );
        assert_eq!(
            PageTableEntry::init_entry(true, Some(MAX_FPN + 1), false, false, 0, 0),
            Err(MmError::InvalidFrame)
        );
        let pte = PageTableEntry::init_entry(true, Some(0), true, false, 0, 0).unwrap();
        assert_eq!(pte.decode(), PageState::Resident { frame: 0, dirty: true });
    }

    #[test]
    fn test_init_entry_swapped_and_absent() {
        let pte = PageTableEntry::init_entry(true, None, false, true, 1, 77).unwrap();
        assert_eq!(pte.decode(), PageState::Swapped { device: 1, offset: 77 });
        assert_eq!(
            PageTableEntry::init_entry(true, None, false, true, MAX_SWAP_TYPE + 1, 0),
            Err(MmError::InvalidFrame)
        );
        let pte = PageTableEntry::init_entry(false, Some(3), true, false, 0, 0).unwrap();
        assert_eq!(pte.decode(), PageState::Unmapped);
    }

    #[test]
    fn test_mark_dirty_only_on_resident() {
        let mut pte = PageTableEntry::empty();
        pte.mark_dirty();
        assert_eq!(pte, PageTableEntry::empty());
        let mut pte = PageTableEntry::resident(1);
        pte.mark_dirty();
        assert!(pte.is_dirty());
    }
}
