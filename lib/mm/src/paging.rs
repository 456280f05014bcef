//! # Page tables and the page mapper.
//!
//! [PageTable] holds one [PageTableEntry] per virtual page together with the resident-page
//! history of its address space. The table is shared behind a [Handle] so device frame
//! records can reach it through a weak [FrameOwner] back-reference when the frame is chosen
//! as an eviction victim.

use core::fmt::Write;
use std::collections::VecDeque;

use spin::Mutex;

use crate::{
    error::MmError,
    handle::{Handle, HandleRef},
    memphy::MemPhy,
    pte::{PageState, PageTableEntry},
};

/// Identifier of an address space.
pub type SpaceId = usize;

/// Page table shared between its address space and the frame records pointing at it.
pub type SharedPageTable = Handle<Mutex<PageTable>>;

/// Back-reference from a frame to the virtual page it backs.
///
/// Diagnostic and bookkeeping only. It never keeps the owning space alive.
#[derive(Debug, Clone)]
pub struct FrameOwner {
    pub space: SpaceId,
    pub pgn: usize,
    pub table: HandleRef<Mutex<PageTable>>,
}

impl FrameOwner {
    pub fn new(space: SpaceId, pgn: usize, table: &SharedPageTable) -> FrameOwner {
        FrameOwner {
            space,
            pgn,
            table: table.create_ref(),
        }
    }

    /// An owner record with no reachable page table.
    pub const fn detached(pgn: usize) -> FrameOwner {
        FrameOwner {
            space: 0,
            pgn,
            table: HandleRef::dangling(),
        }
    }
}

/// A location on a swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapSlot {
    pub device: usize,
    pub offset: usize,
}

#[derive(Debug)]
pub struct PageTable {
    entries: Box<[PageTableEntry]>,
    /// Resident page numbers, most recently mapped first.
    history: VecDeque<usize>,
}

impl PageTable {
    /// A table of `max_pgn` unmapped entries.
    pub fn new(max_pgn: usize) -> PageTable {
        PageTable {
            entries: vec![PageTableEntry::empty(); max_pgn].into_boxed_slice(),
            history: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, pgn: usize) -> Result<PageTableEntry, MmError> {
        self.entries
            .get(pgn)
            .copied()
            .ok_or(MmError::InvalidAddress)
    }

    pub fn entry_mut(&mut self, pgn: usize) -> Result<&mut PageTableEntry, MmError> {
        self.entries.get_mut(pgn).ok_or(MmError::InvalidAddress)
    }

    /// Point `pgn` at RAM frame `frame` and record it as the most recent resident page.
    pub fn map_resident(&mut self, pgn: usize, frame: usize) -> Result<(), MmError> {
        self.entry_mut(pgn)?.set_resident(frame);
        self.forget(pgn);
        self.history.push_front(pgn);
        Ok(())
    }

    /// Point `pgn` at a swap location. The page leaves the resident history.
    pub fn mark_swapped(&mut self, pgn: usize, slot: SwapSlot) -> Result<(), MmError> {
        self.entry_mut(pgn)?.set_swapped(slot.device, slot.offset);
        self.forget(pgn);
        Ok(())
    }

    pub fn unmap(&mut self, pgn: usize) -> Result<(), MmError> {
        self.entry_mut(pgn)?.clear();
        self.forget(pgn);
        Ok(())
    }

    fn forget(&mut self, pgn: usize) {
        self.history.retain(|p| *p != pgn);
    }

    /// Resident page numbers, most recently mapped first.
    pub fn resident_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().copied()
    }

    /// Every present entry with its page number.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, PageState)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, pte)| pte.is_present())
            .map(|(pgn, pte)| (pgn, pte.decode()))
    }

    /// Raw entries of pages `start..end`, one per line.
    pub fn dump(&self, start: usize, end: usize) -> String {
        let mut out = String::new();
        let end = end.min(self.entries.len());
        for pgn in start..end {
            let _ = writeln!(out, "{:05}: {:?}", pgn, self.entries[pgn]);
        }
        out
    }

    /// Drop every entry and the history.
    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(PageTableEntry::clear);
        self.history.clear();
    }
}

/// Install a resident translation of `pgn` to `frame` and hand the frame to the RAM used list.
///
/// `frame` must be claimed on `ram`.
pub fn map_frame(
    ram: &mut MemPhy,
    table: &mut PageTable,
    owner: FrameOwner,
    frame: usize,
) -> Result<(), MmError> {
    let pgn = owner.pgn;
    table.entry(pgn)?;
    ram.push_used(frame, owner)?;
    table.map_resident(pgn, frame)
}
