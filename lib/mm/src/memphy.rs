//! # Physical storage devices.
//!
//! A [MemPhy] is a flat block of bytes (the RAM, or one swap unit) partitioned into
//! equal frames. Every frame has a record in an arena, and at rest each frame sits in exactly
//! one of two lists:
//! - the **free list**, a stack: [MemPhy::get_free_frame] pops the head and
//!   [MemPhy::put_free_frame] pushes onto it;
//! - the **used list**, a FIFO threaded through the arena: new frames enter at the head,
//!   the tail is the oldest frame still in use and is the eviction victim.
//!
//! Between [MemPhy::get_free_frame] and [MemPhy::push_used] a frame is *claimed* and in
//! neither list. Callers hold the device lock across that window.
//!
//! Sequential devices model a head-seeking medium: every access rewinds the cursor to zero
//! and walks it forward one cell at a time, wrapping at the end, before touching storage.
//!
//! [LockedMemPhy] is the thread-safe wrapper shared by every process.

use core::fmt::{Debug, Formatter, Write};
use spin::{Mutex, MutexGuard};

use crate::{error::MmError, paging::FrameOwner};

/// Access discipline of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Random,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameList {
    Free,
    Used,
    Claimed,
}

#[derive(Debug)]
struct FrameRecord {
    list: FrameList,
    owner: Option<FrameOwner>,
    /// Towards the head (more recent) of the used list.
    prev: Option<usize>,
    /// Towards the tail (older) of the used list.
    next: Option<usize>,
}

impl FrameRecord {
    const fn free() -> FrameRecord {
        FrameRecord {
            list: FrameList::Free,
            owner: None,
            prev: None,
            next: None,
        }
    }
}

pub struct MemPhy {
    storage: Box<[u8]>,
    mode: AccessMode,
    cursor: usize,
    page_size: usize,
    frames: Vec<FrameRecord>,
    /// Free frame stack, the head is the last element.
    free: Vec<usize>,
    used_head: Option<usize>,
    used_tail: Option<usize>,
    used_len: usize,
}

impl MemPhy {
    /// Create a zeroed device of `size` bytes and format it with `page_size`.
    pub fn new(size: usize, mode: AccessMode, page_size: usize) -> Result<MemPhy, MmError> {
        let mut res = MemPhy {
            storage: vec![0u8; size].into_boxed_slice(),
            mode,
            cursor: 0,
            page_size,
            frames: Vec::new(),
            free: Vec::new(),
            used_head: None,
            used_tail: None,
            used_len: 0,
        };
        res.format(page_size)?;
        Ok(res)
    }

    pub fn size(&self) -> usize {
        self.storage.len()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn used_count(&self) -> usize {
        self.used_len
    }

    // region: storage access

    /// Read a byte, dispatching on the access mode.
    ///
    /// A random-access device rejects addresses past its end; a sequential one wraps them.
    pub fn read(&mut self, addr: usize) -> Result<u8, MmError> {
        match self.mode {
            AccessMode::Random => {
                self.check_addr(addr)?;
                Ok(self.storage[addr])
            }
            AccessMode::Sequential => self.seq_read(addr),
        }
    }

    /// Write a byte, dispatching on the access mode.
    pub fn write(&mut self, addr: usize, value: u8) -> Result<(), MmError> {
        match self.mode {
            AccessMode::Random => {
                self.check_addr(addr)?;
                self.storage[addr] = value;
                Ok(())
            }
            AccessMode::Sequential => self.seq_write(addr, value),
        }
    }

    /// Sequential-access read. Fails with [MmError::ModeMismatch] on a random-access device.
    pub fn seq_read(&mut self, addr: usize) -> Result<u8, MmError> {
        if self.mode != AccessMode::Sequential {
            return Err(MmError::ModeMismatch);
        }
        self.move_cursor(addr);
        Ok(self.storage[self.cursor])
    }

    /// Sequential-access write. Fails with [MmError::ModeMismatch] on a random-access device.
    pub fn seq_write(&mut self, addr: usize, value: u8) -> Result<(), MmError> {
        if self.mode != AccessMode::Sequential {
            return Err(MmError::ModeMismatch);
        }
        self.move_cursor(addr);
        self.storage[self.cursor] = value;
        Ok(())
    }

    /// Rewind the cursor and step it to `offset`, wrapping at the end of the storage.
    fn move_cursor(&mut self, offset: usize) {
        let size = self.size();
        self.cursor = 0;
        for _ in 0..offset % size {
            self.cursor = (self.cursor + 1) % size;
        }
    }

    #[inline(always)]
    fn check_addr(&self, addr: usize) -> Result<(), MmError> {
        if addr >= self.size() {
            return Err(MmError::InvalidAddress);
        }
        Ok(())
    }

    fn check_frame(&self, fpn: usize) -> Result<(), MmError> {
        if fpn >= self.frames.len() {
            return Err(MmError::InvalidFrame);
        }
        Ok(())
    }

    /// Copy the content of frame `fpn` out, byte by byte.
    pub fn read_page(&mut self, fpn: usize) -> Result<Vec<u8>, MmError> {
        self.check_frame(fpn)?;
        let base = fpn * self.page_size;
        (0..self.page_size).map(|i| self.read(base + i)).collect()
    }

    /// Overwrite frame `fpn` with `data`, byte by byte.
    pub fn write_page(&mut self, fpn: usize, data: &[u8]) -> Result<(), MmError> {
        self.check_frame(fpn)?;
        if data.len() != self.page_size {
            return Err(MmError::InvalidPageSize);
        }
        let base = fpn * self.page_size;
        for (i, byte) in data.iter().enumerate() {
            self.write(base + i, *byte)?;
        }
        Ok(())
    }

    /// Hex rendering of the whole storage, one frame per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (fpn, chunk) in self.storage.chunks(self.page_size.max(1)).enumerate() {
            let _ = write!(out, "{:05}:", fpn);
            for byte in chunk {
                let _ = write!(out, " {:02x}", byte);
            }
            out.push('\n');
        }
        out
    }

    // endregion

    // region: frame lists

    /// Partition the storage into `floor(size / page_size)` frames, all free.
    ///
    /// The free list pops frames in ascending order. Any previous list state is discarded.
    pub fn format(&mut self, page_size: usize) -> Result<(), MmError> {
        if page_size == 0 {
            return Err(MmError::InvalidPageSize);
        }
        let count = self.size() / page_size;
        if count == 0 {
            return Err(MmError::InvalidPageSize);
        }
        self.page_size = page_size;
        self.frames = (0..count).map(|_| FrameRecord::free()).collect();
        self.free = (0..count).rev().collect();
        self.used_head = None;
        self.used_tail = None;
        self.used_len = 0;
        debug_ex!(
            "Formatted {} bytes into {} frames of {} bytes.",
            self.size(),
            count,
            page_size
        );
        Ok(())
    }

    /// Pop the head of the free list. The frame is claimed until pushed to a list again.
    pub fn get_free_frame(&mut self) -> Result<usize, MmError> {
        let fpn = self.free.pop().ok_or(MmError::OutOfFrames)?;
        self.frames[fpn].list = FrameList::Claimed;
        Ok(fpn)
    }

    /// Push frame `fpn` onto the head of the free list.
    ///
    /// Accepts claimed frames and used frames (which are unlinked first). Freeing a frame
    /// that is already free is [MmError::InvalidFrame].
    pub fn put_free_frame(&mut self, fpn: usize) -> Result<(), MmError> {
        self.check_frame(fpn)?;
        match self.frames[fpn].list {
            FrameList::Free => return Err(MmError::InvalidFrame),
            FrameList::Used => self.unlink_used(fpn),
            FrameList::Claimed => {}
        }
        let record = &mut self.frames[fpn];
        record.list = FrameList::Free;
        record.owner = None;
        self.free.push(fpn);
        Ok(())
    }

    /// Put a claimed frame at the head of the used list under `owner`.
    pub fn push_used(&mut self, fpn: usize, owner: FrameOwner) -> Result<(), MmError> {
        self.check_frame(fpn)?;
        if self.frames[fpn].list != FrameList::Claimed {
            return Err(MmError::InvalidFrame);
        }
        let old_head = self.used_head;
        {
            let record = &mut self.frames[fpn];
            record.list = FrameList::Used;
            record.owner = Some(owner);
            record.prev = None;
            record.next = old_head;
        }
        match old_head {
            Some(head) => self.frames[head].prev = Some(fpn),
            None => self.used_tail = Some(fpn),
        }
        self.used_head = Some(fpn);
        self.used_len += 1;
        Ok(())
    }

    /// Oldest frame still on the used list.
    pub fn oldest_used(&self) -> Option<usize> {
        self.used_tail
    }

    /// Detach the oldest used frame. It comes back claimed, together with its owner.
    pub fn take_oldest_used(&mut self) -> Option<(usize, Option<FrameOwner>)> {
        let fpn = self.used_tail?;
        self.unlink_used(fpn);
        let record = &mut self.frames[fpn];
        record.list = FrameList::Claimed;
        Some((fpn, record.owner.take()))
    }

    /// Return a frame from the used list to the free list.
    pub fn release_used(&mut self, fpn: usize) -> Result<(), MmError> {
        self.check_frame(fpn)?;
        if self.frames[fpn].list != FrameList::Used {
            return Err(MmError::InvalidFrame);
        }
        self.put_free_frame(fpn)
    }

    /// Hand a used frame over to a new owner, keeping its position in the used list.
    pub fn set_owner(&mut self, fpn: usize, owner: FrameOwner) -> Result<(), MmError> {
        self.check_frame(fpn)?;
        if self.frames[fpn].list != FrameList::Used {
            return Err(MmError::InvalidFrame);
        }
        self.frames[fpn].owner = Some(owner);
        Ok(())
    }

    pub fn owner(&self, fpn: usize) -> Option<&FrameOwner> {
        self.frames.get(fpn).and_then(|record| record.owner.as_ref())
    }

    fn unlink_used(&mut self, fpn: usize) {
        let (prev, next) = {
            let record = &mut self.frames[fpn];
            (record.prev.take(), record.next.take())
        };
        match prev {
            Some(prev) => self.frames[prev].next = next,
            None => self.used_head = next,
        }
        match next {
            Some(next) => self.frames[next].prev = prev,
            None => self.used_tail = prev,
        }
        self.used_len -= 1;
    }

    /// Free frames, head of the stack first.
    pub fn free_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.free.iter().rev().copied()
    }

    /// Used frames, most recent first.
    pub fn used_frames(&self) -> UsedFrames<'_> {
        UsedFrames {
            phy: self,
            cursor: self.used_head,
        }
    }

    /// Whether every frame sits in exactly one of the two lists, exactly once.
    pub fn check_frame_lists(&self) -> bool {
        let mut seen = vec![0u8; self.frames.len()];
        for fpn in self.free.iter().copied() {
            if self.frames[fpn].list != FrameList::Free {
                return false;
            }
            seen[fpn] += 1;
        }
        let mut walked = 0;
        for fpn in self.used_frames() {
            if self.frames[fpn].list != FrameList::Used || walked >= self.frames.len() {
                return false;
            }
            seen[fpn] += 1;
            walked += 1;
        }
        walked == self.used_len && seen.iter().all(|count| *count == 1)
    }

    // endregion
}

/// Iterator over the used list, head (most recent) to tail (oldest).
pub struct UsedFrames<'a> {
    phy: &'a MemPhy,
    cursor: Option<usize>,
}

impl Iterator for UsedFrames<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let fpn = self.cursor?;
        self.cursor = self.phy.frames[fpn].next;
        Some(fpn)
    }
}

impl Debug for MemPhy {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemPhy")
            .field("size", &self.size())
            .field("mode", &self.mode)
            .field("page_size", &self.page_size)
            .field("free", &self.free_count())
            .field("used", &self.used_count())
            .finish()
    }
}

/// Copy one page from `src` frame `src_fpn` into `dst` frame `dst_fpn`, byte by byte.
///
/// Both devices must share the page size. Each byte goes through the device's own access
/// discipline.
pub fn swap_copy_page(
    src: &mut MemPhy,
    src_fpn: usize,
    dst: &mut MemPhy,
    dst_fpn: usize,
) -> Result<(), MmError> {
    if src.page_size != dst.page_size {
        return Err(MmError::InvalidPageSize);
    }
    src.check_frame(src_fpn)?;
    dst.check_frame(dst_fpn)?;
    let page_size = src.page_size;
    for cell in 0..page_size {
        let data = src.read(src_fpn * page_size + cell)?;
        dst.write(dst_fpn * page_size + cell, data)?;
    }
    Ok(())
}

/// Thread-safe wrapper around a [MemPhy].
///
/// The lock is held for the whole of every list operation, and for the whole of a page
/// migration together with the lock of the other device.
#[derive(Debug)]
pub struct LockedMemPhy {
    inner: Mutex<MemPhy>,
}

impl LockedMemPhy {
    pub const fn new(phy: MemPhy) -> LockedMemPhy {
        LockedMemPhy {
            inner: Mutex::new(phy),
        }
    }

    /// Acquire the device lock.
    #[inline(always)]
    pub fn lock(&self) -> MutexGuard<'_, MemPhy> {
        self.inner.lock()
    }

    pub fn get_free_frame(&self) -> Result<usize, MmError> {
        self.lock().get_free_frame()
    }

    pub fn put_free_frame(&self, fpn: usize) -> Result<(), MmError> {
        self.lock().put_free_frame(fpn)
    }

    pub fn format(&self, page_size: usize) -> Result<(), MmError> {
        self.lock().format(page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_builds_ascending_free_list() {
        let phy = MemPhy::new(64, AccessMode::Random, 16).unwrap();
        assert_eq!(phy.frame_count(), 4);
        assert_eq!(phy.free_frames().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(phy.check_frame_lists());
    }

    #[test]
    fn test_format_truncates_partial_frame() {
        let phy = MemPhy::new(70, AccessMode::Random, 16).unwrap();
        assert_eq!(phy.frame_count(), 4);
    }

    #[test]
    fn test_format_rejects_oversized_page() {
        assert_eq!(
            MemPhy::new(8, AccessMode::Random, 16).unwrap_err(),
            MmError::InvalidPageSize
        );
        assert_eq!(
            MemPhy::new(8, AccessMode::Random, 0).unwrap_err(),
            MmError::InvalidPageSize
        );
    }

    #[test]
    fn test_free_frame_is_lifo() {
        let mut phy = MemPhy::new(64, AccessMode::Random, 16).unwrap();
        assert_eq!(phy.get_free_frame(), Ok(0));
        assert_eq!(phy.get_free_frame(), Ok(1));
        phy.put_free_frame(0).unwrap();
        assert_eq!(phy.get_free_frame(), Ok(0));
        assert_eq!(phy.get_free_frame(), Ok(2));
        assert_eq!(phy.get_free_frame(), Ok(3));
        assert_eq!(phy.get_free_frame(), Err(MmError::OutOfFrames));
    }

    #[test]
    fn test_double_free_rejected() {
        let mut phy = MemPhy::new(32, AccessMode::Random, 16).unwrap();
        assert_eq!(phy.put_free_frame(1), Err(MmError::InvalidFrame));
        assert_eq!(phy.put_free_frame(9), Err(MmError::InvalidFrame));
        assert!(phy.check_frame_lists());
    }

    #[test]
    fn test_used_list_fifo_order() {
        let mut phy = MemPhy::new(64, AccessMode::Random, 16).unwrap();
        for _ in 0..3 {
            let fpn = phy.get_free_frame().unwrap();
            phy.push_used(fpn, FrameOwner::detached(fpn)).unwrap();
        }
        assert_eq!(phy.used_frames().collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(phy.oldest_used(), Some(0));
        assert!(phy.check_frame_lists());

        let (victim, owner) = phy.take_oldest_used().unwrap();
        assert_eq!(victim, 0);
        assert_eq!(owner.map(|o| o.pgn), Some(0));
        assert_eq!(phy.oldest_used(), Some(1));
        // claimed frame is in neither list until returned
        assert!(!phy.check_frame_lists());
        phy.put_free_frame(victim).unwrap();
        assert!(phy.check_frame_lists());
    }

    #[test]
    fn test_release_middle_of_used_list() {
        let mut phy = MemPhy::new(64, AccessMode::Random, 16).unwrap();
        for _ in 0..4 {
            let fpn = phy.get_free_frame().unwrap();
            phy.push_used(fpn, FrameOwner::detached(fpn)).unwrap();
        }
        phy.release_used(2).unwrap();
        assert_eq!(phy.release_used(2), Err(MmError::InvalidFrame));
        assert_eq!(phy.used_frames().collect::<Vec<_>>(), vec![3, 1, 0]);
        assert_eq!(phy.used_count(), 3);
        assert_eq!(phy.free_frames().collect::<Vec<_>>(), vec![2]);
        assert!(phy.check_frame_lists());
    }

    #[test]
    fn test_push_used_requires_claim() {
        let mut phy = MemPhy::new(32, AccessMode::Random, 16).unwrap();
        assert_eq!(
            phy.push_used(0, FrameOwner::detached(0)),
            Err(MmError::InvalidFrame)
        );
    }

    #[test]
    fn test_random_read_write() {
        let mut phy = MemPhy::new(32, AccessMode::Random, 16).unwrap();
        phy.write(17, 0xab).unwrap();
        assert_eq!(phy.read(17), Ok(0xab));
        assert_eq!(phy.read(32), Err(MmError::InvalidAddress));
        assert_eq!(phy.seq_read(0), Err(MmError::ModeMismatch));
        assert_eq!(phy.seq_write(0, 1), Err(MmError::ModeMismatch));
    }

    #[test]
    fn test_sequential_restarts_walk() {
        let mut phy = MemPhy::new(32, AccessMode::Sequential, 16).unwrap();
        phy.write(20, 7).unwrap();
        assert_eq!(phy.cursor(), 20);
        phy.write(3, 9).unwrap();
        assert_eq!(phy.cursor(), 3);
        assert_eq!(phy.read(20), Ok(7));
        assert_eq!(phy.cursor(), 20);
        assert_eq!(phy.seq_read(3), Ok(9));
        assert_eq!(phy.cursor(), 3);
    }

    #[test]
    fn test_sequential_wraps_past_end() {
        let mut phy = MemPhy::new(32, AccessMode::Sequential, 16).unwrap();
        phy.write(3, 9).unwrap();
        assert_eq!(phy.read(35), Ok(9));
        assert_eq!(phy.cursor(), 3);
        phy.seq_write(32 * 2 + 17, 4).unwrap();
        assert_eq!(phy.read(17), Ok(4));
        assert_eq!(phy.seq_read(32), Ok(0));
        assert_eq!(phy.cursor(), 0);
    }

    #[test]
    fn test_swap_copy_page_across_modes() {
        let mut ram = MemPhy::new(32, AccessMode::Random, 16).unwrap();
        let mut swp = MemPhy::new(48, AccessMode::Sequential, 16).unwrap();
        let data: Vec<u8> = (0..16).collect();
        ram.write_page(1, &data).unwrap();
        swap_copy_page(&mut ram, 1, &mut swp, 2).unwrap();
        assert_eq!(swp.read_page(2).unwrap(), data);
    }

    #[test]
    fn test_swap_copy_page_size_mismatch() {
        let mut a = MemPhy::new(32, AccessMode::Random, 16).unwrap();
        let mut b = MemPhy::new(32, AccessMode::Random, 8).unwrap();
        assert_eq!(
            swap_copy_page(&mut a, 0, &mut b, 0),
            Err(MmError::InvalidPageSize)
        );
    }

    #[test]
    fn test_dump_lists_frames() {
        let mut phy = MemPhy::new(8, AccessMode::Random, 4).unwrap();
        phy.write(5, 0xff).unwrap();
        assert_eq!(phy.dump(), "00000: 00 00 00 00\n00001: 00 ff 00 00\n");
    }
}
