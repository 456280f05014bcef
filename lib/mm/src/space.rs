//! # Address spaces.
//!
//! An [AddressSpace] is the per-process view of memory: a page table, the segments carved
//! out of the virtual address range, and a symbol table of allocated regions. It reaches the
//! shared devices through the [SystemMemory] handles it was bootstrapped with.
//!
//! Every operation touching both a device and the page table locks the RAM device first.
//! Entries of a page table are only ever rewritten under the RAM lock, so a reader holding it
//! may peek at an entry, drop the table lock, and rely on the entry staying put.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    config::{DEFAULT_AREA_ID, PagingConfig, SYMBOL_TABLE_SIZE},
    error::MmError,
    frame::{self, ActiveSwap, OwnTable},
    handle::Handle,
    memphy::MemPhy,
    paging::{FrameOwner, PageTable, SharedPageTable, SpaceId, SwapSlot, map_frame},
    pte::PageState,
    region::{VmArea, VmRegion},
    swap::SystemMemory,
};

static NEXT_SPACE_ID: AtomicUsize = AtomicUsize::new(1);

pub struct AddressSpace {
    id: SpaceId,
    mem: SystemMemory,
    page_table: SharedPageTable,
    areas: Vec<VmArea>,
    symbols: [Option<VmRegion>; SYMBOL_TABLE_SIZE],
    released: bool,
}

impl AddressSpace {
    /// Create an address space over the shared devices.
    ///
    /// The page table covers every page of the configured address width and starts unmapped.
    /// One segment with [DEFAULT_AREA_ID] and an empty range is created at address 0, holding
    /// a single empty free region.
    pub fn bootstrap(mem: SystemMemory) -> AddressSpace {
        let id = NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed);
        let page_table = Handle::from(Mutex::new(PageTable::new(mem.config.max_pgn())));
        let mut area = VmArea::new(DEFAULT_AREA_ID, 0, id);
        area.push_region(VmRegion::create_region(0, 0));
        log::info!(
            "Address space {} bootstrapped with {} page table entries.",
            id,
            mem.config.max_pgn()
        );
        AddressSpace {
            id,
            mem,
            page_table,
            areas: vec![area],
            symbols: [None; SYMBOL_TABLE_SIZE],
            released: false,
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn config(&self) -> &PagingConfig {
        &self.mem.config
    }

    pub fn memory(&self) -> &SystemMemory {
        &self.mem
    }

    pub fn area(&self, id: usize) -> Result<&VmArea, MmError> {
        self.areas
            .iter()
            .find(|area| area.id == id)
            .ok_or(MmError::AreaNotFound)
    }

    fn area_mut(&mut self, id: usize) -> Result<&mut VmArea, MmError> {
        self.areas
            .iter_mut()
            .find(|area| area.id == id)
            .ok_or(MmError::AreaNotFound)
    }

    /// Region recorded in symbol table slot `slot`.
    pub fn symbol(&self, slot: usize) -> Option<VmRegion> {
        self.symbols.get(slot).copied().flatten()
    }

    // region: mapping

    /// Back `page_count` pages from `map_start` with RAM frames, all or nothing.
    ///
    /// `[start, end)` is the segment range the pages must fall in. RAM frames are used first;
    /// once RAM is exhausted the oldest resident pages are evicted to the active swap device.
    /// Fails with [MmError::OutOfMemory] when RAM and the active swap device together lack
    /// the frames, in which case nothing has changed.
    pub fn map_to_ram(
        &mut self,
        start: usize,
        end: usize,
        map_start: usize,
        page_count: usize,
    ) -> Result<VmRegion, MmError> {
        let config = self.mem.config;
        let map_end = page_count
            .checked_mul(config.page_size())
            .and_then(|len| map_start.checked_add(len))
            .ok_or(MmError::InvalidAddress)?;
        if !config.is_page_aligned(map_start) || map_start < start || map_end > end {
            return Err(MmError::InvalidAddress);
        }
        let first = config.pgn(map_start);
        if first + page_count > config.max_pgn() {
            return Err(MmError::InvalidAddress);
        }
        let region = VmRegion::create_region(map_start, map_end);
        if page_count == 0 {
            return Ok(region);
        }

        let mut ram = self.mem.ram.lock();
        let active = self.mem.swap.active_id();
        let mut swap_guards = if page_count > ram.free_count() {
            Some(self.mem.swap.lock_ids(&[active])?)
        } else {
            None
        };
        let mut table = self.page_table.lock();
        for pgn in first..first + page_count {
            if table.entry(pgn)?.is_present() {
                return Err(MmError::AlreadyMapped);
            }
        }
        let swap = match swap_guards.as_mut() {
            Some(guards) => Some(ActiveSwap {
                id: active,
                phy: guards.get_mut(active)?,
            }),
            None => None,
        };
        let mut own = OwnTable {
            handle: &self.page_table,
            table: &mut table,
        };
        let (space, handle) = (self.id, &self.page_table);
        let frames = frame::alloc_pages_range(
            &mut ram,
            swap,
            &mut own,
            page_count,
            |ram: &mut MemPhy, table: &mut PageTable, index, frame| {
                map_frame(ram, table, FrameOwner::new(space, first + index, handle), frame)
            },
        )?;
        log::debug!(
            "Space {} mapped [{:#x}, {:#x}), {} evictions.",
            self.id,
            map_start,
            map_end,
            frames.iter().filter(|f| f.evicted_to.is_some()).count()
        );
        Ok(region)
    }

    /// Grow segment `area_id` by `inc` bytes, rounded up to whole pages, and map the new pages.
    ///
    /// The segment end only moves when mapping succeeds.
    pub fn inc_vma_limit(&mut self, area_id: usize, inc: usize) -> Result<VmRegion, MmError> {
        let config = self.mem.config;
        let inc = config.page_align(inc)?;
        let area = self.area(area_id)?;
        let (start, old_end) = (area.start, area.end);
        let new_end = old_end
            .checked_add(inc)
            .filter(|end| *end <= config.addr_space_size())
            .ok_or(MmError::InvalidAddress)?;
        let grown = old_end..new_end;
        if self
            .areas
            .iter()
            .any(|other| other.id != area_id && other.overlaps(&grown))
        {
            return Err(MmError::InvalidRegion);
        }
        let region = self.map_to_ram(start, new_end, old_end, inc / config.page_size())?;
        self.area_mut(area_id)?.end = new_end;
        Ok(region)
    }

    // endregion

    // region: allocation

    /// Allocate `size` bytes in segment `area_id` and record the region in symbol slot `slot`.
    ///
    /// The free list is tried first. Otherwise the segment grows from its break; whatever
    /// the new pages hold beyond the request joins the free list. Returns the start address.
    /// A region already in `slot` is released only once the new one is in place.
    pub fn alloc(&mut self, area_id: usize, slot: usize, size: usize) -> Result<usize, MmError> {
        if slot >= SYMBOL_TABLE_SIZE || size == 0 {
            return Err(MmError::InvalidRegion);
        }
        let region = match self.area_mut(area_id)?.get_free_region(size) {
            Some(region) => region,
            None => self.grow_region(area_id, size)?,
        };
        if let Some(old) = self.symbols[slot].replace(region) {
            self.release_symbol(old)?;
        }
        debug_ex!(
            "Space {} slot {} <- [{:#x}, {:#x}).",
            self.id,
            slot,
            region.start,
            region.end
        );
        Ok(region.start)
    }

    /// Carve `size` bytes from the break of segment `area_id`, growing it as needed.
    fn grow_region(&mut self, area_id: usize, size: usize) -> Result<VmRegion, MmError> {
        let (sbrk, limit) = self.area(area_id).map(|area| (area.sbrk, area.end))?;
        let end = sbrk.checked_add(size).ok_or(MmError::InvalidAddress)?;
        if end > limit {
            self.inc_vma_limit(area_id, end - limit)?;
        }
        let area = self.area_mut(area_id)?;
        let region = VmRegion::create_region(area.sbrk, end);
        area.release_region(VmRegion::create_region(region.end, area.end));
        area.sbrk = area.end;
        Ok(region)
    }

    /// Release the region in symbol slot `slot` back to its segment's free list.
    ///
    /// The pages stay mapped until the space is torn down.
    pub fn free(&mut self, slot: usize) -> Result<(), MmError> {
        let region = self
            .symbols
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(MmError::InvalidRegion)?;
        self.release_symbol(region)
    }

    fn release_symbol(&mut self, region: VmRegion) -> Result<(), MmError> {
        let area = self
            .areas
            .iter_mut()
            .find(|area| area.contains(&region))
            .ok_or(MmError::AreaNotFound)?;
        area.release_region(region);
        Ok(())
    }

    /// Address `offset` bytes into the region of symbol slot `slot`.
    pub fn region_addr(&self, slot: usize, offset: usize) -> Result<usize, MmError> {
        let region = self.symbol(slot).ok_or(MmError::InvalidRegion)?;
        if offset >= region.len() {
            return Err(MmError::InvalidAddress);
        }
        Ok(region.start + offset)
    }

    // endregion

    // region: access

    /// Current translation of the page holding `addr`.
    pub fn translate(&self, addr: usize) -> Result<PageState, MmError> {
        let pgn = self.mem.config.pgn(addr);
        Ok(self.page_table.lock().entry(pgn)?.decode())
    }

    /// Read the byte at virtual address `addr`, bringing its page into RAM if needed.
    pub fn load(&self, addr: usize) -> Result<u8, MmError> {
        self.access(addr, false, |ram, phys| ram.read(phys))
    }

    /// Write `value` at virtual address `addr`, bringing its page into RAM if needed.
    /// The page is marked dirty.
    pub fn store(&self, addr: usize, value: u8) -> Result<(), MmError> {
        self.access(addr, true, |ram, phys| ram.write(phys, value))
    }

    fn access<T>(
        &self,
        addr: usize,
        dirty: bool,
        op: impl FnOnce(&mut MemPhy, usize) -> Result<T, MmError>,
    ) -> Result<T, MmError> {
        let config = self.mem.config;
        let (pgn, offset) = (config.pgn(addr), config.offset(addr));
        let mut ram = self.mem.ram.lock();
        let state = self.page_table.lock().entry(pgn)?.decode();
        let frame = match state {
            PageState::Unmapped => return Err(MmError::PageFault),
            PageState::Resident { frame, .. } => {
                if dirty {
                    self.page_table.lock().entry_mut(pgn)?.mark_dirty();
                }
                frame
            }
            PageState::Swapped { device, offset } => {
                let active = self.mem.swap.active_id();
                let mut swap = self.mem.swap.lock_ids(&[device, active])?;
                let mut table = self.page_table.lock();
                let mut own = OwnTable {
                    handle: &self.page_table,
                    table: &mut table,
                };
                let frame = frame::swap_in(
                    &mut ram,
                    &mut swap,
                    active,
                    &mut own,
                    FrameOwner::new(self.id, pgn, &self.page_table),
                    SwapSlot { device, offset },
                )?;
                if dirty {
                    own.table.entry_mut(pgn)?.mark_dirty();
                }
                frame
            }
        };
        op(&mut *ram, frame * config.page_size() + offset)
    }

    // endregion

    // region: teardown

    /// Release every frame the space holds, on RAM and on swap, and discard its page table,
    /// segments and symbol table.
    pub fn teardown(mut self) -> Result<(), MmError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), MmError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut ram = self.mem.ram.lock();
        let mut swap = self.mem.swap.lock_all();
        let mut table = self.page_table.lock();
        let mut result = Ok(());
        let mut count = 0;
        for (pgn, state) in table.mapped() {
            let freed = match state {
                PageState::Resident { frame, .. } => ram.release_used(frame),
                PageState::Swapped { device, offset } => swap
                    .get_mut(device)
                    .and_then(|phy| phy.release_used(offset)),
                PageState::Unmapped => Ok(()),
            };
            match freed {
                Ok(()) => count += 1,
                Err(err) => {
                    log::warn!(
                        "Space {} could not release page {} ({:?}): {}",
                        self.id,
                        pgn,
                        state,
                        err
                    );
                    result = Err(err);
                }
            }
        }
        table.clear();
        self.areas.clear();
        self.symbols = [None; SYMBOL_TABLE_SIZE];
        log::info!(
            "Address space {} torn down, {} pages released.",
            self.id,
            count
        );
        result
    }

    // endregion

    // region: diagnostics

    /// Raw page table entries of the pages covering `[start, end)`.
    pub fn page_table_dump(&self, start: usize, end: usize) -> String {
        let config = self.mem.config;
        self.page_table
            .lock()
            .dump(config.pgn(start), end.div_ceil(config.page_size()))
    }

    /// Resident pages, most recently mapped first.
    pub fn resident_pages(&self) -> Vec<usize> {
        self.page_table.lock().resident_pages().collect()
    }

    // endregion
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("Failed to release address space {}: {}", self.id, err);
        }
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("areas", &self.areas)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memphy::{AccessMode, LockedMemPhy},
        swap::SwapPool,
    };

    fn system(ram_frames: usize, swap_frames: usize) -> SystemMemory {
        let config = PagingConfig::new(4, 10).unwrap();
        let ram = LockedMemPhy::new(MemPhy::new(ram_frames * 4, AccessMode::Random, 4).unwrap());
        let swap = SwapPool::new(
            vec![Some(LockedMemPhy::new(
                MemPhy::new(swap_frames * 4, AccessMode::Random, 4).unwrap(),
            ))],
            0,
        )
        .unwrap();
        SystemMemory::new(ram, swap, config).unwrap()
    }

    #[test]
    fn test_bootstrap() {
        let space = AddressSpace::bootstrap(system(4, 4));
        let area = space.area(DEFAULT_AREA_ID).unwrap();
        assert_eq!(area.range(), 0..0);
        assert_eq!(
            area.free_regions().copied().collect::<Vec<_>>(),
            vec![VmRegion::create_region(0, 0)]
        );
        assert_eq!(space.translate(0), Ok(PageState::Unmapped));
        assert_eq!(space.area(2).unwrap_err(), MmError::AreaNotFound);
        assert!(space.resident_pages().is_empty());
    }

    #[test]
    fn test_map_to_ram_validates() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        assert_eq!(space.map_to_ram(0, 64, 2, 1), Err(MmError::InvalidAddress));
        assert_eq!(space.map_to_ram(0, 8, 0, 3), Err(MmError::InvalidAddress));
        space.map_to_ram(0, 8, 0, 2).unwrap();
        assert_eq!(space.map_to_ram(0, 8, 4, 1), Err(MmError::AlreadyMapped));
        assert_eq!(space.resident_pages(), vec![1, 0]);
    }

    #[test]
    fn test_alloc_grows_and_reuses() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 0, 6), Ok(0));
        assert_eq!(space.area(DEFAULT_AREA_ID).unwrap().range(), 0..8);
        // tail of the second page is on the free list
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 1, 2), Ok(6));
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 2, 5), Ok(8));
        assert_eq!(space.area(DEFAULT_AREA_ID).unwrap().range(), 0..16);

        space.free(0).unwrap();
        assert_eq!(space.free(0), Err(MmError::InvalidRegion));
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 3, 4), Ok(0));
        assert_eq!(space.symbol(3), Some(VmRegion::create_region(0, 4)));
    }

    #[test]
    fn test_alloc_oversized_fails_cleanly() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        space.alloc(DEFAULT_AREA_ID, 0, 4).unwrap();
        assert_eq!(
            space.alloc(DEFAULT_AREA_ID, 1, usize::MAX),
            Err(MmError::InvalidAddress)
        );
        assert_eq!(
            space.alloc(DEFAULT_AREA_ID, 1, usize::MAX - 8),
            Err(MmError::InvalidAddress)
        );
        assert_eq!(space.symbol(1), None);
        assert_eq!(space.area(DEFAULT_AREA_ID).unwrap().range(), 0..4);
        assert_eq!(space.memory().ram.lock().used_count(), 1);
    }

    #[test]
    fn test_failed_alloc_keeps_slot() {
        let mut space = AddressSpace::bootstrap(system(2, 1));
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 0, 4), Ok(0));
        assert_eq!(
            space.alloc(DEFAULT_AREA_ID, 0, 16),
            Err(MmError::OutOfMemory)
        );
        assert_eq!(space.symbol(0), Some(VmRegion::create_region(0, 4)));
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 0, 8), Ok(4));
        assert_eq!(space.symbol(0), Some(VmRegion::create_region(4, 12)));
        // the old region went back to the free list
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 1, 4), Ok(0));
    }

    #[test]
    fn test_alloc_rejects_bad_slot() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        assert_eq!(
            space.alloc(DEFAULT_AREA_ID, SYMBOL_TABLE_SIZE, 4),
            Err(MmError::InvalidRegion)
        );
        assert_eq!(space.alloc(DEFAULT_AREA_ID, 0, 0), Err(MmError::InvalidRegion));
        assert_eq!(space.alloc(9, 0, 4), Err(MmError::AreaNotFound));
    }

    #[test]
    fn test_load_store() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        let addr = space.alloc(DEFAULT_AREA_ID, 0, 8).unwrap();
        space.store(addr + 5, 0x5a).unwrap();
        assert_eq!(space.load(addr + 5), Ok(0x5a));
        assert_eq!(
            space.translate(addr + 5),
            Ok(PageState::Resident {
                frame: 1,
                dirty: true
            })
        );
        assert_eq!(space.load(64), Err(MmError::PageFault));
        assert_eq!(space.region_addr(0, 7), Ok(7));
        assert_eq!(space.region_addr(0, 8), Err(MmError::InvalidAddress));
    }

    #[test]
    fn test_store_after_eviction_swaps_in() {
        let mut space = AddressSpace::bootstrap(system(2, 4));
        space.alloc(DEFAULT_AREA_ID, 0, 4).unwrap();
        space.store(1, 11).unwrap();
        space.alloc(DEFAULT_AREA_ID, 1, 8).unwrap();
        assert_eq!(
            space.translate(0),
            Ok(PageState::Swapped {
                device: 0,
                offset: 0
            })
        );
        assert_eq!(space.load(1), Ok(11));
        assert!(matches!(
            space.translate(0),
            Ok(PageState::Resident { .. })
        ));
        let mem = space.memory().clone();
        assert!(mem.check_frame_lists());
        space.teardown().unwrap();
        assert_eq!(mem.ram.lock().free_count(), 2);
        assert_eq!(mem.swap.free_count(), 4);
    }

    #[test]
    fn test_drop_releases_frames() {
        let mem = system(4, 4);
        {
            let mut space = AddressSpace::bootstrap(mem.clone());
            space.alloc(DEFAULT_AREA_ID, 0, 12).unwrap();
            assert_eq!(mem.ram.lock().used_count(), 3);
        }
        assert_eq!(mem.ram.lock().free_count(), 4);
        assert!(mem.check_frame_lists());
    }

    #[test]
    fn test_page_table_dump() {
        let mut space = AddressSpace::bootstrap(system(4, 4));
        space.alloc(DEFAULT_AREA_ID, 0, 4).unwrap();
        assert_eq!(
            space.page_table_dump(0, 8),
            "00000: 0x80000000\n00001: 0x00000000\n"
        );
    }
}
