//! # Frame allocation with eviction.
//!
//! RAM frames are handed out from the RAM free list. Once RAM is exhausted, the oldest frame
//! of the RAM used list is evicted: its page is copied to a fresh frame of the active swap
//! device, the owner's entry is retargeted to that swap location, and the RAM frame is reused.
//!
//! A swap frame holding an evicted page is *occupied*: it sits on the swap device's used
//! list under the page's owner until the page is brought back or its space is torn down.
//!
//! Every function here expects the caller to hold the RAM lock, the lock of the swap device
//! passed in, and the lock of its own page table.

use crate::{
    error::MmError,
    memphy::{MemPhy, swap_copy_page},
    paging::{FrameOwner, PageTable, SharedPageTable, SwapSlot, map_frame},
    swap::SwapGuards,
};

/// The active swap device, locked.
pub struct ActiveSwap<'a> {
    pub id: usize,
    pub phy: &'a mut MemPhy,
}

/// The page table of the requesting space, locked, with its handle.
pub struct OwnTable<'a> {
    pub handle: &'a SharedPageTable,
    pub table: &'a mut PageTable,
}

/// One allocated RAM frame, claimed and in neither list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAlloc {
    pub frame: usize,
    /// Where the previous content of `frame` went, if it was evicted.
    pub evicted_to: Option<SwapSlot>,
}

/// Fail with [MmError::OutOfMemory] unless RAM and the active swap device can together
/// supply `count` frames.
pub fn check_capacity(
    ram: &MemPhy,
    swap: Option<&ActiveSwap<'_>>,
    count: usize,
) -> Result<(), MmError> {
    let available = ram.free_count() + swap.map_or(0, |swap| swap.phy.free_count());
    if available < count {
        log::warn!(
            "Cannot supply {} frames, only {} available in RAM and swap.",
            count,
            available
        );
        return Err(MmError::OutOfMemory);
    }
    Ok(())
}

/// Get one RAM frame, evicting the oldest resident page when RAM is full.
pub fn alloc_frame(
    ram: &mut MemPhy,
    swap: Option<&mut ActiveSwap<'_>>,
    own: &mut OwnTable<'_>,
) -> Result<FrameAlloc, MmError> {
    match ram.get_free_frame() {
        Ok(frame) => Ok(FrameAlloc {
            frame,
            evicted_to: None,
        }),
        Err(MmError::OutOfFrames) => match swap {
            Some(swap) => evict_oldest(ram, swap, own),
            None => Err(MmError::OutOfMemory),
        },
        Err(err) => Err(err),
    }
}

/// Get `count` RAM frames, all or nothing, handing each one to `install` as soon as it is
/// obtained.
///
/// Capacity is checked before any frame moves, so a failed request leaves both devices and
/// every page table as they were. Frames installed earlier in the request are eviction
/// candidates for later slots.
pub fn alloc_pages_range<F>(
    ram: &mut MemPhy,
    mut swap: Option<ActiveSwap<'_>>,
    own: &mut OwnTable<'_>,
    count: usize,
    mut install: F,
) -> Result<Vec<FrameAlloc>, MmError>
where
    F: FnMut(&mut MemPhy, &mut PageTable, usize, usize) -> Result<(), MmError>,
{
    check_capacity(ram, swap.as_ref(), count)?;
    let mut frames = Vec::with_capacity(count);
    for index in 0..count {
        let alloc = alloc_frame(ram, swap.as_mut(), own)?;
        install(&mut *ram, &mut *own.table, index, alloc.frame)?;
        frames.push(alloc);
    }
    Ok(frames)
}

/// Move the oldest resident page of RAM to the active swap device and return its frame.
pub fn evict_oldest(
    ram: &mut MemPhy,
    swap: &mut ActiveSwap<'_>,
    own: &mut OwnTable<'_>,
) -> Result<FrameAlloc, MmError> {
    let Some(victim) = ram.oldest_used() else {
        return Err(MmError::OutOfMemory);
    };
    let offset = swap.phy.get_free_frame().map_err(|_| MmError::OutOfMemory)?;
    let slot = SwapSlot {
        device: swap.id,
        offset,
    };
    if let Err(err) = swap_copy_page(ram, victim, swap.phy, offset) {
        swap.phy.put_free_frame(offset)?;
        return Err(err);
    }
    let Some((frame, owner)) = ram.take_oldest_used() else {
        swap.phy.put_free_frame(offset)?;
        return Err(MmError::OutOfMemory);
    };
    match owner {
        Some(owner) if retarget(own, &owner, slot)? => {
            debug_ex!(
                "Evicted page {} of space {} from frame {} to swap {}:{}.",
                owner.pgn,
                owner.space,
                frame,
                slot.device,
                slot.offset
            );
            swap.phy.push_used(offset, owner)?;
            Ok(FrameAlloc {
                frame,
                evicted_to: Some(slot),
            })
        }
        _ => {
            swap.phy.put_free_frame(offset)?;
            Ok(FrameAlloc {
                frame,
                evicted_to: None,
            })
        }
    }
}

/// Bring the page at `slot` back into RAM and map it at `owner.pgn`. Returns its RAM frame.
///
/// RAM is made room for by evicting to the active swap device. When the active device is
/// full too, the oldest RAM page and the incoming page trade places through `slot`.
pub fn swap_in(
    ram: &mut MemPhy,
    swap: &mut SwapGuards<'_>,
    active: usize,
    own: &mut OwnTable<'_>,
    owner: FrameOwner,
    slot: SwapSlot,
) -> Result<usize, MmError> {
    let (page_dev, active_dev) = swap.pair_mut(slot.device, active)?;
    let frame = if ram.free_count() > 0 {
        ram.get_free_frame()?
    } else {
        let active_free = match active_dev.as_deref() {
            Some(dev) => dev.free_count(),
            None => page_dev.free_count(),
        };
        if active_free == 0 {
            return exchange_oldest(ram, page_dev, own, owner, slot);
        }
        let mut active = ActiveSwap {
            id: active,
            phy: match active_dev {
                Some(dev) => dev,
                None => &mut *page_dev,
            },
        };
        evict_oldest(ram, &mut active, own)?.frame
    };
    swap_copy_page(page_dev, slot.offset, ram, frame)?;
    page_dev.release_used(slot.offset)?;
    debug_ex!(
        "Swapped in page {} of space {} from {}:{} to frame {}.",
        owner.pgn,
        owner.space,
        slot.device,
        slot.offset,
        frame
    );
    map_frame(ram, own.table, owner, frame)?;
    Ok(frame)
}

/// Swap the oldest RAM page with the page stored at `slot` on `swap`.
///
/// The victim's content takes over `slot`, and the incoming page takes over the victim's
/// RAM frame. No free frame is needed on either device.
pub fn exchange_oldest(
    ram: &mut MemPhy,
    swap: &mut MemPhy,
    own: &mut OwnTable<'_>,
    owner: FrameOwner,
    slot: SwapSlot,
) -> Result<usize, MmError> {
    let Some(frame) = ram.oldest_used() else {
        return Err(MmError::OutOfMemory);
    };
    let outgoing = ram.read_page(frame)?;
    let incoming = swap.read_page(slot.offset)?;
    ram.write_page(frame, &incoming)?;
    swap.write_page(slot.offset, &outgoing)?;
    let Some((frame, victim)) = ram.take_oldest_used() else {
        return Err(MmError::OutOfMemory);
    };
    match victim {
        Some(victim) if retarget(own, &victim, slot)? => {
            debug_ex!(
                "Exchanged page {} of space {} with page {} of space {} through {}:{}.",
                victim.pgn,
                victim.space,
                owner.pgn,
                owner.space,
                slot.device,
                slot.offset
            );
            swap.set_owner(slot.offset, victim)?;
        }
        _ => swap.release_used(slot.offset)?,
    }
    map_frame(ram, own.table, owner, frame)?;
    Ok(frame)
}

/// Point the owner's entry at `slot`. Returns false if the owning table is gone.
fn retarget(own: &mut OwnTable<'_>, owner: &FrameOwner, slot: SwapSlot) -> Result<bool, MmError> {
    if owner.table.refers_to(own.handle) {
        own.table.mark_swapped(owner.pgn, slot)?;
        return Ok(true);
    }
    match owner.table.get_handle() {
        Some(table) => {
            table.lock().mark_swapped(owner.pgn, slot)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
