//! # Swap pool and shared device handles.
//!
//! [SwapPool] holds up to [MAX_SWAP_DEVICES] swap devices addressed by slot id. One present
//! slot is active and receives every eviction. [SystemMemory] bundles the RAM device, the
//! pool and the paging geometry; it is created once at boot and cloned into every address
//! space, sharing the devices by reference.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use spin::MutexGuard;

use crate::{
    config::{MAX_SWAP_DEVICES, PagingConfig},
    error::MmError,
    memphy::{LockedMemPhy, MemPhy},
    pte::{MAX_FPN, MAX_SWAP_OFFSET},
};

#[derive(Debug)]
pub struct SwapPool {
    devices: [Option<Arc<LockedMemPhy>>; MAX_SWAP_DEVICES],
    active: AtomicUsize,
}

impl SwapPool {
    /// Build a pool from per-slot devices. `None` leaves a slot unconfigured.
    pub fn new(devices: Vec<Option<LockedMemPhy>>, active: usize) -> Result<SwapPool, MmError> {
        if devices.len() > MAX_SWAP_DEVICES {
            return Err(MmError::DeviceLimit);
        }
        let mut slots: [Option<Arc<LockedMemPhy>>; MAX_SWAP_DEVICES] = Default::default();
        for (slot, device) in slots.iter_mut().zip(devices) {
            *slot = device.map(Arc::new);
        }
        let pool = SwapPool {
            devices: slots,
            active: AtomicUsize::new(active),
        };
        pool.device(active)?;
        Ok(pool)
    }

    /// Device in slot `id`.
    pub fn device(&self, id: usize) -> Result<&Arc<LockedMemPhy>, MmError> {
        self.devices
            .get(id)
            .and_then(Option::as_ref)
            .ok_or(MmError::NullDevice)
    }

    pub fn active_id(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn active(&self) -> Result<&Arc<LockedMemPhy>, MmError> {
        self.device(self.active_id())
    }

    /// Direct future evictions to slot `id`.
    pub fn set_active(&self, id: usize) -> Result<(), MmError> {
        self.device(id)?;
        self.active.store(id, Ordering::Release);
        log::info!("Swap device {} is now active.", id);
        Ok(())
    }

    /// Ids of the configured slots, ascending.
    pub fn present(&self) -> impl Iterator<Item = usize> + '_ {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, device)| device.is_some())
            .map(|(id, _)| id)
    }

    /// Lock the devices in `ids`, in ascending id order. Duplicates are locked once.
    pub fn lock_ids(&self, ids: &[usize]) -> Result<SwapGuards<'_>, MmError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        for id in ids.iter() {
            self.device(*id)?;
        }
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push((id, self.device(id)?.lock()));
        }
        Ok(SwapGuards { guards })
    }

    /// Lock every configured device.
    pub fn lock_all(&self) -> SwapGuards<'_> {
        SwapGuards {
            guards: self
                .devices
                .iter()
                .enumerate()
                .filter_map(|(id, device)| device.as_ref().map(|d| (id, d.lock())))
                .collect(),
        }
    }

    /// Free frames summed over every configured device.
    pub fn free_count(&self) -> usize {
        self.devices
            .iter()
            .flatten()
            .map(|device| device.lock().free_count())
            .sum()
    }
}

/// A set of held swap device locks.
pub struct SwapGuards<'a> {
    guards: Vec<(usize, MutexGuard<'a, MemPhy>)>,
}

impl SwapGuards<'_> {
    fn index(&self, id: usize) -> Result<usize, MmError> {
        self.guards
            .iter()
            .position(|(held, _)| *held == id)
            .ok_or(MmError::NullDevice)
    }

    pub fn get_mut(&mut self, id: usize) -> Result<&mut MemPhy, MmError> {
        let index = self.index(id)?;
        let phy: &mut MemPhy = &mut self.guards[index].1;
        Ok(phy)
    }

    /// Two held devices at once. The second is `None` when `a == b`.
    pub fn pair_mut(
        &mut self,
        a: usize,
        b: usize,
    ) -> Result<(&mut MemPhy, Option<&mut MemPhy>), MmError> {
        let ia = self.index(a)?;
        let ib = self.index(b)?;
        if ia == ib {
            let phy: &mut MemPhy = &mut self.guards[ia].1;
            return Ok((phy, None));
        }
        let (lo, hi) = (ia.min(ib), ia.max(ib));
        let (left, right) = self.guards.split_at_mut(hi);
        let first: &mut MemPhy = &mut left[lo].1;
        let second: &mut MemPhy = &mut right[0].1;
        if ia < ib {
            Ok((first, Some(second)))
        } else {
            Ok((second, Some(first)))
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut MemPhy)> + '_ {
        self.guards
            .iter_mut()
            .map(|(id, guard)| (*id, &mut **guard))
    }
}

/// Devices shared by every address space.
#[derive(Debug, Clone)]
pub struct SystemMemory {
    pub ram: Arc<LockedMemPhy>,
    pub swap: Arc<SwapPool>,
    pub config: PagingConfig,
}

impl SystemMemory {
    /// Bundle the devices after checking they agree with `config`.
    ///
    /// Every device must be formatted with the configured page size, and have no more frames
    /// than a page table entry can address.
    pub fn new(
        ram: LockedMemPhy,
        swap: SwapPool,
        config: PagingConfig,
    ) -> Result<SystemMemory, MmError> {
        Self::check_device(&ram, &config, MAX_FPN)?;
        for id in swap.present() {
            Self::check_device(swap.device(id)?, &config, MAX_SWAP_OFFSET)?;
        }
        Ok(SystemMemory {
            ram: Arc::new(ram),
            swap: Arc::new(swap),
            config,
        })
    }

    /// Whether every frame of every device sits in exactly one of its lists.
    pub fn check_frame_lists(&self) -> bool {
        let ram = self.ram.lock();
        let mut swap = self.swap.lock_all();
        ram.check_frame_lists() && swap.iter_mut().all(|(_, phy)| phy.check_frame_lists())
    }

    fn check_device(
        device: &LockedMemPhy,
        config: &PagingConfig,
        max_frame: usize,
    ) -> Result<(), MmError> {
        let phy = device.lock();
        if phy.page_size() != config.page_size() {
            return Err(MmError::InvalidPageSize);
        }
        if phy.frame_count() > max_frame + 1 {
            return Err(MmError::InvalidFrame);
        }
        Ok(())
    }
}
