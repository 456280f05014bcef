//! Several threads sharing one RAM device and one swap pool.

use std::{sync::Arc, thread};

use mm::{
    AccessMode, AddressSpace, LockedMemPhy, MemPhy, MmError, PagingConfig, SwapPool, SystemMemory,
    config::DEFAULT_AREA_ID,
};

const PAGE: usize = 16;

fn system(ram_frames: usize, swap_frames: usize) -> SystemMemory {
    let config = PagingConfig::new(PAGE, 16).unwrap();
    let ram = LockedMemPhy::new(MemPhy::new(ram_frames * PAGE, AccessMode::Random, PAGE).unwrap());
    let swap = LockedMemPhy::new(MemPhy::new(swap_frames * PAGE, AccessMode::Random, PAGE).unwrap());
    SystemMemory::new(ram, SwapPool::new(vec![Some(swap)], 0).unwrap(), config).unwrap()
}

#[test]
fn test_parallel_spaces_keep_their_data() {
    const THREADS: usize = 4;
    const PAGES: usize = 6;
    let mem = system(8, THREADS * PAGES);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let mem = mem.clone();
            thread::spawn(move || {
                let mut space = AddressSpace::bootstrap(mem);
                for slot in 0..PAGES {
                    let addr = space.alloc(DEFAULT_AREA_ID, slot, PAGE).unwrap();
                    space.store(addr, (t * 16 + slot) as u8).unwrap();
                }
                for round in 0..20 {
                    for slot in 0..PAGES {
                        let addr = space.region_addr(slot, round % PAGE).unwrap();
                        space.store(addr, (t * 16 + slot) as u8).unwrap();
                        assert_eq!(space.load(addr), Ok((t * 16 + slot) as u8));
                    }
                }
                space.teardown().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(mem.check_frame_lists());
    assert_eq!(mem.ram.lock().free_count(), 8);
    assert_eq!(mem.swap.free_count(), THREADS * PAGES);
}

#[test]
fn test_concurrent_frame_claims_are_exclusive() {
    let ram = Arc::new(LockedMemPhy::new(
        MemPhy::new(64 * PAGE, AccessMode::Random, PAGE).unwrap(),
    ));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ram = ram.clone();
            thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match ram.get_free_frame() {
                        Ok(fpn) => got.push(fpn),
                        Err(MmError::OutOfFrames) => break got,
                        Err(err) => panic!("unexpected {:?}", err),
                    }
                }
            })
        })
        .collect();
    let mut all: Vec<usize> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..64).collect::<Vec<_>>());

    for fpn in all {
        ram.put_free_frame(fpn).unwrap();
    }
    assert!(ram.lock().check_frame_lists());
}
