use spin::Mutex;

pub struct PidAllocator {
    current: usize,
    recycled: Vec<usize>,
}

impl PidAllocator {
    pub const fn new() -> PidAllocator {
        PidAllocator {
            current: 1,
            recycled: Vec::new(),
        }
    }

    /// Allocate a pid.
    ///
    /// Use [alloc_pid] to get one that is returned on drop.
    pub fn alloc(&mut self) -> usize {
        if let Some(pid) = self.recycled.pop() {
            pid
        } else {
            let res = self.current;
            self.current += 1;
            res
        }
    }

    /// Return a pid for reuse.
    pub fn free(&mut self, pid: usize) {
        debug_assert!(pid < self.current && !self.recycled.contains(&pid));
        self.recycled.push(pid);
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A pid that goes back to the allocator on drop.
#[derive(Debug)]
pub struct Pid {
    inner: usize,
}

impl Pid {
    pub fn value(&self) -> usize {
        self.inner
    }
}

impl Drop for Pid {
    fn drop(&mut self) {
        PID_ALLOC.lock().free(self.inner);
    }
}

pub static PID_ALLOC: Mutex<PidAllocator> = Mutex::new(PidAllocator::new());

pub fn alloc_pid() -> Pid {
    Pid {
        inner: PID_ALLOC.lock().alloc(),
    }
}
