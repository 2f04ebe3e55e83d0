//! The memory-manager contract behind `ALLOC`, `FREE` and `delete`.
//!
//! The VM only hands out and returns addresses; it never looks inside the
//! allocator. Implementations synchronize internally so one manager can be
//! shared by several executor contexts.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

pub trait MemoryManager: Send + Sync {
    /// Reserve `size` bytes. `None` when the request cannot be satisfied.
    fn allocate(&self, size: usize) -> Option<usize>;

    /// Release an address returned by [`allocate`](Self::allocate). Returns
    /// false for addresses that are unknown or already freed.
    fn free(&self, addr: usize) -> bool;

    fn stats(&self) -> MemoryStats;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub total_allocations: usize,
    pub total_frees: usize,
}

/// First address handed out; zero stays reserved for null.
const BASE_ADDRESS: usize = 0x1000;
const ALIGNMENT: usize = 16;

#[derive(Debug)]
struct AllocatorState {
    next: usize,
    live: HashMap<usize, usize>,
    stats: MemoryStats,
}

/// Bookkeeping allocator: addresses are unique tokens, nothing is backed by
/// real storage. Enforces an optional limit on live bytes.
#[derive(Debug)]
pub struct TrackingAllocator {
    state: Mutex<AllocatorState>,
    limit: Option<usize>,
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TrackingAllocator {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: BASE_ADDRESS,
                live: HashMap::new(),
                stats: MemoryStats::default(),
            }),
            limit,
        }
    }
}

impl MemoryManager for TrackingAllocator {
    fn allocate(&self, size: usize) -> Option<usize> {
        let mut state = self.state.lock();
        let live_bytes = state.stats.live_bytes.checked_add(size)?;
        if self.limit.is_some_and(|limit| live_bytes > limit) {
            return None;
        }
        let reserved = size.max(1).checked_next_multiple_of(ALIGNMENT)?;
        let addr = state.next;
        state.next = addr.checked_add(reserved)?;
        state.live.insert(addr, size);
        state.stats.live_allocations += 1;
        state.stats.live_bytes = live_bytes;
        state.stats.peak_bytes = state.stats.peak_bytes.max(live_bytes);
        state.stats.total_allocations += 1;
        Some(addr)
    }

    fn free(&self, addr: usize) -> bool {
        let mut state = self.state.lock();
        match state.live.remove(&addr) {
            Some(size) => {
                state.stats.live_allocations -= 1;
                state.stats.live_bytes -= size;
                state.stats.total_frees += 1;
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let allocator = TrackingAllocator::default();
        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(0).unwrap();
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(allocator.stats().live_bytes, 10);
        assert!(allocator.free(a));
        assert!(!allocator.free(a), "double free must be rejected");
        assert!(!allocator.free(12345));
        let stats = allocator.stats();
        assert_eq!(stats.live_allocations, 1);
        assert_eq!(stats.total_frees, 1);
        assert_eq!(stats.peak_bytes, 10);
    }

    #[test]
    fn test_limit_is_enforced() {
        let allocator = TrackingAllocator::new(Some(64));
        let a = allocator.allocate(48).unwrap();
        assert!(allocator.allocate(32).is_none());
        allocator.free(a);
        assert!(allocator.allocate(32).is_some());
    }
}
