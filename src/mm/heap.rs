//! Tracked Heap
//!
//! The allocator collaborator: a first-fit heap that keeps the region table
//! in sync with its allocations.
//!
//! Uses `linked_list_allocator` for block management.
//!
//! # Memory Layout
//! The heap manages a caller-provided arena. Every block handed out is
//! registered with the tracker for exactly the requested size; the block
//! padding added by the allocator is not tracked.
//!
//! # Security Considerations
//! - Allocation registers before the pointer escapes
//! - Deallocation deregisters before the block can be reused
//! - Blocks outside the arena are refused, not freed

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use log::trace;
use spin::Mutex;

use crate::cap::Permissions;
use crate::region::{Address, RegionError, RegionId};
use crate::tracker::Tracker;

/// Error type for tracked heap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// Zero-sized layouts have no extent to track.
    ZeroSized,
    /// No block large enough for the layout.
    OutOfMemory { size: usize, align: usize },
    /// The tracker refused the operation.
    Region(RegionError),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSized => write!(f, "zero-sized allocation"),
            Self::OutOfMemory { size, align } => {
                write!(f, "out of memory: size={}, align={}", size, align)
            }
            Self::Region(err) => write!(f, "region tracking failed: {}", err),
        }
    }
}

impl From<RegionError> for HeapError {
    fn from(err: RegionError) -> Self {
        Self::Region(err)
    }
}

/// Error type for `TrackedHeap::free`.
#[derive(Debug)]
pub enum FreeError {
    /// The block does not belong to this heap's arena. It is handed back
    /// untouched so it can be freed through its own heap.
    ForeignBlock(Allocation),
    /// The block went back to the heap, but no region was left to
    /// deregister for it.
    Untracked(RegionError),
}

impl FreeError {
    /// Recover the block refused as foreign.
    pub fn into_allocation(self) -> Option<Allocation> {
        match self {
            Self::ForeignBlock(allocation) => Some(allocation),
            Self::Untracked(_) => None,
        }
    }
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignBlock(allocation) => {
                write!(f, "block {} is not from this heap", allocation.address())
            }
            Self::Untracked(err) => write!(f, "block freed but untracked: {}", err),
        }
    }
}

/// A live block from a `TrackedHeap`.
///
/// Not `Clone`: exactly one owner may hand it back to `free`.
#[derive(Debug)]
pub struct Allocation {
    ptr: NonNull<u8>,
    layout: Layout,
    region: RegionId,
}

impl Allocation {
    /// Start of the block.
    #[inline]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Start of the block as a tracked address.
    #[inline]
    pub fn address(&self) -> Address {
        Address::from_ptr(self.ptr.as_ptr())
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Region registered for this block.
    #[inline]
    pub fn region(&self) -> RegionId {
        self.region
    }
}

/// First-fit heap whose allocations are tracked regions.
pub struct TrackedHeap<'t> {
    heap: Mutex<Heap>,
    arena_start: Address,
    arena_end: Address,
    tracker: &'t Tracker,
}

impl<'t> TrackedHeap<'t> {
    /// Create a heap over `[arena, arena + size)`.
    ///
    /// # Safety
    /// - The arena must be valid for reads and writes for `size` bytes
    /// - The arena must outlive the heap and must not be used for anything
    ///   else while the heap exists
    /// - `size` must be at least `Heap::min_size()`
    pub unsafe fn new(tracker: &'t Tracker, arena: *mut u8, size: usize) -> Self {
        let mut heap = Heap::empty();
        // SAFETY: the caller guarantees the arena is valid, exclusive and
        // large enough.
        unsafe { heap.init(arena, size) };

        let arena_start = Address::from_ptr(arena);
        let arena_end = Address::new(arena_start.as_usize().saturating_add(size));
        trace!("heap: arena {}..{} ({} bytes)", arena_start, arena_end, size);

        Self {
            heap: Mutex::new(heap),
            arena_start,
            arena_end,
            tracker,
        }
    }

    /// The tracker this heap registers with.
    #[inline]
    pub fn tracker(&self) -> &'t Tracker {
        self.tracker
    }

    /// Allocate a block and register it with `permissions`.
    ///
    /// If registration fails the block goes straight back to the heap.
    pub fn alloc(&self, layout: Layout, permissions: Permissions) -> Result<Allocation, HeapError> {
        if layout.size() == 0 {
            return Err(HeapError::ZeroSized);
        }

        let ptr = self
            .heap
            .lock()
            .allocate_first_fit(layout)
            .map_err(|_| HeapError::OutOfMemory {
                size: layout.size(),
                align: layout.align(),
            })?;

        let base = Address::from_ptr(ptr.as_ptr());
        match self.tracker.register(base, layout.size(), permissions) {
            Ok(region) => {
                trace!("heap: alloc {} size={} -> {}", base, layout.size(), region);
                Ok(Allocation {
                    ptr,
                    layout,
                    region,
                })
            }
            Err(err) => {
                // SAFETY: the block was just allocated from this heap with
                // this layout and never escaped.
                unsafe { self.heap.lock().deallocate(ptr, layout) };
                Err(err.into())
            }
        }
    }

    /// Check whether `allocation` lies inside this heap's arena.
    #[inline]
    pub fn owns(&self, allocation: &Allocation) -> bool {
        let base = allocation.address();
        base >= self.arena_start && base < self.arena_end
    }

    /// Deregister a block and return it to the heap.
    ///
    /// Both the region recorded at allocation time and any region that
    /// replaced it at the same base (after `Tracker::resize` or
    /// `Tracker::reinstate`) are deregistered. The block is returned even
    /// if neither was left; that is reported as `Untracked`.
    pub fn free(&self, allocation: Allocation) -> Result<(), FreeError> {
        if !self.owns(&allocation) {
            return Err(FreeError::ForeignBlock(allocation));
        }

        let base = allocation.address();
        let tracked = self.tracker.release(allocation.region, base);

        // SAFETY: `Allocation` is only produced by `alloc` and is consumed
        // here, and the block lies inside this heap's arena.
        unsafe {
            self.heap
                .lock()
                .deallocate(allocation.ptr, allocation.layout)
        };
        trace!("heap: free {} ({})", base, allocation.region);

        tracked.map(|_| ()).map_err(FreeError::Untracked)
    }

    /// Bytes currently handed out, including allocator padding.
    pub fn used(&self) -> usize {
        self.heap.lock().used()
    }

    /// Bytes still available.
    pub fn free_bytes(&self) -> usize {
        self.heap.lock().free()
    }
}

impl fmt::Debug for TrackedHeap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedHeap")
            .field("arena_start", &self.arena_start)
            .field("arena_end", &self.arena_end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::{DenyReason, Operation};
    use crate::config::TrackerConfig;

    const ARENA_SIZE: usize = 4096;

    #[test]
    fn test_alloc_registers_region() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let block = heap
            .alloc(Layout::new::<u64>(), Permissions::READ_WRITE)
            .unwrap();
        assert_eq!(tracker.lookup(block.address()), Ok(block.region()));

        let region = tracker.region(block.region()).unwrap();
        assert_eq!(region.size(), 8);
        assert_eq!(region.base(), block.address());
        assert!(heap.used() >= 8);

        heap.free(block).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let blocks: Vec<_> = (0..16)
            .map(|_| heap.alloc(Layout::new::<u32>(), Permissions::READ).unwrap())
            .collect();
        assert_eq!(tracker.active_len(), 16);

        for block in blocks {
            heap.free(block).unwrap();
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_zero_sized_rejected() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        assert_eq!(
            heap.alloc(Layout::new::<()>(), Permissions::READ).unwrap_err(),
            HeapError::ZeroSized
        );
    }

    #[test]
    fn test_out_of_memory() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let layout = Layout::from_size_align(ARENA_SIZE * 2, 8).unwrap();
        assert!(matches!(
            heap.alloc(layout, Permissions::READ),
            Err(HeapError::OutOfMemory { .. })
        ));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_failed_registration_returns_block() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::with_config(TrackerConfig::new().with_max_regions(1));
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let first = heap.alloc(Layout::new::<u64>(), Permissions::READ).unwrap();
        let used = heap.used();

        assert_eq!(
            heap.alloc(Layout::new::<u64>(), Permissions::READ).unwrap_err(),
            HeapError::Region(RegionError::TableFull)
        );
        assert_eq!(heap.used(), used);

        heap.free(first).unwrap();
    }

    #[test]
    fn test_free_after_revoke() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let block = heap
            .alloc(Layout::new::<u32>(), Permissions::READ_WRITE)
            .unwrap();
        let tag = tracker.mint(block.address()).unwrap();
        tracker.revoke(block.region()).unwrap();

        // Revoked records are still deregistered on free.
        heap.free(block).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(tracker.check(&tag, Operation::Read), Err(DenyReason::Revoked));
    }

    #[test]
    fn test_foreign_block_handed_back() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let mut other = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };
        let other_heap = unsafe { TrackedHeap::new(&tracker, other.as_mut_ptr(), ARENA_SIZE) };

        let block = other_heap
            .alloc(Layout::new::<u32>(), Permissions::READ)
            .unwrap();
        assert!(other_heap.owns(&block));
        assert!(!heap.owns(&block));

        let addr = block.address();
        let block = heap.free(block).unwrap_err().into_allocation().unwrap();
        assert_eq!(block.address(), addr);
        assert_eq!(tracker.active_len(), 1);

        other_heap.free(block).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(other_heap.used(), 0);
    }

    #[test]
    fn test_free_after_resize() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let block = heap
            .alloc(Layout::new::<u64>(), Permissions::READ_WRITE)
            .unwrap();
        let shrunk = tracker.resize(block.region(), 4).unwrap();
        assert_ne!(shrunk, block.region());

        heap.free(block).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(heap.used(), 0);

        // The address is free for the next block.
        let again = heap
            .alloc(Layout::new::<u64>(), Permissions::READ_WRITE)
            .unwrap();
        heap.free(again).unwrap();
    }

    #[test]
    fn test_free_after_reinstate() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let block = heap
            .alloc(Layout::new::<u32>(), Permissions::READ_WRITE)
            .unwrap();
        tracker.revoke(block.region()).unwrap();
        tracker.reinstate(block.region()).unwrap();

        heap.free(block).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_free_untracked_block() {
        let mut arena = vec![0u8; ARENA_SIZE];
        let tracker = Tracker::new();
        let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };

        let block = heap
            .alloc(Layout::new::<u32>(), Permissions::READ_WRITE)
            .unwrap();
        let region = block.region();
        tracker.deregister(region).unwrap();

        assert!(matches!(
            heap.free(block),
            Err(FreeError::Untracked(RegionError::UnknownRegion(id))) if id == region
        ));
        assert_eq!(heap.used(), 0);
    }
}
