//! capslock demo - revocation after a foreign write
//!
//! Replays the motivating scenario end to end:
//! 1. Allocate an `i32` from a tracked heap
//! 2. Mint a tag and check it before handing the pointer out
//! 3. Let "foreign" code write through the raw pointer; the revocation
//!    policy runs right after the write
//! 4. Check the original tag again: the access must now be denied
//!
//! A second stage reborrows two sibling tags from one root, writes through
//! one of them and checks that the other is denied.
//!
//! Exits with failure if a stale tag is not caught.

mod console;

use std::alloc::Layout;
use std::fmt;
use std::process::ExitCode;
use std::ptr::NonNull;

use capslock::mm::{FreeError, HeapError, TrackedHeap};
use capslock::policy::{
    EnforcementMode, Enforcer, RevocationPolicy, RevokeOnForeignWrite, Violation,
};
use capslock::{Address, DenyReason, Operation, Permissions, RegionError, Tracker};
use log::{error, info, LevelFilter};

/// Size of the demo heap arena.
const ARENA_SIZE: usize = 16 * 1024;

/// Value the foreign routine stores.
const FOREIGN_VALUE: i32 = 9999;

/// Ways the demo can fail.
#[derive(Debug)]
enum DemoError {
    Heap(HeapError),
    Free(FreeError),
    Region(RegionError),
    Violation(Violation),
    Denied(DenyReason),
    /// The stale tag passed the check.
    Undetected,
}

impl fmt::Display for DemoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heap(err) => write!(f, "heap: {}", err),
            Self::Free(err) => write!(f, "free: {}", err),
            Self::Region(err) => write!(f, "region: {}", err),
            Self::Violation(v) => write!(f, "unexpected {}", v),
            Self::Denied(reason) => write!(f, "unexpected denial: {}", reason),
            Self::Undetected => write!(f, "stale tag was not caught"),
        }
    }
}

impl From<HeapError> for DemoError {
    fn from(err: HeapError) -> Self {
        Self::Heap(err)
    }
}

impl From<FreeError> for DemoError {
    fn from(err: FreeError) -> Self {
        Self::Free(err)
    }
}

impl From<RegionError> for DemoError {
    fn from(err: RegionError) -> Self {
        Self::Region(err)
    }
}

impl From<DenyReason> for DemoError {
    fn from(reason: DenyReason) -> Self {
        Self::Denied(reason)
    }
}

impl From<Violation> for DemoError {
    fn from(v: Violation) -> Self {
        Self::Violation(v)
    }
}

/// Stand-in for the foreign routine: an unchecked store followed by the
/// revocation hook, exactly in that order.
///
/// # Safety
/// `ptr` must be valid for a 4-byte aligned write.
unsafe fn foreign_write(
    ptr: NonNull<i32>,
    tracker: &Tracker,
    policy: &dyn RevocationPolicy,
) -> Result<(), RegionError> {
    info!("[foreign] received {:p}, performing raw write", ptr);

    // SAFETY: guaranteed by the caller.
    unsafe { ptr.as_ptr().write(FOREIGN_VALUE) };

    policy.after_foreign_write(tracker, Address::from_ptr(ptr.as_ptr()))?;
    Ok(())
}

fn run(heap: &TrackedHeap<'_>, enforcer: &Enforcer, policy: &dyn RevocationPolicy) -> Result<(), DemoError> {
    let tracker = heap.tracker();
    let layout = Layout::new::<i32>();

    let block = heap.alloc(layout, Permissions::READ_WRITE)?;
    let ptr = block.ptr().cast::<i32>();
    info!("[1] alloc: {} registered as {}", block.address(), block.region());

    let tag = tracker.mint(block.address())?;
    enforcer.enforce_span(tracker, &tag, Operation::Write, layout.size())?;
    // SAFETY: the block is a live, aligned i32 allocation owned by us.
    unsafe { ptr.as_ptr().write(42) };
    enforcer.enforce_span(tracker, &tag, Operation::Read, layout.size())?;
    // SAFETY: as above.
    let value = unsafe { ptr.as_ptr().read() };
    info!("[2] tag {:?} valid, value = {}", tag, value);

    info!("[3] passing pointer to foreign code");
    // SAFETY: the block is a live, aligned i32 allocation.
    unsafe { foreign_write(ptr, tracker, policy)? };

    info!("[4] foreign code returned, checking original tag");
    let outcome = enforcer.enforce_span(tracker, &tag, Operation::Write, layout.size());

    heap.free(block)?;

    match outcome {
        Err(violation) => {
            info!("[5] caught: {}", violation);
            Ok(())
        }
        Ok(()) => Err(DemoError::Undetected),
    }
}

fn run_siblings(heap: &TrackedHeap<'_>, enforcer: &Enforcer) -> Result<(), DemoError> {
    let tracker = heap.tracker();
    let layout = Layout::new::<i32>();

    let block = heap.alloc(layout, Permissions::READ_WRITE)?;
    let root = tracker.mint(block.address())?;
    let child_a = tracker.reborrow(&root)?;
    let child_b = tracker.reborrow(&root)?;
    info!("[6] reborrowed {:?} and {:?}", child_a, child_b);

    let killed = tracker.access(&child_b, Operation::Write, layout.size())?;
    // SAFETY: the block is a live, aligned i32 allocation owned by us.
    unsafe { block.ptr().cast::<i32>().as_ptr().write(7) };
    info!("[7] wrote through {:?}, {} sibling borrow(s) invalidated", child_b, killed);

    let outcome = enforcer.enforce_span(tracker, &child_a, Operation::Write, layout.size());

    heap.free(block)?;

    match outcome {
        Err(violation) => {
            info!("[8] caught: {}", violation);
            Ok(())
        }
        Ok(()) => Err(DemoError::Undetected),
    }
}

fn main() -> ExitCode {
    if let Err(err) = console::init(LevelFilter::Debug) {
        eprintln!("failed to install logger: {}", err);
    }

    info!("=== capslock: revocation demo ===");

    let mut arena = vec![0u8; ARENA_SIZE];
    let tracker = Tracker::new();
    // SAFETY: the arena is exclusively owned, outlives the heap and is
    // larger than the allocator minimum.
    let heap = unsafe { TrackedHeap::new(&tracker, arena.as_mut_ptr(), ARENA_SIZE) };
    let enforcer = Enforcer::new(EnforcementMode::Strict);

    let result =
        run(&heap, &enforcer, &RevokeOnForeignWrite).and_then(|()| run_siblings(&heap, &enforcer));
    drop(heap);
    let leftover = tracker.shutdown();

    match result {
        Ok(()) => {
            info!("demo complete ({} regions left at shutdown)", leftover);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("demo failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
