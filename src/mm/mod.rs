//! Memory management collaborators
//!
//! Provides:
//! - A tracked heap that registers every allocation
//!
//! # Security Principles
//! - The table learns about a block before its pointer escapes
//! - A block leaves the table before it can be handed out again

mod heap;

pub use heap::{Allocation, FreeError, HeapError, TrackedHeap};
