//! Region Tracking
//!
//! Bookkeeping for the memory extents under capability tracking.
//!
//! # Design
//! - Addresses are opaque handles; the tracker never touches the memory
//! - Each allocation becomes one `Region` with a generation counter
//! - Revocation bumps the generation and retires the region's range
//! - Derived pointers form a per-region borrow tree

pub mod address;
pub mod borrow;
pub mod table;

pub use address::Address;
pub use borrow::{BorrowId, BorrowTree};
pub use table::{Region, RegionError, RegionId, RegionState, RegionTable};
