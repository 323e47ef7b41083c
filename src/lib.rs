//! capslock - Capability-Tagged Memory Region Tracker
//!
//! Tracks which memory regions a pointer may touch and revokes that
//! permission atomically, for use-after-free and foreign-write mitigation.
//!
//! # Components
//! - Region table: address ranges to capability metadata
//! - Capability tags: per-pointer provenance (region, generation, offset)
//! - Access check: validates (tag, operation) pairs, fails closed
//! - Revocation engine: bumps generations and retires regions
//!
//! # Collaborators
//! - `mm::TrackedHeap` keeps the table in sync with allocations
//! - `policy` decides when to revoke and what a denial means
//!
//! # Security Properties
//! - Addresses are opaque; the tracker never dereferences them
//! - Revocation is immediately visible to every later check
//! - Revoked regions never come back; reinstatement mints a new region
//! - The core never logs on the check path, never panics, never aborts
//!
//! # Example
//! ```
//! use capslock::{Address, Operation, Permissions, Tracker};
//!
//! let tracker = Tracker::new();
//! let region = tracker
//!     .register(Address::new(0x1000), 64, Permissions::READ_WRITE)
//!     .unwrap();
//! let tag = tracker.mint(Address::new(0x1010)).unwrap();
//! assert!(tracker.check(&tag, Operation::Write).is_ok());
//!
//! tracker.revoke(region).unwrap();
//! assert!(tracker.check(&tag, Operation::Write).is_err());
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod cap;
pub mod config;
pub mod mm;
pub mod policy;
pub mod region;
pub mod tracker;

pub use cap::{DenyReason, Operation, Permissions, Tag};
pub use config::TrackerConfig;
pub use region::{Address, Region, RegionError, RegionId, RegionState};
pub use tracker::Tracker;
