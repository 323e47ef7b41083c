//! Capability Tags and Enforcement
//!
//! Implements the pointer-provenance side of the tracker.
//!
//! # Design
//! - A `Tag` is minted when a pointer crosses a trust boundary
//! - `check` validates a (tag, operation) pair against the region table
//! - `revoke` retires a region so that every tag minted from it fails
//! - `reborrow` derives a child tag; a write through it via `access`
//!   invalidates its siblings
//!
//! # Security Properties
//! - Tags cannot be forged; only `mint`, `reborrow` and `Tag::advance`
//!   produce them
//! - Checks fail closed and have no side effects; `access` is the one
//!   path that mutates borrow state
//! - Revocation is final: no operation makes an old tag pass again

pub mod borrow;
pub mod check;
pub mod revoke;
pub mod rights;
pub mod tag;

pub use borrow::{access, reborrow};
pub use check::{check, check_live, check_span, DenyReason};
pub use revoke::{revoke, revoke_containing};
pub use rights::{Operation, Permissions};
pub use tag::{mint, Tag};
