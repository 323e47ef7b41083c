//! Revocation and Enforcement Policy
//!
//! The core only answers questions; this module decides what to do with
//! the answers.
//!
//! # Design
//! - `RevocationPolicy` decides what a raw foreign write does to the
//!   region it touched. The write has already happened when the policy
//!   runs: only later accesses through old tags are stopped
//! - `Enforcer` turns a denied check into either a `Violation` the caller
//!   must handle (`Strict`) or a logged audit record (`Audit`)
//!
//! Nothing here panics or aborts; terminating the offending call is the
//! caller's decision.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::warn;

use crate::cap::{DenyReason, Operation, Tag};
use crate::region::{Address, RegionError, RegionId};
use crate::tracker::Tracker;

/// What to do after foreign code wrote through a raw pointer.
pub trait RevocationPolicy {
    /// React to a raw write at `addr`.
    ///
    /// Returns the region that was acted on, or None if the address is not
    /// tracked.
    fn after_foreign_write(
        &self,
        tracker: &Tracker,
        addr: Address,
    ) -> Result<Option<RegionId>, RegionError>;
}

/// Revoke the whole region: every tag minted from it stops working and
/// the region accepts no further access.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevokeOnForeignWrite;

impl RevocationPolicy for RevokeOnForeignWrite {
    fn after_foreign_write(
        &self,
        tracker: &Tracker,
        addr: Address,
    ) -> Result<Option<RegionId>, RegionError> {
        match tracker.revoke_address(addr) {
            Ok(id) => {
                warn!("policy: foreign write at {}, revoked {}", addr, id);
                Ok(Some(id))
            }
            Err(RegionError::NotFound(_)) => {
                warn!("policy: foreign write to untracked address {}", addr);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Rotate the region's generation: old tags stop working but the region
/// stays active, so freshly minted tags pass again.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotateOnForeignWrite;

impl RevocationPolicy for RotateOnForeignWrite {
    fn after_foreign_write(
        &self,
        tracker: &Tracker,
        addr: Address,
    ) -> Result<Option<RegionId>, RegionError> {
        let id = match tracker.lookup(addr) {
            Ok(id) => id,
            Err(RegionError::NotFound(_)) => {
                warn!("policy: foreign write to untracked address {}", addr);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let generation = tracker.bump_generation(id)?;
        warn!(
            "policy: foreign write at {}, rotated {} to generation {}",
            addr, id, generation
        );
        Ok(Some(id))
    }
}

/// How the enforcer treats a denied check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Report the denial to the caller.
    Strict,
    /// Log the denial and let the access proceed.
    Audit,
}

/// A denied access, as reported by a strict enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub tag: Tag,
    pub op: Operation,
    pub reason: DenyReason,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "security violation: {} through {:?} denied ({})",
            self.op, self.tag, self.reason
        )
    }
}

/// Wraps `Tracker::check` with an enforcement mode.
#[derive(Debug)]
pub struct Enforcer {
    mode: EnforcementMode,
    /// Denials let through in audit mode.
    audited: AtomicUsize,
}

impl Enforcer {
    pub const fn new(mode: EnforcementMode) -> Self {
        Self {
            mode,
            audited: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    /// Number of denials let through so far.
    pub fn audited(&self) -> usize {
        self.audited.load(Ordering::Relaxed)
    }

    /// Enforce a one-byte access.
    pub fn enforce(&self, tracker: &Tracker, tag: &Tag, op: Operation) -> Result<(), Violation> {
        self.enforce_span(tracker, tag, op, 1)
    }

    /// Enforce a `len`-byte access.
    pub fn enforce_span(
        &self,
        tracker: &Tracker,
        tag: &Tag,
        op: Operation,
        len: usize,
    ) -> Result<(), Violation> {
        let reason = match tracker.check_span(tag, op, len) {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };

        let violation = Violation {
            tag: *tag,
            op,
            reason,
        };

        match self.mode {
            EnforcementMode::Strict => {
                warn!("{}", violation);
                Err(violation)
            }
            EnforcementMode::Audit => {
                self.audited.fetch_add(1, Ordering::Relaxed);
                warn!("audit: {}", violation);
                Ok(())
            }
        }
    }
}

impl Default for Enforcer {
    fn default() -> Self {
        Self::new(EnforcementMode::Strict)
    }
}
