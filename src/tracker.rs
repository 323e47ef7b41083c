//! Capability Tracker
//!
//! The thread-safe, explicitly owned front door to the region table.
//!
//! # Concurrency
//! - The table sits behind a `spin::RwLock`
//! - `lookup`, `mint` and `check` take the read lock and run concurrently
//! - `register`, `deregister`, `revoke`, `access` and friends take the
//!   write lock
//! - Writers go through the upgradeable read path: once a writer is
//!   queued, new readers back off until it is done, so a steady stream of
//!   checks cannot hold `revoke` off indefinitely
//! - Every critical section is short and bounded; nothing suspends
//!
//! # Ordering
//! Once `revoke` returns, every later `check` on any thread sees the region
//! as revoked. A check already in flight sees either the whole old state or
//! the whole new one, never a validity flip without its generation bump.

use log::debug;
use spin::{RwLock, RwLockWriteGuard};

use crate::cap::{self, DenyReason, Operation, Permissions, Tag};
use crate::config::TrackerConfig;
use crate::region::{Address, Region, RegionError, RegionId, RegionTable};

/// Owned capability tracker shared by allocator, instrumentation and policy
/// collaborators.
///
/// There is no global instance: create one, share it by reference (or
/// `Arc`), and tear it down with `shutdown`.
#[derive(Debug)]
pub struct Tracker {
    table: RwLock<RegionTable>,
    config: TrackerConfig,
}

impl Tracker {
    /// Create a tracker with the default configuration.
    pub const fn new() -> Self {
        Self::with_config(TrackerConfig::new())
    }

    /// Create a tracker with an explicit configuration.
    pub const fn with_config(config: TrackerConfig) -> Self {
        Self {
            table: RwLock::new(RegionTable::with_limit(config.max_regions)),
            config,
        }
    }

    /// Writer-preferring exclusive access to the table.
    #[inline]
    fn write(&self) -> RwLockWriteGuard<'_, RegionTable> {
        self.table.upgradeable_read().upgrade()
    }

    /// Configuration this tracker was built with.
    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking `[base, base + size)` with `permissions`.
    ///
    /// Called by the allocator collaborator on allocation.
    pub fn register(
        &self,
        base: Address,
        size: usize,
        permissions: Permissions,
    ) -> Result<RegionId, RegionError> {
        let id = self.write().register(base, size, permissions)?;
        debug!(
            "register: {} at {} (size {:#x}, {:?})",
            id, base, size, permissions
        );
        Ok(id)
    }

    /// Stop tracking a region, valid or revoked.
    ///
    /// Called by the allocator collaborator on deallocation.
    pub fn deregister(&self, id: RegionId) -> Result<(), RegionError> {
        let region = self.write().deregister(id)?;
        debug!(
            "deregister: {} at {} ({:?}, generation {})",
            id,
            region.base(),
            region.state(),
            region.generation()
        );
        Ok(())
    }

    /// Stop tracking the block at `base` that was registered as `id`.
    ///
    /// Drops `id` if it is still recorded, and whichever valid region now
    /// starts at `base` if a resize or reinstate replaced it. Returns how
    /// many records went.
    pub fn release(&self, id: RegionId, base: Address) -> Result<usize, RegionError> {
        let released = self.write().release(id, base)?;
        debug!("release: {} at {} ({} record(s))", id, base, released);
        Ok(released)
    }

    /// Find the valid region containing `addr`.
    #[inline]
    pub fn lookup(&self, addr: Address) -> Result<RegionId, RegionError> {
        self.table.read().lookup(addr)
    }

    /// Mint a tag for a pointer about to cross a trust boundary.
    #[inline]
    pub fn mint(&self, addr: Address) -> Result<Tag, RegionError> {
        cap::mint(&self.table.read(), addr)
    }

    /// Check a one-byte access through `tag`.
    #[inline]
    pub fn check(&self, tag: &Tag, op: Operation) -> Result<(), DenyReason> {
        cap::check(&self.table.read(), tag, op)
    }

    /// Check a `len`-byte access through `tag`.
    #[inline]
    pub fn check_span(&self, tag: &Tag, op: Operation, len: usize) -> Result<(), DenyReason> {
        cap::check_span(&self.table.read(), tag, op, len)
    }

    /// Derive a child tag from `parent`.
    pub fn reborrow(&self, parent: &Tag) -> Result<Tag, DenyReason> {
        cap::reborrow(&mut self.write(), parent)
    }

    /// Perform a `len`-byte access through `tag`.
    ///
    /// Writes invalidate every unrelated borrow of the region; returns how
    /// many were invalidated.
    pub fn access(&self, tag: &Tag, op: Operation, len: usize) -> Result<usize, DenyReason> {
        cap::access(&mut self.write(), tag, op, len)
    }

    /// Revoke a region, invalidating every tag minted from it.
    ///
    /// Idempotent on an already revoked region.
    pub fn revoke(&self, id: RegionId) -> Result<(), RegionError> {
        cap::revoke(&mut self.write(), id)
    }

    /// Revoke whichever valid region owns `addr`.
    pub fn revoke_address(&self, addr: Address) -> Result<RegionId, RegionError> {
        cap::revoke_containing(&mut self.write(), addr)
    }

    /// Invalidate outstanding tags while keeping the region active.
    pub fn bump_generation(&self, id: RegionId) -> Result<u64, RegionError> {
        let generation = self.write().bump_generation(id)?;
        debug!("bump: {} now generation {}", id, generation);
        Ok(generation)
    }

    /// Replace an active region by one of `new_size` bytes at the same base.
    pub fn resize(&self, id: RegionId, new_size: usize) -> Result<RegionId, RegionError> {
        let new_id = self.write().resize(id, new_size)?;
        debug!("resize: {} -> {} (size {:#x})", id, new_id, new_size);
        Ok(new_id)
    }

    /// Re-arm a revoked region under a new id.
    pub fn reinstate(&self, id: RegionId) -> Result<RegionId, RegionError> {
        let new_id = self.write().reinstate(id)?;
        debug!("reinstate: {} -> {}", id, new_id);
        Ok(new_id)
    }

    /// Snapshot of a region record.
    pub fn region(&self, id: RegionId) -> Option<Region> {
        self.table.read().get(id).cloned()
    }

    /// Number of records, valid or revoked.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Number of valid regions.
    pub fn active_len(&self) -> usize {
        self.table.read().active_len()
    }

    /// Tear the tracker down, returning how many records it still held.
    pub fn shutdown(self) -> usize {
        let dropped = self.table.into_inner().clear();
        debug!("shutdown: dropped {} region records", dropped);
        dropped
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}
