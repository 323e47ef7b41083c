//! Region Table
//!
//! The single source of truth mapping address ranges to capability
//! metadata.
//!
//! # Design
//! - Every record lives in `regions`, keyed by its never-reused `RegionId`
//! - Valid regions are also indexed by base address in `active`, so
//!   `lookup` is an O(log n) predecessor search
//! - A revoked record keeps its id and generation but leaves the index: it
//!   no longer owns its address range
//!
//! ```text
//!   regions: R1 ─► { base 0x1000, size 64, gen 0, RW, valid }
//!            R2 ─► { base 0x2000, size 32, gen 1, R,  revoked }
//!   active:  0x1000 ─► R1
//! ```
//!
//! The table itself is not synchronized; `Tracker` puts it behind a
//! reader-writer lock.

use alloc::collections::BTreeMap;
use core::fmt;

use super::address::Address;
use super::borrow::BorrowTree;
use crate::cap::Permissions;
use crate::config::DEFAULT_MAX_REGIONS;

/// Identifier of one region record.
///
/// Ids are handed out in increasing order and never reused, so a stale id
/// can never alias a newer region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct RegionId(u64);

impl RegionId {
    /// Get the raw id value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Lifecycle state of a region.
///
/// `Active --revoke--> Revoked --deregister--> removed`. Nothing leads back
/// to `Active`; reinstatement creates a new region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegionState {
    Active,
    Revoked,
}

/// One tracked memory extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    id: RegionId,
    base: Address,
    size: usize,
    /// Bumped exactly once per revocation (and by explicit bumps).
    generation: u64,
    permissions: Permissions,
    valid: bool,
    /// Pointers derived from minted tags, for the current generation.
    borrows: BorrowTree,
}

impl Region {
    fn new(id: RegionId, base: Address, size: usize, permissions: Permissions) -> Self {
        Self {
            id,
            base,
            size,
            generation: 0,
            permissions,
            valid: true,
            borrows: BorrowTree::new(),
        }
    }

    #[inline]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    #[inline]
    pub const fn base(&self) -> Address {
        self.base
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// One past the last byte of the region.
    #[inline]
    pub const fn end(&self) -> Address {
        // base + size was checked for overflow at registration.
        Address::new(self.base.as_usize() + self.size)
    }

    #[inline]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub const fn permissions(&self) -> Permissions {
        self.permissions
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    #[inline]
    pub fn borrows(&self) -> &BorrowTree {
        &self.borrows
    }

    #[inline]
    pub(crate) fn borrows_mut(&mut self) -> &mut BorrowTree {
        &mut self.borrows
    }

    #[inline]
    pub const fn state(&self) -> RegionState {
        if self.valid {
            RegionState::Active
        } else {
            RegionState::Revoked
        }
    }

    /// Check whether `addr` falls inside `[base, base + size)`.
    #[inline]
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Error type for region table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The requested extent intersects a valid region.
    Overlap {
        base: Address,
        size: usize,
        existing: RegionId,
    },
    /// Zero-sized extent, or `base + size` overflows. An extent ending
    /// exactly at the top of the address space (`base + size ==
    /// usize::MAX + 1`) counts as overflowing, so the last byte of the
    /// address space cannot be tracked.
    InvalidRange { base: Address, size: usize },
    /// The configured region limit is reached.
    TableFull,
    /// No record with this id.
    UnknownRegion(RegionId),
    /// No valid region contains this address.
    NotFound(Address),
    /// The operation needs an active region.
    Revoked(RegionId),
    /// The operation needs a revoked region.
    NotRevoked(RegionId),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap {
                base,
                size,
                existing,
            } => write!(
                f,
                "range {}+{:#x} overlaps region {}",
                base, size, existing
            ),
            Self::InvalidRange { base, size } => {
                write!(f, "invalid range {}+{:#x}", base, size)
            }
            Self::TableFull => write!(f, "region table is full"),
            Self::UnknownRegion(id) => write!(f, "unknown region {}", id),
            Self::NotFound(addr) => write!(f, "address {} is not tracked", addr),
            Self::Revoked(id) => write!(f, "region {} is revoked", id),
            Self::NotRevoked(id) => write!(f, "region {} is still active", id),
        }
    }
}

/// Compute the end of `[base, base + size)`, rejecting empty and
/// overflowing extents.
fn validate_range(base: Address, size: usize) -> Result<Address, RegionError> {
    if size == 0 {
        return Err(RegionError::InvalidRange { base, size });
    }
    base.checked_add(size)
        .ok_or(RegionError::InvalidRange { base, size })
}

/// Address-range to capability-metadata map.
#[derive(Debug)]
pub struct RegionTable {
    /// Every record, valid or revoked.
    regions: BTreeMap<RegionId, Region>,
    /// Valid regions by base address. Extents in here never overlap.
    active: BTreeMap<Address, RegionId>,
    /// Next id to hand out.
    next_id: u64,
    /// Maximum number of records (valid and revoked).
    max_regions: usize,
}

impl RegionTable {
    /// Create an empty table with the default region limit.
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_REGIONS)
    }

    /// Create an empty table holding at most `max_regions` records.
    pub const fn with_limit(max_regions: usize) -> Self {
        Self {
            regions: BTreeMap::new(),
            active: BTreeMap::new(),
            next_id: 1,
            max_regions,
        }
    }

    /// Start tracking `[base, base + size)`.
    ///
    /// Fails if the extent is empty or overflows, if the table is full, or
    /// if the extent intersects a valid region.
    pub fn register(
        &mut self,
        base: Address,
        size: usize,
        permissions: Permissions,
    ) -> Result<RegionId, RegionError> {
        let end = validate_range(base, size)?;

        if self.regions.len() >= self.max_regions {
            return Err(RegionError::TableFull);
        }

        if let Some(existing) = self.find_overlap(base, end, None) {
            return Err(RegionError::Overlap {
                base,
                size,
                existing,
            });
        }

        Ok(self.insert(base, size, permissions))
    }

    fn insert(&mut self, base: Address, size: usize, permissions: Permissions) -> RegionId {
        let id = RegionId(self.next_id);
        self.next_id += 1;

        self.regions
            .insert(id, Region::new(id, base, size, permissions));
        self.active.insert(base, id);
        id
    }

    /// Find a valid region, other than `ignore`, intersecting `[base, end)`.
    fn find_overlap(&self, base: Address, end: Address, ignore: Option<RegionId>) -> Option<RegionId> {
        // Active extents are disjoint and sorted by base, so their ends are
        // sorted too: only the closest one starting before `end` can reach
        // past `base`.
        self.active
            .range(..end)
            .rev()
            .map(|(_, id)| *id)
            .find(|id| Some(*id) != ignore)
            .filter(|id| {
                self.regions
                    .get(id)
                    .is_some_and(|region| region.end() > base)
            })
    }

    /// Find the valid region containing `addr`.
    pub fn lookup(&self, addr: Address) -> Result<RegionId, RegionError> {
        let (_, id) = self
            .active
            .range(..=addr)
            .next_back()
            .ok_or(RegionError::NotFound(addr))?;

        match self.regions.get(id) {
            Some(region) if region.contains(addr) => Ok(*id),
            _ => Err(RegionError::NotFound(addr)),
        }
    }

    /// Get a region record, valid or revoked.
    #[inline]
    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    /// Remove a record entirely.
    ///
    /// Returns the removed record.
    pub fn deregister(&mut self, id: RegionId) -> Result<Region, RegionError> {
        let region = self
            .regions
            .remove(&id)
            .ok_or(RegionError::UnknownRegion(id))?;

        if region.valid {
            self.active.remove(&region.base);
        }
        Ok(region)
    }

    /// Remove record `id` together with any valid region based exactly at
    /// `base`, returning how many records went.
    ///
    /// Used when the memory behind `id` goes away while `resize` or
    /// `reinstate` may have moved its extent to a newer id.
    pub fn release(&mut self, id: RegionId, base: Address) -> Result<usize, RegionError> {
        let mut released = 0;

        if self.deregister(id).is_ok() {
            released += 1;
        }

        if let Some(&successor) = self.active.get(&base) {
            self.deregister(successor)?;
            released += 1;
        }

        if released == 0 {
            return Err(RegionError::UnknownRegion(id));
        }
        Ok(released)
    }

    /// Increment a region's generation, returning the new value.
    ///
    /// On a valid region this invalidates every outstanding tag while the
    /// region stays active.
    pub fn bump_generation(&mut self, id: RegionId) -> Result<u64, RegionError> {
        let region = self
            .regions
            .get_mut(&id)
            .ok_or(RegionError::UnknownRegion(id))?;

        region.generation += 1;
        region.borrows.clear();
        Ok(region.generation)
    }

    /// Flip a region to revoked and bump its generation in one step.
    ///
    /// Returns `false` if the region was already revoked; its generation is
    /// left alone in that case.
    pub(crate) fn invalidate(&mut self, id: RegionId) -> Result<bool, RegionError> {
        let region = self
            .regions
            .get_mut(&id)
            .ok_or(RegionError::UnknownRegion(id))?;

        if !region.valid {
            return Ok(false);
        }

        region.valid = false;
        region.generation += 1;
        region.borrows.clear();
        self.active.remove(&region.base);
        Ok(true)
    }

    /// Replace an active region by a fresh one of `new_size` bytes at the
    /// same base.
    ///
    /// The old record is removed, so its tags resolve to nothing. A failed
    /// resize leaves the table untouched.
    pub fn resize(&mut self, id: RegionId, new_size: usize) -> Result<RegionId, RegionError> {
        let region = self.regions.get(&id).ok_or(RegionError::UnknownRegion(id))?;
        if !region.valid {
            return Err(RegionError::Revoked(id));
        }

        let (base, permissions) = (region.base, region.permissions);
        let end = validate_range(base, new_size)?;

        if let Some(existing) = self.find_overlap(base, end, Some(id)) {
            return Err(RegionError::Overlap {
                base,
                size: new_size,
                existing,
            });
        }

        self.regions.remove(&id);
        self.active.remove(&base);
        Ok(self.insert(base, new_size, permissions))
    }

    /// Re-arm a revoked region under a new id.
    ///
    /// The revoked record is dropped; the new region covers the same extent
    /// with the same permissions and starts at generation 0.
    pub fn reinstate(&mut self, id: RegionId) -> Result<RegionId, RegionError> {
        let region = self.regions.get(&id).ok_or(RegionError::UnknownRegion(id))?;
        if region.valid {
            return Err(RegionError::NotRevoked(id));
        }

        let (base, size, permissions) = (region.base, region.size, region.permissions);

        if let Some(existing) = self.find_overlap(base, region.end(), None) {
            return Err(RegionError::Overlap {
                base,
                size,
                existing,
            });
        }

        self.regions.remove(&id);
        Ok(self.insert(base, size, permissions))
    }

    /// Number of records, valid or revoked.
    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of valid regions.
    #[inline]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Iterate over all records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Drop every record, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.regions.len();
        self.regions.clear();
        self.active.clear();
        count
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}
