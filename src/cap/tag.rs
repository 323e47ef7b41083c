//! Capability Tags
//!
//! A tag travels with every pointer handed across a trust boundary.
//!
//! # Tag Structure
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Tag                             │
//! ├──────────────────────────────────────────────────────────┤
//! │  region: RegionId     - Region the pointer came from     │
//! │  generation: u64      - Region generation at mint time   │
//! │  offset: usize        - Byte offset inside the region    │
//! │  borrow: BorrowId     - Node in the region's borrow tree │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security Properties
//! - Tags cannot be constructed outside this crate except by `mint`
//! - The region reference is lookup-only and keeps nothing alive
//! - Staleness is detected by comparing generations, never by tracking
//!   tag lifetimes

use core::fmt;

use crate::region::{Address, BorrowId, RegionError, RegionId, RegionTable};

/// Provenance token for one pointer.
///
/// Immutable once minted. Callers simply drop tags they no longer need.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    region: RegionId,
    generation: u64,
    offset: usize,
    borrow: BorrowId,
}

impl Tag {
    #[inline]
    pub(crate) const fn new(region: RegionId, generation: u64, offset: usize) -> Self {
        Self {
            region,
            generation,
            offset,
            borrow: BorrowId::ROOT,
        }
    }

    /// Same pointer, reborrowed as `borrow`.
    #[inline]
    pub(crate) const fn with_borrow(self, borrow: BorrowId) -> Self {
        Self { borrow, ..self }
    }

    /// Region the tag was derived from.
    #[inline]
    pub const fn region(&self) -> RegionId {
        self.region
    }

    /// Region generation when the tag was minted.
    #[inline]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Byte offset within the region.
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Borrow this tag stands for; `BorrowId::ROOT` for minted tags.
    #[inline]
    pub const fn borrow(&self) -> BorrowId {
        self.borrow
    }

    /// Derive the tag for a pointer `bytes` further into the region.
    ///
    /// The result is not bounds-checked here; `check` rejects it if it
    /// ends up outside the region. Overflow saturates so that it is always
    /// rejected.
    #[inline]
    pub const fn advance(self, bytes: usize) -> Self {
        Self {
            offset: self.offset.saturating_add(bytes),
            ..self
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag({}@{}+{:#x}/{})",
            self.region, self.generation, self.offset, self.borrow
        )
    }
}

/// Mint a tag for `addr`.
///
/// Finds the valid region owning the address and snapshots its current
/// generation. Read-only with respect to the table.
pub fn mint(table: &RegionTable, addr: Address) -> Result<Tag, RegionError> {
    let id = table.lookup(addr)?;
    let region = table.get(id).ok_or(RegionError::NotFound(addr))?;
    let offset = addr
        .offset_from(region.base())
        .ok_or(RegionError::NotFound(addr))?;

    Ok(Tag::new(id, region.generation(), offset))
}
