//! Reborrowing
//!
//! Derived pointers and the writes that invalidate their siblings.
//!
//! # Security Properties
//! - A reborrow inherits region, generation and offset from its parent
//! - Only a tag that passes `check_live` can be reborrowed
//! - A write through one borrow denies every unrelated borrow afterwards;
//!   revocation still retires them all at once

use log::debug;

use super::check::{check_live, check_span, DenyReason};
use super::rights::Operation;
use super::tag::Tag;
use crate::region::RegionTable;

/// Derive a child of `parent` in its region's borrow tree.
pub fn reborrow(table: &mut RegionTable, parent: &Tag) -> Result<Tag, DenyReason> {
    check_live(table, parent)?;

    let region = table
        .get_mut(parent.region())
        .ok_or(DenyReason::Revoked)?;
    let child = region.borrows_mut().derive(parent.borrow());

    Ok(parent.with_borrow(child))
}

/// Perform an access of `len` bytes through `tag`.
///
/// Same verdict as `check_span`. A permitted write then invalidates every
/// borrow of the region that is neither an ancestor nor a descendant of
/// the tag's borrow. Returns the number of borrows invalidated.
pub fn access(
    table: &mut RegionTable,
    tag: &Tag,
    op: Operation,
    len: usize,
) -> Result<usize, DenyReason> {
    check_span(table, tag, op, len)?;

    if op != Operation::Write {
        return Ok(0);
    }

    let region = table.get_mut(tag.region()).ok_or(DenyReason::Revoked)?;
    let killed = region.borrows_mut().invalidate_foreign(tag.borrow());
    if killed > 0 {
        debug!(
            "cap: write through {}/{} invalidated {} borrow(s)",
            tag.region(),
            tag.borrow(),
            killed
        );
    }
    Ok(killed)
}
