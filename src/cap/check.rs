//! Access Check
//!
//! Gates every memory operation performed through a tagged pointer.
//!
//! # Security Principles
//! - Fail closed: any single failing condition denies
//! - No side effects: a check only reads the table
//! - Denial costs the same as success: every condition is evaluated from
//!   one table read before the verdict is picked

use core::fmt;

use super::rights::{Operation, Permissions};
use super::tag::Tag;
use crate::region::RegionTable;

/// Why an access was denied.
///
/// This is the expected outcome of a safety check, not an exceptional
/// failure. Variants are listed in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// The region is gone or has been revoked.
    Revoked,
    /// The region's generation moved on since the tag was minted.
    StaleGeneration,
    /// The tag's borrow was invalidated by a write through an unrelated
    /// borrow of the same region.
    Invalidated,
    /// The region does not allow this operation.
    PermissionViolation,
    /// The access falls outside the region.
    OutOfBounds,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Revoked => write!(f, "region revoked"),
            Self::StaleGeneration => write!(f, "stale generation"),
            Self::Invalidated => write!(f, "borrow invalidated"),
            Self::PermissionViolation => write!(f, "permission violation"),
            Self::OutOfBounds => write!(f, "out of bounds"),
        }
    }
}

/// Check a one-byte access through `tag`.
#[inline]
pub fn check(table: &RegionTable, tag: &Tag, op: Operation) -> Result<(), DenyReason> {
    check_span(table, tag, op, 1)
}

/// Check that `tag` still names a usable pointer, regardless of
/// operation or extent.
pub fn check_live(table: &RegionTable, tag: &Tag) -> Result<(), DenyReason> {
    match table.get(tag.region()) {
        Some(region) if region.is_valid() => {
            if region.generation() != tag.generation() {
                Err(DenyReason::StaleGeneration)
            } else if !region.borrows().is_live(tag.borrow()) {
                Err(DenyReason::Invalidated)
            } else {
                Ok(())
            }
        }
        _ => Err(DenyReason::Revoked),
    }
}

/// Check an access of `len` bytes starting at the tag's offset.
///
/// # Security Checks
/// 1. Region exists and is valid
/// 2. Region generation equals the tag's generation
/// 3. The tag's borrow is still live
/// 4. Region permissions include `op`
/// 5. `[offset, offset + len)` lies inside the region
pub fn check_span(
    table: &RegionTable,
    tag: &Tag,
    op: Operation,
    len: usize,
) -> Result<(), DenyReason> {
    let (live, generation, borrowed, permissions, size) = match table.get(tag.region()) {
        Some(region) => (
            region.is_valid(),
            region.generation(),
            region.borrows().is_live(tag.borrow()),
            region.permissions(),
            region.size(),
        ),
        None => (false, tag.generation(), false, Permissions::empty(), 0),
    };

    let fresh = generation == tag.generation();
    let permitted = permissions.allows(op);
    let in_bounds = tag.offset() < size
        && tag
            .offset()
            .checked_add(len)
            .is_some_and(|end| end <= size);

    if !live {
        Err(DenyReason::Revoked)
    } else if !fresh {
        Err(DenyReason::StaleGeneration)
    } else if !borrowed {
        Err(DenyReason::Invalidated)
    } else if !permitted {
        Err(DenyReason::PermissionViolation)
    } else if !in_bounds {
        Err(DenyReason::OutOfBounds)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::tag::mint;
    use crate::region::Address;

    fn setup(perms: Permissions) -> (RegionTable, Tag) {
        let mut table = RegionTable::new();
        table.register(Address::new(0x1000), 64, perms).unwrap();
        let tag = mint(&table, Address::new(0x1010)).unwrap();
        (table, tag)
    }

    #[test]
    fn test_check_ok() {
        let (table, tag) = setup(Permissions::READ_WRITE);
        assert_eq!(check(&table, &tag, Operation::Read), Ok(()));
        assert_eq!(check(&table, &tag, Operation::Write), Ok(()));
    }

    #[test]
    fn test_permission_violation() {
        let (table, tag) = setup(Permissions::READ);
        assert_eq!(check(&table, &tag, Operation::Read), Ok(()));
        assert_eq!(
            check(&table, &tag, Operation::Write),
            Err(DenyReason::PermissionViolation)
        );
        assert_eq!(
            check(&table, &tag, Operation::Execute),
            Err(DenyReason::PermissionViolation)
        );
    }

    #[test]
    fn test_stale_generation() {
        let (mut table, tag) = setup(Permissions::READ_WRITE);
        table.bump_generation(tag.region()).unwrap();

        assert_eq!(
            check(&table, &tag, Operation::Read),
            Err(DenyReason::StaleGeneration)
        );

        let fresh = mint(&table, Address::new(0x1010)).unwrap();
        assert_eq!(check(&table, &fresh, Operation::Read), Ok(()));
    }

    #[test]
    fn test_revoked_takes_precedence() {
        let (mut table, tag) = setup(Permissions::READ);
        table.invalidate(tag.region()).unwrap();

        // Stale, wrong permission and revoked at once: revocation is reported.
        for op in Operation::ALL {
            assert_eq!(check(&table, &tag, op), Err(DenyReason::Revoked));
        }
    }

    #[test]
    fn test_deregistered_region() {
        let (mut table, tag) = setup(Permissions::READ_WRITE);
        table.deregister(tag.region()).unwrap();
        assert_eq!(check(&table, &tag, Operation::Read), Err(DenyReason::Revoked));
    }

    #[test]
    fn test_out_of_bounds() {
        let (table, tag) = setup(Permissions::READ_WRITE);

        // 0x1010 + 47 is the last byte.
        assert_eq!(check(&table, &tag.advance(47), Operation::Read), Ok(()));
        assert_eq!(
            check(&table, &tag.advance(48), Operation::Read),
            Err(DenyReason::OutOfBounds)
        );
        assert_eq!(
            check(&table, &tag.advance(usize::MAX), Operation::Read),
            Err(DenyReason::OutOfBounds)
        );
    }

    #[test]
    fn test_check_span() {
        let (table, tag) = setup(Permissions::READ_WRITE);

        assert_eq!(check_span(&table, &tag, Operation::Write, 48), Ok(()));
        assert_eq!(
            check_span(&table, &tag, Operation::Write, 49),
            Err(DenyReason::OutOfBounds)
        );
        assert_eq!(
            check_span(&table, &tag, Operation::Write, usize::MAX),
            Err(DenyReason::OutOfBounds)
        );
        assert_eq!(check_span(&table, &tag, Operation::Read, 0), Ok(()));
    }

    #[test]
    fn test_invalidated_borrow() {
        let (mut table, tag) = setup(Permissions::READ);
        let region = table.get_mut(tag.region()).unwrap();
        let child = tag.with_borrow(region.borrows_mut().derive(tag.borrow()));
        let sibling = tag.with_borrow(region.borrows_mut().derive(tag.borrow()));
        region.borrows_mut().invalidate_foreign(sibling.borrow());

        assert_eq!(check_live(&table, &sibling), Ok(()));
        assert_eq!(check_live(&table, &child), Err(DenyReason::Invalidated));

        // Reported after staleness, before permissions.
        assert_eq!(
            check(&table, &child, Operation::Write),
            Err(DenyReason::Invalidated)
        );
        table.bump_generation(tag.region()).unwrap();
        assert_eq!(
            check(&table, &child, Operation::Write),
            Err(DenyReason::StaleGeneration)
        );
    }

    #[test]
    fn test_check_live_gone() {
        let (mut table, tag) = setup(Permissions::READ);
        table.invalidate(tag.region()).unwrap();
        assert_eq!(check_live(&table, &tag), Err(DenyReason::Revoked));
    }
}
