//! Revocation Engine
//!
//! Invalidates every outstanding tag for a region at once.
//!
//! # State Machine
//! ```text
//!   Active(g) ──revoke──► Revoked(g + 1) ──deregister──► removed
//!       │                     │
//!       └─read/write─► Active(g)   └─revoke──► Revoked(g + 1)  (no-op)
//! ```
//!
//! Revocation is caller driven: the policy decides when, the engine never
//! inspects memory. The validity flip and the generation bump happen under
//! one `&mut RegionTable`, so no reader can observe one without the other.

use log::debug;

use crate::region::{Address, RegionError, RegionId, RegionTable};

/// Revoke a region.
///
/// Revoking an already revoked region succeeds without bumping its
/// generation again.
pub fn revoke(table: &mut RegionTable, id: RegionId) -> Result<(), RegionError> {
    if table.invalidate(id)? {
        if let Some(region) = table.get(id) {
            debug!(
                "revoke: {} at {} (size {:#x}) now generation {}",
                id,
                region.base(),
                region.size(),
                region.generation()
            );
        }
    } else {
        debug!("revoke: {} already revoked", id);
    }
    Ok(())
}

/// Revoke the valid region owning `addr`.
///
/// This is what foreign code calls after a raw write: it only knows the
/// address, not the region id.
pub fn revoke_containing(table: &mut RegionTable, addr: Address) -> Result<RegionId, RegionError> {
    let id = table.lookup(addr)?;
    revoke(table, id)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::check::{check, DenyReason};
    use crate::cap::tag::mint;
    use crate::cap::{Operation, Permissions};
    use crate::region::RegionState;

    #[test]
    fn test_revoke_denies_all_operations() {
        let mut table = RegionTable::new();
        let r1 = table
            .register(Address::new(0x1000), 64, Permissions::all())
            .unwrap();
        let tag = mint(&table, Address::new(0x1010)).unwrap();
        for op in Operation::ALL {
            assert_eq!(check(&table, &tag, op), Ok(()));
        }

        revoke(&mut table, r1).unwrap();
        for op in Operation::ALL {
            assert_eq!(check(&table, &tag, op), Err(DenyReason::Revoked));
        }
    }

    #[test]
    fn test_revoke_idempotent() {
        let mut table = RegionTable::new();
        let r1 = table
            .register(Address::new(0x1000), 64, Permissions::READ)
            .unwrap();

        revoke(&mut table, r1).unwrap();
        let once = table.get(r1).cloned().unwrap();
        revoke(&mut table, r1).unwrap();
        let twice = table.get(r1).cloned().unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.state(), RegionState::Revoked);
        assert_eq!(twice.generation(), 1);
    }

    #[test]
    fn test_revoke_unknown() {
        let mut table = RegionTable::new();
        let r1 = table
            .register(Address::new(0x1000), 64, Permissions::READ)
            .unwrap();
        table.deregister(r1).unwrap();

        assert_eq!(revoke(&mut table, r1), Err(RegionError::UnknownRegion(r1)));
    }

    #[test]
    fn test_revoke_containing() {
        let mut table = RegionTable::new();
        let r1 = table
            .register(Address::new(0x1000), 64, Permissions::READ_WRITE)
            .unwrap();

        assert_eq!(revoke_containing(&mut table, Address::new(0x1020)), Ok(r1));
        assert_eq!(table.get(r1).unwrap().state(), RegionState::Revoked);

        // The range is no longer owned by anything.
        assert_eq!(
            revoke_containing(&mut table, Address::new(0x1020)),
            Err(RegionError::NotFound(Address::new(0x1020)))
        );
    }

    #[test]
    fn test_no_resurrection_through_reuse() {
        let mut table = RegionTable::new();
        let r1 = table
            .register(Address::new(0x1000), 64, Permissions::READ_WRITE)
            .unwrap();
        let old = mint(&table, Address::new(0x1010)).unwrap();
        revoke(&mut table, r1).unwrap();

        // A new region at the same base starts over at generation 0 but is
        // a different region, so the old tag stays denied.
        let r2 = table
            .register(Address::new(0x1000), 64, Permissions::READ_WRITE)
            .unwrap();
        let new = mint(&table, Address::new(0x1010)).unwrap();
        assert_ne!(r1, r2);
        assert_eq!(new.generation(), 0);
        assert_eq!(check(&table, &new, Operation::Write), Ok(()));
        assert_eq!(check(&table, &old, Operation::Write), Err(DenyReason::Revoked));

        let r3 = table.reinstate(r1);
        assert!(matches!(r3, Err(RegionError::Overlap { .. })));
        table.deregister(r1).unwrap();
        assert_eq!(check(&table, &old, Operation::Write), Err(DenyReason::Revoked));
    }
}
