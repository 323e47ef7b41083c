//! Permissions and Memory Operations
//!
//! Defines what a tracked region allows and what an access asks for.
//!
//! # Layout
//! ```text
//! ┌─────────┬─────────┬─────────┐
//! │ bit 2   │ bit 1   │ bit 0   │
//! │ EXECUTE │ WRITE   │ READ    │
//! └─────────┴─────────┴─────────┘
//! ```

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Permissions currently allowed on a region.
    ///
    /// A region's permissions are fixed at registration. Narrowing them
    /// means registering a new region, never mutating the old one.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permissions: u8 {
        /// Loads through the pointer.
        const READ = 1 << 0;
        /// Stores through the pointer.
        const WRITE = 1 << 1;
        /// Instruction fetch from the region.
        const EXECUTE = 1 << 2;

        /// Read and write.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Permissions {
    /// Check whether `op` is allowed.
    #[inline]
    pub const fn allows(self, op: Operation) -> bool {
        self.contains(op.required())
    }
}

/// A memory operation presented to the access check.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum Operation {
    Read = 0,
    Write = 1,
    Execute = 2,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 3] = [Operation::Read, Operation::Write, Operation::Execute];

    /// The permission this operation needs.
    #[inline]
    pub const fn required(self) -> Permissions {
        match self {
            Operation::Read => Permissions::READ,
            Operation::Write => Permissions::WRITE,
            Operation::Execute => Permissions::EXECUTE,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Execute => write!(f, "execute"),
        }
    }
}
