//! Tracked Address Type
//!
//! Addresses handed to the tracker by allocators and foreign code.
//!
//! # Security Properties
//! - An `Address` is an opaque integer: the tracker only compares it
//!   against stored ranges and never dereferences it
//! - Conversions from raw pointers are explicit
//! - Arithmetic is checked; overflow is reported, not wrapped

use core::fmt;

/// An address inside (or outside) some tracked region.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// Create an address from its raw value.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Take the address of a raw pointer.
    ///
    /// Only the numeric value is kept; provenance is dropped.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Add a byte offset, returning None on overflow.
    #[inline]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Byte distance from `base` up to this address.
    ///
    /// Returns None if this address lies below `base`.
    #[inline]
    pub const fn offset_from(self, base: Address) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}
