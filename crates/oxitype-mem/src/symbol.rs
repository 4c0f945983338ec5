//! Symbol ids for interned strings.
//!
//! A [`Symbol`] is a non-zero 32-bit id handed out by the
//! [`SyncInterner`](crate::SyncInterner). Id `0` is reserved for
//! [`Symbol::NONE`] and never names a string.
//!
//! # Examples
//!
//! ```
//! use oxitype_mem::Symbol;
//!
//! let sym = Symbol::new(42);
//! assert_eq!(sym.as_u32(), 42);
//! assert!(!sym.is_none());
//! assert!(Symbol::NONE.is_none());
//! ```

use std::fmt;

/// A symbol representing an interned string.
///
/// - O(1) equality comparison
/// - 4 bytes, `Copy`
/// - Stable for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Symbol(u32);

impl Symbol {
    /// The reserved "no string" symbol.
    pub const NONE: Symbol = Symbol(0);

    /// Creates a symbol from a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the raw id as an index.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns true for [`Symbol::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Symbol> for u32 {
    fn from(sym: Symbol) -> u32 {
        sym.0
    }
}
