//! Thread-safe string interning with id-based references.
//!
//! The interner keeps two tables behind one reader-writer lock:
//! - `strings`: Symbol id → `&'static str` (resolving)
//! - `symbols`: `&'static str` → Symbol (interning)
//!
//! String bytes are copied into the [`GlobalArena`](crate::GlobalArena), so a
//! resolved string is valid for the whole process and an assigned symbol
//! never changes or dies.
//!
//! # Examples
//!
//! ```
//! use oxitype_mem::SyncInterner;
//!
//! let interner = SyncInterner::new();
//!
//! let a = interner.intern("notify");
//! let b = interner.intern("notify");
//! assert_eq!(a, b);
//! assert_eq!(interner.resolve(a), Some("notify"));
//! assert_eq!(interner.lookup("never-seen"), None);
//! ```
//!
//! # Performance
//!
//! - **Known string**: read lock + one hash lookup
//! - **New string**: write lock + arena copy + hash insert
//! - **Resolve**: read lock + vector index

use crate::arena::{GlobalArena, global_arena};
use crate::symbol::Symbol;
use std::sync::{PoisonError, RwLock};

// Use hashbrown if available (faster), otherwise std::collections::HashMap
// The "symbols" feature enables hashbrown dependency
#[cfg(feature = "symbols")]
use hashbrown::HashMap;

#[cfg(not(feature = "symbols"))]
use std::collections::HashMap;

struct Tables {
    /// Index `id - 1` holds the string of symbol `id`.
    strings: Vec<&'static str>,
    symbols: HashMap<&'static str, Symbol>,
}

/// Process-wide string interner.
pub struct SyncInterner {
    arena: &'static GlobalArena,
    tables: RwLock<Tables>,
}

impl SyncInterner {
    /// Creates an empty interner backed by the global arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: global_arena(),
            tables: RwLock::new(Tables {
                strings: Vec::with_capacity(256),
                symbols: HashMap::with_capacity(256),
            }),
        }
    }

    /// Interns `s`, copying it into the arena on first sight.
    pub fn intern(&self, s: &str) -> Symbol {
        if let Some(sym) = self.lookup(s) {
            return sym;
        }
        self.insert_with(s, |arena| arena.alloc_str(s))
    }

    /// Interns a string that already lives for the whole process.
    ///
    /// No copy is made.
    pub fn intern_static(&self, s: &'static str) -> Symbol {
        if let Some(sym) = self.lookup(s) {
            return sym;
        }
        self.insert_with(s, |_| s)
    }

    fn insert_with(
        &self,
        s: &str,
        store: impl FnOnce(&'static GlobalArena) -> &'static str,
    ) -> Symbol {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);

        // Another thread may have won the race between our read and write lock.
        if let Some(&sym) = tables.symbols.get(s) {
            return sym;
        }

        let stored = store(self.arena);
        let id = u32::try_from(tables.strings.len() + 1).unwrap_or(u32::MAX);
        let sym = Symbol::new(id);
        tables.strings.push(stored);
        tables.symbols.insert(stored, sym);
        sym
    }

    /// Returns the symbol of `s` without interning it.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.symbols.get(s).copied()
    }

    /// Resolves a symbol to its string.
    ///
    /// Returns `None` for [`Symbol::NONE`] and unknown ids.
    #[must_use]
    pub fn resolve(&self, sym: Symbol) -> Option<&'static str> {
        let index = sym.as_usize().checked_sub(1)?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.strings.get(index).copied()
    }

    /// Returns the number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .strings
            .len()
    }

    /// Returns true if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SyncInterner {
    fn default() -> Self {
        Self::new()
    }
}
