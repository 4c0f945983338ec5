//! Quarks: process-wide interned string identifiers.
//!
//! A quark maps a string to a small integer and back in O(1) amortized time.
//! Once assigned it never changes or dies. Quarks key signal details,
//! associated data, and property names on fast paths.

use std::fmt;
use std::sync::OnceLock;

use oxitype_mem::{Symbol, SyncInterner};

fn interner() -> &'static SyncInterner {
    static INTERNER: OnceLock<SyncInterner> = OnceLock::new();
    INTERNER.get_or_init(SyncInterner::new)
}

/// An interned string identifier. `Quark::NONE` (zero) names no string.
///
/// # Example
///
/// ```
/// use oxitype::runtime::Quark;
///
/// let q = Quark::from_str("label");
/// assert_eq!(q, Quark::from_str("label"));
/// assert_eq!(q.as_str(), "label");
/// assert_eq!(Quark::try_from_str("never-interned-anywhere"), None);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quark(Symbol);

impl Quark {
    /// The empty quark.
    pub const NONE: Quark = Quark(Symbol::NONE);

    /// Interns `s` and returns its quark.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Quark {
        Quark(interner().intern(s))
    }

    /// Interns a string that lives for the whole process without copying it.
    pub fn from_static_str(s: &'static str) -> Quark {
        Quark(interner().intern_static(s))
    }

    /// Returns the quark of `s` if it was interned before.
    pub fn try_from_str(s: &str) -> Option<Quark> {
        interner().lookup(s).map(Quark)
    }

    /// Returns the string of this quark, or `""` for [`Quark::NONE`].
    pub fn as_str(self) -> &'static str {
        interner().resolve(self.0).unwrap_or("")
    }

    /// Returns true for [`Quark::NONE`].
    pub const fn is_none(self) -> bool {
        self.0.is_none()
    }

    /// Returns the raw id.
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }
}

impl fmt::Debug for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quark({}, {:?})", self.0.as_u32(), self.as_str())
    }
}

impl fmt::Display for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns a process-lifetime copy of `s`, shared with every other caller
/// interning the same string.
pub fn intern_string(s: &str) -> &'static str {
    Quark::from_str(s).as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_quark_round_trip() {
        let q = Quark::from_str("quark-round-trip");
        assert!(!q.is_none());
        assert_eq!(q.as_str(), "quark-round-trip");
        assert_eq!(Quark::try_from_str("quark-round-trip"), Some(q));
    }

    #[test]
    fn test_none_quark() {
        assert!(Quark::NONE.is_none());
        assert_eq!(Quark::NONE.as_str(), "");
        assert_eq!(Quark::default(), Quark::NONE);
    }

    #[test]
    fn test_static_and_dynamic_agree() {
        let a = Quark::from_static_str("quark-static");
        let b = Quark::from_str(&String::from("quark-static"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_intern_string_shares_storage() {
        let a = intern_string("quark-shared");
        let b = intern_string(&format!("quark-{}", "shared"));
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_concurrent_quarks() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| Quark::from_str("quark-concurrent")))
            .collect();
        let quarks: Vec<Quark> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(quarks.iter().all(|&q| q == quarks[0]));
    }
}
