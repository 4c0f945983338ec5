//! Error types for the `OxiType` runtime.
//!
//! Only registration reports failures as values. Every other misuse is a
//! programming error: it is logged at the critical level and the call
//! returns a sentinel (`None`, `false`, an invalid id).

use std::fmt;

/// Errors returned by type registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A type with this name is already registered.
    NameTaken {
        /// The requested name.
        name: String,
    },

    /// The type name is empty or contains characters outside `[A-Za-z0-9_+-]`.
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The parent type is not registered.
    InvalidParent,

    /// The parent type is final and rejects descendants.
    ParentFinal {
        /// Name of the final parent.
        parent: &'static str,
    },

    /// The parent's fundamental does not allow (deep) derivation.
    ParentNotDerivable {
        /// Name of the parent.
        parent: &'static str,
    },

    /// The abstract flag was requested for a type that could never be
    /// instantiated through a descendant.
    AbstractInstantiable {
        /// The requested name.
        name: String,
    },

    /// The interface is already implemented by the type or an ancestor.
    AlreadyAdded {
        /// Name of the interface.
        interface: &'static str,
    },

    /// The type passed as interface is not an interface type.
    NotAnInterface {
        /// Name of the offending type.
        name: &'static str,
    },

    /// The implementer type cannot carry interfaces.
    NotInstantiable {
        /// Name of the offending type.
        name: &'static str,
    },

    /// The implementer does not conform to a prerequisite of the interface.
    MissingPrerequisite {
        /// Name of the interface.
        interface: &'static str,
        /// Name of the missing prerequisite.
        prerequisite: &'static str,
    },

    /// Interfaces cannot be added once the implementer's class exists.
    ClassAlreadyInitialized {
        /// Name of the implementer.
        name: &'static str,
    },

    /// The table of fundamental type slots is full.
    TooManyFundamentals,

    /// The type's class initializer failed earlier.
    Poisoned {
        /// Name of the poisoned type.
        name: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NameTaken { name } => {
                write!(f, "Type name '{name}' is already registered")
            }
            Error::InvalidName { name } => {
                write!(f, "Invalid type name '{name}'")
            }
            Error::InvalidParent => write!(f, "Parent type is not registered"),
            Error::ParentFinal { parent } => {
                write!(f, "Cannot derive from final type '{parent}'")
            }
            Error::ParentNotDerivable { parent } => {
                write!(f, "Type '{parent}' is not derivable")
            }
            Error::AbstractInstantiable { name } => {
                write!(
                    f,
                    "Type '{name}' cannot be abstract: no descendant could be instantiated"
                )
            }
            Error::AlreadyAdded { interface } => {
                write!(f, "Interface '{interface}' is already implemented")
            }
            Error::NotAnInterface { name } => {
                write!(f, "Type '{name}' is not an interface")
            }
            Error::NotInstantiable { name } => {
                write!(f, "Type '{name}' is not instantiable")
            }
            Error::MissingPrerequisite {
                interface,
                prerequisite,
            } => {
                write!(
                    f,
                    "Interface '{interface}' requires '{prerequisite}' to be implemented first"
                )
            }
            Error::ClassAlreadyInitialized { name } => {
                write!(f, "Class of '{name}' is already initialized")
            }
            Error::TooManyFundamentals => {
                write!(f, "No fundamental type slots left")
            }
            Error::Poisoned { name } => {
                write!(f, "Type '{name}' is poisoned by a failed class initializer")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for `OxiType` registration.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NameTaken {
            name: "Widget".to_string(),
        };
        assert_eq!(err.to_string(), "Type name 'Widget' is already registered");

        let err = Error::ParentFinal { parent: "Leaf" };
        assert_eq!(err.to_string(), "Cannot derive from final type 'Leaf'");

        let err = Error::MissingPrerequisite {
            interface: "Shape",
            prerequisite: "Object",
        };
        assert!(err.to_string().contains("requires 'Object'"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::InvalidParent, Error::InvalidParent);
        assert_ne!(Error::InvalidParent, Error::TooManyFundamentals);
    }

    #[test]
    fn test_error_is_std_error() {
        fn takes_error(_: &dyn std::error::Error) {}
        takes_error(&Error::TooManyFundamentals);
    }
}
