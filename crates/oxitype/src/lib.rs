//! `OxiType`: a dynamic type and object runtime for Rust
//!
//! `OxiType` provides a runtime type system in which types are registered at
//! run time, single inheritance and interfaces are checked dynamically, and
//! instances carry reflective properties and signals. It provides:
//!
//! - **Type Registry** with fundamentals, derived types, interfaces and
//!   lazily initialized, refcounted classes
//! - **Value Boxes** holding any registered value type, with conversions
//! - **Properties** described by param specs, validated and change-notified
//! - **Signals** with ordered emission, details, accumulators and hooks
//! - **Objects** with atomic reference counting, weak and toggle references,
//!   floating references and keyed data
//!
//! Everything is thread-safe: registration, emission and reference counting
//! may happen from any thread.
//!
//! # Diagnostics
//!
//! Programming errors (bad casts, unknown properties, wrong argument types)
//! never panic. They are logged at the critical level through `oxitype-log`
//! and the offending call returns a neutral value. See [`config`] for the
//! environment switches.
//!
//! # Example
//!
//! ```rust
//! use oxitype::runtime::{Object, Type, TypeFlags, TypeInfo, signal};
//!
//! let ty = Type::register_static(Type::OBJECT, "CrateDocButton", TypeInfo::new(), TypeFlags::empty())
//!     .unwrap();
//! signal::SignalBuilder::new("clicked", ty).build();
//!
//! let button = Object::new(ty).unwrap();
//! signal::connect(&button, "clicked", |_| {
//!     println!("clicked");
//!     None
//! });
//! signal::emit_by_name(&button, "clicked", &[]);
//! ```

#[macro_use]
pub mod check;
pub mod config;
pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use config::{init, shutdown};
pub use error::{Error, Result};
pub use runtime::{
    Closure, Object, ParamFlags, ParamSpec, Quark, SignalFlags, Type, TypeFlags, TypeInfo, Value,
    WeakRef,
};
