//! `OxiType` runtime module.
//!
//! # Architecture
//!
//! The runtime is layered bottom-up:
//!
//! - [`sync`]: one-time initialization slots and the instance header lock
//! - [`quark`]: interned strings used as names, details and data keys
//! - [`types`]: the type registry (fundamentals, derived types, interfaces)
//! - [`class`]: class and interface vtables, created lazily and refcounted
//! - [`value`], [`transform`], [`enums`]: the tagged value box and its
//!   conversions
//! - [`param`]: property descriptors with defaults and validation
//! - [`closure`]: invocable callbacks with marshalling and invalidation
//! - [`object`]: the refcounted base instance type
//! - [`property`]: property installation, get/set and change notification
//! - [`signal`]: signal registration, connection and emission
//! - [`context`], [`debug`]: deferred notification hand-off and leak
//!   tracking
//!
//! Long-lived metadata (type nodes, signal nodes, interned strings) lives in
//! the global arena from `oxitype-mem` and is never freed.
//!
//! # Example
//!
//! ```rust
//! use oxitype::runtime::{Object, ParamFlags, ParamSpec, Type, TypeFlags, TypeInfo};
//!
//! let ty = Type::register_static(Type::OBJECT, "DocWidget", TypeInfo::new(), TypeFlags::empty())
//!     .unwrap();
//! let obj = Object::new(ty).unwrap();
//! assert!(obj.is_a(Type::OBJECT));
//! assert_eq!(obj.type_().name(), "DocWidget");
//! ```

pub mod class;
pub mod closure;
pub mod context;
pub mod debug;
pub mod enums;
pub mod object;
pub mod param;
pub mod property;
pub mod quark;
pub mod signal;
pub mod sync;
pub mod transform;
pub mod types;
pub mod value;

pub use class::{ClassRef, ClassStruct, TypeClass, TypeInterface};
pub use closure::{ClassHandlerFn, Closure, ClosureFn, IntoClosureReturn, Marshal, NotifierId};
pub use context::{MainContext, QueueContext, main_context, set_main_context};
pub use enums::{EnumClass, EnumValue, FlagsClass, FlagsValue, register_enum, register_flags};
pub use object::{
    Finalizing, Object, ObjectBuilder, ObjectClass, ObjectPtr, ToggleRefId, WeakNotifyId,
    WeakRef,
};
pub use param::{ParamFlags, ParamKind, ParamSpec, canonical_name};
pub use quark::{Quark, intern_string};
pub use signal::{
    HandlerId, HookId, InvocationHint, SignalBuilder, SignalFlags, SignalId, SignalQuery,
};
pub use sync::OnceSlot;
pub use transform::{TransformFn, register_transform};
pub use types::{FundamentalFlags, InterfaceInfo, Type, TypeFlags, TypeInfo, TypeQuery};
pub use value::{
    BoxedValue, FromValue, StaticType, ToValue, Value, ValueData, ValueTable, register_boxed,
};

// Re-export the arena for callers allocating their own static metadata.
pub use oxitype_mem::{GlobalArena, global_arena};
