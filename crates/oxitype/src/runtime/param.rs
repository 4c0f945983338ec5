//! Parameter specifications.
//!
//! A [`ParamSpec`] describes one property: its canonical name, value type,
//! access flags, default value, and the constraints its values must meet.
//! Specs are immutable once installed on a class; the owner type and the
//! per-owner property id are fixed at installation.
//!
//! Constructors never fail. Name and flag checks happen when the spec is
//! installed, where a misuse can be reported against the owning class.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

use crate::runtime::enums::{EnumClass, FlagsClass};
use crate::runtime::quark::{Quark, intern_string};
use crate::runtime::sync::OnceSlot;
use crate::runtime::types::Type;
use crate::runtime::value::{Value, ValueData};

bitflags! {
    /// Access and behavior flags of a property.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const READWRITE = Self::READABLE.bits() | Self::WRITABLE.bits();
        /// Set during construction, with the default if the caller gives no value.
        const CONSTRUCT = 1 << 2;
        /// Only settable during construction.
        const CONSTRUCT_ONLY = 1 << 3;
        /// Out-of-range values are corrected silently.
        const LAX_VALIDATION = 1 << 4;
        /// `set` does not notify on its own; the implementation notifies.
        const EXPLICIT_NOTIFY = 1 << 30;
        const DEPRECATED = 1 << 31;
    }
}

/// Constraint and default of a property, per value type.
#[derive(Debug, Clone)]
pub enum ParamKind {
    Bool { default: bool },
    Char { minimum: i8, maximum: i8, default: i8 },
    UChar { minimum: u8, maximum: u8, default: u8 },
    Int { minimum: i32, maximum: i32, default: i32 },
    UInt { minimum: u32, maximum: u32, default: u32 },
    Int64 { minimum: i64, maximum: i64, default: i64 },
    UInt64 { minimum: u64, maximum: u64, default: u64 },
    Float { minimum: f32, maximum: f32, default: f32, epsilon: f32 },
    Double { minimum: f64, maximum: f64, default: f64, epsilon: f64 },
    String { default: Option<String> },
    Pointer,
    Enum { default: i32 },
    Flags { default: u32 },
    Boxed,
    Object,
    Param,
    /// Redirects to a spec of an ancestor class or an interface.
    Override { target: ParamSpec },
}

struct Inner {
    name: &'static str,
    quark: Quark,
    nick: Option<String>,
    blurb: Option<String>,
    value_type: Type,
    flags: ParamFlags,
    kind: ParamKind,
    /// Owner type and property id, set once by installation.
    installed: OnceSlot<(Type, u32)>,
}

/// Immutable description of a property.
///
/// Cloning shares the spec; equality is identity.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{ParamFlags, ParamSpec, ToValue};
///
/// let spec = ParamSpec::int("font_size", 6, 72, 12, ParamFlags::READWRITE);
/// assert_eq!(spec.name(), "font-size");
///
/// let mut v = 100i32.to_value();
/// assert!(spec.validate(&mut v));
/// assert_eq!(v.get_int(), 72);
/// ```
#[derive(Clone)]
pub struct ParamSpec(Arc<Inner>);

/// Replaces `_` with `-`.
pub fn canonical_name(name: &str) -> String {
    name.replace('_', "-")
}

impl ParamSpec {
    fn build(name: &str, value_type: Type, flags: ParamFlags, kind: ParamKind) -> Self {
        let name = intern_string(&canonical_name(name));
        ParamSpec(Arc::new(Inner {
            name,
            quark: Quark::from_static_str(name),
            nick: None,
            blurb: None,
            value_type,
            flags,
            kind,
            installed: OnceSlot::new(),
        }))
    }

    pub fn boolean(name: &str, default: bool, flags: ParamFlags) -> Self {
        Self::build(name, Type::BOOL, flags, ParamKind::Bool { default })
    }

    pub fn char(name: &str, minimum: i8, maximum: i8, default: i8, flags: ParamFlags) -> Self {
        Self::build(name, Type::CHAR, flags, ParamKind::Char { minimum, maximum, default })
    }

    pub fn uchar(name: &str, minimum: u8, maximum: u8, default: u8, flags: ParamFlags) -> Self {
        Self::build(name, Type::UCHAR, flags, ParamKind::UChar { minimum, maximum, default })
    }

    pub fn int(name: &str, minimum: i32, maximum: i32, default: i32, flags: ParamFlags) -> Self {
        Self::build(name, Type::INT, flags, ParamKind::Int { minimum, maximum, default })
    }

    pub fn uint(name: &str, minimum: u32, maximum: u32, default: u32, flags: ParamFlags) -> Self {
        Self::build(name, Type::UINT, flags, ParamKind::UInt { minimum, maximum, default })
    }

    pub fn int64(name: &str, minimum: i64, maximum: i64, default: i64, flags: ParamFlags) -> Self {
        Self::build(name, Type::INT64, flags, ParamKind::Int64 { minimum, maximum, default })
    }

    pub fn uint64(name: &str, minimum: u64, maximum: u64, default: u64, flags: ParamFlags) -> Self {
        Self::build(name, Type::UINT64, flags, ParamKind::UInt64 { minimum, maximum, default })
    }

    pub fn float(name: &str, minimum: f32, maximum: f32, default: f32, flags: ParamFlags) -> Self {
        let epsilon = 1e-30;
        Self::build(name, Type::FLOAT, flags, ParamKind::Float { minimum, maximum, default, epsilon })
    }

    pub fn double(name: &str, minimum: f64, maximum: f64, default: f64, flags: ParamFlags) -> Self {
        let epsilon = 1e-90;
        Self::build(name, Type::DOUBLE, flags, ParamKind::Double { minimum, maximum, default, epsilon })
    }

    pub fn string(name: &str, default: Option<&str>, flags: ParamFlags) -> Self {
        let default = default.map(str::to_owned);
        Self::build(name, Type::STRING, flags, ParamKind::String { default })
    }

    pub fn pointer(name: &str, flags: ParamFlags) -> Self {
        Self::build(name, Type::POINTER, flags, ParamKind::Pointer)
    }

    /// A property holding a member of the enumeration type `enum_type`.
    pub fn enumeration(name: &str, enum_type: Type, default: i32, flags: ParamFlags) -> Self {
        Self::build(name, enum_type, flags, ParamKind::Enum { default })
    }

    /// A property holding a combination of the flags type `flags_type`.
    pub fn flag_set(name: &str, flags_type: Type, default: u32, flags: ParamFlags) -> Self {
        Self::build(name, flags_type, flags, ParamKind::Flags { default })
    }

    pub fn boxed(name: &str, boxed_type: Type, flags: ParamFlags) -> Self {
        Self::build(name, boxed_type, flags, ParamKind::Boxed)
    }

    /// A property holding an object of `object_type` (or an interface).
    pub fn object(name: &str, object_type: Type, flags: ParamFlags) -> Self {
        Self::build(name, object_type, flags, ParamKind::Object)
    }

    pub fn param(name: &str, flags: ParamFlags) -> Self {
        Self::build(name, Type::PARAM, flags, ParamKind::Param)
    }

    /// A spec standing in for `target` on a class that overrides it.
    pub fn override_for(name: &str, target: &ParamSpec) -> Self {
        let target = target.redirect_target().unwrap_or(target).clone();
        Self::build(name, target.value_type(), target.flags(), ParamKind::Override { target })
    }

    /// Attaches a nickname and a description. Only effective before the
    /// spec is shared.
    #[must_use]
    pub fn with_description(mut self, nick: &str, blurb: &str) -> Self {
        match Arc::get_mut(&mut self.0) {
            Some(inner) => {
                inner.nick = Some(nick.to_owned());
                inner.blurb = Some(blurb.to_owned());
            }
            None => critical!("cannot describe param spec '{}' after it was shared", self.0.name),
        }
        self
    }

    /// Returns the canonical name (`-` separated).
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn quark(&self) -> Quark {
        self.0.quark
    }

    /// Returns the nickname, defaulting to the name.
    pub fn nick(&self) -> &str {
        self.0.nick.as_deref().unwrap_or(self.0.name)
    }

    pub fn blurb(&self) -> Option<&str> {
        self.0.blurb.as_deref()
    }

    pub fn value_type(&self) -> Type {
        self.0.value_type
    }

    pub fn flags(&self) -> ParamFlags {
        self.0.flags
    }

    pub fn kind(&self) -> &ParamKind {
        &self.0.kind
    }

    /// Returns the type the spec is installed on, [`Type::INVALID`] before
    /// installation.
    pub fn owner_type(&self) -> Type {
        self.0.installed.get().map_or(Type::INVALID, |&(owner, _)| owner)
    }

    /// Returns the per-owner property id, 0 before installation.
    pub fn param_id(&self) -> u32 {
        self.0.installed.get().map_or(0, |&(_, id)| id)
    }

    /// Returns the overridden spec for override specs.
    pub fn redirect_target(&self) -> Option<&ParamSpec> {
        match &self.0.kind {
            ParamKind::Override { target } => Some(target),
            _ => None,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.0.flags.contains(ParamFlags::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.0.flags.contains(ParamFlags::WRITABLE)
    }

    /// Returns true for `CONSTRUCT` or `CONSTRUCT_ONLY` specs.
    pub fn is_construct(&self) -> bool {
        self.0
            .flags
            .intersects(ParamFlags::CONSTRUCT | ParamFlags::CONSTRUCT_ONLY)
    }

    /// Records the owner and id. Fails if the spec was installed before.
    pub(crate) fn install(&self, owner: Type, id: u32) -> bool {
        if !self.0.installed.enter() {
            return false;
        }
        self.0.installed.leave((owner, id));
        true
    }

    /// Returns true if `name` is a valid property name: an ASCII letter
    /// followed by letters, digits, `-` or `_`.
    pub fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    /// Returns a value holding the default.
    pub fn default_value(&self) -> Value {
        if let Some(target) = self.redirect_target() {
            return target.default_value();
        }
        let mut v = Value::new(self.0.value_type);
        match (&self.0.kind, v.data_mut()) {
            (ParamKind::Bool { default }, ValueData::Bool(d)) => *d = *default,
            (ParamKind::Char { default, .. }, ValueData::Char(d)) => *d = *default,
            (ParamKind::UChar { default, .. }, ValueData::UChar(d)) => *d = *default,
            (ParamKind::Int { default, .. }, ValueData::Int(d)) => *d = *default,
            (ParamKind::UInt { default, .. }, ValueData::UInt(d)) => *d = *default,
            (ParamKind::Int64 { default, .. }, ValueData::Int64(d)) => *d = *default,
            (ParamKind::UInt64 { default, .. }, ValueData::UInt64(d)) => *d = *default,
            (ParamKind::Float { default, .. }, ValueData::Float(d)) => *d = *default,
            (ParamKind::Double { default, .. }, ValueData::Double(d)) => *d = *default,
            (ParamKind::String { default }, ValueData::String(d)) => d.clone_from(default),
            (ParamKind::Enum { default }, ValueData::Enum(d)) => *d = *default,
            (ParamKind::Flags { default }, ValueData::Flags(d)) => *d = *default,
            _ => {}
        }
        v
    }

    /// Brings `value` within the spec's constraints.
    ///
    /// Returns true if the value had to be changed.
    pub fn validate(&self, value: &mut Value) -> bool {
        if let Some(target) = self.redirect_target() {
            return target.validate(value);
        }
        let ty = value.type_();
        match (&self.0.kind, value.data_mut()) {
            (ParamKind::Char { minimum, maximum, .. }, ValueData::Char(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::UChar { minimum, maximum, .. }, ValueData::UChar(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::Int { minimum, maximum, .. }, ValueData::Int(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::UInt { minimum, maximum, .. }, ValueData::UInt(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::Int64 { minimum, maximum, .. }, ValueData::Int64(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::UInt64 { minimum, maximum, .. }, ValueData::UInt64(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::Float { minimum, maximum, .. }, ValueData::Float(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::Double { minimum, maximum, .. }, ValueData::Double(v)) => clamp(v, *minimum, *maximum),
            (ParamKind::Enum { default }, ValueData::Enum(v)) => {
                let known = ty
                    .class_ref()
                    .is_some_and(|c| c.struct_ref::<EnumClass>().is_some_and(|e| e.value(*v).is_some()));
                if known {
                    false
                } else {
                    *v = *default;
                    true
                }
            }
            (ParamKind::Flags { .. }, ValueData::Flags(v)) => {
                let mask = ty
                    .class_ref()
                    .and_then(|c| c.struct_ref::<FlagsClass>().map(FlagsClass::mask))
                    .unwrap_or(u32::MAX);
                let masked = *v & mask;
                std::mem::replace(v, masked) != masked
            }
            (ParamKind::Object, ValueData::Object(obj)) => {
                if obj.as_ref().is_some_and(|o| !o.type_().is_a(self.0.value_type)) {
                    *obj = None;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Returns true if `value` already meets the constraints.
    pub fn value_is_valid(&self, value: &Value) -> bool {
        let mut copy = value.clone();
        !self.validate(&mut copy)
    }

    /// Orders two values of the spec's type.
    pub fn values_cmp(&self, a: &Value, b: &Value) -> Ordering {
        if let Some(target) = self.redirect_target() {
            return target.values_cmp(a, b);
        }
        match (a.data(), b.data()) {
            (ValueData::Bool(x), ValueData::Bool(y)) => x.cmp(y),
            (ValueData::Char(x), ValueData::Char(y)) => x.cmp(y),
            (ValueData::UChar(x), ValueData::UChar(y)) => x.cmp(y),
            (ValueData::Int(x), ValueData::Int(y)) | (ValueData::Enum(x), ValueData::Enum(y)) => x.cmp(y),
            (ValueData::UInt(x), ValueData::UInt(y)) | (ValueData::Flags(x), ValueData::Flags(y)) => x.cmp(y),
            (ValueData::Int64(x), ValueData::Int64(y)) => x.cmp(y),
            (ValueData::UInt64(x), ValueData::UInt64(y)) => x.cmp(y),
            (ValueData::Float(x), ValueData::Float(y)) => {
                let epsilon = match self.0.kind {
                    ParamKind::Float { epsilon, .. } => epsilon,
                    _ => 0.0,
                };
                float_cmp(f64::from(*x), f64::from(*y), f64::from(epsilon))
            }
            (ValueData::Double(x), ValueData::Double(y)) => {
                let epsilon = match self.0.kind {
                    ParamKind::Double { epsilon, .. } => epsilon,
                    _ => 0.0,
                };
                float_cmp(*x, *y, epsilon)
            }
            (ValueData::String(x), ValueData::String(y)) => x.cmp(y),
            (ValueData::Pointer(x), ValueData::Pointer(y)) => x.cmp(y),
            (ValueData::Object(x), ValueData::Object(y)) => {
                let addr = |o: &Option<crate::runtime::object::Object>| o.as_ref().map_or(0, |o| o.as_ptr());
                addr(x).cmp(&addr(y))
            }
            (ValueData::Param(x), ValueData::Param(y)) => {
                let addr = |p: &Option<ParamSpec>| p.as_ref().map_or(0, |p| Arc::as_ptr(&p.0).addr());
                addr(x).cmp(&addr(y))
            }
            _ => Ordering::Equal,
        }
    }
}

fn clamp<T: PartialOrd + Copy>(v: &mut T, minimum: T, maximum: T) -> bool {
    let original = *v;
    if *v < minimum {
        *v = minimum;
    } else if *v > maximum {
        *v = maximum;
    }
    original != *v
}

fn float_cmp(x: f64, y: f64, epsilon: f64) -> Ordering {
    if x < y {
        if y - x <= epsilon { Ordering::Equal } else { Ordering::Less }
    } else if x - y <= epsilon {
        Ordering::Equal
    } else {
        Ordering::Greater
    }
}

impl PartialEq for ParamSpec {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ParamSpec {}

impl Hash for ParamSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.0.name)
            .field("value_type", &self.0.value_type)
            .field("owner", &self.owner_type())
            .field("flags", &self.0.flags)
            .finish()
    }
}
