//! Value boxes.
//!
//! A [`Value`] is a tagged union that can hold a value of any registered
//! value type. Each fundamental type brings a [`ValueTable`] describing how
//! a fresh value looks and how a payload is copied and released; derived
//! types inherit the table of their parent.
//!
//! A value is either *unset* (type [`Type::INVALID`]) or holds a payload of
//! its declared type. Typed accessors called on the wrong kind of value are
//! programming errors: they are reported and leave the value untouched.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::OnceLock;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::runtime::object::Object;
use crate::runtime::param::ParamSpec;
use crate::runtime::transform;
use crate::runtime::types::{Type, TypeFlags, TypeInfo, node};

/// Payload of a boxed value.
///
/// Implemented for every `Clone + Send + Sync` type.
pub trait BoxedValue: Any + Send + Sync {
    /// Copies the payload.
    fn boxed_clone(&self) -> Box<dyn BoxedValue>;
    /// Upcasts for downcasting.
    fn boxed_any(&self) -> &dyn Any;
}

impl<T: Any + Clone + Send + Sync> BoxedValue for T {
    fn boxed_clone(&self) -> Box<dyn BoxedValue> {
        Box::new(self.clone())
    }

    fn boxed_any(&self) -> &dyn Any {
        self
    }
}

/// Storage of a [`Value`], one variant per fundamental storage class.
pub enum ValueData {
    /// Unset.
    Empty,
    Bool(bool),
    Char(i8),
    UChar(u8),
    Int(i32),
    UInt(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    Pointer(usize),
    Enum(i32),
    Flags(u32),
    Boxed(Option<Box<dyn BoxedValue>>),
    Object(Option<Object>),
    Param(Option<ParamSpec>),
}

impl ValueData {
    /// Produces an independently owned copy of the payload.
    pub fn duplicate(&self) -> ValueData {
        match self {
            ValueData::Empty => ValueData::Empty,
            ValueData::Bool(v) => ValueData::Bool(*v),
            ValueData::Char(v) => ValueData::Char(*v),
            ValueData::UChar(v) => ValueData::UChar(*v),
            ValueData::Int(v) => ValueData::Int(*v),
            ValueData::UInt(v) => ValueData::UInt(*v),
            ValueData::Int64(v) => ValueData::Int64(*v),
            ValueData::UInt64(v) => ValueData::UInt64(*v),
            ValueData::Float(v) => ValueData::Float(*v),
            ValueData::Double(v) => ValueData::Double(*v),
            ValueData::String(s) => ValueData::String(s.clone()),
            ValueData::Pointer(p) => ValueData::Pointer(*p),
            ValueData::Enum(v) => ValueData::Enum(*v),
            ValueData::Flags(v) => ValueData::Flags(*v),
            ValueData::Boxed(b) => ValueData::Boxed(b.as_ref().map(|b| (**b).boxed_clone())),
            ValueData::Object(o) => ValueData::Object(o.clone()),
            ValueData::Param(p) => ValueData::Param(p.clone()),
        }
    }
}

impl fmt::Debug for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::Empty => f.write_str("Empty"),
            ValueData::Bool(v) => write!(f, "Bool({v})"),
            ValueData::Char(v) => write!(f, "Char({v})"),
            ValueData::UChar(v) => write!(f, "UChar({v})"),
            ValueData::Int(v) => write!(f, "Int({v})"),
            ValueData::UInt(v) => write!(f, "UInt({v})"),
            ValueData::Int64(v) => write!(f, "Int64({v})"),
            ValueData::UInt64(v) => write!(f, "UInt64({v})"),
            ValueData::Float(v) => write!(f, "Float({v})"),
            ValueData::Double(v) => write!(f, "Double({v})"),
            ValueData::String(s) => write!(f, "String({s:?})"),
            ValueData::Pointer(p) => write!(f, "Pointer({p:#x})"),
            ValueData::Enum(v) => write!(f, "Enum({v})"),
            ValueData::Flags(v) => write!(f, "Flags({v:#x})"),
            ValueData::Boxed(b) => write!(f, "Boxed({})", if b.is_some() { "set" } else { "none" }),
            ValueData::Object(o) => write!(f, "Object({o:?})"),
            ValueData::Param(p) => write!(f, "Param({p:?})"),
        }
    }
}

/// Value hooks of a type.
#[derive(Debug, Clone, Copy)]
pub struct ValueTable {
    /// Produces the default payload.
    pub init: fn() -> ValueData,
    /// Produces an independent copy of a payload.
    pub copy: fn(&ValueData) -> ValueData,
    /// Releases resources the payload does not release on drop.
    pub free: Option<fn(&mut ValueData)>,
}

macro_rules! value_tables {
    ($($table:ident => $init:expr;)*) => {
        $(
            static $table: ValueTable = ValueTable {
                init: || $init,
                copy: ValueData::duplicate,
                free: None,
            };
        )*
    };
}

value_tables! {
    BOOL_TABLE => ValueData::Bool(false);
    CHAR_TABLE => ValueData::Char(0);
    UCHAR_TABLE => ValueData::UChar(0);
    INT_TABLE => ValueData::Int(0);
    UINT_TABLE => ValueData::UInt(0);
    INT64_TABLE => ValueData::Int64(0);
    UINT64_TABLE => ValueData::UInt64(0);
    FLOAT_TABLE => ValueData::Float(0.0);
    DOUBLE_TABLE => ValueData::Double(0.0);
    STRING_TABLE => ValueData::String(None);
    POINTER_TABLE => ValueData::Pointer(0);
    ENUM_TABLE => ValueData::Enum(0);
    FLAGS_TABLE => ValueData::Flags(0);
    BOXED_TABLE => ValueData::Boxed(None);
    PARAM_TABLE => ValueData::Param(None);
    OBJECT_TABLE => ValueData::Object(None);
}

/// Value table of a built-in fundamental type.
pub(crate) fn fundamental_value_table(ty: Type) -> Option<&'static ValueTable> {
    Some(match ty {
        Type::BOOL => &BOOL_TABLE,
        Type::CHAR => &CHAR_TABLE,
        Type::UCHAR => &UCHAR_TABLE,
        Type::INT => &INT_TABLE,
        Type::UINT => &UINT_TABLE,
        Type::INT64 => &INT64_TABLE,
        Type::UINT64 => &UINT64_TABLE,
        Type::FLOAT => &FLOAT_TABLE,
        Type::DOUBLE => &DOUBLE_TABLE,
        Type::STRING => &STRING_TABLE,
        Type::POINTER => &POINTER_TABLE,
        Type::ENUM => &ENUM_TABLE,
        Type::FLAGS => &FLAGS_TABLE,
        Type::BOXED => &BOXED_TABLE,
        Type::PARAM => &PARAM_TABLE,
        Type::OBJECT => &OBJECT_TABLE,
        _ => return None,
    })
}

/// Rust payload type of each registered boxed type.
fn boxed_types() -> &'static RwLock<FxHashMap<Type, TypeId>> {
    static BOXED: OnceLock<RwLock<FxHashMap<Type, TypeId>>> = OnceLock::new();
    BOXED.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Registers a boxed type whose payload is the Rust type `T`.
///
/// Values of the new type copy their payload with `Clone`.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Value, register_boxed};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Point(i32, i32);
///
/// let ty = register_boxed::<Point>("DocPoint").unwrap();
/// let mut v = Value::new(ty);
/// v.set_boxed(Some(Point(1, 2)));
/// let copy = v.clone();
/// assert_eq!(copy.get_boxed::<Point>(), Some(&Point(1, 2)));
/// ```
pub fn register_boxed<T: Any + Clone + Send + Sync>(name: &str) -> Result<Type> {
    let ty = Type::register_static(Type::BOXED, name, TypeInfo::new(), TypeFlags::empty())?;
    boxed_types().write().insert(ty, TypeId::of::<T>());
    Ok(ty)
}

/// A box holding one value of a registered value type.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{ToValue, Type, Value};
///
/// let mut v = Value::new(Type::INT);
/// v.set_int(42);
/// assert_eq!(v.get_int(), 42);
///
/// let s = 7u32.to_value();
/// assert_eq!(s.type_(), Type::UINT);
/// assert_eq!(s.get::<u32>(), Some(7));
/// ```
pub struct Value {
    ty: Type,
    data: ValueData,
}

// Every payload variant is Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Value>();
};

impl Default for Value {
    fn default() -> Self {
        Value {
            ty: Type::INVALID,
            data: ValueData::Empty,
        }
    }
}

macro_rules! scalar_accessors {
    ($($(#[$doc:meta])* $variant:ident: $t:ty => $set:ident, $get:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $set(&mut self, v: $t) {
                match &mut self.data {
                    ValueData::$variant(slot) => *slot = v,
                    _ => critical!(
                        "{}: value of type '{}' does not hold {}",
                        stringify!($set),
                        self.ty.name(),
                        stringify!($variant)
                    ),
                }
            }

            $(#[$doc])*
            pub fn $get(&self) -> $t {
                match self.data {
                    ValueData::$variant(v) => v,
                    _ => {
                        critical!(
                            "{}: value of type '{}' does not hold {}",
                            stringify!($get),
                            self.ty.name(),
                            stringify!($variant)
                        );
                        <$t>::default()
                    }
                }
            }
        )*
    };
}

impl Value {
    /// Creates a value of type `ty` in its default state.
    ///
    /// Returns an unset value (after reporting) when `ty` is not a value
    /// type or is value-abstract.
    pub fn new(ty: Type) -> Value {
        let Some(n) = node(ty) else {
            critical!("cannot create a value of an invalid type");
            return Value::default();
        };
        if n.flags.contains(TypeFlags::VALUE_ABSTRACT) {
            critical!("cannot create a value of value-abstract type '{}'", n.name);
            return Value::default();
        }
        match n.value_table() {
            Some(table) => Value {
                ty,
                data: (table.init)(),
            },
            None => {
                critical!("type '{}' is not a value type", n.name);
                Value::default()
            }
        }
    }

    /// Initializes an unset value to the default of `ty`.
    pub fn init(&mut self, ty: Type) {
        if !self.is_unset() {
            critical!(
                "cannot initialize a value already holding '{}'",
                self.ty.name()
            );
            return;
        }
        *self = Value::new(ty);
    }

    /// Releases the payload and returns the value to the unset state.
    pub fn unset(&mut self) {
        *self = Value::default();
    }

    /// Resets the payload to its type's default.
    pub fn reset(&mut self) {
        if let Some(table) = self.table() {
            self.release();
            self.data = (table.init)();
        }
    }

    /// Returns the declared type, [`Type::INVALID`] when unset.
    #[inline]
    pub fn type_(&self) -> Type {
        self.ty
    }

    /// Returns true for the unset state.
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.ty == Type::INVALID
    }

    /// Returns true if the declared type is `ty` or derives from it.
    pub fn holds(&self, ty: Type) -> bool {
        self.ty.is_a(ty)
    }

    /// Returns the raw payload.
    pub fn data(&self) -> &ValueData {
        &self.data
    }

    /// Returns the raw payload for modification.
    pub fn data_mut(&mut self) -> &mut ValueData {
        &mut self.data
    }

    fn table(&self) -> Option<&'static ValueTable> {
        node(self.ty)?.value_table()
    }

    fn release(&mut self) {
        if let Some(free) = self.table().and_then(|t| t.free) {
            free(&mut self.data);
        }
    }

    /// Deep-copies this value into `dest`, which must be unset.
    pub fn copy_into(&self, dest: &mut Value) {
        if !dest.is_unset() {
            critical!(
                "copy destination already holds a value of type '{}'",
                dest.ty.name()
            );
            return;
        }
        *dest = self.clone();
    }

    /// Converts this value into the type of `dest`.
    ///
    /// Values whose type conforms to the destination type are copied;
    /// otherwise the registered transformation runs. Returns false if no
    /// transformation is registered.
    pub fn transform(&self, dest: &mut Value) -> bool {
        return_val_if_fail!(!self.is_unset() && !dest.is_unset(), false);
        if self.ty.is_a(dest.ty) {
            dest.release();
            dest.data = self.table().map_or(ValueData::Empty, |t| (t.copy)(&self.data));
            return true;
        }
        match transform::lookup(self.ty, dest.ty) {
            Some(f) => {
                dest.reset();
                f(self, dest);
                true
            }
            None => false,
        }
    }

    /// Converts this value into a new value of type `ty`.
    pub fn transform_to(&self, ty: Type) -> Option<Value> {
        let mut dest = Value::new(ty);
        if dest.is_unset() {
            return None;
        }
        self.transform(&mut dest).then_some(dest)
    }

    /// Returns true if values of `src` can be transformed into `dst`.
    pub fn type_transformable(src: Type, dst: Type) -> bool {
        src.is_a(dst) || transform::lookup(src, dst).is_some()
    }

    /// Extracts the payload as `T`, `None` on a storage mismatch.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    scalar_accessors! {
        Bool: bool => set_bool, get_bool;
        Char: i8 => set_char, get_char;
        UChar: u8 => set_uchar, get_uchar;
        Int: i32 => set_int, get_int;
        UInt: u32 => set_uint, get_uint;
        Int64: i64 => set_int64, get_int64;
        UInt64: u64 => set_uint64, get_uint64;
        Float: f32 => set_float, get_float;
        Double: f64 => set_double, get_double;
        Pointer: usize => set_pointer, get_pointer;
        /// Enumeration values are not range checked here; parameter specs do that.
        Enum: i32 => set_enum, get_enum;
        Flags: u32 => set_flags, get_flags;
    }

    /// Stores a string (or none).
    pub fn set_string(&mut self, s: Option<&str>) {
        match &mut self.data {
            ValueData::String(slot) => *slot = s.map(str::to_owned),
            _ => critical!("set_string: value of type '{}' does not hold a string", self.ty.name()),
        }
    }

    /// Returns the stored string.
    pub fn get_string(&self) -> Option<&str> {
        match &self.data {
            ValueData::String(s) => s.as_deref(),
            _ => {
                critical!("get_string: value of type '{}' does not hold a string", self.ty.name());
                None
            }
        }
    }

    /// Stores an object, which must conform to the value's type.
    pub fn set_object(&mut self, obj: Option<&Object>) {
        if let Some(o) = obj {
            if !o.type_().is_a(self.ty) {
                critical!(
                    "set_object: object of type '{}' is not a '{}'",
                    o.type_().name(),
                    self.ty.name()
                );
                return;
            }
        }
        match &mut self.data {
            ValueData::Object(slot) => *slot = obj.cloned(),
            _ => critical!("set_object: value of type '{}' does not hold an object", self.ty.name()),
        }
    }

    /// Returns a new reference to the stored object.
    pub fn get_object(&self) -> Option<Object> {
        match &self.data {
            ValueData::Object(o) => o.clone(),
            _ => {
                critical!("get_object: value of type '{}' does not hold an object", self.ty.name());
                None
            }
        }
    }

    /// Borrows the stored object without reporting mismatches.
    pub fn object_ref(&self) -> Option<&Object> {
        match &self.data {
            ValueData::Object(o) => o.as_ref(),
            _ => None,
        }
    }

    /// Stores a parameter spec.
    pub fn set_param(&mut self, pspec: Option<ParamSpec>) {
        match &mut self.data {
            ValueData::Param(slot) => *slot = pspec,
            _ => critical!("set_param: value of type '{}' does not hold a param spec", self.ty.name()),
        }
    }

    /// Returns the stored parameter spec.
    pub fn get_param(&self) -> Option<ParamSpec> {
        match &self.data {
            ValueData::Param(p) => p.clone(),
            _ => {
                critical!("get_param: value of type '{}' does not hold a param spec", self.ty.name());
                None
            }
        }
    }

    /// Stores a boxed payload. `T` must be the payload type the boxed type
    /// was registered with.
    pub fn set_boxed<T: Any + Clone + Send + Sync>(&mut self, v: Option<T>) {
        if !self.boxed_matches::<T>("set_boxed") {
            return;
        }
        if let ValueData::Boxed(slot) = &mut self.data {
            *slot = v.map(|v| Box::new(v) as Box<dyn BoxedValue>);
        }
    }

    /// Borrows the boxed payload.
    pub fn get_boxed<T: Any>(&self) -> Option<&T> {
        if !self.boxed_matches::<T>("get_boxed") {
            return None;
        }
        match &self.data {
            ValueData::Boxed(b) => (**b.as_ref()?).boxed_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    fn boxed_matches<T: Any>(&self, op: &str) -> bool {
        if !matches!(self.data, ValueData::Boxed(_)) {
            critical!("{}: value of type '{}' is not boxed", op, self.ty.name());
            return false;
        }
        let registered = boxed_types().read().get(&self.ty).copied();
        if registered.is_some_and(|id| id != TypeId::of::<T>()) {
            critical!(
                "{}: '{}' does not hold a {}",
                op,
                self.ty.name(),
                std::any::type_name::<T>()
            );
            return false;
        }
        true
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self.table() {
            Some(table) => Value {
                ty: self.ty,
                data: (table.copy)(&self.data),
            },
            None => Value::default(),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}: {:?})", self.ty.name(), self.data)
    }
}

/// Rust types with a corresponding runtime type.
pub trait StaticType {
    /// Returns the runtime type.
    fn static_type() -> Type;
}

/// Conversion into a [`Value`].
pub trait ToValue {
    /// Builds a value holding `self`.
    fn to_value(&self) -> Value;
}

/// Extraction from a [`Value`].
pub trait FromValue: Sized {
    /// Returns `None` if the value does not store a `Self`.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! primitive_value {
    ($($t:ty => $ty:expr, $variant:ident;)*) => {
        $(
            impl StaticType for $t {
                fn static_type() -> Type {
                    $ty
                }
            }

            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value {
                        ty: $ty,
                        data: ValueData::$variant(*self),
                    }
                }
            }

            impl FromValue for $t {
                fn from_value(value: &Value) -> Option<Self> {
                    match value.data {
                        ValueData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

primitive_value! {
    bool => Type::BOOL, Bool;
    i8 => Type::CHAR, Char;
    u8 => Type::UCHAR, UChar;
    i32 => Type::INT, Int;
    u32 => Type::UINT, UInt;
    i64 => Type::INT64, Int64;
    u64 => Type::UINT64, UInt64;
    f32 => Type::FLOAT, Float;
    f64 => Type::DOUBLE, Double;
}

impl StaticType for String {
    fn static_type() -> Type {
        Type::STRING
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value {
            ty: Type::STRING,
            data: ValueData::String(Some(self.to_owned())),
        }
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        self.as_str().to_value()
    }
}

impl ToValue for Option<&str> {
    fn to_value(&self) -> Value {
        Value {
            ty: Type::STRING,
            data: ValueData::String(self.map(str::to_owned)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match &value.data {
            ValueData::String(s) => s.clone(),
            _ => None,
        }
    }
}

impl FromValue for Option<String> {
    fn from_value(value: &Value) -> Option<Self> {
        match &value.data {
            ValueData::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ToValue for Object {
    fn to_value(&self) -> Value {
        Value {
            ty: self.type_(),
            data: ValueData::Object(Some(self.clone())),
        }
    }
}

impl FromValue for Object {
    fn from_value(value: &Value) -> Option<Self> {
        value.object_ref().cloned()
    }
}

impl ToValue for ParamSpec {
    fn to_value(&self) -> Value {
        Value {
            ty: Type::PARAM,
            data: ValueData::Param(Some(self.clone())),
        }
    }
}

impl FromValue for ParamSpec {
    fn from_value(value: &Value) -> Option<Self> {
        match &value.data {
            ValueData::Param(p) => p.clone(),
            _ => None,
        }
    }
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxitype_log::capture;

    #[test]
    fn test_defaults() {
        assert_eq!(Value::new(Type::INT).get_int(), 0);
        assert!(!Value::new(Type::BOOL).get_bool());
        assert_eq!(Value::new(Type::STRING).get_string(), None);
        assert!(Value::new(Type::OBJECT).get_object().is_none());
        assert!(Value::default().is_unset());
    }

    #[test]
    fn test_type_mismatch_leaves_value_untouched() {
        let mut v = Value::new(Type::INT);
        v.set_int(5);
        let ((), records) = capture(|| v.set_string(Some("five")));
        assert_eq!(records.len(), 1);
        assert_eq!(v.get_int(), 5);

        let (d, records) = capture(|| v.get_double());
        assert_eq!(d, 0.0);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_value_abstract_and_non_value_types() {
        let (v, records) = capture(|| Value::new(Type::ENUM));
        assert!(v.is_unset());
        assert_eq!(records.len(), 1);

        let (v, records) = capture(|| Value::new(Type::INTERFACE));
        assert!(v.is_unset());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = "hello".to_value();
        let mut copy = Value::default();
        original.copy_into(&mut copy);
        original.set_string(Some("changed"));
        drop(original);
        assert_eq!(copy.get_string(), Some("hello"));

        let (_, records) = capture(|| {
            let src = 1i32.to_value();
            src.copy_into(&mut copy);
        });
        assert_eq!(records.len(), 1);
        assert_eq!(copy.get_string(), Some("hello"));
    }

    #[test]
    fn test_init_and_unset() {
        let mut v = Value::default();
        v.init(Type::DOUBLE);
        v.set_double(2.5);
        assert_eq!(v.get::<f64>(), Some(2.5));
        assert_eq!(v.get::<i32>(), None);

        let ((), records) = capture(|| v.init(Type::INT));
        assert_eq!(records.len(), 1);

        v.unset();
        assert!(v.is_unset());
        v.init(Type::INT);
        assert_eq!(v.get_int(), 0);
    }

    #[test]
    fn test_boxed_type_checks() {
        #[derive(Clone, Debug, PartialEq)]
        struct Span(u32, u32);

        let ty = register_boxed::<Span>("ValueTestSpan").unwrap();
        assert!(ty.is_a(Type::BOXED));

        let mut v = Value::new(ty);
        assert_eq!(v.get_boxed::<Span>(), None);
        v.set_boxed(Some(Span(1, 4)));
        assert_eq!(v.clone().get_boxed::<Span>(), Some(&Span(1, 4)));

        let (wrong, records) = capture(|| v.get_boxed::<String>().cloned());
        assert_eq!(wrong, None);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_transform_numeric_and_string() {
        let v = 300i32.to_value();
        let as_double = v.transform_to(Type::DOUBLE).unwrap();
        assert_eq!(as_double.get_double(), 300.0);

        let as_string = v.transform_to(Type::STRING).unwrap();
        assert_eq!(as_string.get_string(), Some("300"));

        let as_bool = 0u64.to_value().transform_to(Type::BOOL).unwrap();
        assert!(!as_bool.get_bool());

        assert!(Value::type_transformable(Type::INT, Type::UINT64));
        assert!(!Value::type_transformable(Type::STRING, Type::INT));
        assert!("x".to_value().transform_to(Type::INT).is_none());
    }

    #[test]
    fn test_transform_unset_is_rejected() {
        let mut dest = 1i32.to_value();
        let (ok, records) = oxitype_log::capture(|| Value::default().transform(&mut dest));
        assert!(!ok);
        assert_eq!(records.len(), 1);
        assert_eq!(dest.get_int(), 1);
    }
}
