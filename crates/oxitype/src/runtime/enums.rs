//! Enumeration and flags types.
//!
//! Enumeration types derive from [`Type::ENUM`], flags types from
//! [`Type::FLAGS`]. Their classes carry an [`EnumClass`] or [`FlagsClass`]
//! listing the registered values.

use oxitype_mem::global_arena;

use crate::error::Result;
use crate::runtime::class::TypeClass;
use crate::runtime::types::{Type, TypeFlags, TypeInfo};

/// One member of an enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    pub value: i32,
    pub name: &'static str,
    pub nick: &'static str,
}

impl EnumValue {
    pub const fn new(value: i32, name: &'static str, nick: &'static str) -> Self {
        Self { value, name, nick }
    }
}

/// One bit (or bit combination) of a flags type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagsValue {
    pub value: u32,
    pub name: &'static str,
    pub nick: &'static str,
}

impl FlagsValue {
    pub const fn new(value: u32, name: &'static str, nick: &'static str) -> Self {
        Self { value, name, nick }
    }
}

/// Class struct of enumeration types.
#[derive(Debug, Clone, Default)]
pub struct EnumClass {
    values: &'static [EnumValue],
    minimum: i32,
    maximum: i32,
}

impl EnumClass {
    pub fn values(&self) -> &'static [EnumValue] {
        self.values
    }

    pub fn minimum(&self) -> i32 {
        self.minimum
    }

    pub fn maximum(&self) -> i32 {
        self.maximum
    }

    /// Finds the member with the given value.
    pub fn value(&self, value: i32) -> Option<&'static EnumValue> {
        self.values.iter().find(|v| v.value == value)
    }

    pub fn value_by_name(&self, name: &str) -> Option<&'static EnumValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn value_by_nick(&self, nick: &str) -> Option<&'static EnumValue> {
        self.values.iter().find(|v| v.nick == nick)
    }
}

/// Class struct of flags types.
#[derive(Debug, Clone, Default)]
pub struct FlagsClass {
    values: &'static [FlagsValue],
    mask: u32,
}

impl FlagsClass {
    pub fn values(&self) -> &'static [FlagsValue] {
        self.values
    }

    /// Union of every registered value.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Returns the first member whose bits are all set in `value`.
    pub fn first_value(&self, value: u32) -> Option<&'static FlagsValue> {
        self.values
            .iter()
            .find(|v| (v.value == 0 && value == 0) || (v.value != 0 && v.value & value == v.value))
    }

    pub fn value_by_name(&self, name: &str) -> Option<&'static FlagsValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn value_by_nick(&self, nick: &str) -> Option<&'static FlagsValue> {
        self.values.iter().find(|v| v.nick == nick)
    }

    /// Renders `value` as `NAME_A | NAME_B`, with leftover bits in hex.
    pub fn describe(&self, mut value: u32) -> String {
        let mut parts = Vec::new();
        while let Some(v) = self.first_value(value) {
            parts.push(v.name.to_string());
            if v.value == 0 {
                break;
            }
            value &= !v.value;
        }
        if value != 0 || parts.is_empty() {
            parts.push(format!("{value:#x}"));
        }
        parts.join(" | ")
    }
}

fn enum_class_init(class: &mut TypeClass) {
    let Some(values) = class.class_data::<&'static [EnumValue]>().copied() else {
        return;
    };
    if let Some(enum_class) = class.struct_mut::<EnumClass>() {
        enum_class.values = values;
        enum_class.minimum = values.iter().map(|v| v.value).min().unwrap_or(0);
        enum_class.maximum = values.iter().map(|v| v.value).max().unwrap_or(0);
    }
}

fn flags_class_init(class: &mut TypeClass) {
    let Some(values) = class.class_data::<&'static [FlagsValue]>().copied() else {
        return;
    };
    if let Some(flags_class) = class.struct_mut::<FlagsClass>() {
        flags_class.values = values;
        flags_class.mask = values.iter().fold(0, |m, v| m | v.value);
    }
}

/// Registers an enumeration type.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{EnumClass, EnumValue, Type, register_enum};
///
/// static SHAPES: [EnumValue; 2] = [
///     EnumValue::new(0, "SHAPE_SQUARE", "square"),
///     EnumValue::new(1, "SHAPE_CIRCLE", "circle"),
/// ];
///
/// let ty = register_enum("DocShape", &SHAPES).unwrap();
/// let class = ty.class_ref().unwrap();
/// let shapes = class.struct_ref::<EnumClass>().unwrap();
/// assert_eq!(shapes.value_by_nick("circle").map(|v| v.value), Some(1));
/// assert!(ty.is_a(Type::ENUM));
/// ```
pub fn register_enum(name: &str, values: &'static [EnumValue]) -> Result<Type> {
    let data: &'static &'static [EnumValue] = global_arena().alloc(values);
    Type::register_static(
        Type::ENUM,
        name,
        TypeInfo::new()
            .class_struct::<EnumClass>()
            .class_init(enum_class_init)
            .class_data(data),
        TypeFlags::empty(),
    )
}

/// Registers a flags type.
pub fn register_flags(name: &str, values: &'static [FlagsValue]) -> Result<Type> {
    let data: &'static &'static [FlagsValue] = global_arena().alloc(values);
    Type::register_static(
        Type::FLAGS,
        name,
        TypeInfo::new()
            .class_struct::<FlagsClass>()
            .class_init(flags_class_init)
            .class_data(data),
        TypeFlags::empty(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::Value;

    static LEVELS: [EnumValue; 3] = [
        EnumValue::new(-1, "LEVEL_LOW", "low"),
        EnumValue::new(0, "LEVEL_MID", "mid"),
        EnumValue::new(5, "LEVEL_HIGH", "high"),
    ];

    static PERMS: [FlagsValue; 3] = [
        FlagsValue::new(1, "PERM_READ", "read"),
        FlagsValue::new(2, "PERM_WRITE", "write"),
        FlagsValue::new(4, "PERM_EXEC", "exec"),
    ];

    #[test]
    fn test_enum_class() {
        let ty = register_enum("EnumsTestLevel", &LEVELS).unwrap();
        let class = ty.class_ref().unwrap();
        let levels = class.struct_ref::<EnumClass>().unwrap();
        assert_eq!(levels.minimum(), -1);
        assert_eq!(levels.maximum(), 5);
        assert_eq!(levels.value(5).map(|v| v.nick), Some("high"));
        assert_eq!(levels.value_by_name("LEVEL_MID").map(|v| v.value), Some(0));
        assert!(levels.value(3).is_none());
    }

    #[test]
    fn test_flags_class_and_string() {
        let ty = register_flags("EnumsTestPerms", &PERMS).unwrap();
        let class = ty.class_ref().unwrap();
        let perms = class.struct_ref::<FlagsClass>().unwrap();
        assert_eq!(perms.mask(), 7);
        assert_eq!(perms.describe(5), "PERM_READ | PERM_EXEC");
        assert_eq!(perms.describe(9), "PERM_READ | 0x8");
        assert_eq!(perms.describe(0), "0x0");

        let mut v = Value::new(ty);
        v.set_flags(3);
        let s = v.transform_to(Type::STRING).unwrap();
        assert_eq!(s.get_string(), Some("PERM_READ | PERM_WRITE"));
    }

    #[test]
    fn test_enum_to_string_and_int() {
        let ty = register_enum("EnumsTestLevel2", &LEVELS).unwrap();
        let mut v = Value::new(ty);
        v.set_enum(5);
        assert_eq!(v.transform_to(Type::STRING).unwrap().get_string(), Some("LEVEL_HIGH"));
        assert_eq!(v.transform_to(Type::INT).unwrap().get_int(), 5);
    }
}
