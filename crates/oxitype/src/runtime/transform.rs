//! Value transformations.
//!
//! A process-wide table maps `(source, destination)` type pairs to
//! conversion functions. Lookup tries the exact source type first, then
//! each of its ancestors; for every source candidate the exact destination
//! wins over the destination's ancestors.
//!
//! The table starts with numeric conversions between every pair of numeric
//! fundamentals (including booleans, enums and flags) and conversions of
//! every printable value to strings.

use std::sync::OnceLock;

use fxhash::FxHashMap;
use parking_lot::RwLock;

use crate::runtime::enums::{EnumClass, FlagsClass};
use crate::runtime::types::Type;
use crate::runtime::value::{Value, ValueData};

/// Writes the converted form of the first value into the second, which is
/// initialized to the destination type.
pub type TransformFn = fn(&Value, &mut Value);

type Table = FxHashMap<(Type, Type), TransformFn>;

const NUMERIC: [Type; 11] = [
    Type::CHAR,
    Type::UCHAR,
    Type::BOOL,
    Type::INT,
    Type::UINT,
    Type::INT64,
    Type::UINT64,
    Type::ENUM,
    Type::FLAGS,
    Type::FLOAT,
    Type::DOUBLE,
];

fn table() -> &'static RwLock<Table> {
    static TABLE: OnceLock<RwLock<Table>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Table::default();
        for src in NUMERIC {
            for dst in NUMERIC {
                if src != dst {
                    table.insert((src, dst), numeric_to_numeric);
                }
            }
            table.insert((src, Type::STRING), to_string);
        }
        table.insert((Type::POINTER, Type::STRING), to_string);
        RwLock::new(table)
    })
}

/// Registers (or replaces) the transformation from `src` to `dst`.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{ToValue, Type, Value, register_transform};
///
/// fn parse_int(src: &Value, dst: &mut Value) {
///     let n = src.get_string().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
///     dst.set_int(n);
/// }
///
/// register_transform(Type::STRING, Type::INT, parse_int);
/// let v = " 12 ".to_value().transform_to(Type::INT).unwrap();
/// assert_eq!(v.get_int(), 12);
/// ```
pub fn register_transform(src: Type, dst: Type, f: TransformFn) {
    if !src.is_valid() || !dst.is_valid() {
        critical!("cannot register a transformation between invalid types");
        return;
    }
    table().write().insert((src, dst), f);
}

/// Finds the transformation from `src` to `dst`.
pub(crate) fn lookup(src: Type, dst: Type) -> Option<TransformFn> {
    let table = table().read();
    let dsts: Vec<Type> = std::iter::once(dst).chain(dst.ancestors().iter().copied()).collect();
    std::iter::once(src)
        .chain(src.ancestors().iter().copied())
        .find_map(|s| dsts.iter().find_map(|&d| table.get(&(s, d)).copied()))
}

enum Number {
    Int(i128),
    Float(f64),
}

fn number(data: &ValueData) -> Option<Number> {
    Some(match *data {
        ValueData::Bool(v) => Number::Int(i128::from(v)),
        ValueData::Char(v) => Number::Int(i128::from(v)),
        ValueData::UChar(v) => Number::Int(i128::from(v)),
        ValueData::Int(v) | ValueData::Enum(v) => Number::Int(i128::from(v)),
        ValueData::UInt(v) | ValueData::Flags(v) => Number::Int(i128::from(v)),
        ValueData::Int64(v) => Number::Int(i128::from(v)),
        ValueData::UInt64(v) => Number::Int(i128::from(v)),
        ValueData::Float(v) => Number::Float(f64::from(v)),
        ValueData::Double(v) => Number::Float(v),
        _ => return None,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn numeric_to_numeric(src: &Value, dst: &mut Value) {
    let Some(n) = number(src.data()) else {
        return;
    };
    let (i, f) = match n {
        Number::Int(i) => (i, i as f64),
        Number::Float(f) => (f as i128, f),
    };
    match dst.data_mut() {
        ValueData::Bool(v) => *v = i != 0 || f != 0.0,
        ValueData::Char(v) => *v = i as i8,
        ValueData::UChar(v) => *v = i as u8,
        ValueData::Int(v) | ValueData::Enum(v) => *v = i as i32,
        ValueData::UInt(v) | ValueData::Flags(v) => *v = i as u32,
        ValueData::Int64(v) => *v = i as i64,
        ValueData::UInt64(v) => *v = i as u64,
        ValueData::Float(v) => *v = f as f32,
        ValueData::Double(v) => *v = f,
        _ => {}
    }
}

fn to_string(src: &Value, dst: &mut Value) {
    let text = match src.data() {
        ValueData::Bool(v) => v.to_string(),
        ValueData::Char(v) => v.to_string(),
        ValueData::UChar(v) => v.to_string(),
        ValueData::Int(v) => v.to_string(),
        ValueData::UInt(v) => v.to_string(),
        ValueData::Int64(v) => v.to_string(),
        ValueData::UInt64(v) => v.to_string(),
        ValueData::Float(v) => v.to_string(),
        ValueData::Double(v) => v.to_string(),
        ValueData::Pointer(p) => format!("{p:#x}"),
        ValueData::Enum(v) => enum_name(src.type_(), *v).unwrap_or_else(|| v.to_string()),
        ValueData::Flags(v) => flags_names(src.type_(), *v).unwrap_or_else(|| v.to_string()),
        _ => return,
    };
    dst.set_string(Some(&text));
}

fn enum_name(ty: Type, v: i32) -> Option<String> {
    let class = ty.class_ref()?;
    let value = class.struct_ref::<EnumClass>()?.value(v)?;
    Some(value.name.to_string())
}

fn flags_names(ty: Type, v: u32) -> Option<String> {
    let class = ty.class_ref()?;
    Some(class.struct_ref::<FlagsClass>()?.describe(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::ToValue;

    #[test]
    fn test_float_to_int_truncates() {
        let v = 3.9f64.to_value().transform_to(Type::INT).unwrap();
        assert_eq!(v.get_int(), 3);
        let v = (-1i32).to_value().transform_to(Type::UCHAR).unwrap();
        assert_eq!(v.get_uchar(), 255);
    }

    #[test]
    fn test_bool_round_trip() {
        let v = true.to_value().transform_to(Type::INT64).unwrap();
        assert_eq!(v.get_int64(), 1);
        let v = 0.0f32.to_value().transform_to(Type::BOOL).unwrap();
        assert!(!v.get_bool());
    }

    #[test]
    fn test_custom_transform_is_inherited_by_derived_source() {
        use crate::runtime::types::{TypeFlags, TypeInfo};

        fn from_pointer(src: &Value, dst: &mut Value) {
            dst.set_uint64(src.get_pointer() as u64);
        }

        let ptr_type = Type::register_static(
            Type::POINTER,
            "TransformTestPtr",
            TypeInfo::new(),
            TypeFlags::empty(),
        )
        .unwrap();
        register_transform(Type::POINTER, Type::UINT64, from_pointer);

        let mut v = Value::new(ptr_type);
        v.set_pointer(0x40);
        assert_eq!(v.transform_to(Type::UINT64).unwrap().get_uint64(), 0x40);
        assert_eq!(v.transform_to(Type::STRING).unwrap().get_string(), Some("0x40"));
    }
}
