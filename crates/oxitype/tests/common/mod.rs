// Common test utilities for integration tests
//
// Shared fixtures: unique type names, a call-order recorder and a small
// object type with stored properties.

#![allow(dead_code)]

use oxitype::runtime::{
    Object, ObjectClass, OnceSlot, ParamFlags, ParamSpec, Type, TypeClass, TypeFlags, TypeInfo,
    Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Returns a type name no other test has used.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}{}", NAME_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Registers a plain object subtype of `parent`.
pub fn register_type(parent: Type, prefix: &str, info: TypeInfo) -> Type {
    Type::register_static(parent, &unique_name(prefix), info, TypeFlags::empty())
        .expect("type registration failed")
}

/// Records labels in call order, shareable across closures and threads.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: impl Into<String>) {
        self.0.lock().push(label.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Instance storage for [`property_type`].
#[derive(Default)]
pub struct Slots {
    values: Mutex<Vec<(u32, Value)>>,
}

fn slots_set(obj: &Object, id: u32, value: &Value, _: &ParamSpec) {
    let Some(slots) = obj.instance::<Slots>() else {
        return;
    };
    let mut values = slots.values.lock();
    values.retain(|(i, _)| *i != id);
    values.push((id, value.clone()));
}

fn slots_get(obj: &Object, id: u32, value: &mut Value, pspec: &ParamSpec) {
    let stored = obj
        .instance::<Slots>()
        .and_then(|s| s.values.lock().iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone()));
    *value = stored.unwrap_or_else(|| pspec.default_value());
}

fn property_class_init(class: &mut TypeClass) {
    if let Some(object_class) = class.struct_mut::<ObjectClass>() {
        object_class.set_property = Some(slots_set);
        object_class.get_property = Some(slots_get);
    }
    class.install_properties([
        ParamSpec::int("p", i32::MIN, i32::MAX, 0, ParamFlags::READWRITE),
        ParamSpec::string("label", None, ParamFlags::READWRITE),
        ParamSpec::uint("id", 0, u32::MAX, 0, ParamFlags::READWRITE | ParamFlags::CONSTRUCT_ONLY),
    ]);
}

/// A type with an int property "p", a string "label" and a construct-only
/// uint "id".
pub fn property_type() -> Type {
    register_type(
        Type::OBJECT,
        "TestProps",
        TypeInfo::new()
            .class_init(property_class_init)
            .instance_struct::<Slots>(),
    )
}

/// Registers "SharedWidget" on first call and returns it on every call.
pub fn shared_type() -> Type {
    static TYPE: OnceSlot<Type> = OnceSlot::new();
    TYPE.get_or_init(|| {
        Type::register_static(Type::OBJECT, "SharedWidget", TypeInfo::new(), TypeFlags::empty())
            .expect("type registration failed")
    })
    .copied()
    .expect("shared type registration poisoned")
}
