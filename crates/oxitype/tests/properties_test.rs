// Property integration tests
//
// Construct-time properties, interface properties, inherited lookup and
// deferred notification through a main context.

mod common;

use common::{Recorder, property_type, register_type};
use oxitype::runtime::signal;
use oxitype::runtime::{
    InterfaceInfo, MainContext, Object, ObjectClass, ParamFlags, ParamSpec, QueueContext, ToValue,
    Type, TypeClass, TypeFlags, TypeInfo, Value, set_main_context,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_construct_only_rejected_after_construction() {
    let ty = property_type();
    let obj = Object::builder(ty).property("id", 7u32).build().unwrap();
    assert_eq!(obj.get::<u32>("id"), Some(7));

    let ((), records) = oxitype_log::capture(|| obj.set("id", 8u32));
    assert_eq!(records.len(), 1);
    assert_eq!(obj.get::<u32>("id"), Some(7));
}

#[test]
fn test_builder_sets_regular_properties() {
    let ty = property_type();
    let obj = Object::builder(ty)
        .property("p", 5i32)
        .property("label", "start")
        .build()
        .unwrap();
    assert_eq!(obj.get::<i32>("p"), Some(5));
    assert_eq!(obj.get::<String>("label").as_deref(), Some("start"));
}

#[test]
fn test_builder_from_pairs_and_unknown_names() {
    let ty = property_type();
    let obj = Object::builder(ty)
        .properties_from([("p", 1i32), ("p", 2i32)])
        .build()
        .unwrap();
    assert_eq!(obj.get::<i32>("p"), Some(2));

    let (missing, records) = oxitype_log::capture(|| Object::builder(ty).property("nope", 1i32).build());
    assert!(missing.is_none());
    assert_eq!(records.len(), 1);
}

#[test]
fn test_inherited_properties_listed() {
    fn child_init(class: &mut TypeClass) {
        class.install_property(ParamSpec::boolean("active", false, ParamFlags::READABLE));
    }
    let parent = property_type();
    let child = register_type(parent, "PropsChild", TypeInfo::new().class_init(child_init));
    let class = child.class_ref().unwrap();
    let names: Vec<&str> = class.list_properties().iter().map(ParamSpec::name).collect();
    assert_eq!(names, ["active", "p", "label", "id"]);

    let obj = Object::new(child).unwrap();
    obj.set("p", 3i32);
    assert_eq!(obj.get::<i32>("p"), Some(3));

    // Read-only properties can't be set.
    let ((), records) = oxitype_log::capture(|| obj.set("active", true));
    assert_eq!(records.len(), 1);
}

#[derive(Default)]
struct Volume {
    level: Mutex<i32>,
}

fn volume_set(obj: &Object, _: u32, value: &Value, _: &ParamSpec) {
    *obj.instance::<Volume>().unwrap().level.lock() = value.get_int();
}

fn volume_get(obj: &Object, _: u32, value: &mut Value, _: &ParamSpec) {
    value.set_int(*obj.instance::<Volume>().unwrap().level.lock());
}

#[test]
fn test_interface_property_override() {
    fn iface_init(class: &mut TypeClass) {
        class.install_property(ParamSpec::int("level", 0, 11, 5, ParamFlags::READWRITE));
    }
    fn impl_init(class: &mut TypeClass) {
        let object_class = class.struct_mut::<ObjectClass>().unwrap();
        object_class.set_property = Some(volume_set);
        object_class.get_property = Some(volume_get);
        class.override_property("level");
    }

    let iface = Type::register_static(
        Type::INTERFACE,
        &common::unique_name("Audible"),
        TypeInfo::new().class_init(iface_init),
        TypeFlags::empty(),
    )
    .unwrap();
    let ty = register_type(
        Type::OBJECT,
        "Speaker",
        TypeInfo::new().class_init(impl_init).instance_struct::<Volume>(),
    );
    ty.add_interface(iface, InterfaceInfo::default()).unwrap();

    let class = ty.class_ref().unwrap();
    let pspec = class.find_property("level").unwrap();
    assert_eq!(pspec.owner_type(), ty);
    assert_eq!(pspec.redirect_target().unwrap().owner_type(), iface);

    let obj = Object::new(ty).unwrap();
    obj.set("level", 9i32);
    assert_eq!(obj.get::<i32>("level"), Some(9));
}

#[test]
fn test_deferred_notify_through_main_context() {
    fn deferred_init(class: &mut TypeClass) {
        class.struct_mut::<ObjectClass>().unwrap().deferred_notify = true;
    }
    let ty = register_type(property_type(), "Deferred", TypeInfo::new().class_init(deferred_init));
    let obj = Object::new(ty).unwrap();
    let log = Recorder::new();
    let sink = log.clone();
    signal::connect_notify(&obj, None, move |_, pspec| sink.push(pspec.name()));

    let ctx = QueueContext::new();
    set_main_context(Some(ctx.clone() as Arc<dyn MainContext>));
    obj.set("p", 1i32);
    assert_eq!(log.len(), 0);
    assert_eq!(ctx.run_pending(), 1);
    set_main_context(None);
    assert_eq!(log.take(), ["p"]);

    // Without a context the notification is synchronous.
    obj.set("p", 2i32);
    assert_eq!(log.take(), ["p"]);
}

#[test]
fn test_set_properties_batches_notifications() {
    let obj = Object::new(property_type()).unwrap();
    let log = Recorder::new();
    let sink = log.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let values = Arc::clone(&seen);
    signal::connect_notify(&obj, None, move |obj, pspec| {
        sink.push(pspec.name());
        values.lock().push(obj.get::<i32>("p"));
    });

    obj.set_properties(&[
        ("p", 4i32.to_value()),
        ("label", "x".to_value()),
        ("p", 6i32.to_value()),
    ]);
    assert_eq!(log.take(), ["p", "label"]);
    assert_eq!(*seen.lock(), [Some(6), Some(6)]);
}
