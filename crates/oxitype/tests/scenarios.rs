// End-to-end scenarios
//
// Each test walks one complete use of the runtime: construction, signal
// ordering, notification coalescing, weak and toggle references and
// concurrent keyed data.

mod common;

use common::{Recorder, property_type, register_type};
use oxitype::runtime::signal::{self, SignalBuilder};
use oxitype::runtime::{
    Finalizing, Object, ObjectClass, ObjectPtr, ParamSpec, Quark, SignalFlags, Type, TypeClass,
    TypeInfo, Value, WeakRef,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// A type whose constructor hands out one shared instance while it lives.
#[test]
fn test_singleton_via_custom_constructor() {
    static CACHED: Mutex<Option<WeakRef>> = Mutex::new(None);
    static FINALIZED: AtomicUsize = AtomicUsize::new(0);
    static CLASS_INITS: AtomicUsize = AtomicUsize::new(0);

    fn constructor(ty: Type, params: &[(ParamSpec, Value)]) -> Option<Object> {
        let mut cached = CACHED.lock();
        if let Some(obj) = cached.as_ref().and_then(WeakRef::upgrade) {
            return Some(obj);
        }
        let obj = Object::construct_default(ty, params)?;
        *cached = Some(obj.downgrade());
        Some(obj)
    }

    fn finalize(_: &Finalizing<'_>) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    fn class_init(class: &mut TypeClass) {
        CLASS_INITS.fetch_add(1, Ordering::SeqCst);
        class.struct_mut::<ObjectClass>().unwrap().constructor = constructor;
        class.set_finalize(finalize);
    }

    let ty = register_type(Type::OBJECT, "Singleton", TypeInfo::new().class_init(class_init));

    let a = Object::new(ty).unwrap();
    let b = Object::new(ty).unwrap();
    let c = Object::new(ty).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.ref_count(), 3);

    drop(a);
    drop(b);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 0);
    drop(c);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);

    // The cache only held a weak reference; a new instance is built.
    let d = Object::new(ty).unwrap();
    assert_eq!(d.ref_count(), 1);
    drop(d);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 2);
    // The class outlived its instances.
    assert_eq!(CLASS_INITS.load(Ordering::SeqCst), 1);
}

/// Handlers, class handler and after-handlers run in emission order.
#[test]
fn test_signal_emission_order() {
    fn default_handler(params: &[Value]) -> Option<Value> {
        let obj = params[0].object_ref()?;
        obj.data::<Recorder>("log")?.push("D");
        None
    }

    let ty = register_type(Type::OBJECT, "Emitter", TypeInfo::new());
    SignalBuilder::new("event", ty)
        .flags(SignalFlags::RUN_LAST)
        .class_handler(default_handler)
        .build();

    let obj = Object::new(ty).unwrap();
    let log = Recorder::new();
    obj.set_data("log", log.clone());

    for (label, after) in [("H1", false), ("H2", false), ("H3", true)] {
        let log = log.clone();
        let closure = oxitype::Closure::new(move |_| {
            log.push(label);
            None
        });
        signal::connect_closure(&obj, "event", closure, after);
    }

    signal::emit_by_name(&obj, "event", &[]);
    assert_eq!(log.take(), ["H1", "H2", "D", "H3"]);
}

/// Changes made while notifications are frozen coalesce into one
/// notification, observed after thaw with the final value.
#[test]
fn test_property_notification_coalescing() {
    let obj = Object::new(property_type()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    signal::connect_notify(&obj, Some("p"), move |obj, pspec| {
        let value = obj.get::<i32>(pspec.name()).unwrap();
        sink.lock().push(value);
    });

    obj.freeze_notify();
    obj.set("p", 1i32);
    obj.set("p", 2i32);
    obj.set("p", 3i32);
    assert!(seen.lock().is_empty());
    obj.thaw_notify();

    assert_eq!(*seen.lock(), [3]);
}

/// A weak reference reads as empty by the time any weak notify runs, and
/// the notify runs once with the identity of the dead instance.
#[test]
fn test_weak_reference_clearing() {
    let obj = Object::new(Type::OBJECT).unwrap();
    let addr = obj.as_ptr();
    let weak = obj.downgrade();
    assert_eq!(weak.upgrade().as_ref(), Some(&obj));

    let calls: Arc<Mutex<Vec<(ObjectPtr, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let observed = weak.clone();
    obj.weak_ref(move |dead| {
        let cleared = observed.upgrade().is_none();
        sink.lock().push((dead, cleared));
    });

    drop(obj);
    assert!(weak.upgrade().is_none());

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (dead, cleared) = calls[0];
    assert_eq!(dead.addr(), addr);
    assert_eq!(dead.type_(), Type::OBJECT);
    assert!(cleared);
}

/// A lone toggle reference hears about the count crossing between one
/// and two in both directions.
#[test]
fn test_toggle_reference() {
    let obj = Object::new(Type::OBJECT).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let toggle = obj.add_toggle_ref(move |_, is_last_ref| sink.lock().push(is_last_ref));
    assert!(events.lock().is_empty());

    let extra = obj.clone();
    assert_eq!(*events.lock(), [false]);
    drop(extra);
    assert_eq!(*events.lock(), [false, true]);

    assert!(obj.remove_toggle_ref(toggle));
    let extra = obj.clone();
    drop(extra);
    assert_eq!(events.lock().len(), 2);
}

/// Compare-and-exchange on keyed data from many threads loses no update.
#[test]
fn test_concurrent_qdata_replace() {
    const THREADS: usize = 8;
    const UPDATES: usize = 500;

    let obj = Object::new(Type::OBJECT).unwrap();
    let key = Quark::from_str("scenario-counter");
    obj.set_qdata(key, 0usize);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let obj = obj.clone();
            thread::spawn(move || {
                for _ in 0..UPDATES {
                    loop {
                        let current = obj.qdata::<usize>(key).unwrap();
                        if obj.replace_qdata(key, Some(&current), Some(*current + 1)) {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(obj.qdata::<usize>(key).as_deref(), Some(&(THREADS * UPDATES)));
    assert_eq!(obj.ref_count(), 1);
}
