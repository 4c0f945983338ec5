// Signal emission benchmarks for OxiType runtime
//
// These benchmarks measure emission with no handlers, with an increasing
// number of connected handlers, with a return-value accumulator, and the
// cost of a property set with its change notification.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use oxitype::runtime::signal::{self, SignalBuilder};
use oxitype::runtime::{
    Object, ObjectClass, ParamFlags, ParamSpec, ToValue, Type, TypeClass, TypeFlags, TypeInfo,
    Value,
};
use parking_lot::Mutex;

fn emitter_type(name: &str) -> Type {
    let ty = Type::register_static(Type::OBJECT, name, TypeInfo::new(), TypeFlags::empty()).unwrap();
    SignalBuilder::new("tick", ty).param_types(&[Type::INT]).build();
    SignalBuilder::new("handled", ty)
        .return_type(Type::BOOL)
        .accumulator(signal::true_handled)
        .build();
    ty
}

/// Benchmark emission with no handlers connected.
fn bench_emit_empty(c: &mut Criterion) {
    let obj = Object::new(emitter_type("BenchEmptyEmitter")).unwrap();
    let id = signal::lookup("tick", obj.type_());
    let args = [1i32.to_value()];

    c.bench_function("emit_no_handlers", |b| {
        b.iter(|| signal::emit(&obj, id, Default::default(), black_box(&args)));
    });
}

/// Benchmark emission cost as handlers are added.
fn bench_emit_handlers(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_handlers");

    for count in [1usize, 8, 64] {
        let obj = Object::new(emitter_type(&format!("BenchEmitter{count}"))).unwrap();
        for _ in 0..count {
            signal::connect(&obj, "tick", |params| {
                black_box(params[1].get_int());
                None
            });
        }
        let id = signal::lookup("tick", obj.type_());
        let args = [1i32.to_value()];
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| signal::emit(&obj, id, Default::default(), black_box(&args)));
        });
    }

    group.finish();
}

/// Benchmark emission through an accumulator that stops at the last handler.
fn bench_emit_accumulated(c: &mut Criterion) {
    let obj = Object::new(emitter_type("BenchAccEmitter")).unwrap();
    for handled in [false, false, false, true] {
        signal::connect(&obj, "handled", move |_| Some(handled.to_value()));
    }

    c.bench_function("emit_accumulated", |b| {
        b.iter(|| signal::emit_by_name(&obj, black_box("handled"), &[]));
    });
}

#[derive(Default)]
struct Level(Mutex<i32>);

fn level_set(obj: &Object, _: u32, value: &Value, _: &ParamSpec) {
    if let Some(level) = obj.instance::<Level>() {
        *level.0.lock() = value.get_int();
    }
}

fn level_init(class: &mut TypeClass) {
    if let Some(object_class) = class.struct_mut::<ObjectClass>() {
        object_class.set_property = Some(level_set);
    }
    class.install_property(ParamSpec::int("level", 0, 100, 0, ParamFlags::READWRITE));
}

/// Benchmark a property set, including validation and its notify emission.
fn bench_property_set(c: &mut Criterion) {
    let ty = Type::register_static(
        Type::OBJECT,
        "BenchLevel",
        TypeInfo::new().class_init(level_init).instance_struct::<Level>(),
        TypeFlags::empty(),
    )
    .unwrap();
    let obj = Object::new(ty).unwrap();
    let value = 42i32.to_value();

    c.bench_function("property_set_notify", |b| {
        b.iter(|| obj.set_property(black_box("level"), &value));
    });
}

criterion_group!(
    benches,
    bench_emit_empty,
    bench_emit_handlers,
    bench_emit_accumulated,
    bench_property_set
);
criterion_main!(benches);
