// Built-in signal lookup in a fresh process
//
// Kept in its own test binary: the first signal call of the process must be
// a by-name lookup of "notify".

use oxitype::runtime::signal;
use oxitype::runtime::{Object, Type};

#[test]
fn test_connect_notify_as_first_signal_call() {
    let obj = Object::new(Type::OBJECT).unwrap();
    let (id, records) = oxitype_log::capture(|| signal::connect_notify(&obj, None, |_, _| {}));
    assert!(id.is_valid());
    assert!(records.is_empty());

    assert!(signal::lookup("notify", Type::OBJECT).is_valid());
    assert!(signal::handler_is_connected(&obj, id));
}
