// Live-instance accounting
//
// Runs in its own test binary so no other test creates tracked instances.

use oxitype::runtime::debug;
use oxitype::runtime::{Object, Type, TypeFlags, TypeInfo};
use oxitype_log::Level;

#[test]
fn test_shutdown_reports_live_instances() {
    let ty = Type::register_static(Type::OBJECT, "LeakyWidget", TypeInfo::new(), TypeFlags::empty())
        .unwrap();

    // Instances created before tracking starts are never reported.
    let untracked = Object::new(ty).unwrap();

    oxitype::config::set_debug_objects(true);
    let leaked = Object::new(ty).unwrap();
    drop(Object::new(ty).unwrap());
    oxitype::config::set_debug_objects(false);

    assert_eq!(debug::live_instance_count(), 1);
    assert_eq!(debug::live_instances(), [(leaked.as_ptr(), ty)]);

    let (count, records) = oxitype_log::capture(oxitype::shutdown);
    assert_eq!(count, 1);
    let warnings: Vec<_> = records.iter().filter(|r| r.level == Level::Warn).collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.starts_with("leaked instance of 'LeakyWidget'"));

    drop(leaked);
    assert_eq!(debug::live_instance_count(), 0);
    let (count, records) = oxitype_log::capture(oxitype::shutdown);
    assert_eq!(count, 0);
    assert!(records.iter().all(|r| r.level != Level::Warn));
    drop(untracked);
}
