//! Properties: installation on classes, get/set on instances, and change
//! notification.
//!
//! Properties are installed from `class_init` with
//! [`TypeClass::install_property`]. Each installed spec gets an id unique
//! within its owner type, which the owner's `set_property` / `get_property`
//! hooks dispatch on. Lookup walks the class chain and then the interfaces
//! the class implements.
//!
//! Every successful `set` queues a "notify" for the property. While the
//! instance is frozen the queue collects each property once, in the order
//! first queued; the last thaw delivers the batch through the class's
//! `dispatch_properties_changed`.

use crate::runtime::class::TypeClass;
use crate::runtime::context;
use crate::runtime::object::{Object, ObjectClass};
use crate::runtime::param::{ParamFlags, ParamSpec, canonical_name};
use crate::runtime::signal;
use crate::runtime::types::Type;
use crate::runtime::value::{FromValue, ToValue, Value};

impl TypeClass {
    /// Installs a property and returns its id, or 0 on misuse.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::{Object, ParamFlags, ParamSpec, Type, TypeClass, TypeFlags, TypeInfo};
    ///
    /// fn class_init(class: &mut TypeClass) {
    ///     let id = class.install_property(ParamSpec::boolean("visible", true, ParamFlags::READABLE));
    ///     assert_eq!(id, 1);
    /// }
    ///
    /// let ty = Type::register_static(
    ///     Type::OBJECT,
    ///     "DocLamp",
    ///     TypeInfo::new().class_init(class_init),
    ///     TypeFlags::empty(),
    /// )
    /// .unwrap();
    /// let class = ty.class_ref().unwrap();
    /// assert_eq!(class.find_property("visible").unwrap().owner_type(), ty);
    /// ```
    pub fn install_property(&mut self, pspec: ParamSpec) -> u32 {
        let ty = self.type_();
        if !ty.is_a(Type::OBJECT) && !ty.is_interface() {
            critical!("cannot install property '{}' on non-object type '{}'", pspec.name(), ty.name());
            return 0;
        }
        if !ParamSpec::is_valid_name(pspec.name()) {
            critical!("invalid property name '{}'", pspec.name());
            return 0;
        }
        let flags = pspec.flags();
        if !flags.intersects(ParamFlags::READWRITE) {
            critical!("property '{}' is neither readable nor writable", pspec.name());
            return 0;
        }
        if pspec.is_construct() && !flags.contains(ParamFlags::WRITABLE) {
            critical!("construct property '{}' must be writable", pspec.name());
            return 0;
        }
        if self.properties.iter().any(|p| p.name() == pspec.name()) {
            critical!("type '{}' already has a property named '{}'", ty.name(), pspec.name());
            return 0;
        }

        let id = self.next_property_id;
        if !pspec.install(ty, id) {
            critical!("property '{}' is already installed on '{}'", pspec.name(), pspec.owner_type().name());
            return 0;
        }
        self.next_property_id += 1;

        if let Some(target) = pspec.redirect_target() {
            self.construct_properties.retain(|p| p != target);
        }
        if pspec.is_construct() {
            self.construct_properties.push(pspec.clone());
        }
        oxitype_log::trace!("installed property '{}::{}' as {}", ty.name(), pspec.name(), id);
        self.properties.push(pspec);
        id
    }

    /// Installs several properties in order.
    pub fn install_properties(&mut self, pspecs: impl IntoIterator<Item = ParamSpec>) {
        for pspec in pspecs {
            self.install_property(pspec);
        }
    }

    /// Installs an override of a property inherited from an ancestor or
    /// declared by an implemented interface, so this type's hooks handle it.
    pub fn override_property(&mut self, name: &str) -> u32 {
        let name = canonical_name(name);
        let inherited = self.parent().and_then(|p| find_property(p, &name));
        let target = inherited.or_else(|| {
            self.type_().interfaces().into_iter().find_map(|iface| {
                let vtable = iface.class_peek().or_else(|| iface.default_interface_ref())?;
                vtable.properties.iter().find(|p| p.name() == name).cloned()
            })
        });
        let Some(target) = target else {
            critical!("type '{}' has no inherited property '{}' to override", self.name(), name);
            return 0;
        };
        let target = target.redirect_target().cloned().unwrap_or(target);
        self.install_property(ParamSpec::override_for(&name, &target))
    }

    /// Looks a property up on this class, its ancestors and its interfaces.
    pub fn find_property(&self, name: &str) -> Option<ParamSpec> {
        find_property(self, name)
    }

    /// Lists every property visible on this class, own ones first.
    pub fn list_properties(&self) -> Vec<ParamSpec> {
        let mut seen: Vec<ParamSpec> = Vec::new();
        for class in self.chain() {
            for pspec in &class.properties {
                if !seen.iter().any(|p| p.name() == pspec.name()) {
                    seen.push(pspec.clone());
                }
            }
        }
        seen
    }
}

pub(crate) fn find_property(class: &TypeClass, name: &str) -> Option<ParamSpec> {
    let canonical;
    let name = if name.contains('_') {
        canonical = canonical_name(name);
        canonical.as_str()
    } else {
        name
    };

    let own = class
        .chain()
        .find_map(|c| c.properties.iter().find(|p| p.name() == name));
    if let Some(pspec) = own {
        return Some(pspec.clone());
    }
    class.interfaces().iter().find_map(|iface| {
        iface
            .default_vtable()
            .properties
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    })
}

/// Returns the `ObjectClass` of the type that installed `pspec`.
fn owner_class(obj: &Object, pspec: &ParamSpec) -> Option<ObjectClass> {
    let owner = pspec.owner_type();
    obj.class()
        .chain()
        .find(|c| c.type_() == owner)
        .and_then(|c| c.struct_ref::<ObjectClass>())
        .copied()
}

/// Converts, validates and stores `value` through the owner's setter,
/// queueing a notification.
pub(crate) fn set_by_pspec(obj: &Object, pspec: &ParamSpec, value: &Value) {
    let mut stored = Value::new(pspec.value_type());
    if !Value::type_transformable(value.type_(), pspec.value_type()) || !value.transform(&mut stored)
    {
        critical!(
            "unable to set property '{}' of type '{}' from a value of type '{}'",
            pspec.name(),
            pspec.value_type().name(),
            value.type_().name()
        );
        return;
    }
    if pspec.validate(&mut stored) && !pspec.flags().contains(ParamFlags::LAX_VALIDATION) {
        oxitype_log::warn!(
            "value {:?} is out of range for property '{}' of type '{}'",
            value,
            pspec.name(),
            obj.type_().name()
        );
    }

    let Some(setter) = owner_class(obj, pspec).and_then(|c| c.set_property) else {
        critical!(
            "type '{}' has no setter for property '{}'",
            obj.type_().name(),
            pspec.name()
        );
        return;
    };

    obj.freeze_notify();
    setter(obj, pspec.param_id(), &stored, pspec);
    if !pspec.flags().contains(ParamFlags::EXPLICIT_NOTIFY) || obj.is_in_construction() {
        obj.notify_by_pspec(pspec);
    }
    obj.thaw_notify();
}

/// Default `dispatch_properties_changed`: emits "notify" once per property,
/// through the main context when the class defers notifications.
pub fn dispatch_properties_changed(obj: &Object, pspecs: &[ParamSpec]) {
    let deferred = obj
        .class()
        .struct_ref::<ObjectClass>()
        .is_some_and(|c| c.deferred_notify);
    if deferred {
        if let Some(ctx) = context::main_context() {
            let obj = obj.clone();
            let pspecs = pspecs.to_vec();
            ctx.invoke(Box::new(move || emit_notifies(&obj, &pspecs)));
            return;
        }
    }
    emit_notifies(obj, pspecs);
}

fn emit_notifies(obj: &Object, pspecs: &[ParamSpec]) {
    for pspec in pspecs {
        signal::emit_notify(obj, pspec);
    }
}

impl Object {
    /// Sets a property from a value of its type or one transformable into it.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::{Object, ParamFlags, ParamSpec, Type, TypeClass, TypeFlags, TypeInfo, Value};
    /// use std::sync::atomic::{AtomicI32, Ordering};
    ///
    /// #[derive(Default)]
    /// struct Dial {
    ///     level: AtomicI32,
    /// }
    ///
    /// fn set_property(obj: &Object, _id: u32, value: &Value, _: &ParamSpec) {
    ///     obj.instance::<Dial>().unwrap().level.store(value.get_int(), Ordering::SeqCst);
    /// }
    ///
    /// fn get_property(obj: &Object, _id: u32, value: &mut Value, _: &ParamSpec) {
    ///     value.set_int(obj.instance::<Dial>().unwrap().level.load(Ordering::SeqCst));
    /// }
    ///
    /// fn class_init(class: &mut TypeClass) {
    ///     let object_class = class.struct_mut::<oxitype::runtime::ObjectClass>().unwrap();
    ///     object_class.set_property = Some(set_property);
    ///     object_class.get_property = Some(get_property);
    ///     class.install_property(ParamSpec::int("level", 0, 10, 0, ParamFlags::READWRITE));
    /// }
    ///
    /// let ty = Type::register_static(
    ///     Type::OBJECT,
    ///     "DocDial",
    ///     TypeInfo::new().class_init(class_init).instance_struct::<Dial>(),
    ///     TypeFlags::empty(),
    /// )
    /// .unwrap();
    /// let dial = Object::new(ty).unwrap();
    /// dial.set("level", 4i32);
    /// assert_eq!(dial.get::<i32>("level"), Some(4));
    ///
    /// // Out of range values are clamped.
    /// oxitype_log::capture(|| dial.set("level", 40i32));
    /// assert_eq!(dial.get::<i32>("level"), Some(10));
    /// ```
    pub fn set_property(&self, name: &str, value: &Value) {
        let Some(pspec) = find_property(self.class(), name) else {
            critical!("type '{}' has no property named '{}'", self.type_().name(), name);
            return;
        };
        if !pspec.is_writable() {
            critical!("property '{}' of type '{}' is not writable", pspec.name(), self.type_().name());
            return;
        }
        if pspec.flags().contains(ParamFlags::CONSTRUCT_ONLY) && !self.is_in_construction() {
            critical!(
                "construct-only property '{}' of type '{}' cannot be set after construction",
                pspec.name(),
                self.type_().name()
            );
            return;
        }
        if pspec.flags().contains(ParamFlags::DEPRECATED) {
            oxitype_log::warn!("property '{}' of type '{}' is deprecated", pspec.name(), self.type_().name());
        }
        set_by_pspec(self, &pspec, value);
    }

    /// [`set_property`](Self::set_property) from any [`ToValue`].
    pub fn set(&self, name: &str, value: impl ToValue) {
        self.set_property(name, &value.to_value());
    }

    /// Sets several properties with notifications delivered as one batch.
    pub fn set_properties(&self, properties: &[(&str, Value)]) {
        self.freeze_notify();
        for (name, value) in properties {
            self.set_property(name, value);
        }
        self.thaw_notify();
    }

    /// Reads a property through its owner's getter.
    pub fn property(&self, name: &str) -> Option<Value> {
        let Some(pspec) = find_property(self.class(), name) else {
            critical!("type '{}' has no property named '{}'", self.type_().name(), name);
            return None;
        };
        if !pspec.is_readable() {
            critical!("property '{}' of type '{}' is not readable", pspec.name(), self.type_().name());
            return None;
        }
        let Some(getter) = owner_class(self, &pspec).and_then(|c| c.get_property) else {
            critical!(
                "type '{}' has no getter for property '{}'",
                self.type_().name(),
                pspec.name()
            );
            return None;
        };
        let mut value = Value::new(pspec.value_type());
        getter(self, pspec.param_id(), &mut value, &pspec);
        Some(value)
    }

    /// [`property`](Self::property) extracted as `T`.
    pub fn get<T: FromValue>(&self, name: &str) -> Option<T> {
        self.property(name)?.get::<T>()
    }

    pub fn find_property(&self, name: &str) -> Option<ParamSpec> {
        find_property(self.class(), name)
    }

    pub fn list_properties(&self) -> Vec<ParamSpec> {
        self.class().list_properties()
    }

    /// Holds back notifications until the matching
    /// [`thaw_notify`](Self::thaw_notify).
    pub fn freeze_notify(&self) {
        self.with_data(|d| d.freeze_count += 1);
    }

    /// Releases one freeze; the last one delivers the queued notifications.
    pub fn thaw_notify(&self) {
        let pending = self.with_data(|d| match d.freeze_count {
            0 => None,
            1 => {
                d.freeze_count = 0;
                Some(std::mem::take(&mut d.pending_notify))
            }
            _ => {
                d.freeze_count -= 1;
                Some(Vec::new())
            }
        });
        match pending {
            None => critical!("thaw_notify on '{}' without a matching freeze", self.type_().name()),
            Some(pspecs) if !pspecs.is_empty() => dispatch(self, &pspecs),
            Some(_) => {}
        }
    }

    /// Notifies a change of the named property.
    pub fn notify(&self, name: &str) {
        match find_property(self.class(), name) {
            Some(pspec) => self.notify_by_pspec(&pspec),
            None => critical!("type '{}' has no property named '{}'", self.type_().name(), name),
        }
    }

    /// Notifies a change of `pspec`, queued while frozen.
    pub fn notify_by_pspec(&self, pspec: &ParamSpec) {
        if !pspec.is_readable() {
            return;
        }
        let immediate = self.with_data(|d| {
            if d.freeze_count == 0 {
                return true;
            }
            if !d.pending_notify.contains(pspec) {
                d.pending_notify.push(pspec.clone());
            }
            false
        });
        if immediate {
            dispatch(self, std::slice::from_ref(pspec));
        }
    }
}

fn dispatch(obj: &Object, pspecs: &[ParamSpec]) {
    let dispatch = obj
        .class()
        .struct_ref::<ObjectClass>()
        .map_or(dispatch_properties_changed as fn(&Object, &[ParamSpec]), |c| {
            c.dispatch_properties_changed
        });
    dispatch(obj, pspecs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{TypeFlags, TypeInfo};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique(prefix: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!("{prefix}{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[derive(Default)]
    struct Store {
        values: Mutex<Vec<(u32, Value)>>,
    }

    fn store_set(obj: &Object, id: u32, value: &Value, _: &ParamSpec) {
        let store = obj.instance::<Store>().unwrap();
        let mut values = store.values.lock();
        values.retain(|(i, _)| *i != id);
        values.push((id, value.clone()));
    }

    fn store_get(obj: &Object, id: u32, value: &mut Value, pspec: &ParamSpec) {
        let store = obj.instance::<Store>().unwrap();
        let found = store.values.lock().iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone());
        *value = found.unwrap_or_else(|| pspec.default_value());
    }

    fn base_init(class: &mut TypeClass) {
        let object_class = class.struct_mut::<ObjectClass>().unwrap();
        object_class.set_property = Some(store_set);
        object_class.get_property = Some(store_get);
        class.install_properties([
            ParamSpec::int("width", 0, 100, 10, ParamFlags::READWRITE),
            ParamSpec::string("title", None, ParamFlags::READWRITE | ParamFlags::CONSTRUCT),
            ParamSpec::uint("serial", 0, u32::MAX, 0, ParamFlags::READWRITE | ParamFlags::CONSTRUCT_ONLY),
            ParamSpec::double("ratio", 0.0, 1.0, 0.5, ParamFlags::READWRITE | ParamFlags::LAX_VALIDATION),
            ParamSpec::boolean("quiet", false, ParamFlags::READWRITE | ParamFlags::EXPLICIT_NOTIFY),
        ]);
    }

    fn store_type() -> Type {
        Type::register_static(
            Type::OBJECT,
            &unique("PropertyTestStore"),
            TypeInfo::new().class_init(base_init).instance_struct::<Store>(),
            TypeFlags::empty(),
        )
        .unwrap()
    }

    fn record_notifies(obj: &Object) -> Arc<Mutex<Vec<&'static str>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        signal::connect_notify(obj, None, move |_, pspec| sink.lock().push(pspec.name()));
        log
    }

    #[test]
    fn test_ids_and_lookup() {
        let ty = store_type();
        let class = ty.class_ref().unwrap();
        let ids: Vec<u32> = class.list_properties().iter().map(ParamSpec::param_id).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5]);
        assert!(class.find_property("width").is_some());
        assert!(class.find_property("nope").is_none());
        assert_eq!(class.construct_properties.len(), 2);
    }

    #[test]
    fn test_duplicate_install_rejected() {
        fn init(class: &mut TypeClass) {
            class.install_property(ParamSpec::int("dup", 0, 1, 0, ParamFlags::READWRITE));
            let ((), records) = oxitype_log::capture(|| {
                assert_eq!(class.install_property(ParamSpec::int("dup", 0, 1, 0, ParamFlags::READWRITE)), 0);
                assert_eq!(class.install_property(ParamSpec::int("bad name", 0, 1, 0, ParamFlags::READWRITE)), 0);
                assert_eq!(class.install_property(ParamSpec::int("none", 0, 1, 0, ParamFlags::empty())), 0);
            });
            assert_eq!(records.len(), 3);
        }
        let ty = Type::register_static(
            Type::OBJECT,
            &unique("PropertyTestDup"),
            TypeInfo::new().class_init(init),
            TypeFlags::empty(),
        )
        .unwrap();
        assert_eq!(ty.class_ref().unwrap().list_properties().len(), 1);
    }

    #[test]
    fn test_set_get_and_validation() {
        let obj = Object::new(store_type()).unwrap();
        assert_eq!(obj.get::<i32>("width"), Some(10));
        obj.set("width", 42i32);
        assert_eq!(obj.get::<i32>("width"), Some(42));

        // Transformable source type.
        obj.set("width", 7.9f64);
        assert_eq!(obj.get::<i32>("width"), Some(7));

        let ((), records) = oxitype_log::capture(|| obj.set("width", 500i32));
        assert_eq!(obj.get::<i32>("width"), Some(100));
        assert_eq!(records.len(), 1);

        let ((), records) = oxitype_log::capture(|| obj.set("ratio", 3.0f64));
        assert_eq!(obj.get::<f64>("ratio"), Some(1.0));
        assert!(records.is_empty());
    }

    #[test]
    fn test_construct_properties() {
        let ty = store_type();
        let obj = Object::builder(ty)
            .property("serial", 9u32)
            .property("width", 20i32)
            .build()
            .unwrap();
        assert_eq!(obj.get::<u32>("serial"), Some(9));
        assert_eq!(obj.get::<i32>("width"), Some(20));
        assert_eq!(obj.get::<Option<String>>("title"), Some(None));

        let ((), records) = oxitype_log::capture(|| obj.set("serial", 1u32));
        assert_eq!(records.len(), 1);
        assert_eq!(obj.get::<u32>("serial"), Some(9));
    }

    #[test]
    fn test_unknown_and_mistyped() {
        let obj = Object::new(store_type()).unwrap();
        let ((), records) = oxitype_log::capture(|| obj.set("missing", 1i32));
        assert_eq!(records.len(), 1);
        let ((), records) = oxitype_log::capture(|| obj.set("width", Object::new(Type::OBJECT).unwrap()));
        assert_eq!(records.len(), 1);
        assert_eq!(obj.get::<i32>("width"), Some(10));
    }

    #[test]
    fn test_notify_and_freeze() {
        let obj = Object::new(store_type()).unwrap();
        let log = record_notifies(&obj);

        obj.set("width", 1i32);
        assert_eq!(*log.lock(), ["width"]);

        obj.freeze_notify();
        obj.freeze_notify();
        obj.set("ratio", 0.1f64);
        obj.set("width", 2i32);
        obj.set("ratio", 0.2f64);
        obj.thaw_notify();
        assert_eq!(log.lock().len(), 1);
        obj.thaw_notify();
        assert_eq!(*log.lock(), ["width", "ratio", "width"]);

        let ((), records) = oxitype_log::capture(|| obj.thaw_notify());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_explicit_notify() {
        let obj = Object::new(store_type()).unwrap();
        let log = record_notifies(&obj);
        obj.set("quiet", true);
        assert!(log.lock().is_empty());
        obj.notify("quiet");
        assert_eq!(*log.lock(), ["quiet"]);
    }

    fn derived_init(class: &mut TypeClass) {
        class.override_property("width");
    }

    #[test]
    fn test_override_property() {
        let base = store_type();
        let derived = Type::register_static(
            base,
            &unique("PropertyTestDerived"),
            TypeInfo::new().class_init(derived_init),
            TypeFlags::empty(),
        )
        .unwrap();
        let class = derived.class_ref().unwrap();
        let pspec = class.find_property("width").unwrap();
        assert_eq!(pspec.owner_type(), derived);
        assert_eq!(pspec.redirect_target().unwrap().owner_type(), base);

        // The derived class inherits the base hooks through its own copy.
        let obj = Object::new(derived).unwrap();
        assert_eq!(obj.get::<i32>("width"), Some(10));
        obj.set("width", 60i32);
        assert_eq!(obj.get::<i32>("width"), Some(60));
    }
}
