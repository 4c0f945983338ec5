//! Reference-counted instances of object types.
//!
//! An [`Object`] is a handle to a heap instance of a type derived from
//! [`Type::OBJECT`]. Cloning a handle takes a reference, dropping it
//! releases one. The instance carries:
//!
//! - its class, kept alive for as long as the instance lives
//! - one instance struct per type in the chain that declared one
//! - a header word whose upper bit locks the per-instance data and whose
//!   other bits hold lifecycle flags
//! - per-instance data: keyed qdata, weak locations, weak notifies,
//!   toggle references, the notify freeze queue and watched closures
//! - its signal handler table
//!
//! # Lifecycle
//!
//! When the last reference is released the dispose hooks run leaf to root.
//! A dispose hook may take a new reference, in which case the object lives
//! on and dispose runs again at the next last release. Otherwise every weak
//! location is cleared under a global lock (so a concurrent
//! [`WeakRef::upgrade`] either wins a reference before the count drops or
//! sees nothing), weak notifies run, the finalize hooks run leaf to root,
//! qdata is destroyed and the memory is freed.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync`. Reference counting is atomic and every piece
//! of per-instance data sits behind the header lock, which is never held
//! while user code runs.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::runtime::class::{ClassRef, TypeClass, TypeInterface};
use crate::runtime::closure::{ClassHandlerFn, Closure};
use crate::runtime::param::{ParamFlags, ParamSpec};
use crate::runtime::quark::Quark;
use crate::runtime::signal::{self, HandlerTable};
use crate::runtime::sync::BitLock;
use crate::runtime::types::{Type, TypeInfo, node};
use crate::runtime::value::{self, ToValue, Value};
use crate::runtime::{debug, property};

const FLOATING: u32 = 1 << 0;
const IN_CONSTRUCTION: u32 = 1 << 1;
const DISPOSING: u32 = 1 << 2;
const DISPOSED: u32 = 1 << 3;
const HAS_TOGGLE_REF: u32 = 1 << 4;
const FINALIZING: u32 = 1 << 5;
const TRACKED: u32 = 1 << 6;

/// Held for writing while weak locations are cleared, for reading while a
/// weak location is upgraded.
static WEAK_LOCK: RwLock<()> = RwLock::new(());

fn next_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Constructor of an object class: builds an instance from resolved
/// construct properties.
pub type Constructor = fn(Type, &[(ParamSpec, Value)]) -> Option<Object>;

/// Property setter of an object class, called with the property id.
pub type SetPropertyFn = fn(&Object, u32, &Value, &ParamSpec);

/// Property getter of an object class; the value is initialized to the
/// property's value type.
pub type GetPropertyFn = fn(&Object, u32, &mut Value, &ParamSpec);

/// Class struct shared by every object type.
///
/// Subclasses override entries from their `class_init`; the rest is
/// inherited from the parent's copy.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Object, ObjectClass, Type, TypeClass, TypeFlags, TypeInfo};
///
/// fn class_init(class: &mut TypeClass) {
///     let object_class = class.struct_mut::<ObjectClass>().unwrap();
///     object_class.deferred_notify = false;
/// }
///
/// let ty = Type::register_static(
///     Type::OBJECT,
///     "DocWidget",
///     TypeInfo::new().class_init(class_init),
///     TypeFlags::empty(),
/// )
/// .unwrap();
/// let obj = Object::new(ty).unwrap();
/// assert!(obj.is_a(Type::OBJECT));
/// ```
#[derive(Clone, Copy)]
pub struct ObjectClass {
    pub constructor: Constructor,
    pub set_property: Option<SetPropertyFn>,
    pub get_property: Option<GetPropertyFn>,
    /// Delivers a batch of changed properties; the default emits "notify"
    /// once per property.
    pub dispatch_properties_changed: fn(&Object, &[ParamSpec]),
    /// Class handler of the "notify" signal.
    pub notify: Option<ClassHandlerFn>,
    /// Deliver notifications through the installed main context.
    pub deferred_notify: bool,
}

impl Default for ObjectClass {
    fn default() -> Self {
        ObjectClass {
            constructor: Object::construct_default,
            set_property: None,
            get_property: None,
            dispatch_properties_changed: property::dispatch_properties_changed,
            notify: None,
            deferred_notify: false,
        }
    }
}

impl fmt::Debug for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectClass")
            .field("set_property", &self.set_property.is_some())
            .field("get_property", &self.get_property.is_some())
            .field("notify", &self.notify.is_some())
            .field("deferred_notify", &self.deferred_notify)
            .finish_non_exhaustive()
    }
}

/// Registration info of the `Object` fundamental.
pub(crate) fn object_type_info() -> TypeInfo {
    TypeInfo {
        value_table: value::fundamental_value_table(Type::OBJECT),
        ..TypeInfo::new().class_struct::<ObjectClass>()
    }
}

type DestroyNotify = Box<dyn FnOnce(Arc<dyn Any + Send + Sync>) + Send>;
type WeakNotify = Box<dyn FnOnce(ObjectPtr) + Send>;
type ToggleNotify = Arc<dyn Fn(&Object, bool) + Send + Sync>;

struct QData {
    key: Quark,
    value: Arc<dyn Any + Send + Sync>,
    destroy: Option<DestroyNotify>,
}

impl QData {
    fn destroy(self) {
        if let Some(destroy) = self.destroy {
            destroy(self.value);
        }
    }
}

pub(crate) struct WeakSlot {
    ptr: AtomicPtr<ObjectInner>,
}

/// Per-instance data behind the header lock.
#[derive(Default)]
pub(crate) struct InstanceData {
    qdata: Vec<QData>,
    weak_locations: Vec<Arc<WeakSlot>>,
    weak_notifies: Vec<(u64, WeakNotify)>,
    toggle_refs: Vec<(u64, ToggleNotify)>,
    pub(crate) freeze_count: u32,
    /// Properties changed while frozen, first change first.
    pub(crate) pending_notify: Vec<ParamSpec>,
    watched: Vec<Closure>,
}

pub(crate) struct ObjectInner {
    class: ClassRef,
    ref_count: AtomicU32,
    header: BitLock<InstanceData>,
    /// Instance structs, root type first.
    instance: Vec<Box<dyn Any + Send + Sync>>,
    handlers: Mutex<HandlerTable>,
}

impl ObjectInner {
    fn instance<T: Any>(&self) -> Option<&T> {
        self.instance.iter().find_map(|s| (**s).downcast_ref::<T>())
    }

    fn qdata<T: Any + Send + Sync>(&self, key: Quark) -> Option<Arc<T>> {
        let value = {
            let data = self.header.lock();
            data.qdata
                .iter()
                .find(|q| q.key == key)
                .map(|q| Arc::clone(&q.value))?
        };
        value.downcast::<T>().ok()
    }
}

/// A reference to an object instance.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Object, Type};
///
/// let obj = Object::new(Type::OBJECT).unwrap();
/// let other = obj.clone();
/// assert_eq!(obj.ref_count(), 2);
/// assert_eq!(obj, other);
/// drop(other);
/// assert_eq!(obj.ref_count(), 1);
/// ```
pub struct Object {
    /// Valid while this handle exists.
    ptr: NonNull<ObjectInner>,
}

// SAFETY: every handle owns a reference; all shared state of ObjectInner is
// atomic or behind a lock.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    #[inline]
    fn inner(&self) -> &ObjectInner {
        // SAFETY: the handle holds a reference, so the instance is alive.
        unsafe { self.ptr.as_ref() }
    }

    /// Creates an instance with every property at its default.
    pub fn new(ty: Type) -> Option<Object> {
        Self::with_properties(ty, &[])
    }

    /// Starts a builder for an instance of `ty`.
    pub fn builder(ty: Type) -> ObjectBuilder {
        ObjectBuilder::new(ty)
    }

    /// Creates an instance, setting the named properties.
    ///
    /// Construct and construct-only properties are handed to the class
    /// constructor, missing ones at their defaults in declaration order.
    /// The `constructed` hooks then run root to leaf, the remaining
    /// properties are set, and the notifications queued during construction
    /// are delivered.
    ///
    /// Returns `None` (with a critical report) if the type cannot be
    /// instantiated or a property is unknown or not writable.
    pub fn with_properties(ty: Type, properties: &[(&str, Value)]) -> Option<Object> {
        if !ty.is_a(Type::OBJECT) {
            critical!("cannot create an instance of non-object type '{}'", ty.name());
            return None;
        }
        if ty.is_abstract() {
            critical!("cannot create an instance of abstract type '{}'", ty.name());
            return None;
        }
        if ty.is_deprecated() {
            oxitype_log::warn!("type '{}' is deprecated", ty.name());
        }
        let class = ty.class_ref()?;

        let mut construct: Vec<(ParamSpec, Value)> = Vec::new();
        let mut later: Vec<(ParamSpec, Value)> = Vec::new();
        for (name, value) in properties {
            let Some(pspec) = property::find_property(&class, name) else {
                critical!("type '{}' has no property named '{}'", ty.name(), name);
                return None;
            };
            if !pspec.is_writable() {
                critical!("property '{}' of type '{}' is not writable", name, ty.name());
                return None;
            }
            if pspec.is_construct() {
                construct.push((pspec, value.clone()));
            } else {
                later.push((pspec, value.clone()));
            }
        }

        let params: Vec<(ParamSpec, Value)> = class
            .construct_properties
            .iter()
            .map(|pspec| {
                let value = construct
                    .iter()
                    .rev()
                    .find(|(p, _)| p == pspec)
                    .map_or_else(|| pspec.default_value(), |(_, v)| v.clone());
                (pspec.clone(), value)
            })
            .collect();

        let constructor = class.struct_ref::<ObjectClass>()?.constructor;
        let obj = constructor(ty, &params)?;

        let fresh = obj.inner().header.has_flag(IN_CONSTRUCTION);
        if fresh {
            let chain: Vec<&TypeClass> = obj.class().chain().collect();
            for c in chain.into_iter().rev() {
                if let Some(constructed) = c.hooks.constructed {
                    constructed(&obj);
                }
            }
            obj.inner().header.clear_flag(IN_CONSTRUCTION);
        }

        for (pspec, value) in &later {
            property::set_by_pspec(&obj, pspec, value);
        }
        if fresh {
            obj.thaw_notify();
        }
        Some(obj)
    }

    /// The default class constructor.
    ///
    /// Allocates the instance, runs the instance initializers root to leaf,
    /// then applies construct-only values followed by construct values.
    /// Custom constructors call this to create the instance.
    pub fn construct_default(ty: Type, params: &[(ParamSpec, Value)]) -> Option<Object> {
        let class = ty.class_ref()?;
        let obj = Self::allocate(class);
        obj.inner().header.set_flag(IN_CONSTRUCTION);
        obj.freeze_notify();

        let (construct_only, construct): (Vec<_>, Vec<_>) = params
            .iter()
            .partition(|(p, _)| p.flags().contains(ParamFlags::CONSTRUCT_ONLY));
        for (pspec, value) in construct_only.into_iter().chain(construct) {
            property::set_by_pspec(&obj, pspec, value);
        }
        Some(obj)
    }

    fn allocate(class: ClassRef) -> Object {
        let ty = class.type_();
        let chain: Vec<Type> = ty
            .ancestors()
            .iter()
            .rev()
            .copied()
            .chain(std::iter::once(ty))
            .collect();

        let instance = chain
            .iter()
            .filter_map(|&t| node(t)?.info.instance_struct)
            .map(|make| make())
            .collect();

        let flags = if ty.is_a(Type::INITIALLY_UNOWNED) {
            FLOATING
        } else {
            0
        };
        let inner = Box::new(ObjectInner {
            class,
            ref_count: AtomicU32::new(1),
            header: BitLock::new(flags, InstanceData::default()),
            instance,
            handlers: Mutex::new(HandlerTable::default()),
        });
        let obj = Object {
            ptr: NonNull::from(Box::leak(inner)),
        };

        if crate::config::debug_objects() {
            obj.inner().header.set_flag(TRACKED);
            debug::track(obj.as_ptr(), ty);
        }

        for t in chain {
            if let Some(init) = node(t).and_then(|n| n.info.instance_init) {
                init(&obj);
            }
        }
        obj
    }

    /// Returns the instance's type.
    #[inline]
    pub fn type_(&self) -> Type {
        self.inner().class.type_()
    }

    /// Returns the instance's class.
    #[inline]
    pub fn class(&self) -> &TypeClass {
        &self.inner().class
    }

    #[inline]
    pub fn is_a(&self, ty: Type) -> bool {
        self.type_().is_a(ty)
    }

    /// Returns `self` if the instance conforms to `ty`, otherwise reports a
    /// bad cast.
    pub fn check_cast(&self, ty: Type) -> Option<&Object> {
        if self.is_a(ty) {
            Some(self)
        } else {
            critical!("invalid cast from '{}' to '{}'", self.type_().name(), ty.name());
            None
        }
    }

    /// Returns the instance's vtable for an interface it implements.
    pub fn interface(&self, iface: Type) -> Option<&TypeInterface> {
        self.class().interface(iface)
    }

    /// Returns the instance struct of type `T` declared by some type in the
    /// chain.
    pub fn instance<T: Any>(&self) -> Option<&T> {
        self.inner().instance::<T>()
    }

    pub fn ref_count(&self) -> u32 {
        self.inner().ref_count.load(Ordering::Acquire)
    }

    /// Returns the instance address, stable for the instance's lifetime.
    #[inline]
    pub fn as_ptr(&self) -> usize {
        self.ptr.as_ptr().addr()
    }

    pub(crate) fn handlers(&self) -> &Mutex<HandlerTable> {
        &self.inner().handlers
    }

    /// Runs `f` on the per-instance data. `f` must not call user code.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut InstanceData) -> R) -> R {
        f(&mut self.inner().header.lock())
    }

    pub(crate) fn is_in_construction(&self) -> bool {
        self.inner().header.has_flag(IN_CONSTRUCTION)
    }

    pub(crate) fn is_finalizing(&self) -> bool {
        self.inner().header.has_flag(FINALIZING)
    }

    /// Returns true once the dispose hooks have run at least once.
    pub fn is_disposed(&self) -> bool {
        self.inner().header.has_flag(DISPOSED)
    }

    // Reference counting

    /// Raw increment; returns the previous count.
    fn acquire(&self) -> u32 {
        let old = self.inner().ref_count.fetch_add(1, Ordering::AcqRel);
        if old == 0 {
            critical!("object of type '{}' referenced after finalization", self.type_().name());
        }
        old
    }

    fn after_acquire(&self, old: u32) {
        if old == 1 && self.inner().header.has_flag(HAS_TOGGLE_REF) {
            self.toggle_notify(false);
        }
    }

    /// Decrements a count above one. Returns false if this handle holds the
    /// last reference.
    fn release(&self) -> bool {
        let inner = self.inner();
        let mut old = inner.ref_count.load(Ordering::Acquire);
        loop {
            if old <= 1 {
                return false;
            }
            match inner.ref_count.compare_exchange_weak(
                old,
                old - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if old == 2 && inner.header.has_flag(HAS_TOGGLE_REF) {
                        self.toggle_notify(true);
                    }
                    return true;
                }
                Err(actual) => old = actual,
            }
        }
    }

    /// Runs the dispose hooks leaf to root, then the base dispose which
    /// disconnects every handler and invalidates watched closures.
    fn dispose(&self) {
        let header = &self.inner().header;
        header.set_flag(DISPOSING);
        for class in self.class().chain() {
            if let Some(dispose) = class.hooks.dispose {
                dispose(self);
            }
        }

        let watched = std::mem::take(&mut header.lock().watched);
        for closure in watched {
            closure.invalidate();
        }
        signal::destroy_handlers(self);

        header.clear_flag(DISPOSING);
        header.set_flag(DISPOSED);
    }

    /// Runs the dispose hooks while keeping the instance alive.
    pub fn run_dispose(&self) {
        let _keep = self.clone();
        self.dispose();
    }

    /// Clears the weak locations and drops the count to zero unless a
    /// reference was taken meanwhile. Returns true if the count reached zero.
    fn clear_weak_locations(&self) -> bool {
        let inner = self.inner();
        let _weak = WEAK_LOCK.write();
        if inner.ref_count.load(Ordering::Acquire) != 1 {
            return false;
        }
        let locations = {
            let mut data = inner.header.lock();
            inner.header.set_flag(FINALIZING);
            std::mem::take(&mut data.weak_locations)
        };
        for slot in locations {
            slot.ptr.store(ptr::null_mut(), Ordering::Release);
        }
        inner.ref_count.store(0, Ordering::Release);
        true
    }

    fn finalize(&mut self) {
        let addr = self.as_ptr();
        let ty = self.type_();
        let inner = self.inner();

        let notifies = std::mem::take(&mut inner.header.lock().weak_notifies);
        for (_, notify) in notifies {
            notify(ObjectPtr { addr, ty });
        }

        let view = Finalizing { inner, addr };
        for class in inner.class.chain() {
            if let Some(finalize) = class.hooks.finalize {
                finalize(&view);
            }
        }

        loop {
            let entries = std::mem::take(&mut inner.header.lock().qdata);
            if entries.is_empty() {
                break;
            }
            for entry in entries {
                entry.destroy();
            }
        }

        if inner.header.has_flag(TRACKED) {
            debug::untrack(addr);
        }
        oxitype_log::trace!("finalized instance of '{}' at {:#x}", ty.name(), addr);

        // SAFETY: the count is zero and every weak location was cleared, so
        // this is the only remaining access. The pointer came from Box::leak.
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }

    // Weak references

    /// Returns a weak reference to this instance.
    pub fn downgrade(&self) -> WeakRef {
        let weak = WeakRef::new();
        weak.set(Some(self));
        weak
    }

    /// Registers a notify run when the instance is finalized. The notify
    /// receives an inert identity of the dead instance.
    pub fn weak_ref(&self, notify: impl FnOnce(ObjectPtr) + Send + 'static) -> WeakNotifyId {
        if self.is_finalizing() {
            critical!("cannot add a weak notify to a finalizing instance");
            return WeakNotifyId(0);
        }
        let id = next_id();
        self.inner()
            .header
            .lock()
            .weak_notifies
            .push((id, Box::new(notify)));
        WeakNotifyId(id)
    }

    /// Removes a weak notify. Returns false if it was not registered.
    pub fn weak_unref(&self, id: WeakNotifyId) -> bool {
        let removed = {
            let mut data = self.inner().header.lock();
            data.weak_notifies
                .iter()
                .position(|(i, _)| *i == id.0)
                .map(|pos| data.weak_notifies.remove(pos))
        };
        if removed.is_none() {
            critical!("no weak notify with id {} on this instance", id.0);
        }
        removed.is_some()
    }

    // Toggle references

    /// Adds a toggle reference. While it is the only one, `notify` is told
    /// whenever the count moves between one and two: `true` when the
    /// remaining reference is the last one, `false` when another appeared.
    ///
    /// The toggle reference itself holds no reference.
    pub fn add_toggle_ref(
        &self,
        notify: impl Fn(&Object, bool) + Send + Sync + 'static,
    ) -> ToggleRefId {
        let id = next_id();
        let header = &self.inner().header;
        let mut data = header.lock();
        data.toggle_refs.push((id, Arc::new(notify)));
        if data.toggle_refs.len() == 1 {
            header.set_flag(HAS_TOGGLE_REF);
        } else {
            header.clear_flag(HAS_TOGGLE_REF);
        }
        ToggleRefId(id)
    }

    /// Removes a toggle reference. Returns false if it was not registered.
    pub fn remove_toggle_ref(&self, id: ToggleRefId) -> bool {
        let header = &self.inner().header;
        let removed = {
            let mut data = header.lock();
            let removed = data
                .toggle_refs
                .iter()
                .position(|(i, _)| *i == id.0)
                .map(|pos| data.toggle_refs.remove(pos));
            if data.toggle_refs.len() == 1 {
                header.set_flag(HAS_TOGGLE_REF);
            } else {
                header.clear_flag(HAS_TOGGLE_REF);
            }
            removed
        };
        if removed.is_none() {
            critical!("no toggle reference with id {} on this instance", id.0);
        }
        removed.is_some()
    }

    fn toggle_notify(&self, is_last_ref: bool) {
        let notify = {
            let data = self.inner().header.lock();
            match data.toggle_refs.as_slice() {
                [(_, notify)] => Some(Arc::clone(notify)),
                _ => None,
            }
        };
        if let Some(notify) = notify {
            notify(self, is_last_ref);
        }
    }

    // Floating references

    /// Returns true while the initial reference of an initially-unowned
    /// instance has not been sunk.
    pub fn is_floating(&self) -> bool {
        self.inner().header.has_flag(FLOATING)
    }

    /// Clears the floating flag and returns a new reference.
    ///
    /// The caller that sinks becomes the owner; the creator's handle should
    /// then be dropped.
    pub fn ref_sink(&self) -> Object {
        self.inner().header.clear_flag(FLOATING);
        self.clone()
    }

    /// Marks the instance floating again.
    pub fn force_floating(&self) {
        self.inner().header.set_flag(FLOATING);
    }

    // Keyed data

    /// Attaches `value` under `key`, replacing (and destroying) any previous
    /// entry.
    pub fn set_qdata<T: Any + Send + Sync>(&self, key: Quark, value: T) {
        self.insert_qdata(key, Arc::new(value), None);
    }

    /// Like [`set_qdata`](Self::set_qdata), running `destroy` when the entry
    /// is replaced, removed or the instance is finalized.
    pub fn set_qdata_full<T: Any + Send + Sync>(
        &self,
        key: Quark,
        value: T,
        destroy: impl FnOnce(&T) + Send + 'static,
    ) {
        let destroy: DestroyNotify = Box::new(move |v: Arc<dyn Any + Send + Sync>| {
            if let Some(v) = (*v).downcast_ref::<T>() {
                destroy(v);
            }
        });
        self.insert_qdata(key, Arc::new(value), Some(destroy));
    }

    fn insert_qdata(
        &self,
        key: Quark,
        value: Arc<dyn Any + Send + Sync>,
        destroy: Option<DestroyNotify>,
    ) {
        if key.is_none() {
            critical!("qdata key must not be empty");
            return;
        }
        let old = {
            let mut data = self.inner().header.lock();
            let entry = QData {
                key,
                value,
                destroy,
            };
            match data.qdata.iter_mut().find(|q| q.key == key) {
                Some(slot) => Some(std::mem::replace(slot, entry)),
                None => {
                    data.qdata.push(entry);
                    None
                }
            }
        };
        if let Some(old) = old {
            old.destroy();
        }
    }

    /// Returns the value stored under `key` if it has type `T`.
    pub fn qdata<T: Any + Send + Sync>(&self, key: Quark) -> Option<Arc<T>> {
        self.inner().qdata::<T>(key)
    }

    /// Removes the entry under `key` without running its destroy notify.
    pub fn steal_qdata<T: Any + Send + Sync>(&self, key: Quark) -> Option<Arc<T>> {
        let entry = self.take_qdata(key)?;
        entry.value.downcast::<T>().ok()
    }

    /// Removes the entry under `key`, running its destroy notify.
    pub fn remove_qdata(&self, key: Quark) -> bool {
        match self.take_qdata(key) {
            Some(entry) => {
                entry.destroy();
                true
            }
            None => false,
        }
    }

    fn take_qdata(&self, key: Quark) -> Option<QData> {
        let mut data = self.inner().header.lock();
        let pos = data.qdata.iter().position(|q| q.key == key)?;
        Some(data.qdata.swap_remove(pos))
    }

    /// Atomically replaces the entry under `key` if it still holds `old`
    /// (compared by identity, `None` meaning absent).
    ///
    /// On success the previous entry is dropped without running its destroy
    /// notify and `new` (if any) is stored.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::{Object, Quark, Type};
    ///
    /// let obj = Object::new(Type::OBJECT).unwrap();
    /// let key = Quark::from_str("counter");
    /// assert!(obj.replace_qdata::<u32>(key, None, Some(1)));
    ///
    /// let current = obj.qdata::<u32>(key).unwrap();
    /// assert!(obj.replace_qdata(key, Some(&current), Some(*current + 1)));
    /// assert!(!obj.replace_qdata(key, Some(&current), Some(9)));
    /// assert_eq!(obj.qdata::<u32>(key).as_deref(), Some(&2));
    /// ```
    pub fn replace_qdata<T: Any + Send + Sync>(
        &self,
        key: Quark,
        old: Option<&Arc<T>>,
        new: Option<T>,
    ) -> bool {
        let replaced = {
            let mut data = self.inner().header.lock();
            let pos = data.qdata.iter().position(|q| q.key == key);
            let current = pos.map(|p| Arc::as_ptr(&data.qdata[p].value).cast::<()>());
            if current != old.map(|o| Arc::as_ptr(o).cast::<()>()) {
                return false;
            }
            let removed = pos.map(|p| data.qdata.swap_remove(p));
            if let Some(value) = new {
                data.qdata.push(QData {
                    key,
                    value: Arc::new(value),
                    destroy: None,
                });
            }
            removed
        };
        drop(replaced);
        true
    }

    /// [`set_qdata`](Self::set_qdata) with a string key.
    pub fn set_data<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.set_qdata(Quark::from_str(key), value);
    }

    /// [`qdata`](Self::qdata) with a string key.
    pub fn data<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.qdata(Quark::try_from_str(key)?)
    }

    /// [`steal_qdata`](Self::steal_qdata) with a string key.
    pub fn steal_data<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.steal_qdata(Quark::try_from_str(key)?)
    }

    // Closures

    /// Ties a closure to this instance: it is invalidated when the instance
    /// is disposed.
    pub fn watch_closure(&self, closure: &Closure) {
        if self.is_finalizing() {
            critical!("cannot watch a closure on a finalizing instance");
            return;
        }
        self.inner().header.lock().watched.push(closure.clone());

        let weak = self.downgrade();
        let addr = closure.as_ptr();
        closure.add_invalidate_notifier(move || {
            weak.with_live(|inner| {
                inner.header.lock().watched.retain(|c| c.as_ptr() != addr);
            });
        });
    }
}

impl Clone for Object {
    fn clone(&self) -> Self {
        let old = self.acquire();
        self.after_acquire(old);
        Object { ptr: self.ptr }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        loop {
            if self.release() {
                return;
            }
            self.dispose();
            if self.clear_weak_locations() {
                break;
            }
            // Resurrected by a dispose hook; release again.
        }
        self.finalize();
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{:#x} (refs: {})",
            self.type_().name(),
            self.as_ptr(),
            self.ref_count()
        )
    }
}

/// Identifies a weak notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeakNotifyId(u64);

/// Identifies a toggle reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToggleRefId(u64);

/// Inert identity of an instance being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectPtr {
    addr: usize,
    ty: Type,
}

impl ObjectPtr {
    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn type_(&self) -> Type {
        self.ty
    }

    /// Returns true if this identifies `obj`.
    pub fn is(&self, obj: &Object) -> bool {
        self.addr == obj.as_ptr()
    }
}

/// View of an instance passed to finalize hooks.
///
/// The instance has no references left, so no new handle can be made from
/// it; only its structs and keyed data remain reachable.
pub struct Finalizing<'a> {
    inner: &'a ObjectInner,
    addr: usize,
}

impl Finalizing<'_> {
    pub fn type_(&self) -> Type {
        self.inner.class.type_()
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn instance<T: Any>(&self) -> Option<&T> {
        self.inner.instance::<T>()
    }

    pub fn qdata<T: Any + Send + Sync>(&self, key: Quark) -> Option<Arc<T>> {
        self.inner.qdata::<T>(key)
    }
}

/// A location that is cleared when its object is finalized.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Object, Type};
///
/// let obj = Object::new(Type::OBJECT).unwrap();
/// let weak = obj.downgrade();
/// assert_eq!(weak.upgrade().as_ref(), Some(&obj));
/// drop(obj);
/// assert!(weak.upgrade().is_none());
/// ```
pub struct WeakRef {
    slot: Arc<WeakSlot>,
}

impl WeakRef {
    /// Creates an empty location.
    pub fn new() -> Self {
        WeakRef {
            slot: Arc::new(WeakSlot {
                ptr: AtomicPtr::new(ptr::null_mut()),
            }),
        }
    }

    /// Returns a strong reference if the object is still alive.
    pub fn upgrade(&self) -> Option<Object> {
        let (obj, old) = {
            let _weak = WEAK_LOCK.read();
            let ptr = NonNull::new(self.slot.ptr.load(Ordering::Acquire))?;
            let borrowed = ManuallyDrop::new(Object { ptr });
            let old = borrowed.acquire();
            (Object { ptr }, old)
        };
        obj.after_acquire(old);
        Some(obj)
    }

    /// Points the location at `obj`, or clears it.
    pub fn set(&self, obj: Option<&Object>) {
        let _weak = WEAK_LOCK.write();
        self.set_locked(obj.map(|o| o.ptr));
    }

    /// Caller holds `WEAK_LOCK` for writing, which keeps any object the
    /// location points at from being freed.
    fn set_locked(&self, target: Option<NonNull<ObjectInner>>) {
        if let Some(old) = NonNull::new(self.slot.ptr.load(Ordering::Acquire)) {
            // SAFETY: a non-null location points at an object whose weak
            // locations have not been cleared yet.
            let old = unsafe { old.as_ref() };
            old.header
                .lock()
                .weak_locations
                .retain(|s| !Arc::ptr_eq(s, &self.slot));
        }

        let mut stored = ptr::null_mut();
        if let Some(target) = target {
            // SAFETY: the caller passes a live object.
            let inner = unsafe { target.as_ref() };
            let mut data = inner.header.lock();
            if inner.header.has_flag(FINALIZING) {
                critical!("cannot point a weak reference at a finalizing instance");
            } else {
                data.weak_locations.push(Arc::clone(&self.slot));
                stored = target.as_ptr();
            }
        }
        self.slot.ptr.store(stored, Ordering::Release);
    }

    /// Runs `f` on the object without taking a reference, if it is alive.
    pub(crate) fn with_live<R>(&self, f: impl FnOnce(&ObjectInner) -> R) -> Option<R> {
        let _weak = WEAK_LOCK.read();
        let ptr = NonNull::new(self.slot.ptr.load(Ordering::Acquire))?;
        // SAFETY: under the read lock the location would have been cleared
        // before the object was freed.
        Some(f(unsafe { ptr.as_ref() }))
    }
}

impl Default for WeakRef {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for WeakRef {
    fn clone(&self) -> Self {
        let weak = WeakRef::new();
        let _lock = WEAK_LOCK.write();
        weak.set_locked(NonNull::new(self.slot.ptr.load(Ordering::Acquire)));
        weak
    }
}

impl Drop for WeakRef {
    fn drop(&mut self) {
        if !self.slot.ptr.load(Ordering::Acquire).is_null() {
            let _weak = WEAK_LOCK.write();
            self.set_locked(None);
        }
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRef")
            .field(&self.slot.ptr.load(Ordering::Acquire))
            .finish()
    }
}

/// Builds an instance from named property values.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Object, Type};
///
/// let obj = Object::builder(Type::OBJECT).build().unwrap();
/// assert_eq!(obj.type_(), Type::OBJECT);
/// ```
#[derive(Debug)]
pub struct ObjectBuilder {
    ty: Type,
    properties: Vec<(String, Value)>,
}

impl ObjectBuilder {
    pub fn new(ty: Type) -> Self {
        ObjectBuilder {
            ty,
            properties: Vec::new(),
        }
    }

    /// Sets a property; later values for the same name win.
    #[must_use]
    pub fn property(mut self, name: &str, value: impl ToValue) -> Self {
        self.properties.push((name.to_string(), value.to_value()));
        self
    }

    /// Sets every property of a name/value mapping.
    #[must_use]
    pub fn properties_from<I, K, V>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToValue,
    {
        self.properties.extend(
            properties
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_string(), v.to_value())),
        );
        self
    }

    pub fn build(self) -> Option<Object> {
        let properties: Vec<(&str, Value)> = self
            .properties
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();
        Object::with_properties(self.ty, &properties)
    }
}
