//! Class structures and their reference counting.
//!
//! A [`TypeClass`] is shared by all instances of a type. It holds the type's
//! class structs (the parent's structs cloned, plus the type's own), the
//! properties installed by the type, per-type lifecycle hooks, and one
//! [`TypeInterface`] vtable per implemented interface.
//!
//! # Lifecycle
//!
//! The first [`Type::class_ref`] initializes the class: the parent class is
//! referenced (and initialized) first, the parent's structs are cloned, the
//! type's `class_init` runs, then every interface vtable is built. Only then
//! is the class published. The registry holds one reference to every class
//! for the rest of the process, except for [`TypeFlags::DYNAMIC`] types:
//! dropping their last [`ClassRef`] runs the interface finalizers and
//! `class_finalize`, and releases the parent class.
//!
//! # Thread Safety
//!
//! Initialization is serialized by a per-type mutex and runs without the
//! registry lock. Referencing an initialized class is a single CAS on the
//! class reference count.

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Deref;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::runtime::object::{Finalizing, Object};
use crate::runtime::param::ParamSpec;
use crate::runtime::types::{Type, TypeFlags, TypeNode, node};

/// A piece of a class or interface vtable.
///
/// Any `Clone + Send + Sync` type is a class struct. Derived classes start
/// with a clone of every struct of their parent class.
pub trait ClassStruct: Any + Send + Sync {
    /// Clones the struct into a new box.
    fn clone_struct(&self) -> Box<dyn ClassStruct>;
    /// Upcasts for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Upcasts for mutable downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Clone + Send + Sync> ClassStruct for T {
    fn clone_struct(&self) -> Box<dyn ClassStruct> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Ordered set of class structs, at most one per Rust type.
#[derive(Default)]
pub(crate) struct StructSet(Vec<Box<dyn ClassStruct>>);

impl StructSet {
    fn get<T: Any>(&self) -> Option<&T> {
        self.0.iter().find_map(|s| (**s).as_any().downcast_ref::<T>())
    }

    fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0
            .iter_mut()
            .find_map(|s| (**s).as_any_mut().downcast_mut::<T>())
    }

    /// Adds `s` unless a struct of the same type is already present.
    fn insert(&mut self, s: Box<dyn ClassStruct>) {
        let id = Any::type_id((*s).as_any());
        if !self.0.iter().any(|e| Any::type_id((**e).as_any()) == id) {
            self.0.push(s);
        }
    }

    fn contains(&self, id: TypeId) -> bool {
        self.0.iter().any(|e| Any::type_id((**e).as_any()) == id)
    }
}

impl Clone for StructSet {
    fn clone(&self) -> Self {
        StructSet(self.0.iter().map(|s| (**s).clone_struct()).collect())
    }
}

/// Per-type lifecycle hooks. Not inherited: the runtime calls the hook of
/// every type in the chain.
#[derive(Default, Clone, Copy)]
pub(crate) struct ClassHooks {
    pub(crate) constructed: Option<fn(&Object)>,
    pub(crate) dispose: Option<fn(&Object)>,
    pub(crate) finalize: Option<fn(&Finalizing<'_>)>,
}

/// The shared class of a type.
pub struct TypeClass {
    node: &'static TypeNode,
    parent: Option<ClassRef>,
    structs: StructSet,
    /// Interface vtables, filled after `class_init`.
    interfaces: Vec<TypeInterface>,
    /// Properties installed by this type.
    pub(crate) properties: Vec<ParamSpec>,
    /// Construct and construct-only properties of the whole chain, root first.
    pub(crate) construct_properties: Vec<ParamSpec>,
    pub(crate) next_property_id: u32,
    pub(crate) hooks: ClassHooks,
}

impl TypeClass {
    fn new(node: &'static TypeNode, parent: Option<ClassRef>) -> Self {
        let (structs, construct_properties) = parent.as_ref().map_or_else(
            || (StructSet::default(), Vec::new()),
            |p| (p.structs.clone(), p.construct_properties.clone()),
        );
        TypeClass {
            node,
            parent,
            structs,
            interfaces: Vec::new(),
            properties: Vec::new(),
            construct_properties,
            next_property_id: 1,
            hooks: ClassHooks::default(),
        }
    }

    /// Returns the type this class belongs to.
    #[inline]
    pub fn type_(&self) -> Type {
        Type::from_node(self.node)
    }

    /// Returns the type's name.
    pub fn name(&self) -> &'static str {
        self.node.name
    }

    /// Returns the parent class.
    pub fn parent(&self) -> Option<&TypeClass> {
        self.parent.as_deref()
    }

    /// Returns a new reference to the parent class.
    pub fn parent_ref(&self) -> Option<ClassRef> {
        self.parent.clone()
    }

    /// Returns the class struct of type `T`, own or inherited.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::{ObjectClass, Type};
    ///
    /// let class = Type::OBJECT.class_ref().unwrap();
    /// assert!(class.struct_ref::<ObjectClass>().is_some());
    /// ```
    pub fn struct_ref<T: Any>(&self) -> Option<&T> {
        self.structs.get::<T>()
    }

    /// Returns the class struct of type `T` for overriding its entries.
    ///
    /// Only reachable while the class is being initialized.
    pub fn struct_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.structs.get_mut::<T>()
    }

    /// Adds a class struct if none of its type exists yet.
    pub fn add_struct<T: ClassStruct>(&mut self, s: T) {
        self.structs.insert(Box::new(s));
    }

    /// Returns the data attached with [`TypeInfo::class_data`](crate::runtime::TypeInfo::class_data).
    pub fn class_data<T: Any>(&self) -> Option<&'static T> {
        self.node.info.class_data?.downcast_ref::<T>()
    }

    /// Returns the vtable of an implemented interface.
    pub fn interface(&self, iface: Type) -> Option<&TypeInterface> {
        self.interfaces.iter().find(|i| i.iface == iface)
    }

    /// Returns every interface vtable of this class.
    pub fn interfaces(&self) -> &[TypeInterface] {
        &self.interfaces
    }

    /// Runs once per instance after construction properties are applied,
    /// parent types first.
    pub fn set_constructed(&mut self, f: fn(&Object)) {
        self.hooks.constructed = Some(f);
    }

    /// Runs when the instance is disposed, before the parent types' hooks.
    /// Must tolerate running more than once.
    pub fn set_dispose(&mut self, f: fn(&Object)) {
        self.hooks.dispose = Some(f);
    }

    /// Runs once when the instance is finalized, before the parent types' hooks.
    pub fn set_finalize(&mut self, f: fn(&Finalizing<'_>)) {
        self.hooks.finalize = Some(f);
    }

    /// Iterates this class and its ancestors, this class first.
    pub fn chain(&self) -> impl Iterator<Item = &TypeClass> {
        std::iter::successors(Some(self), |c| c.parent())
    }
}

impl fmt::Debug for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeClass")
            .field("type", &self.node.name)
            .field("properties", &self.properties.len())
            .field("interfaces", &self.interfaces.len())
            .finish()
    }
}

/// One implementer's copy of an interface vtable.
pub struct TypeInterface {
    iface: Type,
    instance_type: Type,
    structs: StructSet,
    /// Keeps the interface's default vtable alive.
    default: ClassRef,
}

impl TypeInterface {
    /// Returns the interface type.
    pub fn interface_type(&self) -> Type {
        self.iface
    }

    /// Returns the implementing type.
    pub fn instance_type(&self) -> Type {
        self.instance_type
    }

    /// Returns the vtable struct of type `T`.
    pub fn struct_ref<T: Any>(&self) -> Option<&T> {
        self.structs.get::<T>()
    }

    /// Returns the vtable struct of type `T` for filling in.
    pub fn struct_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.structs.get_mut::<T>()
    }

    /// Returns the interface's default vtable.
    pub fn default_vtable(&self) -> &TypeClass {
        &self.default
    }
}

impl Clone for TypeInterface {
    fn clone(&self) -> Self {
        TypeInterface {
            iface: self.iface,
            instance_type: self.instance_type,
            structs: self.structs.clone(),
            default: self.default.clone(),
        }
    }
}

/// Class storage and reference count of one type node.
pub(crate) struct ClassSlot {
    /// Serializes initialization and finalization.
    init: Mutex<()>,
    class: AtomicPtr<TypeClass>,
    refs: AtomicUsize,
}

impl ClassSlot {
    pub(crate) const fn new() -> Self {
        Self {
            init: Mutex::new(()),
            class: AtomicPtr::new(ptr::null_mut()),
            refs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.refs.load(Ordering::Acquire) > 0
    }

    /// Takes a reference if the class is alive.
    fn try_ref(&self) -> Option<ClassRef> {
        let mut refs = self.refs.load(Ordering::Acquire);
        while refs > 0 {
            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let ptr = NonNull::new(self.class.load(Ordering::Acquire))?;
                    return Some(ClassRef { ptr });
                }
                Err(actual) => refs = actual,
            }
        }
        None
    }
}

/// Counted reference to an initialized class.
///
/// Cloning takes another class reference; dropping the last one finalizes
/// the class of a dynamic type.
pub struct ClassRef {
    ptr: NonNull<TypeClass>,
}

// SAFETY: TypeClass is immutable once published and all of its contents are
// Send + Sync; the reference count is atomic.
unsafe impl Send for ClassRef {}
unsafe impl Sync for ClassRef {}

impl Deref for ClassRef {
    type Target = TypeClass;

    #[inline]
    fn deref(&self) -> &TypeClass {
        // SAFETY: the class stays allocated while this reference is counted.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for ClassRef {
    fn clone(&self) -> Self {
        self.node.class.refs.fetch_add(1, Ordering::Relaxed);
        ClassRef { ptr: self.ptr }
    }
}

impl Drop for ClassRef {
    fn drop(&mut self) {
        class_unref(self.node);
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl Type {
    /// References the class of a classed type (or the default vtable of an
    /// interface), initializing it on first use.
    ///
    /// Returns `None` for unclassed or poisoned types.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::Type;
    ///
    /// let class = Type::OBJECT.class_ref().unwrap();
    /// assert_eq!(class.type_(), Type::OBJECT);
    /// assert!(Type::INT.class_ref().is_none());
    /// ```
    pub fn class_ref(self) -> Option<ClassRef> {
        let Some(n) = node(self) else {
            critical!("cannot reference the class of an invalid type");
            return None;
        };
        if !n.is_classed() && !n.is_interface() {
            critical!("type '{}' is not classed", n.name);
            return None;
        }
        class_ref(n)
    }

    /// Returns the class if it is already initialized, without initializing it.
    pub fn class_peek(self) -> Option<ClassRef> {
        node(self)?.class.try_ref()
    }

    /// References the default vtable of an interface type.
    pub fn default_interface_ref(self) -> Option<ClassRef> {
        if !self.is_interface() {
            critical!("type '{}' is not an interface", self.name());
            return None;
        }
        self.class_ref()
    }

    /// Returns true if the type was poisoned by a panicking initializer.
    pub fn is_poisoned(self) -> bool {
        node(self).is_some_and(|n| n.poisoned.load(Ordering::Acquire))
    }
}

pub(crate) fn class_ref(n: &'static TypeNode) -> Option<ClassRef> {
    if let Some(class) = n.class.try_ref() {
        return Some(class);
    }
    if n.poisoned.load(Ordering::Acquire) {
        critical!("type '{}' is poisoned", n.name);
        return None;
    }

    let _guard = n.class.init.lock();
    if let Some(class) = n.class.try_ref() {
        return Some(class);
    }
    if n.poisoned.load(Ordering::Acquire) {
        critical!("type '{}' is poisoned", n.name);
        return None;
    }

    let parent = match n.parent() {
        Some(p) if p.is_classed() => Some(class_ref(p)?),
        _ => None,
    };

    let mut class = TypeClass::new(n, parent);
    if let Some(make) = n.info.class_struct {
        let own = make();
        if !class.structs.contains(Any::type_id((*own).as_any())) {
            class.structs.insert(own);
        }
    }

    if let Some(init) = n.info.class_init {
        if catch_unwind(AssertUnwindSafe(|| init(&mut class))).is_err() {
            n.poisoned.store(true, Ordering::Release);
            critical!("class initializer of '{}' panicked; type is poisoned", n.name);
            return None;
        }
    }

    if !n.is_interface() {
        class.interfaces = build_interfaces(n, &class)?;
    }

    // Static classes keep one reference owned by the registry.
    let refs = if n.flags.contains(TypeFlags::DYNAMIC) { 1 } else { 2 };
    let ptr = Box::into_raw(Box::new(class));
    n.class.class.store(ptr, Ordering::Release);
    n.class.refs.store(refs, Ordering::Release);
    oxitype_log::trace!("initialized class '{}'", n.name);

    // SAFETY: ptr comes from Box::into_raw above and is never null.
    Some(ClassRef {
        ptr: unsafe { NonNull::new_unchecked(ptr) },
    })
}

/// Builds interface vtables: inherited ones are copied from the parent class,
/// own ones start from the interface's default vtable and run the
/// implementation's init.
fn build_interfaces(n: &'static TypeNode, class: &TypeClass) -> Option<Vec<TypeInterface>> {
    let ty = Type::from_node(n);
    let mut vtables: Vec<TypeInterface> = class.parent.as_ref().map_or_else(Vec::new, |p| {
        p.interfaces
            .iter()
            .map(|i| TypeInterface {
                instance_type: ty,
                ..i.clone()
            })
            .collect()
    });

    let entries = n.data.read().interfaces.clone();
    for entry in entries {
        let iface_node = node(entry.iface)?;
        let default = class_ref(iface_node)?;
        let mut vtable = TypeInterface {
            iface: entry.iface,
            instance_type: ty,
            structs: default.structs.clone(),
            default,
        };
        if let Some(init) = entry.info.init {
            if catch_unwind(AssertUnwindSafe(|| init(&mut vtable))).is_err() {
                n.poisoned.store(true, Ordering::Release);
                critical!(
                    "interface initializer of '{}' for '{}' panicked; type is poisoned",
                    iface_node.name,
                    n.name
                );
                return None;
            }
        }
        vtables.push(vtable);
    }
    Some(vtables)
}

fn class_unref(n: &'static TypeNode) {
    let slot = &n.class;
    let mut refs = slot.refs.load(Ordering::Acquire);
    while refs > 1 {
        match slot.refs.compare_exchange_weak(
            refs,
            refs - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return,
            Err(actual) => refs = actual,
        }
    }

    // The 1 -> 0 transition is serialized with initialization.
    let guard = slot.init.lock();
    loop {
        let refs = slot.refs.load(Ordering::Acquire);
        if refs == 0 {
            critical!("class of '{}' released more often than referenced", n.name);
            return;
        }
        if slot
            .refs
            .compare_exchange(refs, refs - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if refs > 1 {
                return;
            }
            break;
        }
    }

    let ptr = slot.class.swap(ptr::null_mut(), Ordering::AcqRel);
    if ptr.is_null() {
        return;
    }
    // SAFETY: ptr was published by `class_ref` via Box::into_raw and the
    // count just reached zero, so no reference remains.
    let class = unsafe { Box::from_raw(ptr) };

    let own = n.data.read().interfaces.clone();
    for entry in own {
        if let (Some(finalize), Some(vtable)) = (entry.info.finalize, class.interface(entry.iface))
        {
            finalize(vtable);
        }
    }
    if let Some(finalize) = n.info.class_finalize {
        finalize(&class);
    }
    drop(guard);
    oxitype_log::trace!("finalized class '{}'", n.name);
    drop(class);
}
