//! The type registry.
//!
//! Every type known to the runtime has one [`TypeNode`] that records its
//! parent, name, flags, initializer callbacks and the interfaces it
//! implements. Nodes are allocated in the global arena and never freed.
//!
//! # Architecture
//!
//! A [`Type`] is a word-sized handle:
//! - small values index a table of static slots holding the built-in
//!   fundamentals (and `INITIALLY_UNOWNED`) plus user fundamentals
//! - every other value is the address of an arena-allocated node
//!
//! Each node carries its ancestor vector (parent first), so `is_a` between
//! instantiable types is one comparison against a precomputed slot.
//!
//! # Thread Safety
//!
//! Registration takes the registry write lock. Per-node mutable state
//! (children, interfaces, prerequisites) lives behind a per-node `RwLock`.
//! Class initialization never holds the registry lock, so class
//! initializers may register further types.

use std::any::Any;
use std::fmt;
use std::ptr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use bitflags::bitflags;
use fxhash::FxHashMap;
use parking_lot::RwLock;

use oxitype_mem::global_arena;

use crate::error::{Error, Result};
use crate::runtime::class::{ClassSlot, ClassStruct, TypeClass, TypeInterface};
use crate::runtime::quark::Quark;
use crate::runtime::value::{self, ValueTable};

/// Number of static type slots (built-in plus user fundamentals).
const MAX_STATIC_SLOTS: usize = 256;

/// First slot handed out by [`Type::register_fundamental`].
const FIRST_USER_SLOT: usize = 32;

/// Static slot table. Slot nodes are arena-allocated and never freed.
static SLOTS: [AtomicPtr<TypeNode>; MAX_STATIC_SLOTS] =
    [const { AtomicPtr::new(ptr::null_mut()) }; MAX_STATIC_SLOTS];

/// Opaque handle identifying a registered type.
///
/// Two handles compare equal exactly when they name the same type.
/// `Type::INVALID` is the "not found" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Type(usize);

impl Type {
    /// The invalid type (not found / not registered).
    pub const INVALID: Type = Type(0);
    /// No value.
    pub const NONE: Type = Type(1);
    /// Root of all interface types.
    pub const INTERFACE: Type = Type(2);
    /// Signed 8-bit integer.
    pub const CHAR: Type = Type(3);
    /// Unsigned 8-bit integer.
    pub const UCHAR: Type = Type(4);
    /// Boolean.
    pub const BOOL: Type = Type(5);
    /// Signed 32-bit integer.
    pub const INT: Type = Type(6);
    /// Unsigned 32-bit integer.
    pub const UINT: Type = Type(7);
    /// Signed 64-bit integer.
    pub const INT64: Type = Type(8);
    /// Unsigned 64-bit integer.
    pub const UINT64: Type = Type(9);
    /// Root of all enumeration types.
    pub const ENUM: Type = Type(10);
    /// Root of all flags types.
    pub const FLAGS: Type = Type(11);
    /// 32-bit float.
    pub const FLOAT: Type = Type(12);
    /// 64-bit float.
    pub const DOUBLE: Type = Type(13);
    /// Optional UTF-8 string.
    pub const STRING: Type = Type(14);
    /// Opaque address-sized value.
    pub const POINTER: Type = Type(15);
    /// Root of all boxed types.
    pub const BOXED: Type = Type(16);
    /// Parameter specifications.
    pub const PARAM: Type = Type(17);
    /// Root of the object hierarchy.
    pub const OBJECT: Type = Type(18);
    /// Abstract object type whose instances start with a floating reference.
    pub const INITIALLY_UNOWNED: Type = Type(19);

    pub(crate) fn from_node(node: &'static TypeNode) -> Type {
        if node.slot != 0 {
            Type(node.slot)
        } else {
            Type(ptr::from_ref(node).addr())
        }
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn into_raw(self) -> usize {
        self.0
    }

    /// Returns false for [`Type::INVALID`] and for handles of unregistered slots.
    pub fn is_valid(self) -> bool {
        node(self).is_some()
    }

    /// Returns the type's name, or `"<invalid>"`.
    pub fn name(self) -> &'static str {
        node(self).map_or("<invalid>", |n| n.name)
    }

    /// Returns the quark of the type's name.
    pub fn quark(self) -> Quark {
        node(self).map_or(Quark::NONE, |n| n.quark)
    }

    /// Looks up a type by name.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::Type;
    ///
    /// assert_eq!(Type::from_name("Object"), Some(Type::OBJECT));
    /// assert_eq!(Type::from_name("NoSuchType"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Type> {
        registry().tables.read().by_name.get(name).copied()
    }

    /// Returns the parent type, `None` for fundamentals.
    pub fn parent(self) -> Option<Type> {
        node(self).and_then(|n| n.ancestors.first().copied())
    }

    /// Returns the number of types in the chain from the fundamental down
    /// to this type (1 for fundamentals, 0 for invalid handles).
    pub fn depth(self) -> usize {
        node(self).map_or(0, |n| n.ancestors.len() + 1)
    }

    /// Returns the fundamental type this type derives from.
    pub fn fundamental(self) -> Type {
        node(self).map_or(Type::INVALID, |n| n.fundamental)
    }

    /// Returns the ancestors of this type, parent first.
    pub fn ancestors(self) -> &'static [Type] {
        node(self).map_or(&[], |n| n.ancestors)
    }

    /// Returns the direct child of `root` on the way down to `self`.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::Type;
    ///
    /// assert_eq!(Type::INITIALLY_UNOWNED.next_base(Type::OBJECT), Some(Type::INITIALLY_UNOWNED));
    /// assert_eq!(Type::OBJECT.next_base(Type::OBJECT), None);
    /// ```
    pub fn next_base(self, root: Type) -> Option<Type> {
        let n = node(self)?;
        let r = node(root)?;
        let depth = n.ancestors.len();
        let root_depth = r.ancestors.len();
        if root_depth >= depth || n.ancestors[depth - root_depth - 1] != root {
            return None;
        }
        // The child of root sits one step closer to self than root does.
        if depth - root_depth - 1 == 0 {
            Some(self)
        } else {
            Some(n.ancestors[depth - root_depth - 2])
        }
    }

    /// Returns true if `self` equals `other`, derives from it, or implements
    /// it (when `other` is an interface).
    #[inline]
    pub fn is_a(self, other: Type) -> bool {
        if self == other {
            return self.0 != 0;
        }
        let (Some(n), Some(a)) = (node(self), node(other)) else {
            return false;
        };
        if n.has_ancestor(other, a) {
            return true;
        }
        (a.is_interface() || n.is_interface()) && conforms(n, other)
    }

    /// Returns true for fundamental types.
    pub fn is_fundamental(self) -> bool {
        node(self).is_some_and(|n| n.ancestors.is_empty())
    }

    /// Returns true if the type has a class structure.
    pub fn is_classed(self) -> bool {
        node(self).is_some_and(|n| n.fundamental_flags.contains(FundamentalFlags::CLASSED))
    }

    /// Returns true if instances of the type can be created (abstractness aside).
    pub fn is_instantiatable(self) -> bool {
        node(self)
            .is_some_and(|n| n.fundamental_flags.contains(FundamentalFlags::INSTANTIATABLE))
    }

    /// Returns true if the type's fundamental allows direct derivation.
    pub fn is_derivable(self) -> bool {
        node(self).is_some_and(|n| n.fundamental_flags.contains(FundamentalFlags::DERIVABLE))
    }

    /// Returns true if the type's fundamental allows derivation from derived types.
    pub fn is_deep_derivable(self) -> bool {
        node(self)
            .is_some_and(|n| n.fundamental_flags.contains(FundamentalFlags::DEEP_DERIVABLE))
    }

    /// Returns true for interface types.
    pub fn is_interface(self) -> bool {
        node(self).is_some_and(TypeNode::is_interface)
    }

    /// Returns true if the type was registered abstract.
    pub fn is_abstract(self) -> bool {
        self.has_flag(TypeFlags::ABSTRACT)
    }

    /// Returns true if the type rejects descendants.
    pub fn is_final(self) -> bool {
        self.has_flag(TypeFlags::FINAL)
    }

    /// Returns true if the type is deprecated.
    pub fn is_deprecated(self) -> bool {
        self.has_flag(TypeFlags::DEPRECATED)
    }

    /// Returns true if values of this type cannot be created.
    pub fn is_value_abstract(self) -> bool {
        self.has_flag(TypeFlags::VALUE_ABSTRACT)
    }

    fn has_flag(self, flag: TypeFlags) -> bool {
        node(self).is_some_and(|n| n.flags.contains(flag))
    }

    /// Returns true if a value box can hold values of this type.
    pub fn is_value_type(self) -> bool {
        node(self).is_some_and(|n| n.value_table().is_some())
    }

    /// Returns the direct children of this type.
    pub fn children(self) -> Vec<Type> {
        node(self).map_or_else(Vec::new, |n| n.data.read().children.clone())
    }

    /// Returns every interface this type implements, including those added
    /// to its ancestors.
    pub fn interfaces(self) -> Vec<Type> {
        let Some(n) = node(self) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for t in n.ancestors.iter().rev().copied().chain(std::iter::once(self)) {
            if let Some(tn) = node(t) {
                out.extend(tn.data.read().interfaces.iter().map(|e| e.iface));
            }
        }
        out
    }

    /// Returns the prerequisites of an interface type.
    pub fn interface_prerequisites(self) -> Vec<Type> {
        node(self).map_or_else(Vec::new, |n| n.data.read().prerequisites.clone())
    }

    /// Returns the types that implement this interface directly.
    pub fn interface_implementers(self) -> Vec<Type> {
        node(self).map_or_else(Vec::new, |n| n.data.read().implementers.clone())
    }

    /// Describes a registered type.
    pub fn query(self) -> Option<TypeQuery> {
        let n = node(self)?;
        Some(TypeQuery {
            ty: self,
            name: n.name,
            has_class_struct: n.info.class_struct.is_some(),
            has_instance_struct: n.info.instance_struct.is_some(),
        })
    }

    /// Registers a new type deriving from `parent`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidName`] if `name` is not a valid type name
    /// - [`Error::InvalidParent`] if `parent` is not registered
    /// - [`Error::NameTaken`] if a type with `name` exists
    /// - [`Error::ParentFinal`] if `parent` is final
    /// - [`Error::ParentNotDerivable`] if the fundamental forbids derivation
    /// - [`Error::AbstractInstantiable`] if `flags` asks for an abstract type
    ///   that is final or not classed
    /// - [`Error::Poisoned`] if the parent's class initializer failed
    ///
    /// No state changes on error.
    ///
    /// # Example
    ///
    /// ```
    /// use oxitype::runtime::{Type, TypeFlags, TypeInfo};
    ///
    /// let animal = Type::register_static(
    ///     Type::OBJECT,
    ///     "DocAnimal",
    ///     TypeInfo::default(),
    ///     TypeFlags::ABSTRACT,
    /// )
    /// .unwrap();
    /// assert!(animal.is_a(Type::OBJECT));
    /// assert!(animal.is_abstract());
    /// ```
    pub fn register_static(
        parent: Type,
        name: &str,
        info: TypeInfo,
        flags: TypeFlags,
    ) -> Result<Type> {
        if !is_valid_type_name(name) {
            return Err(Error::InvalidName {
                name: name.to_string(),
            });
        }
        let parent_node = node(parent).ok_or(Error::InvalidParent)?;

        let mut tables = registry().tables.write();
        if tables.by_name.contains_key(name) {
            return Err(Error::NameTaken {
                name: name.to_string(),
            });
        }
        if parent_node.flags.contains(TypeFlags::FINAL) {
            return Err(Error::ParentFinal {
                parent: parent_node.name,
            });
        }
        let needed = if parent_node.ancestors.is_empty() {
            FundamentalFlags::DERIVABLE
        } else {
            FundamentalFlags::DEEP_DERIVABLE
        };
        if !parent_node.fundamental_flags.contains(needed) {
            return Err(Error::ParentNotDerivable {
                parent: parent_node.name,
            });
        }
        if flags.contains(TypeFlags::ABSTRACT)
            && (flags.contains(TypeFlags::FINAL)
                || !parent_node
                    .fundamental_flags
                    .contains(FundamentalFlags::CLASSED))
        {
            return Err(Error::AbstractInstantiable {
                name: name.to_string(),
            });
        }
        if parent_node.poisoned.load(Ordering::Acquire) {
            return Err(Error::Poisoned {
                name: parent_node.name,
            });
        }
        if parent_node.flags.contains(TypeFlags::DEPRECATED) {
            oxitype_log::warn!(
                "type '{}' derives from deprecated type '{}'",
                name,
                parent_node.name
            );
        }

        let node = install_node(&mut tables, 0, name, Some(parent_node), info, flags, None);
        let ty = Type::from_node(node);
        parent_node.data.write().children.push(ty);

        oxitype_log::debug!("registered type '{}' (parent '{}')", name, parent_node.name);
        Ok(ty)
    }

    /// Registers a new fundamental type in the next free static slot.
    ///
    /// Fundamental types define their own value table and derivation rules.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidName`], [`Error::NameTaken`], or
    /// [`Error::TooManyFundamentals`] once every slot is used.
    pub fn register_fundamental(
        name: &str,
        info: TypeInfo,
        fundamental_flags: FundamentalFlags,
        flags: TypeFlags,
    ) -> Result<Type> {
        if !is_valid_type_name(name) {
            return Err(Error::InvalidName {
                name: name.to_string(),
            });
        }

        let mut tables = registry().tables.write();
        if tables.by_name.contains_key(name) {
            return Err(Error::NameTaken {
                name: name.to_string(),
            });
        }
        let slot = tables.next_slot;
        if slot >= MAX_STATIC_SLOTS {
            return Err(Error::TooManyFundamentals);
        }
        tables.next_slot += 1;

        let node = install_node(
            &mut tables,
            slot,
            name,
            None,
            info,
            flags,
            Some(fundamental_flags),
        );
        oxitype_log::debug!("registered fundamental type '{}' in slot {}", node.name, slot);
        Ok(Type::from_node(node))
    }

    /// Declares that `self` implements `iface`.
    ///
    /// The interface vtable for `self` is built from the interface's default
    /// vtable and `info.init` when the class of `self` is first referenced.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAnInterface`] if `iface` is not an interface type
    /// - [`Error::NotInstantiable`] if `self` is not instantiable
    /// - [`Error::AlreadyAdded`] if `self` or an ancestor already implements it
    /// - [`Error::MissingPrerequisite`] if `self` lacks a prerequisite of `iface`
    /// - [`Error::ClassAlreadyInitialized`] if the class of `self` exists
    pub fn add_interface(self, iface: Type, info: InterfaceInfo) -> Result<()> {
        let n = node(self).ok_or(Error::InvalidParent)?;
        let i = node(iface).ok_or(Error::InvalidParent)?;
        if !i.is_interface() || iface == Type::INTERFACE {
            return Err(Error::NotAnInterface { name: i.name });
        }
        if !n
            .fundamental_flags
            .contains(FundamentalFlags::INSTANTIATABLE)
        {
            return Err(Error::NotInstantiable { name: n.name });
        }

        let _tables = registry().tables.write();
        if self.is_a(iface) {
            return Err(Error::AlreadyAdded { interface: i.name });
        }
        let prerequisites = i.data.read().prerequisites.clone();
        if let Some(missing) = prerequisites.into_iter().find(|&p| !self.is_a(p)) {
            return Err(Error::MissingPrerequisite {
                interface: i.name,
                prerequisite: missing.name(),
            });
        }
        if n.class.is_initialized() {
            return Err(Error::ClassAlreadyInitialized { name: n.name });
        }

        n.data.write().interfaces.push(InterfaceEntry { iface, info });
        i.data.write().implementers.push(self);
        oxitype_log::debug!("type '{}' implements '{}'", n.name, i.name);
        Ok(())
    }

    /// Requires every implementer of the interface `self` to also be a
    /// `prerequisite` (an interface or an instantiable type).
    ///
    /// # Errors
    ///
    /// [`Error::NotAnInterface`] if `self` is not an interface, or
    /// [`Error::NotInstantiable`] if `prerequisite` is neither an interface
    /// nor instantiable.
    pub fn add_interface_prerequisite(self, prerequisite: Type) -> Result<()> {
        let n = node(self).ok_or(Error::InvalidParent)?;
        let p = node(prerequisite).ok_or(Error::InvalidParent)?;
        if !n.is_interface() || self == Type::INTERFACE {
            return Err(Error::NotAnInterface { name: n.name });
        }
        if !p.is_interface()
            && !p
                .fundamental_flags
                .contains(FundamentalFlags::INSTANTIATABLE)
        {
            return Err(Error::NotInstantiable { name: p.name });
        }

        let _tables = registry().tables.write();
        let mut data = n.data.write();
        if !data.prerequisites.contains(&prerequisite) {
            data.prerequisites.push(prerequisite);
        }
        Ok(())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Per-type flags chosen at registration.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        /// No instances of exactly this type can be created.
        const ABSTRACT = 1 << 4;
        /// No value boxes of exactly this type can be created.
        const VALUE_ABSTRACT = 1 << 5;
        /// No descendants can be registered.
        const FINAL = 1 << 6;
        /// Use of the type logs a warning.
        const DEPRECATED = 1 << 7;
        /// The class is released when its last reference goes and
        /// initialized again on the next one. Classes of other types live
        /// for the rest of the process once initialized.
        const DYNAMIC = 1 << 8;
    }
}

bitflags! {
    /// Capabilities of a fundamental type, shared by all its descendants.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FundamentalFlags: u32 {
        /// Types carry a class structure.
        const CLASSED = 1 << 0;
        /// Types can be instantiated.
        const INSTANTIATABLE = 1 << 1;
        /// The fundamental can be derived from.
        const DERIVABLE = 1 << 2;
        /// Derived types can be derived from again.
        const DEEP_DERIVABLE = 1 << 3;
    }
}

/// Callbacks and layout factories of a type.
///
/// The struct factories play the role of class and instance sizes: a class
/// struct is cloned from the parent class and extended with a fresh value of
/// the type's own struct; an instance struct is created per instance.
#[derive(Clone, Copy, Default)]
pub struct TypeInfo {
    /// Runs once when the class is first referenced, after the parent class
    /// is initialized. Also initializes the default vtable of interfaces.
    pub class_init: Option<fn(&mut TypeClass)>,
    /// Runs when the last class reference is dropped.
    pub class_finalize: Option<fn(&TypeClass)>,
    /// Creates the type's own class struct.
    pub class_struct: Option<fn() -> Box<dyn ClassStruct>>,
    /// Opaque data reachable from the class initializer.
    pub class_data: Option<&'static (dyn Any + Send + Sync)>,
    /// Runs for every new instance, parent types first.
    pub instance_init: Option<fn(&crate::runtime::object::Object)>,
    /// Creates the type's per-instance state.
    pub instance_struct: Option<fn() -> Box<dyn Any + Send + Sync>>,
    /// Value box hooks (inherited from the parent when unset).
    pub value_table: Option<&'static ValueTable>,
}

impl TypeInfo {
    /// Creates an empty type info.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            class_init: None,
            class_finalize: None,
            class_struct: None,
            class_data: None,
            instance_init: None,
            instance_struct: None,
            value_table: None,
        }
    }

    /// Sets the class initializer.
    #[must_use]
    pub const fn class_init(mut self, f: fn(&mut TypeClass)) -> Self {
        self.class_init = Some(f);
        self
    }

    /// Sets the class finalizer.
    #[must_use]
    pub const fn class_finalize(mut self, f: fn(&TypeClass)) -> Self {
        self.class_finalize = Some(f);
        self
    }

    /// Declares `C` as the type's own class struct.
    #[must_use]
    pub fn class_struct<C: Default + Clone + Send + Sync + 'static>(mut self) -> Self {
        self.class_struct = Some(new_class_struct::<C>);
        self
    }

    /// Attaches opaque data for the class initializer.
    #[must_use]
    pub const fn class_data(mut self, data: &'static (dyn Any + Send + Sync)) -> Self {
        self.class_data = Some(data);
        self
    }

    /// Sets the instance initializer.
    #[must_use]
    pub const fn instance_init(mut self, f: fn(&crate::runtime::object::Object)) -> Self {
        self.instance_init = Some(f);
        self
    }

    /// Declares `T` as the type's per-instance state, created with `Default`.
    #[must_use]
    pub fn instance_struct<T: Default + Send + Sync + 'static>(mut self) -> Self {
        self.instance_struct = Some(new_instance_struct::<T>);
        self
    }

    /// Sets the value table.
    #[must_use]
    pub const fn value_table(mut self, table: &'static ValueTable) -> Self {
        self.value_table = Some(table);
        self
    }
}

fn new_class_struct<C: Default + Clone + Send + Sync + 'static>() -> Box<dyn ClassStruct> {
    Box::new(C::default())
}

fn new_instance_struct<T: Default + Send + Sync + 'static>() -> Box<dyn Any + Send + Sync> {
    Box::new(T::default())
}

/// Callbacks of one interface implementation.
#[derive(Clone, Copy, Default)]
pub struct InterfaceInfo {
    /// Fills the implementer's copy of the interface vtable.
    pub init: Option<fn(&mut TypeInterface)>,
    /// Runs when the implementer's class is finalized.
    pub finalize: Option<fn(&TypeInterface)>,
}

impl InterfaceInfo {
    /// Creates an implementation with the given vtable initializer.
    #[must_use]
    pub const fn new(init: fn(&mut TypeInterface)) -> Self {
        Self {
            init: Some(init),
            finalize: None,
        }
    }
}

/// Result of [`Type::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeQuery {
    /// The queried type.
    pub ty: Type,
    /// Its name.
    pub name: &'static str,
    /// Whether the type declares its own class struct.
    pub has_class_struct: bool,
    /// Whether the type declares per-instance state.
    pub has_instance_struct: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct InterfaceEntry {
    pub(crate) iface: Type,
    pub(crate) info: InterfaceInfo,
}

/// Mutable per-node bookkeeping.
#[derive(Default)]
pub(crate) struct NodeData {
    pub(crate) children: Vec<Type>,
    /// Interfaces added directly to this type.
    pub(crate) interfaces: Vec<InterfaceEntry>,
    /// For interfaces: types every implementer must conform to.
    pub(crate) prerequisites: Vec<Type>,
    /// For interfaces: types that added this interface.
    pub(crate) implementers: Vec<Type>,
}

/// Registry entry of one type. Allocated in the global arena, never freed.
pub(crate) struct TypeNode {
    /// Static slot index, 0 for arena-addressed types.
    slot: usize,
    pub(crate) name: &'static str,
    pub(crate) quark: Quark,
    pub(crate) fundamental: Type,
    /// Parent first, fundamental last.
    pub(crate) ancestors: &'static [Type],
    pub(crate) flags: TypeFlags,
    pub(crate) fundamental_flags: FundamentalFlags,
    pub(crate) info: TypeInfo,
    value_table: Option<&'static ValueTable>,
    pub(crate) data: RwLock<NodeData>,
    pub(crate) class: ClassSlot,
    pub(crate) poisoned: AtomicBool,
}

impl TypeNode {
    #[inline]
    pub(crate) fn ty(&'static self) -> Type {
        Type::from_node(self)
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<&'static TypeNode> {
        self.ancestors.first().and_then(|&p| node(p))
    }

    #[inline]
    fn has_ancestor(&self, ancestor: Type, ancestor_node: &TypeNode) -> bool {
        let depth = self.ancestors.len();
        let ancestor_depth = ancestor_node.ancestors.len();
        ancestor_depth < depth && self.ancestors[depth - ancestor_depth - 1] == ancestor
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.fundamental == Type::INTERFACE
    }

    pub(crate) fn is_classed(&self) -> bool {
        self.fundamental_flags.contains(FundamentalFlags::CLASSED)
    }

    /// Interfaces whose prerequisites include an object type hold objects.
    pub(crate) fn value_table(&self) -> Option<&'static ValueTable> {
        if self.value_table.is_some() || !self.is_interface() {
            return self.value_table;
        }
        let prerequisites = self.data.read().prerequisites.clone();
        prerequisites
            .into_iter()
            .find(|p| p.is_a(Type::OBJECT))
            .and_then(|_| value::fundamental_value_table(Type::OBJECT))
    }
}

fn conforms(n: &'static TypeNode, iface: Type) -> bool {
    if n.is_interface() {
        let prerequisites = n.data.read().prerequisites.clone();
        return prerequisites.into_iter().any(|p| p.is_a(iface));
    }
    std::iter::once(n)
        .chain(n.ancestors.iter().filter_map(|&t| node(t)))
        .any(|tn| tn.data.read().interfaces.iter().any(|e| e.iface == iface))
}

/// Registry tables guarded by the single registry lock.
struct Tables {
    /// Map of type name -> type
    by_name: FxHashMap<&'static str, Type>,
    /// Next free static slot for user fundamentals
    next_slot: usize,
}

struct Registry {
    tables: RwLock<Tables>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        crate::config::init();
        let mut tables = Tables {
            by_name: FxHashMap::default(),
            next_slot: FIRST_USER_SLOT,
        };
        install_builtins(&mut tables);
        Registry {
            tables: RwLock::new(tables),
        }
    })
}

/// Resolves a type handle to its node.
#[inline]
pub(crate) fn node(ty: Type) -> Option<&'static TypeNode> {
    match ty.0 {
        0 => None,
        slot if slot < MAX_STATIC_SLOTS => {
            registry();
            let p = SLOTS[slot].load(Ordering::Acquire);
            // SAFETY: slots only ever hold arena-allocated nodes, which are
            // never freed.
            unsafe { p.as_ref() }
        }
        // SAFETY: handles outside the slot range are only created by
        // `Type::from_node` from arena-allocated nodes, which are never freed.
        addr => Some(unsafe { &*(addr as *const TypeNode) }),
    }
}

fn install_node(
    tables: &mut Tables,
    slot: usize,
    name: &str,
    parent: Option<&'static TypeNode>,
    info: TypeInfo,
    flags: TypeFlags,
    fundamental_flags: Option<FundamentalFlags>,
) -> &'static TypeNode {
    let arena = global_arena();
    let name = arena.alloc_str(name);

    let (ancestors, fundamental, fflags, inherited_table) = match parent {
        Some(p) => {
            let mut chain = Vec::with_capacity(p.ancestors.len() + 1);
            chain.push(Type::from_node(p));
            chain.extend_from_slice(p.ancestors);
            (
                arena.alloc_slice(&chain),
                p.fundamental,
                p.fundamental_flags,
                p.value_table,
            )
        }
        None => (
            &[][..],
            Type(slot),
            fundamental_flags.unwrap_or_default(),
            None,
        ),
    };

    let node: &'static TypeNode = arena.alloc(TypeNode {
        slot,
        name,
        quark: Quark::from_static_str(name),
        fundamental,
        ancestors,
        flags,
        fundamental_flags: fflags,
        info,
        value_table: info.value_table.or(inherited_table),
        data: RwLock::new(NodeData::default()),
        class: ClassSlot::new(),
        poisoned: AtomicBool::new(false),
    });
    debug_assert!(slot != 0 || ptr::from_ref(node).addr() >= MAX_STATIC_SLOTS);

    if slot != 0 {
        SLOTS[slot].store(ptr::from_ref(node).cast_mut(), Ordering::Release);
    }
    tables.by_name.insert(name, Type::from_node(node));
    node
}

fn install_builtins(tables: &mut Tables) {
    use FundamentalFlags as F;

    let classed_derivable = F::CLASSED | F::DERIVABLE;
    let value_abstract = TypeFlags::ABSTRACT | TypeFlags::VALUE_ABSTRACT;
    let fundamentals: [(Type, &str, FundamentalFlags, TypeFlags); 18] = [
        (Type::NONE, "void", F::empty(), TypeFlags::empty()),
        (Type::INTERFACE, "Interface", F::DERIVABLE, TypeFlags::empty()),
        (Type::CHAR, "char", F::empty(), TypeFlags::empty()),
        (Type::UCHAR, "uchar", F::empty(), TypeFlags::empty()),
        (Type::BOOL, "bool", F::empty(), TypeFlags::empty()),
        (Type::INT, "int", F::empty(), TypeFlags::empty()),
        (Type::UINT, "uint", F::empty(), TypeFlags::empty()),
        (Type::INT64, "int64", F::empty(), TypeFlags::empty()),
        (Type::UINT64, "uint64", F::empty(), TypeFlags::empty()),
        (Type::ENUM, "Enum", classed_derivable, value_abstract),
        (Type::FLAGS, "Flags", classed_derivable, value_abstract),
        (Type::FLOAT, "float", F::empty(), TypeFlags::empty()),
        (Type::DOUBLE, "double", F::empty(), TypeFlags::empty()),
        (Type::STRING, "string", F::empty(), TypeFlags::empty()),
        (Type::POINTER, "pointer", F::DERIVABLE, TypeFlags::empty()),
        (Type::BOXED, "Boxed", F::DERIVABLE, value_abstract),
        (Type::PARAM, "Param", F::DERIVABLE, TypeFlags::empty()),
        (
            Type::OBJECT,
            "Object",
            F::CLASSED | F::INSTANTIATABLE | F::DERIVABLE | F::DEEP_DERIVABLE,
            TypeFlags::empty(),
        ),
    ];

    for (ty, name, fflags, flags) in fundamentals {
        let info = match ty {
            Type::OBJECT => crate::runtime::object::object_type_info(),
            _ => TypeInfo {
                value_table: value::fundamental_value_table(ty),
                ..TypeInfo::new()
            },
        };
        install_node(tables, ty.0, name, None, info, flags, Some(fflags));
    }

    let object = SLOTS[Type::OBJECT.0].load(Ordering::Acquire);
    // SAFETY: the OBJECT slot was filled by the loop above.
    let object = unsafe { &*object };
    let unowned = install_node(
        tables,
        Type::INITIALLY_UNOWNED.0,
        "InitiallyUnowned",
        Some(object),
        TypeInfo::new(),
        TypeFlags::ABSTRACT,
        None,
    );
    object.data.write().children.push(Type::from_node(unowned));
}

/// Returns true if `name` is a valid type name: an ASCII letter or `_`
/// followed by letters, digits, `_`, `-` or `+`.
pub(crate) fn is_valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
}
