//! Signals: named, typed notification points on object types.
//!
//! A signal is registered once per owner type and identified by a
//! [`SignalId`]. Instances of the owner (or of any descendant) accept
//! handler closures, which are invoked by emission in a fixed order:
//!
//! 1. emission hooks (process-global, per signal); a hook returning false
//!    vetoes the rest of the emission
//! 2. the class handler, for `RUN_FIRST` signals
//! 3. handlers connected with `after == false`, in connection order
//! 4. the class handler, for `RUN_LAST` signals
//! 5. handlers connected with `after == true`
//! 6. the class handler, for `RUN_CLEANUP` signals; always runs
//!
//! Handlers are snapshotted when the emission starts; a handler connected
//! during the emission is not invoked by it, one disconnected or blocked
//! before its turn is skipped. The return value of each handler is folded
//! into the emission's result by the signal's accumulator (the last value
//! wins without one).
//!
//! # Example
//!
//! ```
//! use oxitype::runtime::{Object, SignalFlags, ToValue, Type, Value, signal};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//!
//! let id = signal::SignalBuilder::new("pinged", Type::OBJECT)
//!     .flags(SignalFlags::RUN_LAST)
//!     .param_types(&[Type::INT])
//!     .build();
//! assert!(id.is_valid());
//!
//! let obj = Object::new(Type::OBJECT).unwrap();
//! let total = Arc::new(AtomicI32::new(0));
//! let sink = Arc::clone(&total);
//! signal::connect(&obj, "pinged", move |params: &[Value]| {
//!     sink.fetch_add(params[1].get_int(), Ordering::SeqCst);
//!     None
//! });
//! signal::emit_by_name(&obj, "pinged", &[5i32.to_value()]);
//! assert_eq!(total.load(Ordering::SeqCst), 5);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use fxhash::FxHashMap;
use oxitype_mem::global_arena;
use parking_lot::{Mutex, RwLock};

use crate::runtime::closure::{ClassHandlerFn, Closure};
use crate::runtime::object::{Object, ObjectClass};
use crate::runtime::param::{ParamSpec, canonical_name};
use crate::runtime::quark::Quark;
use crate::runtime::types::Type;
use crate::runtime::value::{ToValue, Value};

bitflags! {
    /// Behavior of a signal.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SignalFlags: u32 {
        /// Class handler runs before the `after == false` handlers.
        const RUN_FIRST = 1 << 0;
        /// Class handler runs between the two handler groups.
        const RUN_LAST = 1 << 1;
        /// Class handler runs last, whatever stopped the emission.
        const RUN_CLEANUP = 1 << 2;
        /// A nested emission on the same instance and detail returns the
        /// default without running anything.
        const NO_RECURSE = 1 << 3;
        /// Accepts a `::detail` suffix.
        const DETAILED = 1 << 4;
        /// May be emitted by outside code to make the instance act.
        const ACTION = 1 << 5;
        /// Rejects emission hooks.
        const NO_HOOKS = 1 << 6;
        /// The return value must be used by the emitter.
        const MUST_COLLECT = 1 << 7;
        const DEPRECATED = 1 << 8;
    }
}

/// Identifies a registered signal. 0 is never a valid id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u32);

impl SignalId {
    pub const INVALID: SignalId = SignalId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identifies a connected handler. 0 is never a valid id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub const INVALID: HandlerId = HandlerId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Identifies an emission hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Passed to closures and accumulators during an emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvocationHint {
    pub signal_id: SignalId,
    pub detail: Quark,
    /// The stage being run: `RUN_FIRST`, `RUN_LAST` or `RUN_CLEANUP`.
    pub run_type: SignalFlags,
}

/// Folds a handler's return value into the emission's result. Returning
/// false stops the emission.
pub type Accumulator = fn(&InvocationHint, &mut Value, &Value) -> bool;

/// Stops at the first handler returning true.
pub fn true_handled(_: &InvocationHint, acc: &mut Value, ret: &Value) -> bool {
    let handled = ret.get::<bool>().unwrap_or(false);
    acc.set_bool(handled);
    !handled
}

/// Keeps the first handler's return value and stops.
pub fn first_wins(_: &InvocationHint, acc: &mut Value, ret: &Value) -> bool {
    *acc = ret.clone();
    false
}

/// Registration details of a signal.
#[derive(Debug, Clone)]
pub struct SignalQuery {
    pub id: SignalId,
    pub name: &'static str,
    pub owner: Type,
    pub flags: SignalFlags,
    pub return_type: Type,
    pub param_types: Vec<Type>,
}

type HookFn = Arc<dyn Fn(&InvocationHint, &[Value]) -> bool + Send + Sync>;

struct EmissionHook {
    id: u64,
    detail: Quark,
    func: HookFn,
}

struct SignalNode {
    id: SignalId,
    name: &'static str,
    owner: Type,
    flags: SignalFlags,
    return_type: Type,
    param_types: Vec<Type>,
    accumulator: Option<Accumulator>,
    /// Class closures keyed by the type they were installed for.
    class_closures: RwLock<Vec<(Type, Closure)>>,
    hooks: Mutex<Vec<EmissionHook>>,
}

impl SignalNode {
    /// Finds the class closure for `ty`, most derived first.
    fn class_closure(&self, ty: Type) -> Option<(Type, Closure)> {
        let closures = self.class_closures.read();
        std::iter::once(ty)
            .chain(ty.ancestors().iter().copied())
            .find_map(|t| {
                closures
                    .iter()
                    .find(|(owner, _)| *owner == t)
                    .map(|(owner, c)| (*owner, c.clone()))
            })
    }
}

#[derive(Default)]
struct Registry {
    nodes: Vec<&'static SignalNode>,
    by_name: FxHashMap<(Type, Quark), SignalId>,
}

impl Registry {
    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        name: &str,
        owner: Type,
        flags: SignalFlags,
        class_closure: Option<Closure>,
        accumulator: Option<Accumulator>,
        return_type: Type,
        param_types: &[Type],
    ) -> SignalId {
        let Ok(raw) = u32::try_from(self.nodes.len() + 1) else {
            critical!("too many signals");
            return SignalId::INVALID;
        };
        let id = SignalId(raw);
        let name: &'static str = global_arena().alloc_str(name);
        let node: &'static SignalNode = global_arena().alloc(SignalNode {
            id,
            name,
            owner,
            flags,
            return_type,
            param_types: param_types.to_vec(),
            accumulator,
            class_closures: RwLock::new(class_closure.map(|c| (owner, c)).into_iter().collect()),
            hooks: Mutex::new(Vec::new()),
        });
        self.nodes.push(node);
        self.by_name.insert((owner, Quark::from_static_str(name)), id);
        id
    }

    fn lookup(&self, ty: Type, name: Quark) -> Option<SignalId> {
        std::iter::once(ty)
            .chain(ty.ancestors().iter().copied())
            .find_map(|t| self.by_name.get(&(t, name)).copied())
            .or_else(|| {
                ty.interfaces()
                    .into_iter()
                    .find_map(|i| self.by_name.get(&(i, name)).copied())
            })
    }
}

const NOTIFY: &str = "notify";

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::default();
        registry.insert(
            NOTIFY,
            Type::OBJECT,
            SignalFlags::RUN_FIRST
                | SignalFlags::NO_RECURSE
                | SignalFlags::DETAILED
                | SignalFlags::ACTION
                | SignalFlags::NO_HOOKS,
            Some(Closure::class_handler::<ObjectClass>(|c| c.notify)),
            None,
            Type::NONE,
            &[Type::PARAM],
        );
        RwLock::new(registry)
    })
}

fn signal_node(id: SignalId) -> Option<&'static SignalNode> {
    let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
    registry().read().nodes.get(index).copied()
}

fn notify_id() -> SignalId {
    registry()
        .read()
        .by_name
        .get(&(Type::OBJECT, Quark::from_static_str(NOTIFY)))
        .copied()
        .unwrap_or(SignalId::INVALID)
}

fn is_valid_signal_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Registers a signal on `owner`, returning [`SignalId::INVALID`] on misuse.
///
/// `_` in the name is canonicalized to `-`.
pub fn new(
    name: &str,
    owner: Type,
    flags: SignalFlags,
    class_closure: Option<Closure>,
    accumulator: Option<Accumulator>,
    return_type: Type,
    param_types: &[Type],
) -> SignalId {
    let name = canonical_name(name);
    if !is_valid_signal_name(&name) {
        critical!("invalid signal name '{}'", name);
        return SignalId::INVALID;
    }
    if !owner.is_a(Type::OBJECT) && !owner.is_interface() {
        critical!("cannot register signal '{}' on non-object type '{}'", name, owner.name());
        return SignalId::INVALID;
    }
    if !return_type.is_valid() || param_types.iter().any(|t| !t.is_valid()) {
        critical!("signal '{}' uses an invalid type", name);
        return SignalId::INVALID;
    }
    if accumulator.is_some() && return_type == Type::NONE {
        critical!("signal '{}' has an accumulator but no return type", name);
        return SignalId::INVALID;
    }
    if return_type != Type::NONE
        && flags.contains(SignalFlags::RUN_FIRST)
        && !flags.intersects(SignalFlags::RUN_LAST | SignalFlags::RUN_CLEANUP)
        && accumulator.is_none()
    {
        oxitype_log::debug!("run-first signal '{}' returns a value without accumulator", name);
    }

    let mut registry = registry().write();
    if let Some(existing) = registry.lookup(owner, Quark::from_str(&name)) {
        critical!("type '{}' already has a signal '{}' ({})", owner.name(), name, existing.0);
        return SignalId::INVALID;
    }
    let id = registry.insert(
        &name,
        owner,
        flags,
        class_closure,
        accumulator,
        return_type,
        param_types,
    );
    oxitype_log::debug!("registered signal '{}::{}' as {}", owner.name(), name, id.0);
    id
}

/// Builder over [`new`]. Defaults to `RUN_LAST`, no return value and no
/// parameters.
#[derive(Debug)]
pub struct SignalBuilder {
    name: String,
    owner: Type,
    flags: SignalFlags,
    class_closure: Option<Closure>,
    accumulator: Option<Accumulator>,
    return_type: Type,
    param_types: Vec<Type>,
}

impl SignalBuilder {
    pub fn new(name: &str, owner: Type) -> Self {
        SignalBuilder {
            name: name.to_string(),
            owner,
            flags: SignalFlags::RUN_LAST,
            class_closure: None,
            accumulator: None,
            return_type: Type::NONE,
            param_types: Vec::new(),
        }
    }

    #[must_use]
    pub fn flags(mut self, flags: SignalFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn class_closure(mut self, closure: Closure) -> Self {
        self.class_closure = Some(closure);
        self
    }

    /// Uses a plain function as class handler.
    #[must_use]
    pub fn class_handler(self, handler: ClassHandlerFn) -> Self {
        self.class_closure(Closure::new(move |params| handler(params)))
    }

    #[must_use]
    pub fn accumulator(mut self, accumulator: Accumulator) -> Self {
        self.accumulator = Some(accumulator);
        self
    }

    #[must_use]
    pub fn return_type(mut self, ty: Type) -> Self {
        self.return_type = ty;
        self
    }

    #[must_use]
    pub fn param_types(mut self, types: &[Type]) -> Self {
        self.param_types = types.to_vec();
        self
    }

    pub fn build(self) -> SignalId {
        new(
            &self.name,
            self.owner,
            self.flags,
            self.class_closure,
            self.accumulator,
            self.return_type,
            &self.param_types,
        )
    }
}

/// Finds a signal by name on `ty`, its ancestors or its interfaces.
pub fn lookup(name: &str, ty: Type) -> SignalId {
    // Built-in signal names are interned when the registry is created.
    let registry = registry().read();
    let Some(quark) = Quark::try_from_str(&canonical_name(name)) else {
        return SignalId::INVALID;
    };
    registry.lookup(ty, quark).unwrap_or(SignalId::INVALID)
}

/// Splits `name::detail` and resolves it on `ty`.
///
/// Fails if the signal is unknown, or a detail is given to a signal that
/// is not `DETAILED`.
pub fn parse_name(detailed: &str, ty: Type) -> Option<(SignalId, Quark)> {
    let (name, detail) = match detailed.split_once("::") {
        Some((_, "")) => return None,
        Some((name, detail)) => (name, Some(detail)),
        None => (detailed, None),
    };
    let id = lookup(name, ty);
    let node = signal_node(id)?;
    match detail {
        None => Some((id, Quark::default())),
        Some(detail) if node.flags.contains(SignalFlags::DETAILED) => {
            Some((id, Quark::from_str(detail)))
        }
        Some(_) => None,
    }
}

pub fn query(id: SignalId) -> Option<SignalQuery> {
    let node = signal_node(id)?;
    Some(SignalQuery {
        id: node.id,
        name: node.name,
        owner: node.owner,
        flags: node.flags,
        return_type: node.return_type,
        param_types: node.param_types.clone(),
    })
}

pub fn name(id: SignalId) -> Option<&'static str> {
    signal_node(id).map(|n| n.name)
}

/// Lists the signals registered on exactly `ty`.
pub fn list_ids(ty: Type) -> Vec<SignalId> {
    registry()
        .read()
        .nodes
        .iter()
        .filter(|n| n.owner == ty)
        .map(|n| n.id)
        .collect()
}

// Handlers

pub(crate) struct Handler {
    id: HandlerId,
    signal: SignalId,
    detail: Quark,
    closure: Closure,
    after: bool,
    block_count: AtomicU32,
    connected: AtomicBool,
}

impl Handler {
    fn matches(&self, signal: SignalId, detail: Quark) -> bool {
        self.signal == signal && (self.detail.is_none() || self.detail == detail)
    }

    fn is_live(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closure.is_invalid()
    }

    fn is_runnable(&self) -> bool {
        self.is_live() && self.block_count.load(Ordering::Acquire) == 0
    }
}

/// Per-instance handler list.
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: Vec<Arc<Handler>>,
}

impl HandlerTable {
    /// Removes handlers whose closure was invalidated. The caller drops the
    /// returned handlers after releasing the table lock.
    fn prune(&mut self) -> Vec<Arc<Handler>> {
        let (dead, live) = std::mem::take(&mut self.handlers)
            .into_iter()
            .partition(|h| h.closure.is_invalid());
        self.handlers = live;
        dead
    }

    fn find(&self, id: HandlerId) -> Option<&Arc<Handler>> {
        self.handlers.iter().find(|h| h.id == id)
    }
}

fn next_handler_id() -> HandlerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Connects `closure` to a signal by id.
pub fn connect_by_id(
    obj: &Object,
    signal_id: SignalId,
    detail: Quark,
    closure: Closure,
    after: bool,
) -> HandlerId {
    let Some(node) = signal_node(signal_id) else {
        critical!("no signal with id {}", signal_id.0);
        return HandlerId::INVALID;
    };
    if !obj.is_a(node.owner) {
        critical!("type '{}' has no signal '{}'", obj.type_().name(), node.name);
        return HandlerId::INVALID;
    }
    if !detail.is_none() && !node.flags.contains(SignalFlags::DETAILED) {
        critical!("signal '{}' does not support details", node.name);
        return HandlerId::INVALID;
    }
    if obj.is_finalizing() {
        critical!("cannot connect to a finalizing instance");
        return HandlerId::INVALID;
    }

    let id = next_handler_id();
    let handler = Arc::new(Handler {
        id,
        signal: signal_id,
        detail,
        closure,
        after,
        block_count: AtomicU32::new(0),
        connected: AtomicBool::new(true),
    });
    let dead = {
        let mut table = obj.handlers().lock();
        let dead = table.prune();
        table.handlers.push(handler);
        dead
    };
    drop(dead);
    id
}

/// Connects `closure` to a `name` or `name::detail` signal.
pub fn connect_closure(obj: &Object, detailed: &str, closure: Closure, after: bool) -> HandlerId {
    match parse_name(detailed, obj.type_()) {
        Some((id, detail)) => connect_by_id(obj, id, detail, closure, after),
        None => {
            critical!("type '{}' has no signal '{}'", obj.type_().name(), detailed);
            HandlerId::INVALID
        }
    }
}

/// Connects a handler that receives the instance followed by the signal
/// arguments.
pub fn connect<F>(obj: &Object, detailed: &str, f: F) -> HandlerId
where
    F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
{
    connect_closure(obj, detailed, Closure::new(f), false)
}

/// [`connect`] for the `after == true` group.
pub fn connect_after<F>(obj: &Object, detailed: &str, f: F) -> HandlerId
where
    F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
{
    connect_closure(obj, detailed, Closure::new(f), true)
}

/// Connects a handler bound to `target`; it is disconnected once `target`
/// is disposed.
pub fn connect_object<F>(obj: &Object, detailed: &str, target: &Object, f: F, after: bool) -> HandlerId
where
    F: Fn(&Object, &[Value]) -> Option<Value> + Send + Sync + 'static,
{
    connect_closure(obj, detailed, Closure::with_object(target, f), after)
}

/// Connects to "notify", or "notify::`property`".
pub fn connect_notify<F>(obj: &Object, property: Option<&str>, f: F) -> HandlerId
where
    F: Fn(&Object, &ParamSpec) + Send + Sync + 'static,
{
    let detailed = match property {
        Some(p) => format!("{NOTIFY}::{}", canonical_name(p)),
        None => NOTIFY.to_string(),
    };
    let closure = Closure::new(move |params| {
        let instance = params.first()?.object_ref()?;
        let pspec = params.get(1)?.get_param()?;
        f(instance, &pspec);
        None
    });
    connect_closure(obj, &detailed, closure, false)
}

/// Disconnects a handler and invalidates its closure. Returns false if the
/// id is not connected on `obj`.
pub fn disconnect(obj: &Object, id: HandlerId) -> bool {
    let removed = {
        let mut table = obj.handlers().lock();
        let pos = table.handlers.iter().position(|h| h.id == id);
        pos.map(|p| table.handlers.remove(p))
    };
    match removed {
        Some(handler) => {
            handler.connected.store(false, Ordering::Release);
            handler.closure.invalidate();
            true
        }
        None => false,
    }
}

/// Disconnects every handler of `obj`. Returns how many were connected.
pub fn handlers_disconnect_all(obj: &Object) -> usize {
    let handlers = std::mem::take(&mut obj.handlers().lock().handlers);
    let count = handlers.len();
    for handler in handlers {
        handler.connected.store(false, Ordering::Release);
        handler.closure.invalidate();
    }
    count
}

pub(crate) fn destroy_handlers(obj: &Object) {
    handlers_disconnect_all(obj);
}

/// Blocks a handler; blocks nest.
pub fn block(obj: &Object, id: HandlerId) -> bool {
    let table = obj.handlers().lock();
    match table.find(id) {
        Some(h) => {
            h.block_count.fetch_add(1, Ordering::AcqRel);
            true
        }
        None => {
            critical!("no handler with id {} on this instance", id.0);
            false
        }
    }
}

/// Undoes one [`block`].
pub fn unblock(obj: &Object, id: HandlerId) -> bool {
    let table = obj.handlers().lock();
    let Some(h) = table.find(id) else {
        critical!("no handler with id {} on this instance", id.0);
        return false;
    };
    let unblocked = h
        .block_count
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok();
    if !unblocked {
        critical!("handler {} is not blocked", id.0);
    }
    unblocked
}

pub fn handler_is_connected(obj: &Object, id: HandlerId) -> bool {
    obj.handlers().lock().find(id).is_some_and(|h| h.is_live())
}

/// Returns true if some handler would run for `signal_id` and `detail`.
pub fn has_handler_pending(obj: &Object, signal_id: SignalId, detail: Quark, may_be_blocked: bool) -> bool {
    obj.handlers().lock().handlers.iter().any(|h| {
        h.matches(signal_id, detail)
            && h.is_live()
            && (may_be_blocked || h.block_count.load(Ordering::Acquire) == 0)
    })
}

// Class closures

/// Installs `closure` as the class closure of `signal_id` for `ty` and its
/// descendants.
pub fn override_class_closure(signal_id: SignalId, ty: Type, closure: Closure) {
    let Some(node) = signal_node(signal_id) else {
        critical!("no signal with id {}", signal_id.0);
        return;
    };
    if !ty.is_a(node.owner) {
        critical!("type '{}' cannot override signal '{}'", ty.name(), node.name);
        return;
    }
    let mut closures = node.class_closures.write();
    if closures.iter().any(|(t, _)| *t == ty) {
        critical!("type '{}' already overrides signal '{}'", ty.name(), node.name);
        return;
    }
    closures.push((ty, closure));
}

/// [`override_class_closure`] with a plain function, looked up by name.
pub fn override_class_handler(name: &str, ty: Type, handler: ClassHandlerFn) {
    let id = lookup(name, ty);
    if !id.is_valid() {
        critical!("type '{}' has no signal '{}'", ty.name(), name);
        return;
    }
    override_class_closure(id, ty, Closure::new(move |params| handler(params)));
}

struct ChainFrame {
    hint: InvocationHint,
    /// Type whose class closure is running.
    ty: Type,
    instance: usize,
}

thread_local! {
    static CHAIN: RefCell<Vec<ChainFrame>> = const { RefCell::new(Vec::new()) };
}

fn invoke_class_closure(ty: Type, closure: &Closure, params: &[Value], hint: InvocationHint) -> Option<Value> {
    let instance = params.first().and_then(Value::object_ref).map_or(0, Object::as_ptr);
    CHAIN.with(|c| c.borrow_mut().push(ChainFrame { hint, ty, instance }));

    struct Pop;
    impl Drop for Pop {
        fn drop(&mut self) {
            CHAIN.with(|c| c.borrow_mut().pop());
        }
    }
    let _pop = Pop;
    closure.invoke(params, Some(&hint))
}

/// Runs the class closure the currently running one overrides.
///
/// Only valid from within a class closure; returns `None` if no ancestor
/// installed one.
pub fn chain_from_overridden(params: &[Value]) -> Option<Value> {
    let instance = params.first().and_then(Value::object_ref).map_or(0, Object::as_ptr);
    let frame = CHAIN.with(|c| {
        c.borrow()
            .iter()
            .rev()
            .find(|f| f.instance == instance)
            .map(|f| (f.hint, f.ty))
    });
    let Some((hint, ty)) = frame else {
        critical!("chain_from_overridden called outside a class closure");
        return None;
    };
    let node = signal_node(hint.signal_id)?;
    let parent = ty.parent()?;
    let (owner, closure) = node.class_closure(parent)?;
    invoke_class_closure(owner, &closure, params, hint)
}

// Emission hooks

/// Adds a process-wide observer run before the handlers of every emission
/// of `signal_id` (with matching detail, if one is given).
pub fn add_emission_hook<F>(signal_id: SignalId, detail: Quark, f: F) -> HookId
where
    F: Fn(&InvocationHint, &[Value]) -> bool + Send + Sync + 'static,
{
    let Some(node) = signal_node(signal_id) else {
        critical!("no signal with id {}", signal_id.0);
        return HookId(0);
    };
    if node.flags.contains(SignalFlags::NO_HOOKS) {
        critical!("signal '{}' does not support emission hooks", node.name);
        return HookId(0);
    }
    if !detail.is_none() && !node.flags.contains(SignalFlags::DETAILED) {
        critical!("signal '{}' does not support details", node.name);
        return HookId(0);
    }
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let id = NEXT.fetch_add(1, Ordering::Relaxed);
    node.hooks.lock().push(EmissionHook {
        id,
        detail,
        func: Arc::new(f),
    });
    HookId(id)
}

pub fn remove_emission_hook(signal_id: SignalId, hook: HookId) -> bool {
    let Some(node) = signal_node(signal_id) else {
        critical!("no signal with id {}", signal_id.0);
        return false;
    };
    let mut hooks = node.hooks.lock();
    let before = hooks.len();
    hooks.retain(|h| h.id != hook.0);
    if hooks.len() == before {
        critical!("signal '{}' has no emission hook {}", node.name, hook.0);
        return false;
    }
    true
}

// Emission

struct Emission {
    id: u64,
    instance: usize,
    signal: SignalId,
    detail: Quark,
    stopped: bool,
}

thread_local! {
    /// Emissions running on this thread, innermost last.
    static EMISSIONS: RefCell<Vec<Emission>> = const { RefCell::new(Vec::new()) };
}

struct EmissionGuard(u64);

impl EmissionGuard {
    fn is_stopped(&self) -> bool {
        EMISSIONS.with(|e| e.borrow().iter().any(|e| e.id == self.0 && e.stopped))
    }
}

impl Drop for EmissionGuard {
    fn drop(&mut self) {
        EMISSIONS.with(|e| e.borrow_mut().retain(|e| e.id != self.0));
    }
}

/// Stops the innermost emission of `signal_id` with `detail` on `obj`
/// running on the calling thread. The remaining handlers and the class
/// handler are skipped; the cleanup stage still runs.
pub fn stop_emission(obj: &Object, signal_id: SignalId, detail: Quark) {
    let instance = obj.as_ptr();
    let stopped = EMISSIONS.with(|e| {
        e.borrow_mut()
            .iter_mut()
            .rev()
            .find(|e| e.instance == instance && e.signal == signal_id && e.detail == detail)
            .map(|e| e.stopped = true)
            .is_some()
    });
    if !stopped {
        critical!("no emission of signal {} to stop on this instance", signal_id.0);
    }
}

/// [`stop_emission`] with a `name::detail` string.
pub fn stop_emission_by_name(obj: &Object, detailed: &str) {
    match parse_name(detailed, obj.type_()) {
        Some((id, detail)) => stop_emission(obj, id, detail),
        None => critical!("type '{}' has no signal '{}'", obj.type_().name(), detailed),
    }
}

/// Emits a signal by `name::detail`; see [`emit`].
pub fn emit_by_name(obj: &Object, detailed: &str, args: &[Value]) -> Option<Value> {
    match parse_name(detailed, obj.type_()) {
        Some((id, detail)) => emit(obj, id, detail, args),
        None => {
            critical!("type '{}' has no signal '{}'", obj.type_().name(), detailed);
            None
        }
    }
}

/// Emits a signal on `obj`. `args` excludes the instance.
///
/// Returns the accumulated return value, `None` for signals without one
/// or on misuse.
pub fn emit(obj: &Object, signal_id: SignalId, detail: Quark, args: &[Value]) -> Option<Value> {
    let Some(node) = signal_node(signal_id) else {
        critical!("no signal with id {}", signal_id.0);
        return None;
    };
    if !obj.is_a(node.owner) {
        critical!("type '{}' has no signal '{}'", obj.type_().name(), node.name);
        return None;
    }
    if obj.is_finalizing() {
        critical!("cannot emit '{}' on a finalizing instance", node.name);
        return None;
    }
    if !detail.is_none() && !node.flags.contains(SignalFlags::DETAILED) {
        critical!("signal '{}' does not support details", node.name);
        return None;
    }
    if args.len() != node.param_types.len() {
        critical!(
            "signal '{}' takes {} arguments, got {}",
            node.name,
            node.param_types.len(),
            args.len()
        );
        return None;
    }
    for (i, (arg, ty)) in args.iter().zip(&node.param_types).enumerate() {
        if !arg.holds(*ty) {
            critical!(
                "argument {} of signal '{}' must be '{}', got '{}'",
                i,
                node.name,
                ty.name(),
                arg.type_().name()
            );
            return None;
        }
    }
    if node.flags.contains(SignalFlags::DEPRECATED) {
        oxitype_log::warn!("signal '{}' is deprecated", node.name);
    }

    let default = (node.return_type != Type::NONE).then(|| Value::new(node.return_type));
    let instance = obj.as_ptr();

    // Recursion is only checked against emissions on this thread.
    let guard = EMISSIONS.with(|emissions| {
        let mut emissions = emissions.borrow_mut();
        if node.flags.contains(SignalFlags::NO_RECURSE)
            && emissions
                .iter()
                .any(|e| e.instance == instance && e.signal == signal_id && e.detail == detail)
        {
            return None;
        }
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        emissions.push(Emission {
            id,
            instance,
            signal: signal_id,
            detail,
            stopped: false,
        });
        Some(EmissionGuard(id))
    });
    let Some(guard) = guard else {
        return default;
    };

    let mut params = Vec::with_capacity(args.len() + 1);
    params.push(obj.to_value());
    params.extend_from_slice(args);

    run_emission(obj, node, detail, &params, default, &guard)
}

fn run_emission(
    obj: &Object,
    node: &'static SignalNode,
    detail: Quark,
    params: &[Value],
    mut acc: Option<Value>,
    guard: &EmissionGuard,
) -> Option<Value> {
    let mut hint = InvocationHint {
        signal_id: node.id,
        detail,
        run_type: SignalFlags::RUN_FIRST,
    };
    let snapshot: Vec<Arc<Handler>> = obj
        .handlers()
        .lock()
        .handlers
        .iter()
        .filter(|h| h.matches(node.id, detail))
        .cloned()
        .collect();
    let class_closure = node.class_closure(obj.type_());

    let mut running = run_hooks(node, &hint, params);

    if running && node.flags.contains(SignalFlags::RUN_FIRST) {
        if let Some((ty, closure)) = &class_closure {
            let ret = invoke_class_closure(*ty, closure, params, hint);
            running = accumulate(node, &hint, &mut acc, ret) && !guard.is_stopped();
        }
    }

    if running {
        running = run_handlers(node, &hint, &snapshot, false, params, &mut acc, guard);
    }

    hint.run_type = SignalFlags::RUN_LAST;
    if running && node.flags.contains(SignalFlags::RUN_LAST) {
        if let Some((ty, closure)) = &class_closure {
            let ret = invoke_class_closure(*ty, closure, params, hint);
            running = accumulate(node, &hint, &mut acc, ret) && !guard.is_stopped();
        }
    }

    if running {
        run_handlers(node, &hint, &snapshot, true, params, &mut acc, guard);
    }

    if node.flags.contains(SignalFlags::RUN_CLEANUP) {
        if let Some((ty, closure)) = &class_closure {
            hint.run_type = SignalFlags::RUN_CLEANUP;
            invoke_class_closure(*ty, closure, params, hint);
        }
    }
    acc
}

fn run_hooks(node: &SignalNode, hint: &InvocationHint, params: &[Value]) -> bool {
    if node.flags.contains(SignalFlags::NO_HOOKS) {
        return true;
    }
    let hooks: Vec<HookFn> = node
        .hooks
        .lock()
        .iter()
        .filter(|h| h.detail.is_none() || h.detail == hint.detail)
        .map(|h| Arc::clone(&h.func))
        .collect();
    hooks.iter().all(|hook| hook(hint, params))
}

fn run_handlers(
    node: &SignalNode,
    hint: &InvocationHint,
    snapshot: &[Arc<Handler>],
    after: bool,
    params: &[Value],
    acc: &mut Option<Value>,
    guard: &EmissionGuard,
) -> bool {
    for handler in snapshot.iter().filter(|h| h.after == after) {
        if !handler.is_runnable() {
            continue;
        }
        let ret = handler.closure.invoke(params, Some(hint));
        if !accumulate(node, hint, acc, ret) || guard.is_stopped() {
            return false;
        }
    }
    true
}

/// Folds `ret` into `acc`. Returns false to stop the emission.
fn accumulate(node: &SignalNode, hint: &InvocationHint, acc: &mut Option<Value>, ret: Option<Value>) -> bool {
    let Some(acc) = acc else {
        return true;
    };
    let ret = match ret {
        Some(v) if v.holds(node.return_type) => v,
        Some(v) => match v.transform_to(node.return_type) {
            Some(converted) => converted,
            None => {
                critical!(
                    "handler of '{}' returned '{}' instead of '{}'",
                    node.name,
                    v.type_().name(),
                    node.return_type.name()
                );
                Value::new(node.return_type)
            }
        },
        None => Value::new(node.return_type),
    };
    match node.accumulator {
        Some(accumulator) => accumulator(hint, acc, &ret),
        None => {
            *acc = ret;
            true
        }
    }
}

/// Emits "notify" for `pspec` on `obj`.
pub(crate) fn emit_notify(obj: &Object, pspec: &ParamSpec) {
    emit(obj, notify_id(), pspec.quark(), &[pspec.to_value()]);
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match name(*self) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "<signal {}>", self.0),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("signal", &self.signal)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{TypeFlags, TypeInfo};
    use std::sync::atomic::AtomicUsize;

    fn unique(prefix: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!("{prefix}{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn fresh_type() -> Type {
        Type::register_static(
            Type::OBJECT,
            &unique("SignalTestEmitter"),
            TypeInfo::new(),
            TypeFlags::empty(),
        )
        .unwrap()
    }

    #[test]
    fn test_registration_and_lookup() {
        let ty = fresh_type();
        let id = new("data_ready", ty, SignalFlags::RUN_LAST, None, None, Type::NONE, &[Type::INT]);
        assert!(id.is_valid());
        assert_eq!(name(id), Some("data-ready"));
        assert_eq!(lookup("data_ready", ty), id);
        assert_eq!(lookup("data-ready", ty), id);
        assert!(!lookup("data-ready", Type::OBJECT).is_valid());
        assert_eq!(list_ids(ty), [id]);

        let q = query(id).unwrap();
        assert_eq!(q.owner, ty);
        assert_eq!(q.param_types, [Type::INT]);

        let (dup, records) = oxitype_log::capture(|| {
            new("data-ready", ty, SignalFlags::RUN_LAST, None, None, Type::NONE, &[])
        });
        assert!(!dup.is_valid());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_parse_name() {
        let notify = lookup("notify", Type::OBJECT);
        assert!(notify.is_valid());
        let (id, detail) = parse_name("notify::label", Type::OBJECT).unwrap();
        assert_eq!(id, notify);
        assert_eq!(detail.as_str(), "label");
        assert!(parse_name("notify::", Type::OBJECT).is_none());

        let ty = fresh_type();
        SignalBuilder::new("plain", ty).build();
        assert!(parse_name("plain", ty).is_some());
        assert!(parse_name("plain::detail", ty).is_none());
    }

    #[test]
    fn test_disconnect_once() {
        let ty = fresh_type();
        SignalBuilder::new("tick", ty).build();
        let obj = Object::new(ty).unwrap();
        let id = connect(&obj, "tick", |_| None);
        assert!(handler_is_connected(&obj, id));
        assert!(disconnect(&obj, id));
        assert!(!disconnect(&obj, id));
        assert!(!handler_is_connected(&obj, id));
    }

    #[test]
    fn test_block_unblock() {
        let ty = fresh_type();
        SignalBuilder::new("tick", ty).build();
        let obj = Object::new(ty).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let id = connect(&obj, "tick", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            None
        });

        block(&obj, id);
        emit_by_name(&obj, "tick", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(has_handler_pending(&obj, lookup("tick", ty), Quark::default(), true));
        assert!(!has_handler_pending(&obj, lookup("tick", ty), Quark::default(), false));

        unblock(&obj, id);
        emit_by_name(&obj, "tick", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (ok, records) = oxitype_log::capture(|| unblock(&obj, id));
        assert!(!ok);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_argument_checks() {
        let ty = fresh_type();
        SignalBuilder::new("sized", ty).param_types(&[Type::UINT]).build();
        let obj = Object::new(ty).unwrap();

        let (_, records) = oxitype_log::capture(|| emit_by_name(&obj, "sized", &[]));
        assert_eq!(records.len(), 1);
        let (_, records) = oxitype_log::capture(|| emit_by_name(&obj, "sized", &[1i32.to_value()]));
        assert_eq!(records.len(), 1);
        let (_, records) = oxitype_log::capture(|| emit_by_name(&obj, "sized::x", &[1u32.to_value()]));
        assert_eq!(records.len(), 1);
        let (_, records) = oxitype_log::capture(|| emit_by_name(&obj, "missing", &[]));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_accumulator_true_handled() {
        let ty = fresh_type();
        SignalBuilder::new("key", ty)
            .return_type(Type::BOOL)
            .accumulator(true_handled)
            .build();
        let obj = Object::new(ty).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        for handled in [false, true, true] {
            let calls = Arc::clone(&calls);
            connect(&obj, "key", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Some(handled.to_value())
            });
        }
        let ret = emit_by_name(&obj, "key", &[]).unwrap();
        assert!(ret.get_bool());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_last_return_wins_and_coerces() {
        let ty = fresh_type();
        SignalBuilder::new("measure", ty).return_type(Type::DOUBLE).build();
        let obj = Object::new(ty).unwrap();
        connect(&obj, "measure", |_| Some(1.5f64.to_value()));
        connect(&obj, "measure", |_| Some(4i32.to_value()));
        let ret = emit_by_name(&obj, "measure", &[]).unwrap();
        assert_eq!(ret.get_double(), 4.0);
    }

    #[test]
    fn test_stop_emission_still_runs_cleanup() {
        fn cleanup(params: &[Value]) -> Option<Value> {
            let obj = params[0].object_ref()?;
            obj.set_data("cleaned", true);
            None
        }
        let ty = fresh_type();
        SignalBuilder::new("closing", ty)
            .flags(SignalFlags::RUN_LAST | SignalFlags::RUN_CLEANUP)
            .class_handler(cleanup)
            .build();
        let obj = Object::new(ty).unwrap();
        let later = Arc::new(AtomicUsize::new(0));
        connect(&obj, "closing", |params| {
            stop_emission_by_name(params[0].object_ref()?, "closing");
            None
        });
        let sink = Arc::clone(&later);
        connect(&obj, "closing", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            None
        });
        emit_by_name(&obj, "closing", &[]);
        assert_eq!(later.load(Ordering::SeqCst), 0);
        assert_eq!(obj.data::<bool>("cleaned").as_deref(), Some(&true));
    }

    #[test]
    fn test_no_recurse() {
        let ty = fresh_type();
        SignalBuilder::new("echo", ty)
            .flags(SignalFlags::RUN_LAST | SignalFlags::NO_RECURSE)
            .build();
        let obj = Object::new(ty).unwrap();
        let depth = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&depth);
        connect(&obj, "echo", move |params| {
            if sink.fetch_add(1, Ordering::SeqCst) < 3 {
                emit_by_name(params[0].object_ref()?, "echo", &[]);
            }
            None
        });
        emit_by_name(&obj, "echo", &[]);
        assert_eq!(depth.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_recurse_is_per_thread() {
        let ty = fresh_type();
        SignalBuilder::new("slow", ty)
            .flags(SignalFlags::RUN_LAST | SignalFlags::NO_RECURSE)
            .build();
        let obj = Object::new(ty).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&runs);
        connect(&obj, "slow", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            None
        });

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let obj = obj.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    emit_by_name(&obj, "slow", &[]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_emission_ignores_other_threads() {
        let ty = fresh_type();
        let id = SignalBuilder::new("long", ty).build();
        let obj = Object::new(ty).unwrap();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        connect(&obj, "long", move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.lock().recv();
            None
        });
        let later = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&later);
        connect(&obj, "long", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            None
        });

        let emitter = {
            let obj = obj.clone();
            std::thread::spawn(move || {
                emit_by_name(&obj, "long", &[]);
            })
        };
        entered_rx.recv().unwrap();
        let ((), records) = oxitype_log::capture(|| stop_emission(&obj, id, Quark::default()));
        assert_eq!(records.len(), 1);
        release_tx.send(()).unwrap();
        emitter.join().unwrap();
        assert_eq!(later.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emission_hook_veto() {
        let ty = fresh_type();
        let id = SignalBuilder::new("guarded", ty).build();
        let obj = Object::new(ty).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        connect(&obj, "guarded", move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            None
        });
        let hook = add_emission_hook(id, Quark::default(), |_, _| false);
        emit(&obj, id, Quark::default(), &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(remove_emission_hook(id, hook));
        emit(&obj, id, Quark::default(), &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let notify = lookup("notify", Type::OBJECT);
        let (hook, records) = oxitype_log::capture(|| add_emission_hook(notify, Quark::default(), |_, _| true));
        assert_eq!(hook, HookId(0));
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_handler_connected_during_emission_waits() {
        let ty = fresh_type();
        SignalBuilder::new("grow", ty).build();
        let obj = Object::new(ty).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        connect(&obj, "grow", move |params| {
            let sink = Arc::clone(&sink);
            connect(params[0].object_ref()?, "grow", move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
                None
            });
            None
        });
        emit_by_name(&obj, "grow", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        emit_by_name(&obj, "grow", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_object_disconnects_with_target() {
        let ty = fresh_type();
        SignalBuilder::new("ping", ty).build();
        let source = Object::new(ty).unwrap();
        let target = Object::new(Type::OBJECT).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let id = connect_object(
            &source,
            "ping",
            &target,
            move |_, _| {
                sink.fetch_add(1, Ordering::SeqCst);
                None
            },
            false,
        );
        emit_by_name(&source, "ping", &[]);
        drop(target);
        emit_by_name(&source, "ping", &[]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handler_is_connected(&source, id));
    }

    #[test]
    fn test_dispose_disconnects_handlers() {
        let ty = fresh_type();
        SignalBuilder::new("gone", ty).build();
        let obj = Object::new(ty).unwrap();
        let closure = Closure::new(|_| None);
        let id = connect_closure(&obj, "gone", closure.clone(), false);
        obj.run_dispose();
        assert!(!handler_is_connected(&obj, id));
        assert!(closure.is_invalid());
    }
}
