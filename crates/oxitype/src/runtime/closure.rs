//! Closures: reference-counted callables invoked with value arrays.
//!
//! A [`Closure`] pairs a callee with a marshaller. The marshaller knows the
//! callee's concrete Rust type and translates a slice of [`Value`]s into a
//! native call, so signal emission can invoke handlers of any signature
//! through one entry point.
//!
//! # Lifecycle
//!
//! Closures are shared with `Clone`. [`Closure::invalidate`] runs the
//! invalidation notifiers exactly once and turns every later invocation into
//! a no-op. Finalization notifiers run when the last reference is dropped.
//! A one-shot closure invalidates itself after its first invocation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::runtime::object::Object;
use crate::runtime::signal::InvocationHint;
use crate::runtime::value::{FromValue, ToValue, Value};

/// Translates values into a call of the type-erased callee.
pub type Marshal =
    fn(callee: &(dyn Any + Send + Sync), params: &[Value], hint: Option<&InvocationHint>) -> Option<Value>;

/// A handler stored in a class struct, called with the emission parameters.
pub type ClassHandlerFn = fn(&[Value]) -> Option<Value>;

const INVALID: u32 = 1 << 0;
const ONE_SHOT: u32 = 1 << 1;

/// Identifies a notifier registered on a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierId(u64);

type Notifier = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Notifiers {
    invalidate: Vec<(NotifierId, Notifier)>,
    finalize: Vec<(NotifierId, Notifier)>,
}

struct Inner {
    callee: Box<dyn Any + Send + Sync>,
    marshal: RwLock<Marshal>,
    flags: AtomicU32,
    in_marshal: AtomicU32,
    notifiers: Mutex<Notifiers>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let finalize = std::mem::take(&mut self.notifiers.get_mut().finalize);
        for (_, notify) in finalize {
            notify();
        }
    }
}

/// A reference-counted callable.
///
/// # Example
///
/// ```
/// use oxitype::runtime::{Closure, ToValue};
///
/// let add = Closure::typed(|a: i32, b: i32| a + b);
/// let sum = add.invoke(&[2i32.to_value(), 3i32.to_value()], None);
/// assert_eq!(sum.and_then(|v| v.get::<i32>()), Some(5));
///
/// add.invalidate();
/// assert!(add.invoke(&[2i32.to_value(), 3i32.to_value()], None).is_none());
/// ```
#[derive(Clone)]
pub struct Closure(Arc<Inner>);

fn next_notifier_id() -> NotifierId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NotifierId(NEXT.fetch_add(1, Ordering::Relaxed))
}

fn marshal_dynamic<F>(callee: &(dyn Any + Send + Sync), params: &[Value], _: Option<&InvocationHint>) -> Option<Value>
where
    F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
{
    callee.downcast_ref::<F>().and_then(|f| f(params))
}

fn marshal_typed<F, Args>(callee: &(dyn Any + Send + Sync), params: &[Value], _: Option<&InvocationHint>) -> Option<Value>
where
    F: ClosureFn<Args>,
    Args: 'static,
{
    callee.downcast_ref::<F>().and_then(|f| f.call(params))
}

impl Closure {
    fn from_parts(callee: Box<dyn Any + Send + Sync>, marshal: Marshal) -> Self {
        Closure(Arc::new(Inner {
            callee,
            marshal: RwLock::new(marshal),
            flags: AtomicU32::new(0),
            in_marshal: AtomicU32::new(0),
            notifiers: Mutex::new(Notifiers::default()),
        }))
    }

    /// Wraps a callable that takes the raw parameter values.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        Self::from_parts(Box::new(f), marshal_dynamic::<F>)
    }

    /// Wraps a callable with typed arguments, extracted from the parameter
    /// values in order. Extra parameters are ignored.
    pub fn typed<F, Args>(f: F) -> Self
    where
        F: ClosureFn<Args>,
        Args: 'static,
    {
        Self::from_parts(Box::new(f), marshal_typed::<F, Args>)
    }

    /// Wraps a callable bound to `obj`.
    ///
    /// The closure holds `obj` weakly and is invalidated when `obj` is
    /// disposed; until then `f` receives `obj` along with the parameters.
    pub fn with_object<F>(obj: &Object, f: F) -> Self
    where
        F: Fn(&Object, &[Value]) -> Option<Value> + Send + Sync + 'static,
    {
        let weak = obj.downgrade();
        let closure = Closure::new(move |params| {
            let target = weak.upgrade()?;
            f(&target, params)
        });
        obj.watch_closure(&closure);
        closure
    }

    /// Builds a closure that calls the handler selected from the class
    /// struct `S` of the instance in the first parameter.
    ///
    /// Overrides installed by subclasses are picked up at call time.
    pub fn class_handler<S: Any>(select: fn(&S) -> Option<ClassHandlerFn>) -> Self {
        Closure::new(move |params| {
            let instance = params.first()?.object_ref()?;
            let handler = select(instance.class().struct_ref::<S>()?)?;
            handler(params)
        })
    }

    /// Replaces the marshaller.
    pub fn set_marshal(&self, marshal: Marshal) {
        return_if_fail!(!self.is_in_marshal());
        *self.0.marshal.write() = marshal;
    }

    /// Makes the first invocation also invalidate the closure.
    #[must_use]
    pub fn one_shot(self) -> Self {
        self.0.flags.fetch_or(ONE_SHOT, Ordering::AcqRel);
        self
    }

    /// Invokes the callee. Returns `None` for invalid closures.
    ///
    /// A one-shot closure is invalidated before its callee runs, so only one
    /// of several concurrent callers invokes it; the invalidation notifiers
    /// run once the callee returns.
    pub fn invoke(&self, params: &[Value], hint: Option<&InvocationHint>) -> Option<Value> {
        let one_shot = self.0.flags.load(Ordering::Acquire) & ONE_SHOT != 0;
        if one_shot {
            if !self.mark_invalid() {
                return None;
            }
        } else if self.is_invalid() {
            return None;
        }
        let marshal = *self.0.marshal.read();

        struct InMarshal<'a>(&'a AtomicU32);
        impl Drop for InMarshal<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.0.in_marshal.fetch_add(1, Ordering::AcqRel);
        let guard = InMarshal(&self.0.in_marshal);

        let result = marshal(&*self.0.callee, params, hint);
        drop(guard);

        if one_shot {
            self.run_invalidate_notifiers();
        }
        result
    }

    /// Marks the closure unusable and runs the invalidation notifiers once.
    pub fn invalidate(&self) {
        if self.mark_invalid() {
            self.run_invalidate_notifiers();
        }
    }

    /// Sets the invalid bit; true for the caller that set it.
    fn mark_invalid(&self) -> bool {
        self.0.flags.fetch_or(INVALID, Ordering::AcqRel) & INVALID == 0
    }

    fn run_invalidate_notifiers(&self) {
        let notifiers = std::mem::take(&mut self.0.notifiers.lock().invalidate);
        for (_, notify) in notifiers {
            notify();
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.0.flags.load(Ordering::Acquire) & INVALID != 0
    }

    /// Returns true while an invocation is running.
    pub fn is_in_marshal(&self) -> bool {
        self.0.in_marshal.load(Ordering::Acquire) > 0
    }

    /// Runs `notify` when the closure is invalidated, or right away if it
    /// already is.
    pub fn add_invalidate_notifier(&self, notify: impl FnOnce() + Send + 'static) -> NotifierId {
        let id = next_notifier_id();
        {
            let mut notifiers = self.0.notifiers.lock();
            if !self.is_invalid() {
                notifiers.invalidate.push((id, Box::new(notify)));
                return id;
            }
        }
        notify();
        id
    }

    /// Runs `notify` when the last reference is dropped.
    pub fn add_finalize_notifier(&self, notify: impl FnOnce() + Send + 'static) -> NotifierId {
        let id = next_notifier_id();
        self.0.notifiers.lock().finalize.push((id, Box::new(notify)));
        id
    }

    /// Removes a pending notifier without running it.
    pub fn remove_notifier(&self, id: NotifierId) -> bool {
        let mut notifiers = self.0.notifiers.lock();
        let before = notifiers.invalidate.len() + notifiers.finalize.len();
        notifiers.invalidate.retain(|(n, _)| *n != id);
        notifiers.finalize.retain(|(n, _)| *n != id);
        before != notifiers.invalidate.len() + notifiers.finalize.len()
    }

    /// Returns the number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Returns true if both handles share one closure.
    pub fn ptr_eq(&self, other: &Closure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the address identifying this closure.
    pub fn as_ptr(&self) -> usize {
        Arc::as_ptr(&self.0).addr()
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("invalid", &self.is_invalid())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Callables whose arguments can be extracted from values.
pub trait ClosureFn<Args>: Send + Sync + 'static {
    /// Calls with arguments taken from `params`; `None` on a mismatch.
    fn call(&self, params: &[Value]) -> Option<Value>;
}

/// Return types a typed closure can produce.
pub trait IntoClosureReturn {
    fn into_return(self) -> Option<Value>;
}

impl IntoClosureReturn for () {
    fn into_return(self) -> Option<Value> {
        None
    }
}

impl<T: ToValue> IntoClosureReturn for T {
    fn into_return(self) -> Option<Value> {
        Some(self.to_value())
    }
}

fn argument<T: FromValue>(params: &[Value], index: usize) -> Option<T> {
    let Some(value) = params.get(index) else {
        critical!("closure expects at least {} arguments, got {}", index + 1, params.len());
        return None;
    };
    let arg = T::from_value(value);
    if arg.is_none() {
        critical!(
            "closure argument {} of type '{}' does not convert to {}",
            index,
            value.type_().name(),
            std::any::type_name::<T>()
        );
    }
    arg
}

macro_rules! closure_fn {
    ($($arg:ident $val:ident: $idx:tt),*) => {
        impl<F, R, $($arg,)*> ClosureFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoClosureReturn,
            $($arg: FromValue,)*
        {
            #[allow(unused_variables)]
            fn call(&self, params: &[Value]) -> Option<Value> {
                $(let $val = argument::<$arg>(params, $idx)?;)*
                self($($val),*).into_return()
            }
        }
    };
}

closure_fn!();
closure_fn!(A0 a0: 0);
closure_fn!(A0 a0: 0, A1 a1: 1);
closure_fn!(A0 a0: 0, A1 a1: 1, A2 a2: 2);
closure_fn!(A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3);
closure_fn!(A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4);
closure_fn!(A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5);
