//! Atomics and one-time initialization.
//!
//! Two primitives the rest of the runtime is built on:
//!
//! - [`OnceSlot`]: an exactly-once initialization barrier with explicit
//!   `enter` / `leave`. One thread wins `enter`, every other caller blocks
//!   until the winner publishes a value with `leave`.
//! - [`BitLock`]: a one-word spinlock whose upper bit is the lock and whose
//!   remaining bits carry atomic flags. Instances embed one in their header
//!   so the lock costs no extra memory.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;
const POISONED: u8 = 3;

/// All `OnceSlot` waiters park on this pair.
static WAIT_LOCK: Mutex<()> = Mutex::new(());
static WAIT_COND: Condvar = Condvar::new();

/// Exactly-once initialization slot.
///
/// # Example
///
/// ```
/// use oxitype::runtime::OnceSlot;
///
/// static SLOT: OnceSlot<u32> = OnceSlot::new();
///
/// if SLOT.enter() {
///     SLOT.leave(7);
/// }
/// assert_eq!(SLOT.get(), Some(&7));
/// assert!(!SLOT.enter());
/// ```
pub struct OnceSlot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the value is written once by the thread that won `enter`, published
// with release ordering, and only read after an acquire load sees READY.
unsafe impl<T: Send + Sync> Sync for OnceSlot<T> {}
unsafe impl<T: Send> Send for OnceSlot<T> {}

impl<T> OnceSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Returns true to exactly one caller, which must then call
    /// [`leave`](Self::leave) (or [`poison`](Self::poison)).
    ///
    /// Every other caller blocks until the slot is settled and gets false.
    pub fn enter(&self) -> bool {
        match self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(READY | POISONED) => false,
            Err(_) => {
                let mut guard = WAIT_LOCK.lock();
                while self.state.load(Ordering::Acquire) == BUSY {
                    WAIT_COND.wait(&mut guard);
                }
                false
            }
        }
    }

    /// Publishes `value` and wakes every waiter.
    ///
    /// Calling `leave` without having won `enter` is a programming error and
    /// leaves the slot untouched.
    pub fn leave(&self, value: T) {
        if self.state.load(Ordering::Acquire) != BUSY {
            critical!("OnceSlot::leave called without a matching enter");
            return;
        }

        // SAFETY: BUSY means this thread won `enter`; nobody reads the value
        // before READY is stored below.
        unsafe { (*self.value.get()).write(value) };
        self.settle(READY);
    }

    /// Gives up initialization. Waiters return and the slot stays empty for
    /// good.
    pub fn poison(&self) {
        if self.state.load(Ordering::Acquire) == BUSY {
            self.settle(POISONED);
        }
    }

    fn settle(&self, state: u8) {
        let _guard = WAIT_LOCK.lock();
        self.state.store(state, Ordering::Release);
        WAIT_COND.notify_all();
    }

    /// Returns the published value.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY is stored only after the value was written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Returns true if initialization was abandoned.
    pub fn is_poisoned(&self) -> bool {
        self.state.load(Ordering::Acquire) == POISONED
    }

    /// Runs `init` on the first call and returns the published value.
    ///
    /// If `init` panics the slot is poisoned and the panic resumes. Returns
    /// `None` on a poisoned slot.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> Option<&T> {
        if let Some(value) = self.get() {
            return Some(value);
        }

        if self.enter() {
            struct PoisonOnUnwind<'a, T>(&'a OnceSlot<T>);
            impl<T> Drop for PoisonOnUnwind<'_, T> {
                fn drop(&mut self) {
                    self.0.poison();
                }
            }

            let guard = PoisonOnUnwind(self);
            let value = init();
            std::mem::forget(guard);
            self.leave(value);
        }

        self.get()
    }
}

impl<T> Default for OnceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for OnceSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means the value is initialized; we have &mut self.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

/// Lock bit of a [`BitLock`] word.
const LOCK_BIT: u32 = 1 << 31;

/// Spins before yielding the thread.
const SPIN_LIMIT: u32 = 64;

/// A spinlock packed into the top bit of a `u32` whose other bits are flags.
///
/// Flags can be read and changed atomically without taking the lock. The
/// protected data is only reachable through [`BitLockGuard`]. Code holding
/// the guard must never call out to user code.
pub(crate) struct BitLock<T> {
    word: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the lock bit.
unsafe impl<T: Send> Send for BitLock<T> {}
unsafe impl<T: Send> Sync for BitLock<T> {}

impl<T> BitLock<T> {
    pub(crate) const fn new(flags: u32, data: T) -> Self {
        Self {
            word: AtomicU32::new(flags & !LOCK_BIT),
            data: UnsafeCell::new(data),
        }
    }

    pub(crate) fn lock(&self) -> BitLockGuard<'_, T> {
        let mut spins = 0;
        loop {
            let current = self.word.load(Ordering::Relaxed);
            if current & LOCK_BIT == 0
                && self
                    .word
                    .compare_exchange_weak(
                        current,
                        current | LOCK_BIT,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                return BitLockGuard { lock: self };
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    #[inline]
    pub(crate) fn flags(&self) -> u32 {
        self.word.load(Ordering::Acquire) & !LOCK_BIT
    }

    #[inline]
    pub(crate) fn has_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }

    /// Sets `flag` and returns true if it was clear before.
    #[inline]
    pub(crate) fn set_flag(&self, flag: u32) -> bool {
        self.word.fetch_or(flag & !LOCK_BIT, Ordering::AcqRel) & flag == 0
    }

    /// Clears `flag` and returns true if it was set before.
    #[inline]
    pub(crate) fn clear_flag(&self, flag: u32) -> bool {
        self.word.fetch_and(!(flag & !LOCK_BIT), Ordering::AcqRel) & flag != 0
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub(crate) struct BitLockGuard<'a, T> {
    lock: &'a BitLock<T>,
}

impl<T> Deref for BitLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock bit is held by this thread.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for BitLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock bit is held by this thread.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for BitLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.word.fetch_and(!LOCK_BIT, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_once_slot_single_winner() {
        let slot = Arc::new(OnceSlot::<usize>::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if slot.enter() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(5));
                        slot.leave(i);
                    }
                    // Losers only return once the value is published.
                    *slot.get().unwrap()
                })
            })
            .collect();

        let values: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_once_slot_leave_without_enter() {
        let slot = OnceSlot::<u8>::new();
        let ((), records) = oxitype_log::capture(|| slot.leave(1));
        assert_eq!(records.len(), 1);
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_once_slot_get_or_init() {
        let slot = OnceSlot::new();
        assert_eq!(slot.get_or_init(|| String::from("a")).map(String::as_str), Some("a"));
        assert_eq!(slot.get_or_init(|| String::from("b")).map(String::as_str), Some("a"));
    }

    #[test]
    fn test_once_slot_poisoned_by_panic() {
        let slot = Arc::new(OnceSlot::<u32>::new());
        let inner = Arc::clone(&slot);
        let result = thread::spawn(move || {
            inner.get_or_init(|| panic!("init failed"));
        })
        .join();

        assert!(result.is_err());
        assert!(slot.is_poisoned());
        assert!(!slot.enter());
        assert_eq!(slot.get_or_init(|| 3), None);
    }

    #[test]
    fn test_bit_lock_flags_survive_locking() {
        let lock = BitLock::new(0b1, Vec::<u32>::new());
        assert!(lock.has_flag(0b1));
        {
            let mut data = lock.lock();
            data.push(1);
            assert!(lock.set_flag(0b10));
            assert!(!lock.set_flag(0b10));
        }
        assert_eq!(lock.flags(), 0b11);
        assert!(lock.clear_flag(0b1));
        assert!(!lock.clear_flag(0b1));
        assert_eq!(lock.flags(), 0b10);
        assert_eq!(*lock.lock(), vec![1]);
    }

    #[test]
    fn test_bit_lock_mutual_exclusion() {
        let lock = Arc::new(BitLock::new(0, 0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 40_000);
    }
}
