//! Process-lifetime arena for `OxiType` runtime metadata.
//!
//! Type nodes, signal descriptors, interned strings and ancestor vectors are
//! created once and never freed. The arena hands out `'static` references to
//! them with a lock-free bump pointer:
//!
//! - **Fast allocation** through a CAS-advanced bump pointer
//! - **Stable addresses** (memory never moves or gets reused)
//! - **Thread-safe** allocation from any thread
//!
//! Values placed in the arena are never dropped. Only put data there whose
//! lifetime is the whole process.
//!
//! # Examples
//!
//! ```
//! use oxitype_mem::arena::global_arena;
//!
//! let arena = global_arena();
//! let value = arena.alloc(42u32);
//! let name = arena.alloc_str("GObjectish");
//!
//! assert_eq!(*value, 42);
//! assert_eq!(name, "GObjectish");
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Base alignment of every chunk.
const CHUNK_ALIGNMENT: usize = 16;

/// Minimum chunk size (8 KiB).
const MIN_CHUNK_SIZE: usize = 8192;

/// Maximum size a regular chunk grows to (1 MiB). Larger requests get a
/// dedicated chunk.
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Arena allocation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total number of bytes handed out across all chunks.
    pub total_allocated: usize,
    /// Number of chunks in the arena.
    pub chunk_count: usize,
    /// Total capacity of all chunks in bytes.
    pub total_capacity: usize,
}

/// A fixed-size memory region with an atomic bump pointer.
///
/// # Safety
///
/// - Chunk memory is never released (the arena lives for the process)
/// - The bump pointer only moves forward
/// - The CAS loop hands every byte out at most once
struct Chunk {
    /// Current bump pointer. Keeps the provenance of the allocation.
    ptr: AtomicPtr<u8>,
    /// End of the region (exclusive).
    end: usize,
    /// Capacity in bytes.
    capacity: usize,
}

impl Chunk {
    /// Allocates a new chunk from the system allocator and leaks it.
    fn new(size: usize) -> &'static Chunk {
        let size = size.max(MIN_CHUNK_SIZE);
        let layout = match Layout::from_size_align(size, CHUNK_ALIGNMENT) {
            Ok(layout) => layout,
            Err(_) => alloc::handle_alloc_error(Layout::new::<u8>()),
        };

        // SAFETY: layout has non-zero size (at least MIN_CHUNK_SIZE).
        let start = unsafe { alloc::alloc(layout) };
        if start.is_null() {
            alloc::handle_alloc_error(layout);
        }

        Box::leak(Box::new(Chunk {
            ptr: AtomicPtr::new(start),
            end: start.addr() + size,
            capacity: size,
        }))
    }

    /// Bumps `size` bytes aligned to `align` off this chunk.
    #[inline]
    fn try_alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let mut current = self.ptr.load(Ordering::Acquire);

        loop {
            let aligned_start = current.addr().checked_add(align - 1)? & !(align - 1);
            let new_addr = aligned_start.checked_add(size)?;
            if new_addr > self.end {
                return None;
            }

            match self.ptr.compare_exchange_weak(
                current,
                current.with_addr(new_addr),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return NonNull::new(current.with_addr(aligned_start)),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Thread-safe bump arena for process-lifetime allocations.
///
/// Used for type nodes, signal nodes, interned strings and other metadata
/// the runtime never frees.
///
/// # Thread Safety
///
/// Allocation only touches the current chunk's atomic bump pointer. Growing
/// the arena takes a mutex.
pub struct GlobalArena {
    /// All chunks ever allocated (for statistics).
    chunks: Mutex<Vec<&'static Chunk>>,
    /// Chunk new allocations are served from.
    current: AtomicPtr<Chunk>,
    /// Size of the next regular chunk.
    next_chunk_size: AtomicUsize,
    /// Total bytes handed out.
    total_allocated: AtomicUsize,
}

impl GlobalArena {
    /// Creates a new arena whose first chunk has at least `chunk_size` bytes.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        let size = chunk_size.max(MIN_CHUNK_SIZE).next_power_of_two();
        let first = Chunk::new(size);

        GlobalArena {
            chunks: Mutex::new(vec![first]),
            current: AtomicPtr::new(std::ptr::from_ref(first).cast_mut()),
            next_chunk_size: AtomicUsize::new((size * 2).min(MAX_CHUNK_SIZE)),
            total_allocated: AtomicUsize::new(0),
        }
    }

    /// Moves `value` into the arena and returns a reference to it.
    ///
    /// The value is never dropped.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T>(&self, value: T) -> &mut T {
        let ptr = self.alloc_raw(Layout::new::<T>()).cast::<T>();

        // SAFETY: ptr is freshly allocated, properly aligned for T, sized for
        // T and handed out exactly once.
        unsafe {
            ptr.as_ptr().write(value);
            &mut *ptr.as_ptr()
        }
    }

    /// Copies a string into the arena.
    #[inline]
    pub fn alloc_str(&self, s: &str) -> &str {
        let bytes = self.alloc_slice(s.as_bytes());

        // SAFETY: bytes is an exact copy of valid UTF-8.
        unsafe { std::str::from_utf8_unchecked(bytes) }
    }

    /// Copies a slice of `Copy` values into the arena.
    pub fn alloc_slice<T: Copy>(&self, values: &[T]) -> &[T] {
        if values.is_empty() {
            return &[];
        }

        let layout = match Layout::array::<T>(values.len()) {
            Ok(layout) => layout,
            Err(_) => alloc::handle_alloc_error(Layout::new::<T>()),
        };
        let ptr = self.alloc_raw(layout).cast::<T>();

        // SAFETY: the destination is a fresh region sized and aligned for
        // `values.len()` elements of T; source and destination never overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(values.as_ptr(), ptr.as_ptr(), values.len());
            std::slice::from_raw_parts(ptr.as_ptr(), values.len())
        }
    }

    fn alloc_raw(&self, layout: Layout) -> NonNull<u8> {
        let size = layout.size();
        let align = layout.align();

        loop {
            let current = self.current.load(Ordering::Acquire);

            // SAFETY: current always points to a leaked, never-freed chunk.
            let chunk = unsafe { &*current };
            if let Some(ptr) = chunk.try_alloc(size, align) {
                self.total_allocated.fetch_add(size, Ordering::Relaxed);
                return ptr;
            }

            self.grow(current, size + align);
        }
    }

    /// Installs a fresh chunk unless another thread already did.
    #[cold]
    fn grow(&self, exhausted: *mut Chunk, min_size: usize) {
        let mut chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.current.load(Ordering::Acquire) != exhausted {
            return;
        }

        let regular = self.next_chunk_size.load(Ordering::Relaxed);
        let chunk = Chunk::new(regular.max(min_size));
        chunks.push(chunk);
        self.next_chunk_size
            .store((regular * 2).min(MAX_CHUNK_SIZE), Ordering::Relaxed);
        self.current
            .store(std::ptr::from_ref(chunk).cast_mut(), Ordering::Release);
    }

    /// Returns allocation statistics for this arena.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let chunks = self.chunks.lock().unwrap_or_else(PoisonError::into_inner);
        ArenaStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            chunk_count: chunks.len(),
            total_capacity: chunks.iter().map(|c| c.capacity).sum(),
        }
    }
}

// SAFETY: chunks are leaked and only mutated through atomics or under the
// growth mutex.
unsafe impl Send for GlobalArena {}
unsafe impl Sync for GlobalArena {}

/// Global arena singleton for runtime metadata.
///
/// # Examples
///
/// ```
/// use oxitype_mem::arena::global_arena;
///
/// let a = global_arena();
/// let b = global_arena();
/// assert!(std::ptr::eq(a, b));
/// ```
#[must_use]
pub fn global_arena() -> &'static GlobalArena {
    static ARENA: OnceLock<GlobalArena> = OnceLock::new();
    ARENA.get_or_init(|| GlobalArena::new(64 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_alloc_values_are_stable() {
        let arena = GlobalArena::new(MIN_CHUNK_SIZE);
        let a = arena.alloc(1u64);
        let b = arena.alloc(2u64);
        *a += 10;

        assert_eq!(*a, 11);
        assert_eq!(*b, 2);
        assert_ne!(std::ptr::from_ref(a), std::ptr::from_ref(b));
    }

    #[test]
    fn test_alloc_respects_alignment() {
        #[repr(align(64))]
        struct Aligned(u8);

        let arena = GlobalArena::new(MIN_CHUNK_SIZE);
        let _pad = arena.alloc(1u8);
        let aligned = arena.alloc(Aligned(3));

        assert_eq!(std::ptr::from_ref(aligned).addr() % 64, 0);
        assert_eq!(aligned.0, 3);
    }

    #[test]
    fn test_alloc_str_and_slice() {
        let arena = GlobalArena::new(MIN_CHUNK_SIZE);
        assert_eq!(arena.alloc_str("notify::label"), "notify::label");
        assert_eq!(arena.alloc_str(""), "");
        assert_eq!(arena.alloc_slice(&[1u32, 2, 3]), &[1, 2, 3]);
        assert!(arena.alloc_slice::<u32>(&[]).is_empty());
    }

    #[test]
    fn test_grows_past_first_chunk() {
        let arena = GlobalArena::new(MIN_CHUNK_SIZE);
        for i in 0..4096u64 {
            assert_eq!(*arena.alloc(i), i);
        }

        let stats = arena.stats();
        assert!(stats.chunk_count > 1);
        assert!(stats.total_allocated >= 4096 * 8);
        assert!(stats.total_capacity >= stats.total_allocated);
    }

    #[test]
    fn test_large_allocation_gets_dedicated_chunk() {
        let arena = GlobalArena::new(MIN_CHUNK_SIZE);
        let big = vec![7u8; 3 * MAX_CHUNK_SIZE];
        let copy = arena.alloc_slice(&big);
        assert_eq!(copy.len(), big.len());
        assert!(copy.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_concurrent_allocation() {
        let arena = global_arena();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                thread::spawn(move || {
                    let mut addrs = Vec::new();
                    for i in 0..1000usize {
                        let v = arena.alloc(t * 10_000 + i);
                        assert_eq!(*v, t * 10_000 + i);
                        addrs.push(std::ptr::from_ref(v).addr());
                    }
                    addrs
                })
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n, "arena handed out the same address twice");
    }
}
