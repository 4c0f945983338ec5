//! Hand-off point for work that must run on the application's main loop.
//!
//! The runtime owns no event loop. Classes that defer their property
//! notifications post them through the installed [`MainContext`]; with
//! none installed the notifications are emitted synchronously.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Something that runs posted tasks, in posting order, at a later time.
pub trait MainContext: Send + Sync {
    fn invoke(&self, task: Task);
}

static MAIN_CONTEXT: RwLock<Option<Arc<dyn MainContext>>> = RwLock::new(None);

/// Installs (or with `None`, removes) the process-wide main context.
pub fn set_main_context(ctx: Option<Arc<dyn MainContext>>) {
    *MAIN_CONTEXT.write() = ctx;
}

pub fn main_context() -> Option<Arc<dyn MainContext>> {
    MAIN_CONTEXT.read().clone()
}

/// A [`MainContext`] that queues tasks until [`run_pending`] is called.
///
/// [`run_pending`]: QueueContext::run_pending
#[derive(Default)]
pub struct QueueContext {
    queue: Mutex<VecDeque<Task>>,
}

impl QueueContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs queued tasks, including those posted while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.queue.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl MainContext for QueueContext {
    fn invoke(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for QueueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueContext")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_queue_runs_in_order() {
        let ctx = QueueContext::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            ctx.invoke(Box::new(move || log.lock().push(i)));
        }
        assert_eq!(ctx.pending(), 3);
        assert_eq!(ctx.run_pending(), 3);
        assert_eq!(*log.lock(), [0, 1, 2]);
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn test_tasks_posted_while_running() {
        let ctx = QueueContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_ctx = Arc::clone(&ctx);
        let sink = Arc::clone(&hits);
        ctx.invoke(Box::new(move || {
            let sink = Arc::clone(&sink);
            inner_ctx.invoke(Box::new(move || {
                sink.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(ctx.run_pending(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
