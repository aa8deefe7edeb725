// task plumbing for the pool: boxed callables and result handles.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
};
use thiserror::Error;

// boxed callable pulled off the pool's task channel by a worker. running it
// resolves the result handle baked into its captures; dropping it unrun
// resolves the handle as never-run via the completer's Drop.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Failure surfaced by a [`TaskHandle`] whose task produced no value
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TaskError {
    /// The task was discarded (pool killed) before any worker ran it
    #[error("task was discarded before it ran")]
    NeverRan,
    /// The task panicked while running
    #[error("task panicked while running")]
    Panicked,
}

// state shared between a handle and its completer.
struct Shared<R> {
    // the resolved outcome. written exactly once, by the completer.
    lockable: Mutex<Option<Result<R, TaskError>>>,
    // waited on by handle holders blocked in wait.
    done: Condvar,
}

/// Handle to the eventual outcome of one task submitted to a pool
///
/// Resolves once the worker that picked the task up finishes running it, or
/// immediately with [`TaskError::NeverRan`] if the task is discarded by a
/// pool kill before any worker reached it.
pub struct TaskHandle<R>(Arc<Shared<R>>);

// single-writer resolution side of a task handle. owned by the boxed task.
pub(crate) struct Completer<R> {
    shared: Arc<Shared<R>>,
    resolved: bool,
}

// construct a linked handle/completer pair.
pub(crate) fn handle<R>() -> (TaskHandle<R>, Completer<R>) {
    let shared = Arc::new(Shared {
        lockable: Mutex::new(None),
        done: Condvar::new(),
    });
    let completer = Completer { shared: Arc::clone(&shared), resolved: false };
    (TaskHandle(shared), completer)
}

// box a callable together with its completer. the callable runs under
// catch_unwind so a panicking task resolves its handle instead of unwinding
// through the worker thread.
pub(crate) fn package<F, R>(f: F, completer: Completer<R>) -> Task
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Box::new(move || {
        let result = catch_unwind(AssertUnwindSafe(f)).map_err(|_| TaskError::Panicked);
        completer.resolve(result);
    })
}

impl<R> TaskHandle<R> {
    /// Block until the task has resolved, then take its outcome
    pub fn wait(self) -> Result<R, TaskError> {
        let mut lock = self.0.lockable.lock().unwrap();
        loop {
            if let Some(result) = lock.take() {
                return result;
            }
            lock = self.0.done.wait(lock).unwrap();
        }
    }

    /// Take the task's outcome if it has already resolved
    ///
    /// Never blocks. An unresolved task hands the handle back unchanged, so
    /// probing costs nothing: the eventual outcome still goes to a later
    /// `try_wait` or [`wait`](Self::wait).
    pub fn try_wait(self) -> Result<Result<R, TaskError>, Self> {
        let taken = self.0.lockable.lock().unwrap().take();
        match taken {
            Some(result) => Ok(result),
            None => Err(self),
        }
    }
}

impl<R> Completer<R> {
    // resolve the handle, waking any waiters.
    pub(crate) fn resolve(mut self, result: Result<R, TaskError>) {
        self.set(result);
    }

    fn set(&mut self, result: Result<R, TaskError>) {
        debug_assert!(!self.resolved);
        self.resolved = true;
        let mut lock = self.shared.lockable.lock().unwrap();
        debug_assert!(lock.is_none());
        *lock = Some(result);
        drop(lock);
        self.shared.done.notify_all();
    }
}

impl<R> Drop for Completer<R> {
    fn drop(&mut self) {
        // a completer dropped without resolving means its task was thrown
        // away before running
        if !self.resolved {
            self.set(Err(TaskError::NeverRan));
        }
    }
}
