// fixed-size pool of worker threads over an internal task channel.
//
// the architecture is as such: Pool::new spawns worker_count OS threads,
// each of which loops pulling boxed tasks off a Channel<Task> until the
// channel reports that no task will ever come again. the pool's lifecycle
// is therefore mostly delegated to the channel's: joining the pool joins
// the task channel (drain, then close), killing the pool kills it (discard
// the backlog, release idle workers). a phase byte on the pool itself
// gates task submission and makes join/kill single-shot.

use crate::channel::api::Channel;
use std::{
    mem::take,
    sync::{
        atomic::{AtomicU8, Ordering::Relaxed},
        Mutex,
    },
    thread::{self, JoinHandle},
};

mod task;

pub use self::task::{TaskError, TaskHandle};

// possible values for Pool.phase.
//
// begins as Running. transitions are Running -> Joining (join),
// Running -> Killed (kill), and Joining -> Killed (kill pre-empts a join's
// drain, mirroring the channel's rule). never transitions backwards.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq)]
enum Phase {
    // accepting tasks.
    Running,
    // join in progress: backlog draining, then workers collected.
    Joining,
    // killed: backlog discarded, workers stop after their in-flight task.
    Killed,
}

/// Fixed-size set of worker threads executing submitted callables
///
/// Tasks go in through [`add_task`](Self::add_task), which returns a
/// [`TaskHandle`] resolving to the callable's return value. Workers pull
/// tasks in FIFO order and run them to completion; a panicking task
/// resolves its handle with [`TaskError::Panicked`] without harming the
/// worker.
///
/// The pool runs until [`join`](Self::join) (drain the backlog, then stop)
/// or [`kill`](Self::kill) (discard the backlog and stop) is called, or the
/// pool is dropped, which kills it. After either transition
/// [`joinable`](Self::joinable) is false and new tasks are rejected.
pub struct Pool {
    // task backlog feeding the workers.
    tasks: Channel<task::Task>,
    // current Phase. transitions are CAS-guarded so exactly one shutdown
    // call drives each edge.
    phase: AtomicU8,
    // worker join handles, taken by whichever of join/drop collects them.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Spawn a pool of `worker_count` threads
    ///
    /// Panics if `worker_count` is zero or if the OS refuses to spawn a
    /// thread.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "pool needs at least one worker");
        let tasks = Channel::new();
        let workers = (0..worker_count)
            .map(|index| {
                let tasks = tasks.clone();
                thread::Builder::new()
                    .name(format!("millrace-worker-{}", index))
                    .spawn(move || worker(index, tasks))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        debug!(worker_count, "pool started");
        Pool {
            tasks,
            phase: AtomicU8::new(Phase::Running as u8),
            workers: Mutex::new(workers),
        }
    }

    /// Submit a callable, receiving a handle to its eventual outcome
    ///
    /// Never blocks the caller. Returns `None` without running the callable
    /// if the pool is no longer accepting tasks (killed or joined).
    pub fn add_task<F, R>(&self, f: F) -> Option<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.phase.load(Relaxed) != Phase::Running as u8 {
            return None;
        }
        let (handle, completer) = task::handle();
        match self.tasks.send(task::package(f, completer)) {
            Ok(()) => Some(handle),
            // a shutdown won the race between the phase check and the send.
            // dropping the rejected task resolves the handle as never-run,
            // but the caller never sees that handle anyway.
            Err(_) => None,
        }
    }

    /// Whether the pool is still running, i.e. `join` and `kill` are still
    /// meaningful and `add_task` can still accept work
    pub fn joinable(&self) -> bool {
        self.phase.load(Relaxed) == Phase::Running as u8
    }

    /// Stop accepting tasks, run the backlog to completion, and wait for
    /// every worker to finish its current task and exit
    ///
    /// A no-op unless the pool was still running.
    pub fn join(&self) {
        if self
            .phase
            .compare_exchange(Phase::Running as u8, Phase::Joining as u8, Relaxed, Relaxed)
            .is_err()
        {
            return;
        }
        debug!("joining pool");
        // once the backlog drains, workers observe the closed channel and
        // exit on their own.
        self.tasks.join();
        self.collect_workers();
    }

    /// Stop the pool immediately, discarding tasks that have not started
    ///
    /// Discarded tasks resolve their handles with [`TaskError::NeverRan`].
    /// Never blocks the caller: workers are signalled to stop and exit once
    /// their in-flight task (if any) finishes naturally; kill never
    /// interrupts a task mid-run. The worker threads themselves are
    /// collected when the pool is dropped. Pre-empts a `join` in progress.
    /// Idempotent.
    pub fn kill(&self) {
        loop {
            let phase = self.phase.load(Relaxed);
            if phase == Phase::Killed as u8 {
                return;
            }
            if self
                .phase
                .compare_exchange(phase, Phase::Killed as u8, Relaxed, Relaxed)
                .is_ok()
            {
                break;
            }
        }
        debug!("killing pool");
        // discarding the backlog resolves pending handles as never-run and
        // releases idle workers blocked on the channel. this also unblocks
        // a pre-empted join's drain wait.
        self.tasks.kill();
    }

    // join whichever worker threads have not been collected yet. safe to
    // race: the mutex hands the handle list to exactly one caller.
    fn collect_workers(&self) {
        let workers = take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            // worker bodies don't unwind: tasks run under catch_unwind
            let _ = worker.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // bounded teardown even if the owner never called join or kill:
        // discard the backlog, then wait only for in-flight tasks to finish
        // naturally as the workers exit.
        self.kill();
        self.collect_workers();
    }
}

// worker loop: pull tasks until the channel reports no more will ever come.
fn worker(index: usize, tasks: Channel<task::Task>) {
    trace!(index, "pool worker started");
    while let Some(task) = tasks.recv() {
        trace!(index, "pool worker running task");
        task();
    }
    trace!(index, "pool worker exiting");
}
