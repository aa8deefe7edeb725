//! Lock-free multi-producer/multi-consumer FIFO queue.
//!
//! The queue is a Michael–Scott singly linked list: a sentinel node plus
//! atomic head and tail pointers advanced by compare-and-swap retry loops.
//! No operation takes a lock, and any number of threads may push and pop
//! concurrently. Retired nodes are reclaimed through epoch-based garbage
//! collection, so a node is never freed while a concurrent operation can
//! still reach it.

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};
use std::{
    mem::MaybeUninit,
    sync::atomic::{
        AtomicIsize,
        Ordering::{Acquire, Relaxed, Release},
    },
};

// queue node. the node currently pointed at by head is the sentinel: its
// value slot is vacant, having been moved out by the pop that retired its
// predecessor (or never filled, for the initial sentinel).
struct Node<T> {
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// Unbounded lock-free FIFO queue of `T`
///
/// `push` and `pop` linearize against each other through CAS on the list
/// links; the element counter behind [`len`](Self::len) is a relaxed
/// snapshot that may lag either operation.
pub struct Queue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    // counts completed pushes minus completed pops. updated after the
    // linearization point of each, so transiently inconsistent readers are
    // clamped at zero rather than ever observing a negative length.
    len: AtomicIsize,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Construct empty
    pub fn new() -> Self {
        let queue = Queue {
            head: Atomic::null(),
            tail: Atomic::null(),
            len: AtomicIsize::new(0),
        };
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        unsafe {
            // not yet shared, so no need to pin
            let guard = epoch::unprotected();
            let sentinel = sentinel.into_shared(guard);
            queue.head.store(sentinel, Relaxed);
            queue.tail.store(sentinel, Relaxed);
        }
        queue
    }

    /// Insert a value at the tail
    ///
    /// Always succeeds. The value's position is established atomically
    /// relative to concurrently executing pushes by the CAS that links its
    /// node into the list.
    pub fn push(&self, value: T) {
        let guard = &epoch::pin();
        let new = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(guard);

        loop {
            let tail = self.tail.load(Acquire, guard);
            // safety: tail is never null, and the epoch guard keeps any
            // node we loaded alive until we drop it.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Acquire, guard);

            if !next.is_null() {
                // tail is stale: another push linked a node but has not yet
                // swung the tail pointer. help it forward and retry.
                let _ = self.tail.compare_exchange(tail, next, Release, Relaxed, guard);
                continue;
            }

            // linearization point: losing this CAS means a concurrent push
            // claimed the slot, so retry from a fresh tail.
            if tail_ref
                .next
                .compare_exchange(Shared::null(), new, Release, Relaxed, guard)
                .is_ok()
            {
                // swing the tail. failure is fine: some helper already did.
                let _ = self.tail.compare_exchange(tail, new, Release, Relaxed, guard);
                self.len.fetch_add(1, Relaxed);
                return;
            }
        }
    }

    /// Remove and return the head element, or `None` if the queue is empty
    ///
    /// Never blocks, and never returns the same logical element to two
    /// callers: the CAS advancing the head grants exclusive ownership of
    /// the successor node's value to exactly one popper.
    pub fn pop(&self) -> Option<T> {
        let guard = &epoch::pin();
        loop {
            let head = self.head.load(Acquire, guard);
            // safety: head is never null; guard keeps the node alive.
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Acquire, guard);

            // empty queue: the sentinel has no successor. a normal outcome,
            // not a failure.
            let next_ref = unsafe { next.as_ref() }?;

            // linearization point: the winner of this CAS owns next's value
            // and retires the old sentinel.
            if self
                .head
                .compare_exchange(head, next, Release, Relaxed, guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Relaxed);
                // a push that linked next but was preempted before swinging
                // the tail leaves the tail pointing at the node being
                // retired. swing it past first: a node must be unreachable
                // from both head and tail before it is handed to the GC.
                if self.tail.load(Acquire, guard) == head {
                    let _ = self.tail.compare_exchange(head, next, Release, Relaxed, guard);
                }
                // safety: the value was written before the node was
                // published by push's Release CAS, and our Acquire load of
                // next observed that publication. only this thread reads
                // the slot; next is the new sentinel and its slot is
                // treated as vacant from here on.
                let value = unsafe { next_ref.value.as_ptr().read() };
                // safety: the old sentinel is now unreachable from both head
                // and tail. deferring destruction through the epoch GC keeps
                // it valid for any thread that loaded it before the CAS.
                unsafe { guard.defer_destroy(head) };
                return Some(value);
            }
        }
    }

    /// Number of elements currently in the queue
    ///
    /// A snapshot: concurrent pushes and pops may have changed the real
    /// length by the time the caller observes the result. Never negative.
    pub fn len(&self) -> usize {
        self.len.load(Relaxed).max(0) as usize
    }

    /// Whether the queue appears empty (same snapshot caveat as [`len`](Self::len))
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            // safety: &mut self means no concurrent operations, so no pin
            // is needed and every node can be freed eagerly.
            let guard = epoch::unprotected();
            let mut node = self.head.load(Relaxed, guard);
            let mut sentinel = true;
            while !node.is_null() {
                let next = node.deref().next.load(Relaxed, guard);
                let mut owned = node.into_owned();
                if !sentinel {
                    // the sentinel's value slot is vacant; every other
                    // node still owns a live value.
                    owned.value.as_mut_ptr().drop_in_place();
                }
                drop(owned);
                sentinel = false;
                node = next;
            }
        }
    }
}
