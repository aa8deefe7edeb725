// minimal state-machine core shared by the typed channel and the signal
// specialization. the exposed API is a convenience wrapper around this.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU8, Ordering::Relaxed},
        Condvar, Mutex,
    },
};

// possible values for Core.phase.
//
// - begins as Open. transitions are Open -> Closing (join), Open -> Killed
//   (kill), and Closing -> Killed (kill pre-empts a drain in progress).
// - never transitions backwards.
// - "closed" is not a distinct byte: it is Closing observed together with an
//   empty backlog.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub(crate) enum Phase {
    // sends accepted, receives block.
    Open,
    // no new sends. buffered entries still drain to receivers.
    Closing,
    // no sends, no receives. backlog discarded, waiters released.
    Killed,
}

// backing store for buffered sends. the core's state machine is agnostic to
// whether the backlog holds real elements or just counts permits.
pub(crate) trait Backlog: Default {
    type Elem;

    // remove the oldest buffered entry, if any.
    fn take(&mut self) -> Option<Self::Elem>;
    // buffered entry count.
    fn len(&self) -> usize;
    // discard all buffered entries.
    fn clear(&mut self);
}

// element backlog for the typed channel.
pub(crate) struct Fifo<T>(pub(crate) VecDeque<T>);

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Fifo(VecDeque::new())
    }
}

impl<T> Backlog for Fifo<T> {
    type Elem = T;

    fn take(&mut self) -> Option<T> {
        self.0.pop_front()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

// permit-count backlog for the signal channel. a permit has no payload, so
// the whole backlog is one integer.
#[derive(Default)]
pub(crate) struct Permits(pub(crate) usize);

impl Backlog for Permits {
    type Elem = ();

    fn take(&mut self) -> Option<()> {
        if self.0 == 0 {
            return None;
        }
        self.0 -= 1;
        Some(())
    }

    fn len(&self) -> usize {
        self.0
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

// channel shared state.
pub(crate) struct Core<B> {
    // mutex around the backlog.
    lockable: Mutex<B>,

    // current Phase.
    //
    // - written only while lockable is held, so acquiring the lock and
    //   re-checking gives a race-free read. the relaxed unlocked read in
    //   enqueue is only a cheap early-out.
    // - once it leaves Open it never returns to Open.
    phase: AtomicU8,

    // waited on by receivers blocked on an empty backlog.
    recv_waiters: Condvar,
    // waited on by join callers blocked on a backlog that has not drained.
    drain_waiters: Condvar,
}

impl<B: Backlog> Core<B> {
    // construct open and empty.
    pub(crate) fn new() -> Self {
        Core {
            lockable: Mutex::new(B::default()),
            phase: AtomicU8::new(Phase::Open as u8),
            recv_waiters: Condvar::new(),
            drain_waiters: Condvar::new(),
        }
    }

    // atomic-read the phase byte.
    fn phase(&self) -> u8 {
        self.phase.load(Relaxed)
    }

    // enqueue into the backlog if the channel is still open.
    //
    // fill receives the backlog and arg, and returns the number of entries
    // it added, which decides how many receivers to wake. if the channel is
    // not open, arg is handed back untouched and fill is never called, so a
    // whole batch survives a rejected bulk send.
    pub(crate) fn enqueue<A>(
        &self,
        arg: A,
        fill: impl FnOnce(&mut B, A) -> usize,
    ) -> Result<(), A> {
        if self.phase() != Phase::Open as u8 {
            return Err(arg);
        }
        let mut lock = self.lockable.lock().unwrap();
        // re-check now that the channel is locked: a kill or join that took
        // the lock first must cause this send to fail.
        if self.phase() != Phase::Open as u8 {
            return Err(arg);
        }
        let added = fill(&mut *lock, arg);
        drop(lock);
        match added {
            0 => {}
            1 => self.recv_waiters.notify_one(),
            _ => self.recv_waiters.notify_all(),
        }
        Ok(())
    }

    // block until an entry is available or the channel reaches a state where
    // none ever will be.
    pub(crate) fn recv(&self) -> Option<B::Elem> {
        let mut lock = self.lockable.lock().unwrap();
        loop {
            if let Some(elem) = lock.take() {
                if lock.len() == 0 && self.phase() == Phase::Closing as u8 {
                    // a join may be blocked on the backlog emptying
                    self.drain_waiters.notify_all();
                }
                return Some(elem);
            }
            // empty backlog. killed discards everything immediately, and an
            // empty closing channel has fully drained: both mean absent.
            if self.phase() != Phase::Open as u8 {
                return None;
            }
            lock = self.recv_waiters.wait(lock).unwrap();
        }
    }

    // non-blocking variant of recv.
    pub(crate) fn try_recv(&self) -> Option<B::Elem> {
        let mut lock = self.lockable.lock().unwrap();
        let elem = lock.take()?;
        if lock.len() == 0 && self.phase() == Phase::Closing as u8 {
            self.drain_waiters.notify_all();
        }
        Some(elem)
    }

    // backlog length snapshot.
    pub(crate) fn len(&self) -> usize {
        self.lockable.lock().unwrap().len()
    }

    // immediately mark the channel killed, discard the backlog, and release
    // every blocked receiver and join caller. idempotent.
    pub(crate) fn kill(&self) {
        let mut lock = self.lockable.lock().unwrap();
        self.phase.store(Phase::Killed as u8, Relaxed);
        lock.clear();
        drop(lock);
        self.recv_waiters.notify_all();
        self.drain_waiters.notify_all();
    }

    // stop accepting sends, then block until the backlog has fully drained
    // or the channel is killed.
    pub(crate) fn join(&self) {
        let mut lock = self.lockable.lock().unwrap();
        if self.phase() == Phase::Killed as u8 {
            return;
        }
        self.phase.store(Phase::Closing as u8, Relaxed);
        // receivers blocked on an empty backlog can never see a new element
        // now. wake them all so they observe the closed channel.
        self.recv_waiters.notify_all();
        while lock.len() > 0 && self.phase() != Phase::Killed as u8 {
            lock = self.drain_waiters.wait(lock).unwrap();
        }
    }
}
