// exposed API of channels.

use super::{
    core::{Core, Fifo, Permits},
    error::*,
};
use std::sync::Arc;

/// Closable, blocking, multi-producer/multi-consumer mailbox of `T`
///
/// Values move in with [`send`](Self::send) and out, in FIFO order, with
/// [`recv`](Self::recv). Cloning a `Channel` clones a handle to the same
/// underlying mailbox.
///
/// A channel starts open and can leave that state two ways:
///
/// - [`join`](Self::join) stops new sends, lets the buffered backlog drain
///   to receivers, and returns once it has.
/// - [`kill`](Self::kill) stops everything at once: the backlog is
///   discarded and every blocked receiver returns `None`.
///
/// Neither transition reverses. Sends after either fail with
/// [`SendErrorCause::NotListening`].
pub struct Channel<T>(Arc<Core<Fifo<T>>>);

impl<T> Channel<T> {
    /// Create an open, empty channel
    pub fn new() -> Self {
        Channel(Arc::new(Core::new()))
    }

    /// Move one value into the channel, waking a blocked receiver if any
    ///
    /// Never blocks. Fails once the channel has been joined or killed,
    /// handing the value back inside the error.
    pub fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.0
            .enqueue(msg, |backlog, msg| {
                backlog.0.push_back(msg);
                1
            })
            .map_err(|msg| SendError { msg, cause: NotListeningError.into() })
    }

    /// Move a batch of values into the channel as one indivisible sequence
    ///
    /// Receivers observe the batch in its original order, with no element
    /// from a concurrent send interleaved into it. Fails like
    /// [`send`](Self::send), handing the whole batch back untouched.
    pub fn send_all<I>(&self, msgs: I) -> Result<(), SendError<Vec<T>>>
    where
        I: IntoIterator<Item = T>,
    {
        let msgs: Vec<T> = msgs.into_iter().collect();
        self.0
            .enqueue(msgs, |backlog, msgs| {
                let added = msgs.len();
                backlog.0.extend(msgs);
                added
            })
            .map_err(|msgs| SendError { msg: msgs, cause: NotListeningError.into() })
    }

    /// Block until a value is available and take ownership of it
    ///
    /// Returns the oldest buffered value. Returns `None`, without blocking
    /// further, once the channel is killed, or once it has been joined and
    /// the backlog has fully drained.
    pub fn recv(&self) -> Option<T> {
        self.0.recv()
    }

    /// Take the oldest buffered value if one is available right now
    ///
    /// The non-blocking variant of [`recv`](Self::recv): `None` means
    /// "nothing available at this instant", not necessarily that the
    /// channel is closed.
    pub fn try_recv(&self) -> Option<T> {
        self.0.try_recv()
    }

    /// Buffered element count
    ///
    /// A snapshot that may be stale by the time the caller observes it.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the backlog appears empty (same snapshot caveat as [`len`](Self::len))
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immediately close the channel, discarding the backlog
    ///
    /// Every thread blocked in [`recv`](Self::recv) wakes with `None`, and
    /// buffered values are dropped. Idempotent, and safe to call
    /// concurrently with any number of in-flight sends and receives.
    pub fn kill(&self) {
        trace!("killing channel");
        self.0.kill();
    }

    /// Stop accepting sends, then block until the backlog has drained
    ///
    /// Sends that linearize after this call fail with
    /// [`SendErrorCause::NotListening`]. Returns once every buffered value
    /// has been taken by a receiver (or immediately, if the channel is
    /// killed in the meantime). After `join` returns, `recv` on the empty
    /// channel returns `None` without blocking.
    pub fn join(&self) {
        trace!("joining channel");
        self.0.join();
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel(Arc::clone(&self.0))
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Channel::new()
    }
}

/// Permit-counting channel with no payload
///
/// The void specialization of [`Channel`]: [`send`](Self::send) adds
/// permits, [`recv`](Self::recv) blocks until at least one permit is
/// available and consumes exactly one. Useful as a counting signal for
/// synchronizing a known number of threads. Governed by the same
/// open/closing/killed state machine as the typed channel.
pub struct Signal(Arc<Core<Permits>>);

impl Signal {
    /// Create an open signal with no permits
    pub fn new() -> Self {
        Signal(Arc::new(Core::new()))
    }

    /// Add `permits` permits, waking blocked receivers
    ///
    /// Fails once the signal has been joined or killed, handing the permit
    /// count back inside the error. Adding zero permits is a no-op.
    pub fn send(&self, permits: usize) -> Result<(), SendError<usize>> {
        self.0
            .enqueue(permits, |backlog, permits| {
                backlog.0 += permits;
                permits
            })
            .map_err(|permits| SendError { msg: permits, cause: NotListeningError.into() })
    }

    /// Block until a permit is available and consume exactly one
    ///
    /// Returns `None` once the signal is killed, or joined and drained.
    pub fn recv(&self) -> Option<()> {
        self.0.recv()
    }

    /// Consume one permit if one is available right now
    pub fn try_recv(&self) -> Option<()> {
        self.0.try_recv()
    }

    /// Current permit count snapshot
    pub fn permits(&self) -> usize {
        self.0.len()
    }

    /// Immediately close the signal, discarding all permits
    ///
    /// Every thread blocked in [`recv`](Self::recv) wakes with `None`.
    /// Idempotent.
    pub fn kill(&self) {
        trace!("killing signal");
        self.0.kill();
    }

    /// Stop accepting permits, then block until the existing ones are consumed
    pub fn join(&self) {
        trace!("joining signal");
        self.0.join();
    }
}

impl Clone for Signal {
    fn clone(&self) -> Self {
        Signal(Arc::clone(&self.0))
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new()
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::{
        collections::VecDeque,
        thread,
        time::{Duration, Instant},
    };

    fn new_rng() -> impl Rng {
        Pcg32::from_seed(0xdeadbeefdeadbeefdeadbeefdeadbeefu128.to_le_bytes())
    }

    #[test]
    fn send_recv_roundtrip() {
        let channel = Channel::new();
        channel.send(7).unwrap();
        let receiver = channel.clone();
        let join = thread::spawn(move || receiver.recv());
        assert_eq!(join.join().unwrap(), Some(7));
    }

    #[test]
    fn kill_discards_buffered() {
        let channel = Channel::new();
        channel.send(3).unwrap();
        channel.kill();
        assert_eq!(channel.recv(), None);
        assert_eq!(channel.len(), 0);
        // idempotent
        channel.kill();
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn blocking_recv_sees_later_send() {
        let channel = Channel::new();
        let started = Signal::new();
        channel.send(1).unwrap();
        let other = channel.clone();
        let started_tx = started.clone();
        let join = thread::spawn(move || {
            let first = other.recv();
            started_tx.send(1).unwrap();
            assert_eq!(first, Some(1));
            other.send(2).unwrap();
        });
        assert_eq!(started.recv(), Some(()));
        assert_eq!(channel.recv(), Some(2));
        join.join().unwrap();
    }

    #[test]
    fn bulk_send_preserves_order() {
        let channel = Channel::new();
        channel.send_all(0..100u32).unwrap();
        for i in 0..100 {
            assert_eq!(channel.recv(), Some(i));
        }
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn bulk_send_is_indivisible() {
        const BATCH: u32 = 20;
        const BATCHES: usize = 50;

        let channel = Channel::<(u8, u32)>::new();
        let senders: Vec<_> = [1u8, 2u8]
            .into_iter()
            .map(|tag| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for _ in 0..BATCHES {
                        channel.send_all((0..BATCH).map(|i| (tag, i))).unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        // the stream must be a concatenation of whole batches
        let mut seen = Vec::new();
        while let Some(pair) = channel.try_recv() {
            seen.push(pair);
        }
        assert_eq!(seen.len(), 2 * BATCHES * BATCH as usize);
        for chunk in seen.chunks(BATCH as usize) {
            let tag = chunk[0].0;
            for (k, &(t, v)) in chunk.iter().enumerate() {
                assert_eq!(t, tag);
                assert_eq!(v, k as u32);
            }
        }
    }

    #[test]
    fn kill_wakes_all_blocked_receivers() {
        const WAITERS: usize = 8;

        let channel = Channel::<u32>::new();
        let start = Instant::now();
        let waiters: Vec<_> = (0..WAITERS)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || channel.recv())
            })
            .collect();
        // give the waiters time to actually block
        thread::sleep(Duration::from_millis(50));
        channel.kill();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn join_drains_then_closes() {
        const ITEMS: usize = 32;

        let channel = Channel::new();
        channel.send_all(0..ITEMS as u32).unwrap();
        let receivers: Vec<_> = (0..ITEMS)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    channel.recv()
                })
            })
            .collect();

        channel.join();

        // join returned: the backlog must be empty and sends must fail
        assert_eq!(channel.len(), 0);
        let err = channel.send(99).unwrap_err();
        assert_eq!(err.cause, SendErrorCause::NotListening(NotListeningError));
        assert_eq!(err.into_msg(), 99);

        // every buffered item went to exactly one receiver
        for receiver in receivers {
            assert!(receiver.join().unwrap().is_some());
        }

        // closed and drained: further receives are absent immediately
        assert_eq!(channel.recv(), None);
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn join_on_empty_channel_closes_immediately() {
        let channel = Channel::<u32>::new();
        let waiter = {
            let channel = channel.clone();
            thread::spawn(move || channel.recv())
        };
        thread::sleep(Duration::from_millis(20));
        channel.join();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(channel.send(1).is_err());
    }

    #[test]
    fn try_recv_both_arms() {
        let channel = Channel::new();
        assert_eq!(channel.try_recv(), None);
        channel.send("hi".to_string()).unwrap();
        assert_eq!(channel.try_recv().as_deref(), Some("hi"));
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn drop_with_buffered_item_is_bounded() {
        let start = Instant::now();
        {
            let channel = Channel::new();
            channel.send(5).unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn threaded_1000() {
        let channel = Channel::new();
        let sender = channel.clone();
        let join_1 = thread::spawn(move || {
            for i in 1..=1000 {
                sender.send(i).unwrap();
                if i < 1000 && i % 100 == 0 {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        });
        let join_2 = thread::spawn(move || {
            for i in 1..=1000 {
                assert_eq!(channel.recv(), Some(i));
            }
        });
        join_1.join().unwrap();
        join_2.join().unwrap();
    }

    #[test]
    fn reference_model_equivalence() {
        let mut rng = new_rng();
        let channel = Channel::new();
        let mut model = VecDeque::new();
        for i in 0u32..50_000 {
            if model.is_empty() || rng.gen_ratio(52, 100) {
                if rng.gen_ratio(1, 10) {
                    let batch: Vec<u32> = (i..i + 3).collect();
                    model.extend(batch.iter().copied());
                    channel.send_all(batch).unwrap();
                } else {
                    channel.send(i).unwrap();
                    model.push_back(i);
                }
            } else {
                assert_eq!(channel.try_recv(), model.pop_front());
            }
            assert_eq!(channel.len(), model.len());
        }
        while let Some(expect) = model.pop_front() {
            assert_eq!(channel.try_recv(), Some(expect));
        }
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn signal_releases_each_waiter_once() {
        const WAITERS: usize = 6;

        let signal = Signal::new();
        signal.send(WAITERS).unwrap();
        let waiters: Vec<_> = (0..WAITERS)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.recv())
            })
            .collect();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Some(()));
        }
        assert_eq!(signal.try_recv(), None);
        assert_eq!(signal.permits(), 0);
    }

    #[test]
    fn signal_try_recv_drains_exact_count() {
        let signal = Signal::new();
        signal.send(5).unwrap();
        for _ in 0..5 {
            assert_eq!(signal.try_recv(), Some(()));
        }
        assert_eq!(signal.try_recv(), None);
    }

    #[test]
    fn signal_join_drains_permits_then_closes() {
        const PERMITS: usize = 4;

        let signal = Signal::new();
        signal.send(PERMITS).unwrap();
        let consumers: Vec<_> = (0..PERMITS)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    signal.recv()
                })
            })
            .collect();

        signal.join();

        // join returned: the permits are gone and new sends fail
        assert_eq!(signal.permits(), 0);
        let err = signal.send(1).unwrap_err();
        assert_eq!(err.cause, SendErrorCause::NotListening(NotListeningError));

        // each permit released exactly one consumer
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), Some(()));
        }

        // joined and drained: further receives are absent immediately
        assert_eq!(signal.recv(), None);
        assert_eq!(signal.try_recv(), None);
    }

    #[test]
    fn signal_send_after_kill_fails() {
        let signal = Signal::new();
        signal.kill();
        let err = signal.send(1).unwrap_err();
        assert_eq!(err.cause, SendErrorCause::NotListening(NotListeningError));
        assert_eq!(err.into_msg(), 1);
    }

    #[test]
    fn signal_drop_with_permits_is_bounded() {
        let start = Instant::now();
        {
            let signal = Signal::new();
            signal.send(10).unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
