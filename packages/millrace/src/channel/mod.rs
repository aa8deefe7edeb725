// implementation of the millrace channel.
//
// the basic architecture is as such:
//
// channel handles wrap around Arc<shared state>
//                                     |
//          /--------------------------/
//          v
//       shared state (core::Core)
//          |
//          |------ it contains a Mutex around the backlog: the buffered
//          |       elements for a typed channel, or a bare permit count for
//          |       the signal specialization. both are driven through the
//          |       core::Backlog trait so one state machine serves both.
//          |
//          |------ it contains the phase byte: OPEN, CLOSING, or KILLED.
//          |       reads outside the lock are only a fast path; the byte is
//          |       written exclusively under the lock, which makes the lock
//          |       acquisition the linearization point for shutdown races.
//          |
//          \------ it contains two condvars: one for receivers blocked on an
//                  empty backlog, one for join callers blocked on a backlog
//                  that has not yet drained.
//
// the organization of these modules is as such:
//
//      core: the state machine. knows nothing about payload types beyond
//      ^     the Backlog trait.
//      |
//      api: thin public handles (Channel<T>, Signal) over the core. the
//           crate re-exports this API publically.
//
// there is also the error module, which contains the relevant error types,
// which is also re-exported publically.

pub(crate) mod api;
pub(crate) mod error;

mod core;
