//! Low-level concurrency primitives for multithreaded programs: a lock-free
//! multi-producer/multi-consumer FIFO queue, closable blocking channels
//! (including a permit-only signal variant), and a fixed-size worker pool.

#[macro_use]
extern crate tracing;

pub mod lock_free;
pub mod pool;

mod channel;

pub use crate::channel::api::*;

/// Error types
pub mod error {
    pub use crate::channel::error::*;
    pub use crate::pool::TaskError;
}
