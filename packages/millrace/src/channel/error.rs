// channel error types.

use thiserror::Error;

/// Error for trying to send into a channel that is no longer listening
///
/// A channel stops listening permanently once `join` or `kill` has been
/// called on it.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[error("channel is not listening for new messages")]
pub struct NotListeningError;

/// Terminal reason a send into a channel was refused
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SendErrorCause {
    /// The channel was joined or killed before the send linearized
    #[error(transparent)]
    NotListening(#[from] NotListeningError),
}

/// Error for trying to send into a channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SendError<T> {
    /// The message that could not be sent
    pub msg: T,
    /// The reason the message could not be sent
    pub cause: SendErrorCause,
}

impl<T> SendError<T> {
    /// Recover ownership of the undelivered message
    pub fn into_msg(self) -> T {
        self.msg
    }
}
