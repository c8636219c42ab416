use thiserror::Error;
use tokio::sync::mpsc::error::{SendError, TrySendError};

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Error: {0}")]
    General(String),

    #[error("channel send error")]
    ChannelSendError,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Error::ChannelSendError,
            TrySendError::Closed(_) => Error::ChannelClosed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
