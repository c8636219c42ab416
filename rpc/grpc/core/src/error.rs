use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("the response is not a notification")]
    NotANotification,
}

pub type ConversionResult<T> = std::result::Result<T, ConversionError>;
