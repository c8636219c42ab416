use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("node returned HTTP status {0}")]
    HttpStatus(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{0} returned an empty result")]
    EmptyResult(&'static str),

    #[error("invalid node response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid node URL: {0}")]
    InvalidUrl(String),

    #[error("node error: {0}")]
    General(String),
}

impl From<String> for NodeError {
    fn from(value: String) -> Self {
        NodeError::General(value)
    }
}

impl From<&str> for NodeError {
    fn from(value: &str) -> Self {
        NodeError::General(value.to_string())
    }
}

pub type NodeResult<T> = std::result::Result<T, NodeError>;
