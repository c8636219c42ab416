use nodesvc_grpc_server::error::GrpcServerError;
use nodesvc_watcher::error::NodeError;
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to listen on {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("node client initialization: {0}")]
    NodeClient(#[from] NodeError),

    #[error(transparent)]
    Server(#[from] GrpcServerError),

    #[error(transparent)]
    Notify(#[from] nodesvc_notify::error::Error),

    #[error("bootstrap file {path:?}: {reason}")]
    Bootstrap { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type DaemonResult<T> = std::result::Result<T, DaemonError>;
