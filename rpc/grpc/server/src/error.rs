use nodesvc_grpc_core::protowire;
use nodesvc_watcher::error::NodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrpcServerError {
    #[error("Notification subsystem error: {0}")]
    NotificationError(#[from] nodesvc_notify::error::Error),

    #[error("Node error: {0}")]
    NodeError(#[from] NodeError),

    #[error("Request has no valid payload")]
    InvalidRequestPayload,

    #[error("Subscription is invalid: {0}")]
    InvalidSubscription(&'static str),

    #[error("client connection is closed")]
    ConnectionClosed,

    #[error("outgoing route capacity has been reached (client: {0})")]
    OutgoingRouteCapacityReached(String),

    #[error("The gRPC service has reached full capacity and accepts no new connection")]
    ServerFull,

    #[error("gRPC server IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GrpcServerError> for protowire::RpcError {
    fn from(err: GrpcServerError) -> Self {
        protowire::RpcError { message: err.to_string() }
    }
}

impl From<GrpcServerError> for tonic::Status {
    fn from(err: GrpcServerError) -> Self {
        match err {
            GrpcServerError::ServerFull => tonic::Status::permission_denied(err.to_string()),
            GrpcServerError::InvalidRequestPayload | GrpcServerError::InvalidSubscription(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            GrpcServerError::ConnectionClosed => tonic::Status::unavailable(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

pub type GrpcServerResult<T> = std::result::Result<T, GrpcServerError>;
