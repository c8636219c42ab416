use futures_util::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsyncServiceError {
    #[error("{0}")]
    Service(String),
}

pub type AsyncServiceResult<T> = std::result::Result<T, AsyncServiceError>;

pub type AsyncServiceFuture = BoxFuture<'static, AsyncServiceResult<()>>;

/// A long running asynchronous service.
///
/// `start` returns the future driving the service until an exit signal is
/// received through `signal_exit`. `stop` releases whatever `start` left behind.
pub trait AsyncService: Send + Sync {
    fn ident(self: Arc<Self>) -> &'static str;
    fn start(self: Arc<Self>) -> AsyncServiceFuture;
    fn signal_exit(self: Arc<Self>);
    fn stop(self: Arc<Self>) -> AsyncServiceFuture;
}
