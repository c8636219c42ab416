pub mod adaptor;
pub mod connection;
pub mod connection_handler;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod request_handler;
