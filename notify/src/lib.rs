extern crate self as nodesvc_notify;

pub mod bus;
pub mod error;
pub mod events;
pub mod notification;
pub mod registry;
