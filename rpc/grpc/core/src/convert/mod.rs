pub mod message;
pub mod notification;
