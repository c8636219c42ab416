extern crate self as nodesvc_core;

pub mod log;
pub mod panic;
pub mod task;
