pub mod networking;
pub mod reload;
pub mod triggers;
