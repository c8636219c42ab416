pub mod client;
pub mod error;
pub mod feerate;
pub mod mock;
pub mod node;
pub mod watcher;

#[cfg(test)]
mod tests;
