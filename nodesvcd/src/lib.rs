pub mod args;
pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod error;
pub mod generation;
pub mod supervisor;

#[cfg(test)]
mod tests;
