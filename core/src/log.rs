//! Logger initialization and the logging macros used across the workspace.

mod appender;
mod consts;
mod logger;

use appender::AppenderSpec;
use consts::{CONSOLE_APPENDER, DEFAULT_LOGGER_ENV, ERR_LOG_FILE_APPENDER, ERR_LOG_FILE_NAME, LOG_FILE_APPENDER, LOG_FILE_NAME};
use log4rs::config::{Config, Root};
use std::path::Path;
use thiserror::Error;

#[doc(hidden)]
pub use ::log as __log;
pub use ::log::LevelFilter;

#[derive(Clone, Debug, Error)]
pub enum LogError {
    #[error("invalid log directory: {0}")]
    InvalidLogDir(String),

    #[error("log appender error: {0}")]
    Appender(String),

    #[error("logger configuration error: {0}")]
    Config(String),
}

fn build_config(log_dir: Option<&Path>, filters: &str) -> Result<Config, LogError> {
    let loggers = logger::Builder::new().parse_env(DEFAULT_LOGGER_ENV).parse_expression(filters).build();

    let mut appenders = vec![AppenderSpec::console(CONSOLE_APPENDER, None)];
    if let Some(log_dir) = log_dir {
        appenders.push(AppenderSpec::roller(LOG_FILE_APPENDER, None, log_dir, LOG_FILE_NAME)?);
        appenders.push(AppenderSpec::roller(ERR_LOG_FILE_APPENDER, Some(LevelFilter::Warn), log_dir, ERR_LOG_FILE_NAME)?);
    }
    let names = appenders.iter().map(|x| x.name).collect::<Vec<_>>();

    Config::builder()
        .appenders(appenders.into_iter().map(AppenderSpec::into_appender))
        .loggers(loggers.items())
        .build(Root::builder().appenders(names).build(loggers.root_level()))
        .map_err(|err| LogError::Config(err.to_string()))
}

/// Initializes the global logger with a console appender and, when `log_dir`
/// is provided, two rolling file appenders (all levels and warnings+errors).
///
/// `filters` is an expression of the form `info,nodesvc_grpc_server=debug`.
/// The `RUST_LOG` environment variable is parsed first, so `filters` wins.
pub fn init_logger(log_dir: Option<&Path>, filters: &str) -> Result<(), LogError> {
    let config = build_config(log_dir, filters)?;
    log4rs::init_config(config).map_err(|err| LogError::Config(err.to_string()))?;
    Ok(())
}

/// Tries to init a console-only logger; a logger set earlier is kept.
/// Meant for tests, where several cases race to initialize.
pub fn try_init_logger(filters: &str) {
    if let Ok(config) = build_config(None, filters) {
        let _ = log4rs::init_config(config);
    }
}

#[macro_export]
macro_rules! trace {
    ($($t:tt)*) => (
        $crate::log::__log::trace!($($t)*)
    )
}

#[macro_export]
macro_rules! debug {
    ($($t:tt)*) => (
        $crate::log::__log::debug!($($t)*)
    )
}

#[macro_export]
macro_rules! info {
    ($($t:tt)*) => (
        $crate::log::__log::info!($($t)*)
    )
}

#[macro_export]
macro_rules! warn {
    ($($t:tt)*) => (
        $crate::log::__log::warn!($($t)*)
    )
}

#[macro_export]
macro_rules! error {
    ($($t:tt)*) => (
        $crate::log::__log::error!($($t)*)
    )
}
