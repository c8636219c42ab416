pub const DEFAULT_LOGGER_ENV: &str = "RUST_LOG";

pub const LOG_FILE_NAME: &str = "nodesvcd.log";
pub const ERR_LOG_FILE_NAME: &str = "nodesvcd_err.log";

pub const LOG_ARCHIVE_SUFFIX: &str = ".{}.gz";

pub const LOG_FILE_BASE_ROLLS: u32 = 1;
pub const LOG_FILE_MAX_ROLLS: u32 = 8;
pub const LOG_FILE_MAX_SIZE: u64 = 50_000_000;

pub const CONSOLE_APPENDER: &str = "stdout";
pub const LOG_FILE_APPENDER: &str = "log_file";
pub const ERR_LOG_FILE_APPENDER: &str = "err_log_file";

/// Console line pattern, UTC time denoted by the suffix Z
pub const LOG_LINE_PATTERN_COLORED: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)}Z [{h({({l}):5.5})}] {m}{n}";
/// File line pattern, UTC time denoted by the suffix Z
pub const LOG_LINE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)}Z [{({l}):5.5}] {m}{n}";
