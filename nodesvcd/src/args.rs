use clap::{Arg, Command, arg};
use nodesvc_grpc_server::connection_handler::{DEFAULT_MAX_CONNECTIONS, DEFAULT_OUTGOING_ROUTE_CAPACITY};
use nodesvc_notify::bus::DEFAULT_EVENT_CHANNEL_CAPACITY;
use nodesvc_utils::networking::ContextualNetAddress;
use nodesvc_watcher::watcher::{DEFAULT_MAX_BLOCK_CATCHUP, DEFAULT_NODE_FAILURE_THRESHOLD};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::{ffi::OsString, fs};
use toml::from_str;

pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:8332";

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Args {
    // NOTE: it is best if property names match config file fields
    pub appdir: Option<String>,
    pub logdir: Option<String>,
    #[serde(rename = "nologfiles")]
    pub no_log_files: bool,
    #[serde(rename = "loglevel")]
    pub log_level: String,
    pub async_threads: usize,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub grpclisten: Option<ContextualNetAddress>,
    #[serde(rename = "rpcmaxclients")]
    pub rpc_max_clients: usize,
    pub outgoing_route_capacity: usize,
    pub event_channel_capacity: usize,
    pub node_url: String,
    pub node_user: Option<String>,
    pub node_password: Option<String>,
    pub node_cert: Option<String>,
    pub node_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_block_catchup: u64,
    pub node_failure_threshold: u32,
    pub reload_retry_interval_ms: u64,
    pub reset_registry_on_reload: bool,
    pub bootstrap: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            appdir: None,
            logdir: None,
            no_log_files: false,
            log_level: "INFO".into(),
            async_threads: num_cpus::get(),
            grpclisten: None,
            rpc_max_clients: DEFAULT_MAX_CONNECTIONS,
            outgoing_route_capacity: DEFAULT_OUTGOING_ROUTE_CAPACITY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            node_url: DEFAULT_NODE_URL.into(),
            node_user: None,
            node_password: None,
            node_cert: None,
            node_timeout_ms: 30_000,
            poll_interval_ms: 2_000,
            max_block_catchup: DEFAULT_MAX_BLOCK_CATCHUP,
            node_failure_threshold: DEFAULT_NODE_FAILURE_THRESHOLD,
            reload_retry_interval_ms: 1_000,
            reset_registry_on_reload: false,
            bootstrap: None,
        }
    }
}

pub fn cli() -> Command {
    let defaults: Args = Default::default();

    Command::new("nodesvcd")
        .about(format!("{} v{}", env!("CARGO_PKG_DESCRIPTION"), env!("CARGO_PKG_VERSION")))
        .version(env!("CARGO_PKG_VERSION"))
        .arg(arg!(-C --configfile <CONFIG_FILE> "Path of config file."))
        .arg(arg!(-b --appdir <DATA_DIR> "Directory to store data."))
        .arg(arg!(--logdir <LOG_DIR> "Directory to log output."))
        .arg(arg!(--nologfiles "Disable logging to files."))
        .arg(
            Arg::new("async_threads")
                .short('t')
                .long("async-threads")
                .env("NODESVC_ASYNC_THREADS")
                .value_name("async_threads")
                .require_equals(true)
                .value_parser(clap::value_parser!(usize))
                .help(format!("Specify number of async threads (default: {}).", defaults.async_threads)),
        )
        .arg(
            Arg::new("log_level")
                .short('d')
                .long("loglevel")
                .env("NODESVC_LOG_LEVEL")
                .value_name("LEVEL")
                .default_value("info")
                .require_equals(true)
                .help("Logging level for all subsystems {off, error, warn, info, debug, trace}\n-- You may also specify <subsystem>=<level>,<subsystem2>=<level>,... to set the log level for individual subsystems.".to_string()),
        )
        .arg(
            Arg::new("grpclisten")
                .long("grpclisten")
                .env("NODESVC_GRPCLISTEN")
                .value_name("IP[:PORT]")
                .require_equals(true)
                .value_parser(clap::value_parser!(ContextualNetAddress))
                .help(format!("Interface:port to listen for gRPC connections (default: 127.0.0.1:{}).", crate::config::DEFAULT_GRPC_PORT)),
        )
        .arg(
            Arg::new("rpcmaxclients")
                .long("rpcmaxclients")
                .env("NODESVC_RPCMAXCLIENTS")
                .value_name("rpcmaxclients")
                .require_equals(true)
                .value_parser(clap::value_parser!(usize))
                .help(format!("Max number of concurrent gRPC streams (default: {}).", defaults.rpc_max_clients)),
        )
        .arg(
            Arg::new("outgoing-route-capacity")
                .long("outgoing-route-capacity")
                .env("NODESVC_OUTGOING_ROUTE_CAPACITY")
                .require_equals(true)
                .value_parser(clap::value_parser!(usize))
                .help(format!(
                    "Outbound queue length of each client; a client falling further behind is disconnected (default: {}).",
                    defaults.outgoing_route_capacity
                )),
        )
        .arg(
            Arg::new("event-channel-capacity")
                .long("event-channel-capacity")
                .env("NODESVC_EVENT_CHANNEL_CAPACITY")
                .require_equals(true)
                .value_parser(clap::value_parser!(usize))
                .help(format!("Capacity of each event channel between the chain watcher and the server (default: {}).", defaults.event_channel_capacity)),
        )
        .arg(
            Arg::new("node-url")
                .long("node-url")
                .env("NODESVC_NODE_URL")
                .value_name("URL")
                .require_equals(true)
                .help(format!("JSON-RPC endpoint of the bitcoin node (default: {}).", DEFAULT_NODE_URL)),
        )
        .arg(Arg::new("node-user").long("node-user").env("NODESVC_NODE_USER").require_equals(true).help("JSON-RPC user name of the node."))
        .arg(
            Arg::new("node-password")
                .long("node-password")
                .env("NODESVC_NODE_PASSWORD")
                .hide_env_values(true)
                .require_equals(true)
                .help("JSON-RPC password of the node."),
        )
        .arg(
            Arg::new("node-cert")
                .long("node-cert")
                .env("NODESVC_NODE_CERT")
                .value_name("CERT_FILE")
                .require_equals(true)
                .help("PEM certificate trusted when connecting to the node over TLS."),
        )
        .arg(
            Arg::new("node-timeout-ms")
                .long("node-timeout-ms")
                .env("NODESVC_NODE_TIMEOUT_MS")
                .require_equals(true)
                .value_parser(clap::value_parser!(u64))
                .help(format!("Timeout of a single node request in milliseconds (default: {}).", defaults.node_timeout_ms)),
        )
        .arg(
            Arg::new("poll-interval-ms")
                .long("poll-interval-ms")
                .env("NODESVC_POLL_INTERVAL_MS")
                .require_equals(true)
                .value_parser(clap::value_parser!(u64))
                .help(format!("Interval between two polls of the node in milliseconds (default: {}).", defaults.poll_interval_ms)),
        )
        .arg(
            Arg::new("max-block-catchup")
                .long("max-block-catchup")
                .env("NODESVC_MAX_BLOCK_CATCHUP")
                .require_equals(true)
                .value_parser(clap::value_parser!(u64))
                .help(format!(
                    "Largest block gap replayed block by block, wider gaps become a resync request; 0 disables the limit (default: {}).",
                    defaults.max_block_catchup
                )),
        )
        .arg(
            Arg::new("node-failure-threshold")
                .long("node-failure-threshold")
                .env("NODESVC_NODE_FAILURE_THRESHOLD")
                .require_equals(true)
                .value_parser(clap::value_parser!(u32))
                .help(format!(
                    "Consecutive failed node polls triggering a service reload; 0 disables it (default: {}).",
                    defaults.node_failure_threshold
                )),
        )
        .arg(
            Arg::new("reload-retry-interval-ms")
                .long("reload-retry-interval-ms")
                .env("NODESVC_RELOAD_RETRY_INTERVAL_MS")
                .require_equals(true)
                .value_parser(clap::value_parser!(u64))
                .help(format!("Interval between two attempts to restart the service in milliseconds (default: {}).", defaults.reload_retry_interval_ms)),
        )
        .arg(arg!(--"reset-registry-on-reload" "Forget every subscription when the service reloads."))
        .arg(
            Arg::new("bootstrap")
                .long("bootstrap")
                .env("NODESVC_BOOTSTRAP")
                .value_name("JSON_FILE")
                .require_equals(true)
                .help("JSON file of subscriptions loaded into an empty registry at startup."),
        )
}

pub fn parse_args() -> Args {
    match Args::parse(std::env::args_os()) {
        Ok(args) => args,
        Err(err) => {
            println!("{err}");
            std::process::exit(1);
        }
    }
}

impl Args {
    pub fn parse<I, T>(itr: I) -> Result<Args, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let m: clap::ArgMatches = cli().try_get_matches_from(itr)?;
        let mut defaults: Args = Default::default();

        if let Some(config_file) = m.get_one::<String>("configfile") {
            let config_str = fs::read_to_string(config_file)?;
            defaults = from_str(&config_str).map_err(|toml_error| {
                clap::Error::raw(
                    clap::error::ErrorKind::ValueValidation,
                    format!("failed parsing config file, reason: {}", toml_error.message()),
                )
            })?;
        }

        let args = Args {
            appdir: m.get_one::<String>("appdir").cloned().or(defaults.appdir),
            logdir: m.get_one::<String>("logdir").cloned().or(defaults.logdir),
            no_log_files: arg_match_unwrap_or::<bool>(&m, "nologfiles", defaults.no_log_files),
            log_level: arg_match_unwrap_or::<String>(&m, "log_level", defaults.log_level),
            async_threads: arg_match_unwrap_or::<usize>(&m, "async_threads", defaults.async_threads),
            grpclisten: m.get_one::<ContextualNetAddress>("grpclisten").cloned().or(defaults.grpclisten),
            rpc_max_clients: arg_match_unwrap_or::<usize>(&m, "rpcmaxclients", defaults.rpc_max_clients),
            outgoing_route_capacity: arg_match_unwrap_or::<usize>(&m, "outgoing-route-capacity", defaults.outgoing_route_capacity),
            event_channel_capacity: arg_match_unwrap_or::<usize>(&m, "event-channel-capacity", defaults.event_channel_capacity),
            node_url: arg_match_unwrap_or::<String>(&m, "node-url", defaults.node_url),
            node_user: m.get_one::<String>("node-user").cloned().or(defaults.node_user),
            node_password: m.get_one::<String>("node-password").cloned().or(defaults.node_password),
            node_cert: m.get_one::<String>("node-cert").cloned().or(defaults.node_cert),
            node_timeout_ms: arg_match_unwrap_or::<u64>(&m, "node-timeout-ms", defaults.node_timeout_ms),
            poll_interval_ms: arg_match_unwrap_or::<u64>(&m, "poll-interval-ms", defaults.poll_interval_ms),
            max_block_catchup: arg_match_unwrap_or::<u64>(&m, "max-block-catchup", defaults.max_block_catchup),
            node_failure_threshold: arg_match_unwrap_or::<u32>(&m, "node-failure-threshold", defaults.node_failure_threshold),
            reload_retry_interval_ms: arg_match_unwrap_or::<u64>(&m, "reload-retry-interval-ms", defaults.reload_retry_interval_ms),
            reset_registry_on_reload: arg_match_unwrap_or::<bool>(&m, "reset-registry-on-reload", defaults.reset_registry_on_reload),
            bootstrap: m.get_one::<String>("bootstrap").cloned().or(defaults.bootstrap),
        };

        Ok(args)
    }
}

use clap::parser::ValueSource::DefaultValue;
fn arg_match_unwrap_or<T: Clone + Send + Sync + 'static>(m: &clap::ArgMatches, arg_id: &str, default: T) -> T {
    m.get_one::<T>(arg_id).cloned().filter(|_| m.value_source(arg_id) != Some(DefaultValue)).unwrap_or(default)
}
