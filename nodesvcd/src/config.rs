//! Runtime configuration, built once from [`Args`] and shared by `Arc` with every component.

use crate::{
    args::Args,
    error::{DaemonError, DaemonResult},
};
use nodesvc_grpc_server::connection_handler::ServerConfig;
use nodesvc_utils::networking::{ContextualNetAddress, NetAddress};
use nodesvc_watcher::watcher::WatcherConfig;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_GRPC_PORT: u16 = 50051;

/// How to reach the node
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Certificate file, read again on every generation start
    pub certificate: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub listen: NetAddress,
    pub server: ServerConfig,
    pub event_channel_capacity: usize,
    pub node: NodeSettings,
    pub watcher: WatcherConfig,
    /// Delay between two attempts at starting a generation
    pub reload_retry_interval: Duration,
    /// When set, every reload starts from an empty registry
    pub reset_registry_on_reload: bool,
    pub bootstrap: Option<PathBuf>,
}

impl Config {
    pub fn from_args(args: &Args) -> DaemonResult<Self> {
        if args.logdir.is_some() && args.no_log_files {
            return Err(DaemonError::Config("--logdir and --nologfiles cannot be used together".into()));
        }
        if args.event_channel_capacity == 0 {
            return Err(DaemonError::Config("the event channel capacity must be positive".into()));
        }
        if args.outgoing_route_capacity == 0 {
            return Err(DaemonError::Config("the outgoing route capacity must be positive".into()));
        }
        if args.poll_interval_ms == 0 || args.reload_retry_interval_ms == 0 {
            return Err(DaemonError::Config("poll and reload retry intervals must be positive".into()));
        }

        let listen = args.grpclisten.unwrap_or_else(ContextualNetAddress::loopback).normalize(DEFAULT_GRPC_PORT);
        Ok(Self {
            listen,
            server: ServerConfig { max_connections: args.rpc_max_clients, outgoing_route_capacity: args.outgoing_route_capacity },
            event_channel_capacity: args.event_channel_capacity,
            node: NodeSettings {
                url: args.node_url.clone(),
                user: args.node_user.clone(),
                password: args.node_password.clone(),
                certificate: args.node_cert.as_ref().filter(|path| !path.is_empty()).map(PathBuf::from),
                timeout: Duration::from_millis(args.node_timeout_ms),
            },
            watcher: WatcherConfig {
                poll_interval: Duration::from_millis(args.poll_interval_ms),
                max_block_catchup: args.max_block_catchup,
                failure_threshold: args.node_failure_threshold,
            },
            reload_retry_interval: Duration::from_millis(args.reload_retry_interval_ms),
            reset_registry_on_reload: args.reset_registry_on_reload,
            bootstrap: args.bootstrap.as_ref().filter(|path| !path.is_empty()).map(PathBuf::from),
        })
    }
}
