use crate::{
    args::Args,
    config::Config,
    generation::DynNodeConnector,
    supervisor::{ReloadSupervisor, ServiceState},
};
use nodesvc_core::{
    info,
    task::service::{AsyncService, AsyncServiceFuture},
    trace,
};
use nodesvc_notify::registry::ClientRegistry;
use nodesvc_utils::{reload::ReloadTrigger, triggers::SingleTrigger};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::sync::watch;

const DEFAULT_LOG_DIR: &str = "logs";

fn get_home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    return dirs::data_local_dir().unwrap_or_default();
    #[cfg(not(target_os = "windows"))]
    return dirs::home_dir().unwrap_or_default();
}

/// Get the default application directory.
pub fn get_app_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    return get_home_dir().join("nodesvc");
    #[cfg(not(target_os = "windows"))]
    return get_home_dir().join(".nodesvc");
}

/// Get the application directory from the supplied [`Args`].
pub fn get_app_dir_from_args(args: &Args) -> PathBuf {
    match args.appdir.as_deref() {
        Some(app_dir) if !app_dir.is_empty() => PathBuf::from(app_dir.replace('~', &get_home_dir().to_string_lossy())),
        _ => get_app_dir(),
    }
}

/// Get the log directory from the supplied [`Args`].
pub fn get_log_dir(args: &Args) -> Option<PathBuf> {
    if args.no_log_files {
        return None;
    }
    match args.logdir.as_deref() {
        Some(log_dir) if !log_dir.is_empty() => Some(PathBuf::from(log_dir.replace('~', &get_home_dir().to_string_lossy()))),
        _ => Some(get_app_dir_from_args(args).join(DEFAULT_LOG_DIR)),
    }
}

/// Process-wide setup performed once, before any service starts.
#[derive(Default)]
pub struct Runtime {
    log_dir: Option<PathBuf>,
}

impl Runtime {
    pub fn from_args(args: &Args) -> Self {
        // Configure the panic behavior
        nodesvc_core::panic::configure_panic();

        let log_dir = get_log_dir(args);

        // Initialize the logger
        if let Err(err) = nodesvc_core::log::init_logger(log_dir.as_deref(), &args.log_level) {
            println!("Logger initialization failed: {err}");
        }

        Self { log_dir }
    }

    pub fn log_dir(&self) -> Option<&PathBuf> {
        self.log_dir.as_ref()
    }
}

/// The node event streaming service. Runs until [`AsyncService::signal_exit`] is called.
pub struct NodeService {
    supervisor: ReloadSupervisor,
    shutdown: SingleTrigger,
}

impl NodeService {
    pub const IDENT: &'static str = "node-service";

    pub fn new(config: Arc<Config>, connector: DynNodeConnector) -> Self {
        Self { supervisor: ReloadSupervisor::new(config, connector), shutdown: SingleTrigger::new() }
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.supervisor.registry()
    }

    /// Fires a reload. Ignored unless a generation is running.
    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.supervisor.reload_trigger()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.supervisor.subscribe_state()
    }

    pub fn state(&self) -> ServiceState {
        self.supervisor.state()
    }

    pub fn serve_address(&self) -> Option<SocketAddr> {
        self.supervisor.serve_address()
    }
}

impl AsyncService for NodeService {
    fn ident(self: Arc<Self>) -> &'static str {
        Self::IDENT
    }

    fn start(self: Arc<Self>) -> AsyncServiceFuture {
        trace!("{} starting", Self::IDENT);
        let shutdown = self.shutdown.listener.clone();
        Box::pin(async move {
            self.supervisor.run(shutdown).await;
            Ok(())
        })
    }

    fn signal_exit(self: Arc<Self>) {
        trace!("sending an exit signal to {}", Self::IDENT);
        self.shutdown.trigger.trigger();
    }

    fn stop(self: Arc<Self>) -> AsyncServiceFuture {
        Box::pin(async move {
            info!("{} stopped", Self::IDENT);
            Ok(())
        })
    }
}
