use nodesvc_core::{error, info, task::service::AsyncService};
use nodesvcd_lib::{
    args::parse_args,
    config::Config,
    daemon::{NodeService, Runtime},
    generation::HttpConnector,
};
use std::{process::exit, sync::Arc};

pub fn main() {
    let args = parse_args();
    let runtime = Runtime::from_args(&args);

    let config = match Config::from_args(&args) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            println!("{err}");
            exit(1);
        }
    };

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    match runtime.log_dir() {
        Some(log_dir) => info!("Logs directory: {}", log_dir.display()),
        None => info!("Logs to console only"),
    }
    info!("Node endpoint: {}", config.node.url);

    let service = Arc::new(NodeService::new(config, Arc::new(HttpConnector)));

    // Bind the keyboard and termination signals to the service
    let exit_service = service.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("^SIGNAL - shutting down");
        exit_service.clone().signal_exit();
    }) {
        error!("Unable to set the termination signal handler: {}", err);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().worker_threads(args.async_threads.max(1)).enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!("Unable to build the async runtime: {}", err);
            exit(1);
        }
    };

    rt.block_on(async {
        #[cfg(unix)]
        spawn_reload_on_hangup(&service);

        if let Err(err) = service.clone().start().await {
            error!("{} exited with error: {}", NodeService::IDENT, err);
        }
        if let Err(err) = service.clone().stop().await {
            error!("{} stopped with error: {}", NodeService::IDENT, err);
        }
    });
    info!("Node service has stopped...");
}

/// Turns every SIGHUP into a service reload.
#[cfg(unix)]
fn spawn_reload_on_hangup(service: &Arc<NodeService>) {
    use tokio::signal::unix::{SignalKind, signal};

    let reload = service.reload_trigger();
    match signal(SignalKind::hangup()) {
        Ok(mut hangup) => {
            tokio::spawn(async move {
                while hangup.recv().await.is_some() {
                    info!("^SIGHUP - reloading");
                    reload.fire();
                }
            });
        }
        Err(err) => error!("Unable to listen for SIGHUP: {}", err),
    }
}
