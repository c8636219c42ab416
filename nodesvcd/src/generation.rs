//! One generation of the service: listener, streaming server, chain watcher and
//! the event bus connecting them.

use crate::{
    bootstrap::{load_certificate, populate_registry},
    config::{Config, NodeSettings},
    error::{DaemonError, DaemonResult},
};
use nodesvc_core::{
    debug, info,
    task::service::{AsyncService, AsyncServiceResult},
    warn,
};
use nodesvc_grpc_server::{
    adaptor::Adaptor,
    connection_handler::{ServerContext, ServiceInfo},
};
use nodesvc_notify::{bus::event_bus, registry::ClientRegistry};
use nodesvc_utils::reload::ReloadTrigger;
use nodesvc_watcher::{
    client::{HttpNodeClient, NodeClientConfig},
    feerate::FeeEstimator,
    node::DynNodeApi,
    watcher::ChainWatcher,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};

/// Builds the node client of a new generation.
pub trait NodeConnector: Send + Sync {
    fn connect(&self, settings: &NodeSettings) -> DaemonResult<DynNodeApi>;
}

pub type DynNodeConnector = Arc<dyn NodeConnector>;

/// Connects to the node over HTTP JSON-RPC, reading the certificate file on every call.
#[derive(Debug, Default)]
pub struct HttpConnector;

impl NodeConnector for HttpConnector {
    fn connect(&self, settings: &NodeSettings) -> DaemonResult<DynNodeApi> {
        let certificate = settings.certificate.as_deref().map(load_certificate).unwrap_or_default();
        let client = HttpNodeClient::new(NodeClientConfig {
            url: settings.url.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            certificate,
            timeout: Some(settings.timeout),
        })?;
        debug!("Node client for {} initialized", client.url());
        Ok(Arc::new(client))
    }
}

pub struct Generation {
    number: u64,
    adaptor: Arc<Adaptor>,
    watcher: Arc<ChainWatcher>,
    watcher_handle: JoinHandle<AsyncServiceResult<()>>,
}

impl Generation {
    /// Binds the listener and starts every component. Any failure leaves nothing running.
    pub async fn start(
        number: u64,
        config: &Config,
        registry: Arc<ClientRegistry>,
        connector: &dyn NodeConnector,
        reload: ReloadTrigger,
    ) -> DaemonResult<Self> {
        let address = SocketAddr::from(config.listen);
        let listener = TcpListener::bind(address).await.map_err(|source| DaemonError::Bind { address: address.to_string(), source })?;
        let node = connector.connect(&config.node)?;
        populate_registry(&registry, config.bootstrap.as_deref())?;

        let (senders, receivers) = event_bus(config.event_channel_capacity)?;
        let context = ServerContext::new(registry, Arc::new(FeeEstimator::new(node.clone())), ServiceInfo::current(number));
        let adaptor = Adaptor::server(listener, context, &config.server, receivers)?;
        let watcher = Arc::new(ChainWatcher::new(node, config.watcher.clone(), senders, Some(reload)));
        let watcher_handle = tokio::spawn(watcher.clone().start());

        info!("Generation {} running on {}", number, adaptor.serve_address());
        Ok(Self { number, adaptor, watcher, watcher_handle })
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn serve_address(&self) -> SocketAddr {
        self.adaptor.serve_address()
    }

    /// Stops the generation. On return the listener is closed and every task has exited.
    ///
    /// The watcher is stopped before the dispatchers drain so that the event
    /// channels only close once their writer is gone.
    pub async fn drain(self) {
        info!("Draining generation {}", self.number);
        self.adaptor.stop_accepting().await;

        self.watcher.clone().signal_exit();
        match self.watcher_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Generation {}: {} exited with error: {}", self.number, ChainWatcher::IDENT, err),
            Err(err) => warn!("Generation {}: {} task failed: {}", self.number, ChainWatcher::IDENT, err),
        }
        if let Err(err) = self.watcher.clone().stop().await {
            warn!("Generation {}: stopping {} failed: {}", self.number, ChainWatcher::IDENT, err);
        }

        self.adaptor.drain_dispatchers().await;
        self.adaptor.terminate().await;
        info!("Generation {} stopped", self.number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use nodesvc_utils::reload::reload_signal;
    use nodesvc_watcher::{error::NodeError, mock::MockNode};
    use std::time::Duration;

    fn settings(url: &str) -> NodeSettings {
        NodeSettings {
            url: url.to_string(),
            user: Some("rpcuser".to_string()),
            password: None,
            certificate: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_http_connector() {
        assert!(matches!(HttpConnector.connect(&settings("ftp://127.0.0.1:8332")), Err(DaemonError::NodeClient(NodeError::InvalidUrl(_)))));

        // An unreadable certificate degrades to a connection without pinning
        let dir = tempfile::tempdir().unwrap();
        let settings = NodeSettings { certificate: Some(dir.path().join("missing.pem")), ..settings("http://127.0.0.1:8332") };
        assert!(HttpConnector.connect(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_start_fails_when_the_address_is_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let args = Args { grpclisten: Some(taken.local_addr().unwrap().to_string().parse().unwrap()), ..Default::default() };
        let config = Config::from_args(&args).unwrap();
        let (reload, _listener) = reload_signal();
        let result = Generation::start(1, &config, Arc::new(ClientRegistry::new()), &HttpConnector, reload).await;
        assert!(matches!(result, Err(DaemonError::Bind { .. })));
    }

    struct MockConnector(Arc<MockNode>);

    impl NodeConnector for MockConnector {
        fn connect(&self, _: &NodeSettings) -> DaemonResult<DynNodeApi> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_drain_releases_the_listener() {
        let node = Arc::new(MockNode::new());
        node.push_block("00", vec![]);
        let connector = MockConnector(node);
        let args = Args { grpclisten: Some("127.0.0.1:0".parse().unwrap()), poll_interval_ms: 10, ..Default::default() };
        let config = Config::from_args(&args).unwrap();
        let (reload, _listener) = reload_signal();

        let generation = Generation::start(7, &config, Arc::new(ClientRegistry::new()), &connector, reload).await.unwrap();
        assert_eq!(generation.number(), 7);
        let address = generation.serve_address();
        generation.drain().await;

        // The same address can be bound again once the generation is gone
        assert!(TcpListener::bind(address).await.is_ok());
    }
}
