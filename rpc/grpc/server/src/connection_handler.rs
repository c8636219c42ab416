use crate::{connection::Connection, error::GrpcServerError, manager::Manager};
use futures::{FutureExt, Stream};
use nodesvc_core::{debug, info, warn};
use nodesvc_grpc_core::protowire::{
    NodeRequest, NodeResponse,
    node_rpc_server::{NodeRpc, NodeRpcServer},
};
use nodesvc_notify::registry::ClientRegistry;
use nodesvc_watcher::feerate::MempoolProvider;
use std::{
    fmt::Debug,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use nodesvc_utils::triggers::SingleTrigger;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{
        mpsc::channel as mpsc_channel,
        oneshot::{Sender as OneshotSender, channel as oneshot_channel},
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, codec::CompressionEncoding, transport::Server as TonicServer};

pub const DEFAULT_MAX_CONNECTIONS: usize = 24;
pub const DEFAULT_OUTGOING_ROUTE_CAPACITY: usize = 128;

const ACCEPT_QUEUE_CAPACITY: usize = 16;

/// Tasks and signals of a running server
pub(crate) struct ServerHandles {
    pub termination: OneshotSender<()>,
    pub accept_loop: JoinHandle<()>,
    pub server: JoinHandle<()>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub max_connections: usize,
    /// Capacity of the outbound queue of each connection
    pub outgoing_route_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: DEFAULT_MAX_CONNECTIONS, outgoing_route_capacity: DEFAULT_OUTGOING_ROUTE_CAPACITY }
    }
}

/// Build and runtime identity reported by `GetServiceInfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub version: String,
    pub branch: String,
    pub commit: String,
    pub build_time: String,
    pub generation: u64,
}

impl ServiceInfo {
    pub fn current(generation: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            branch: option_env!("NODESVC_GIT_BRANCH").unwrap_or("unknown").to_string(),
            commit: option_env!("NODESVC_GIT_COMMIT").unwrap_or("unknown").to_string(),
            build_time: option_env!("NODESVC_BUILD_TIME").unwrap_or("unknown").to_string(),
            generation,
        }
    }
}

/// What request handlers need from the rest of the service.
#[derive(Clone)]
pub struct ServerContext {
    pub registry: Arc<ClientRegistry>,
    pub mempool: Arc<dyn MempoolProvider>,
    pub service_info: ServiceInfo,
}

impl ServerContext {
    pub fn new(registry: Arc<ClientRegistry>, mempool: Arc<dyn MempoolProvider>, service_info: ServiceInfo) -> Self {
        Self { registry, mempool, service_info }
    }
}

impl Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext").field("registry", &self.registry).field("service_info", &self.service_info).finish()
    }
}

/// A protowire gRPC connections handler.
pub struct ConnectionHandler {
    server_context: ServerContext,
    manager: Manager,
    outgoing_route_capacity: usize,
    running: AtomicBool,
    accept_shutdown: SingleTrigger,
}

impl ConnectionHandler {
    pub fn new(server_context: ServerContext, manager: Manager, config: &ServerConfig) -> Self {
        Self {
            server_context,
            manager,
            outgoing_route_capacity: config.outgoing_route_capacity,
            running: AtomicBool::new(false),
            accept_shutdown: SingleTrigger::new(),
        }
    }

    /// Launches a gRPC server listener loop on an already bound listener.
    ///
    /// The listener is owned by a separate accept loop so it can be closed
    /// while established streams keep being served.
    pub(crate) fn serve(self: &Arc<Self>, listener: TcpListener) -> ServerHandles {
        let (termination_sender, termination_receiver) = oneshot_channel::<()>();
        let (stream_sender, stream_receiver) = mpsc_channel::<std::io::Result<TcpStream>>(ACCEPT_QUEUE_CAPACITY);
        let serve_address = listener.local_addr().map(|x| x.to_string()).unwrap_or_else(|_| "<unknown>".to_string());
        info!("gRPC Server starting on: {}", serve_address);

        let accept_shutdown = self.accept_shutdown.listener.clone();
        let accept_address = serve_address.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                select! {
                    biased;
                    _ = accept_shutdown.clone() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            if stream_sender.send(Ok(stream)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!("gRPC Server {} failed to accept a connection: {}", accept_address, err),
                    }
                }
            }
            drop(listener);
            debug!("gRPC Server {} listener closed", accept_address);
        });

        let connection_handler = self.clone();
        let server = tokio::spawn(async move {
            let protowire_server = NodeRpcServer::from_arc(connection_handler)
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);

            let serve_result = TonicServer::builder()
                .add_service(protowire_server)
                .serve_with_incoming_shutdown(ReceiverStream::new(stream_receiver), termination_receiver.map(drop))
                .await;

            match serve_result {
                Ok(_) => info!("gRPC Server stopped: {}", serve_address),
                Err(err) => warn!("gRPC Server {} stopped with error: {}", serve_address, err),
            }
        });
        ServerHandles { termination: termination_sender, accept_loop, server }
    }

    pub fn start(&self) {
        debug!("gRPC: Starting the connection handler");
        self.running.store(true, Ordering::SeqCst);
    }

    /// Refuses new incoming connections and stops the accept loop
    pub fn stop(&self) {
        debug!("gRPC: Stopping the connection handler");
        self.running.store(false, Ordering::SeqCst);
        self.accept_shutdown.trigger.trigger();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }
}

#[tonic::async_trait]
impl NodeRpc for ConnectionHandler {
    type MessageStreamStream = Pin<Box<dyn Stream<Item = Result<NodeResponse, tonic::Status>> + Send + Sync + 'static>>;

    async fn message_stream(
        &self,
        request: Request<tonic::Streaming<NodeRequest>>,
    ) -> Result<Response<Self::MessageStreamStream>, tonic::Status> {
        if !self.is_running() {
            return Err(tonic::Status::new(tonic::Code::Unavailable, "The gRPC service is down".to_string()));
        }

        let remote_address = request.remote_addr().ok_or_else(|| {
            tonic::Status::new(tonic::Code::InvalidArgument, "Incoming connection opening request has no remote address".to_string())
        })?;

        if self.manager.is_full() {
            return Err(GrpcServerError::ServerFull.into());
        }

        debug!("gRPC: incoming message stream from {:?}", remote_address);

        // Build the in/out pipes
        let (outgoing_route, outgoing_receiver) = mpsc_channel(self.outgoing_route_capacity);
        let incoming_stream = request.into_inner();

        // Build the connection object & register it
        let connection = Connection::new(remote_address, self.server_context.clone(), self.manager.clone(), outgoing_route);
        self.manager.register(connection.clone())?;
        connection.start(incoming_stream);

        // Return connection stream
        let response_stream = ReceiverStream::new(outgoing_receiver);
        Ok(Response::new(Box::pin(response_stream)))
    }
}
