use crate::{
    connection_handler::ServerContext,
    error::{GrpcServerError, GrpcServerResult},
    manager::Manager,
    request_handler::RequestHandler,
};
use nodesvc_core::{debug, trace, warn};
use nodesvc_grpc_core::protowire::{NodeRequest, NodeResponse};
use nodesvc_notify::notification::SubscriberEntry;
use nodesvc_utils::{networking::ConnectionId, triggers::SingleTrigger};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fmt::Display,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{select, sync::mpsc::error::TrySendError};

pub type StatusResult<T> = Result<T, tonic::Status>;
pub type GrpcSender = tokio::sync::mpsc::Sender<StatusResult<NodeResponse>>;

#[derive(Debug)]
struct Inner {
    connection_id: ConnectionId,
    net_address: SocketAddr,
    server_context: ServerContext,
    manager: Manager,

    /// Sends responses and notifications to the client
    outgoing_route: GrpcSender,

    /// Registry pairs added through this connection
    subscriptions: Mutex<HashSet<(String, SubscriberEntry)>>,

    /// Stops the incoming request loop
    shutdown_signal: SingleTrigger,

    closed: AtomicBool,
}

#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.inner.connection_id, self.inner.net_address)
    }
}

impl Connection {
    pub fn new(net_address: SocketAddr, server_context: ServerContext, manager: Manager, outgoing_route: GrpcSender) -> Self {
        let inner = Inner {
            connection_id: ConnectionId::new_random(),
            net_address,
            server_context,
            manager,
            outgoing_route,
            subscriptions: Default::default(),
            shutdown_signal: SingleTrigger::new(),
            closed: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Spawns the loop answering the requests of the client.
    pub(crate) fn start(&self, mut incoming_stream: tonic::Streaming<NodeRequest>) {
        let connection = self.clone();
        let shutdown = self.inner.shutdown_signal.listener.clone();
        tokio::spawn(async move {
            debug!("gRPC, starting request loop for client {}", connection);
            let request_handler = RequestHandler::new(connection.clone());
            loop {
                select! {
                    biased;
                    _ = shutdown.clone() => {
                        debug!("gRPC, request loop of client {} was asked to stop", connection);
                        break;
                    }
                    message = incoming_stream.message() => {
                        match message {
                            Ok(Some(request)) => {
                                trace!("gRPC, incoming request #{} from {}", request.id, connection);
                                match request_handler.handle_request(request).await {
                                    Ok(response) => {
                                        if let Err(err) = connection.enqueue(response) {
                                            warn!("gRPC, client {} cannot receive its response: {}", connection, err);
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        warn!("gRPC, invalid request from client {}: {}", connection, err);
                                    }
                                }
                            }
                            Ok(None) => {
                                debug!("gRPC, incoming stream of client {} ended", connection);
                                break;
                            }
                            Err(status) => {
                                debug!("gRPC, incoming stream of client {} failed: {}", connection, status);
                                break;
                            }
                        }
                    }
                }
            }
            // A loop ending on its own means the peer is gone. No-op after a server side close.
            connection.disconnect();
            debug!("gRPC, request loop of client {} terminated", connection);
        });
    }

    pub fn identity(&self) -> ConnectionId {
        self.inner.connection_id
    }

    pub fn net_address(&self) -> SocketAddr {
        self.inner.net_address
    }

    pub fn server_context(&self) -> &ServerContext {
        &self.inner.server_context
    }

    /// Queues a message without waiting. A full queue is an error.
    pub fn enqueue(&self, message: NodeResponse) -> GrpcServerResult<()> {
        if self.is_closed() {
            return Err(GrpcServerError::ConnectionClosed);
        }
        match self.inner.outgoing_route.try_send(Ok(message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GrpcServerError::OutgoingRouteCapacityReached(self.to_string())),
            Err(TrySendError::Closed(_)) => Err(GrpcServerError::ConnectionClosed),
        }
    }

    pub(crate) fn add_subscription(&self, address: &str, entry: SubscriberEntry) -> bool {
        let added = self.inner.server_context.registry.subscribe(address, entry.clone());
        if added {
            self.inner.subscriptions.lock().insert((address.to_string(), entry));
        }
        added
    }

    pub(crate) fn remove_subscription(&self, address: &str, entry: SubscriberEntry) -> bool {
        self.inner.subscriptions.lock().remove(&(address.to_string(), entry.clone()));
        self.inner.server_context.registry.unsubscribe(address, &entry)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Closes the connection, keeping its registry entries. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.shutdown_signal.trigger.trigger();
        true
    }

    /// Tears the connection down after its peer went away, releasing its registry entries.
    pub fn disconnect(&self) {
        if !self.close() {
            return;
        }
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        let registry = &self.inner.server_context.registry;
        let released = subscriptions.into_iter().filter(|(address, entry)| registry.unsubscribe(address, entry)).count();
        self.inner.manager.unregister(self.identity());
        debug!("gRPC, client {} disconnected, {} subscriptions released", self, released);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.outgoing_route.is_closed()
    }
}
