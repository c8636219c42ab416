use crate::{
    connection_handler::{ConnectionHandler, ServerConfig, ServerContext},
    dispatch::{DispatchCounters, spawn_dispatchers},
    error::GrpcServerResult,
    manager::Manager,
};
use nodesvc_core::{debug, warn};
use nodesvc_notify::bus::EventReceivers;
use parking_lot::Mutex;
use std::{mem, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot::Sender as OneshotSender, task::JoinHandle, time::timeout};

/// The streaming server of one service generation.
///
/// Draining happens in steps so the owner can interleave the shutdown of the
/// event producer: [`Adaptor::stop_accepting`], then [`Adaptor::drain_dispatchers`]
/// once the event bus writer is gone, then [`Adaptor::terminate`].
pub struct Adaptor {
    /// If a server was started, it will get cleaned up when this sender is dropped or invoked
    server_termination: Mutex<Option<OneshotSender<()>>>,

    accept_loop: Mutex<Option<JoinHandle<()>>>,

    server_handle: Mutex<Option<JoinHandle<()>>>,

    dispatchers: Mutex<Vec<JoinHandle<()>>>,

    /// An object for handling new connections coming from clients
    connection_handler: Arc<ConnectionHandler>,

    counters: Arc<DispatchCounters>,

    /// The network address of the server
    serve_address: SocketAddr,
}

impl Adaptor {
    pub const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

    /// Starts serving on `listener` and dispatching the events read from `receivers`.
    pub fn server(
        listener: TcpListener,
        server_context: ServerContext,
        config: &ServerConfig,
        receivers: EventReceivers,
    ) -> GrpcServerResult<Arc<Self>> {
        let serve_address = listener.local_addr()?;
        let manager = Manager::new(config.max_connections);
        let counters = Arc::new(DispatchCounters::default());
        let dispatchers = spawn_dispatchers(receivers, server_context.registry.clone(), manager.clone(), counters.clone());
        let connection_handler = Arc::new(ConnectionHandler::new(server_context, manager, config));
        let handles = connection_handler.serve(listener);
        connection_handler.start();
        Ok(Arc::new(Self {
            server_termination: Mutex::new(Some(handles.termination)),
            accept_loop: Mutex::new(Some(handles.accept_loop)),
            server_handle: Mutex::new(Some(handles.server)),
            dispatchers: Mutex::new(dispatchers),
            connection_handler,
            counters,
            serve_address,
        }))
    }

    pub fn serve_address(&self) -> SocketAddr {
        self.serve_address
    }

    pub fn counters(&self) -> Arc<DispatchCounters> {
        self.counters.clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.connection_handler.is_running()
    }

    /// Refuses new streams and closes the listener. Open connections stay up.
    ///
    /// On return the listening socket is released.
    pub async fn stop_accepting(&self) {
        self.connection_handler.stop();
        let termination = self.server_termination.lock().take();
        if let Some(termination) = termination {
            let _ = termination.send(());
        }
        let accept_loop = self.accept_loop.lock().take();
        if let Some(accept_loop) = accept_loop {
            if let Err(err) = accept_loop.await {
                warn!("gRPC, the accept loop of {} failed: {}", self.serve_address, err);
            }
        }
    }

    /// Waits for every dispatch loop to deliver what is left on the event bus and exit.
    ///
    /// The loops only exit once the bus writer is gone.
    pub async fn drain_dispatchers(&self) {
        let dispatchers = mem::take(&mut *self.dispatchers.lock());
        for dispatcher in dispatchers {
            if let Err(err) = dispatcher.await {
                warn!("gRPC, a dispatch loop failed: {}", err);
            }
        }
        debug!("gRPC, all dispatch loops exited");
    }

    pub fn terminate_all_connections(&self) {
        self.connection_handler.manager().terminate_all_connections();
    }

    /// Closes the remaining connections and waits for the server task.
    pub async fn terminate(&self) {
        self.stop_accepting().await;
        self.terminate_all_connections();
        let handle = self.server_handle.lock().take();
        if let Some(handle) = handle {
            match timeout(Self::SERVER_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("gRPC, server {} terminated", self.serve_address),
                Ok(Err(err)) => warn!("gRPC, server {} task failed: {}", self.serve_address, err),
                Err(_) => warn!("gRPC, server {} did not terminate in time", self.serve_address),
            }
        }
    }

    /// Full shutdown. The event bus writer must already be gone.
    pub async fn stop(&self) {
        self.stop_accepting().await;
        self.drain_dispatchers().await;
        self.terminate().await;
    }

    pub fn active_connections(&self) -> Vec<SocketAddr> {
        self.connection_handler.manager().active_connections()
    }

    pub fn has_connections(&self) -> bool {
        self.connection_handler.manager().has_connections()
    }
}

impl Drop for Adaptor {
    fn drop(&mut self) {
        // Releases the listener even when the owner never stopped the server
        self.connection_handler.stop();
    }
}
