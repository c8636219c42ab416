use crate::{
    connection::Connection,
    error::{GrpcServerError, GrpcServerResult},
};
use nodesvc_core::debug;
use nodesvc_utils::networking::ConnectionId;
use parking_lot::Mutex;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

#[derive(Clone, Debug)]
pub struct Manager {
    connections: Arc<Mutex<HashMap<ConnectionId, Connection>>>,
    max_connections: usize,
}

impl Manager {
    pub fn new(max_connections: usize) -> Self {
        Self { connections: Arc::new(Mutex::new(HashMap::new())), max_connections }
    }

    pub fn register(&self, connection: Connection) -> GrpcServerResult<()> {
        let mut connections = self.connections.lock();
        if connections.len() >= self.max_connections {
            return Err(GrpcServerError::ServerFull);
        }
        debug!("gRPC: Register a new connection from {connection}");
        if let Some(previous) = connections.insert(connection.identity(), connection) {
            previous.close();
        }
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.connections.lock().len() >= self.max_connections
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        match self.connections.lock().remove(&connection_id) {
            Some(connection) => {
                debug!("gRPC: Unregister the gRPC connection from {connection}");
            }
            None => {
                debug!("gRPC: Unregister the gRPC connection {connection_id} failed for connection not found");
            }
        }
    }

    /// Snapshot of the registered connections
    pub fn connections(&self) -> Vec<Connection> {
        self.connections.lock().values().cloned().collect()
    }

    pub fn active_connections(&self) -> Vec<SocketAddr> {
        self.connections.lock().values().map(|x| x.net_address()).collect()
    }

    pub fn has_connections(&self) -> bool {
        !self.connections.lock().is_empty()
    }

    /// Closes every connection, leaving the registry untouched.
    pub fn terminate_all_connections(&self) {
        let connections = self.connections.lock().drain().map(|(_, r)| r).collect::<Vec<_>>();
        for connection in connections {
            connection.close();
        }
    }
}
