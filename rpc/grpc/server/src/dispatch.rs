//! One loop per event type, from the event bus to the client connections.
//!
//! Every connection receives every event, address events included, along with the
//! full list of matched subscribers. A connected client is a trusted backend that
//! routes the entries to its own users, so subscriptions are not partitioned per
//! connection.

use crate::manager::Manager;
use nodesvc_core::{debug, trace, warn};
use nodesvc_grpc_core::protowire::NodeResponse;
use nodesvc_notify::{
    bus::EventReceivers,
    events::{EventArray, EventType},
    notification::Event,
    registry::ClientRegistry,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{sync::mpsc::Receiver, task::JoinHandle};

#[derive(Debug, Default)]
pub struct DispatchCounters {
    /// Events read from the bus
    pub received: EventArray<AtomicU64>,
    /// Messages queued to a connection
    pub delivered: EventArray<AtomicU64>,
    /// Address events without any subscriber
    pub unmatched: EventArray<AtomicU64>,
    /// Connections dropped because they could not take a message
    pub disconnected: EventArray<AtomicU64>,
}

impl DispatchCounters {
    pub fn received(&self, event_type: EventType) -> u64 {
        self.received[event_type].load(Ordering::SeqCst)
    }

    pub fn delivered(&self, event_type: EventType) -> u64 {
        self.delivered[event_type].load(Ordering::SeqCst)
    }

    pub fn unmatched(&self, event_type: EventType) -> u64 {
        self.unmatched[event_type].load(Ordering::SeqCst)
    }

    pub fn disconnected(&self, event_type: EventType) -> u64 {
        self.disconnected[event_type].load(Ordering::SeqCst)
    }
}

/// Forwards every event of `receiver` until its channel closes and is drained.
pub async fn dispatch_loop<E: Event>(
    mut receiver: Receiver<E>,
    registry: Arc<ClientRegistry>,
    manager: Manager,
    counters: Arc<DispatchCounters>,
) {
    let event_type = E::EVENT_TYPE;
    debug!("[Dispatcher {}] starting", event_type);
    while let Some(event) = receiver.recv().await {
        counters.received[event_type].fetch_add(1, Ordering::SeqCst);
        let subscribers = match event.address() {
            Some(address) => {
                let subscribers = registry.lookup(address);
                if subscribers.is_empty() {
                    trace!("[Dispatcher {}] no subscriber for {}", event_type, address);
                    counters.unmatched[event_type].fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                subscribers
            }
            None => vec![],
        };
        let notification = event.into_notification(subscribers);
        trace!("[Dispatcher {}] dispatching {}", event_type, notification);
        let message = NodeResponse::from(&notification);
        for connection in manager.connections() {
            match connection.enqueue(message.clone()) {
                Ok(()) => {
                    counters.delivered[event_type].fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    warn!("[Dispatcher {}] dropping client {}: {}", event_type, connection, err);
                    connection.disconnect();
                    counters.disconnected[event_type].fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
    debug!("[Dispatcher {}] event channel closed, exiting", event_type);
}

/// Spawns the six dispatch loops of a generation.
pub fn spawn_dispatchers(
    receivers: EventReceivers,
    registry: Arc<ClientRegistry>,
    manager: Manager,
    counters: Arc<DispatchCounters>,
) -> Vec<JoinHandle<()>> {
    let EventReceivers { mempool_added, mempool_deleted, spent_output, block_added, resync, new_transaction } = receivers;
    vec![
        tokio::spawn(dispatch_loop(mempool_added, registry.clone(), manager.clone(), counters.clone())),
        tokio::spawn(dispatch_loop(mempool_deleted, registry.clone(), manager.clone(), counters.clone())),
        tokio::spawn(dispatch_loop(spent_output, registry.clone(), manager.clone(), counters.clone())),
        tokio::spawn(dispatch_loop(block_added, registry.clone(), manager.clone(), counters.clone())),
        tokio::spawn(dispatch_loop(resync, registry.clone(), manager.clone(), counters.clone())),
        tokio::spawn(dispatch_loop(new_transaction, registry, manager, counters)),
    ]
}
