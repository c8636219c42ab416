//! Typed event channels linking the chain watcher to the dispatch loops.
//!
//! Every event type flows on its own bounded channel. All writing halves are
//! owned by a single [`EventSenders`] value which is not `Clone`: whoever holds
//! it is the only producer, and the channels close exactly when it is dropped.

use crate::{
    error::{Error, Result},
    events::EventType,
    notification::{BlockAdded, Event, MempoolDeleted, MempoolRecord, NewTransaction, ResyncRequest, SpentOutput},
};
use tokio::sync::mpsc::{Receiver, Sender, channel};

pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Writing halves of the event bus
#[derive(Debug)]
pub struct EventSenders {
    pub mempool_added: Sender<MempoolRecord>,
    pub mempool_deleted: Sender<MempoolDeleted>,
    pub spent_output: Sender<SpentOutput>,
    pub block_added: Sender<BlockAdded>,
    pub resync: Sender<ResyncRequest>,
    pub new_transaction: Sender<NewTransaction>,
}

impl EventSenders {
    /// Sends an event on the channel of its type, waiting for capacity.
    pub async fn send<E: BusEvent>(&self, event: E) -> Result<()> {
        Ok(E::sender(self).send(event).await?)
    }

    /// Sends an event without waiting, failing if the channel is full.
    pub fn try_send<E: BusEvent>(&self, event: E) -> Result<()> {
        Ok(E::sender(self).try_send(event)?)
    }

    pub fn is_closed(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::MempoolAdded => self.mempool_added.is_closed(),
            EventType::MempoolDeleted => self.mempool_deleted.is_closed(),
            EventType::SpentOutput => self.spent_output.is_closed(),
            EventType::BlockAdded => self.block_added.is_closed(),
            EventType::Resync => self.resync.is_closed(),
            EventType::NewTransaction => self.new_transaction.is_closed(),
        }
    }
}

/// Reading halves of the event bus, meant to be split among the dispatch loops.
#[derive(Debug)]
pub struct EventReceivers {
    pub mempool_added: Receiver<MempoolRecord>,
    pub mempool_deleted: Receiver<MempoolDeleted>,
    pub spent_output: Receiver<SpentOutput>,
    pub block_added: Receiver<BlockAdded>,
    pub resync: Receiver<ResyncRequest>,
    pub new_transaction: Receiver<NewTransaction>,
}

/// Creates the six bounded channels of a fresh event bus.
pub fn event_bus(capacity: usize) -> Result<(EventSenders, EventReceivers)> {
    if capacity == 0 {
        return Err(Error::General("event channel capacity must be positive".to_string()));
    }
    let (mempool_added_tx, mempool_added_rx) = channel(capacity);
    let (mempool_deleted_tx, mempool_deleted_rx) = channel(capacity);
    let (spent_output_tx, spent_output_rx) = channel(capacity);
    let (block_added_tx, block_added_rx) = channel(capacity);
    let (resync_tx, resync_rx) = channel(capacity);
    let (new_transaction_tx, new_transaction_rx) = channel(capacity);
    Ok((
        EventSenders {
            mempool_added: mempool_added_tx,
            mempool_deleted: mempool_deleted_tx,
            spent_output: spent_output_tx,
            block_added: block_added_tx,
            resync: resync_tx,
            new_transaction: new_transaction_tx,
        },
        EventReceivers {
            mempool_added: mempool_added_rx,
            mempool_deleted: mempool_deleted_rx,
            spent_output: spent_output_rx,
            block_added: block_added_rx,
            resync: resync_rx,
            new_transaction: new_transaction_rx,
        },
    ))
}

/// An [`Event`] with a dedicated channel on the bus.
pub trait BusEvent: Event + Sized {
    fn sender(senders: &EventSenders) -> &Sender<Self>;
}

macro_rules! bus_event {
    ($payload:ty, $field:ident) => {
        impl BusEvent for $payload {
            fn sender(senders: &EventSenders) -> &Sender<Self> {
                &senders.$field
            }
        }
    };
}

bus_event!(MempoolRecord, mempool_added);
bus_event!(MempoolDeleted, mempool_deleted);
bus_event!(SpentOutput, spent_output);
bus_event!(BlockAdded, block_added);
bus_event!(ResyncRequest, resync);
bus_event!(NewTransaction, new_transaction);
