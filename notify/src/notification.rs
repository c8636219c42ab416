//! Payloads carried by the event bus and the notifications derived from them.

use crate::events::EventType;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A mempool transaction with its fee rate in satoshis per byte.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolRecord {
    pub fee_rate: i64,
    pub transaction_hash: String,
}

impl MempoolRecord {
    pub fn new(fee_rate: i64, transaction_hash: String) -> Self {
        Self { fee_rate, transaction_hash }
    }
}

/// A party interested in the events of an address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberEntry {
    pub user_id: String,
    pub wallet_index: u32,
    pub address_index: u32,
}

impl SubscriberEntry {
    pub fn new(user_id: impl Into<String>, wallet_index: u32, address_index: u32) -> Self {
        Self { user_id: user_id.into(), wallet_index, address_index }
    }
}

impl Display for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.wallet_index, self.address_index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MempoolDeleted {
    pub transaction_hash: String,
}

/// An output of `address` consumed by `spending_transaction_hash`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpentOutput {
    pub address: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub spending_transaction_hash: String,
    pub amount: u64,
}

/// An output paying to `address`. `block_height` is `None` while unconfirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransaction {
    pub address: String,
    pub transaction_hash: String,
    pub output_index: u32,
    pub amount: u64,
    pub block_height: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockAdded {
    pub height: u64,
    pub hash: String,
}

/// Asks downstream consumers to rescan the given height range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResyncRequest {
    pub from_height: u64,
    pub to_height: u64,
}

/// A notification ready to be pushed to client connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    MempoolAdded(MempoolRecord),
    MempoolDeleted(MempoolDeleted),
    SpentOutput(SpentOutput, Vec<SubscriberEntry>),
    BlockAdded(BlockAdded),
    Resync(ResyncRequest),
    NewTransaction(NewTransaction, Vec<SubscriberEntry>),
}

impl Notification {
    pub fn event_type(&self) -> EventType {
        match self {
            Notification::MempoolAdded(_) => EventType::MempoolAdded,
            Notification::MempoolDeleted(_) => EventType::MempoolDeleted,
            Notification::SpentOutput(..) => EventType::SpentOutput,
            Notification::BlockAdded(_) => EventType::BlockAdded,
            Notification::Resync(_) => EventType::Resync,
            Notification::NewTransaction(..) => EventType::NewTransaction,
        }
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::MempoolAdded(x) => write!(f, "{} {}", self.event_type(), x.transaction_hash),
            Notification::MempoolDeleted(x) => write!(f, "{} {}", self.event_type(), x.transaction_hash),
            Notification::SpentOutput(x, s) => write!(f, "{} {} ({} subscribers)", self.event_type(), x.address, s.len()),
            Notification::BlockAdded(x) => write!(f, "{} #{}", self.event_type(), x.height),
            Notification::Resync(x) => write!(f, "{} {}..={}", self.event_type(), x.from_height, x.to_height),
            Notification::NewTransaction(x, s) => write!(f, "{} {} ({} subscribers)", self.event_type(), x.address, s.len()),
        }
    }
}

/// A payload that travels on its own event bus channel.
pub trait Event: Send + Sync + 'static {
    const EVENT_TYPE: EventType;

    /// The address routing this event through the registry, if any.
    fn address(&self) -> Option<&str> {
        None
    }

    fn into_notification(self, subscribers: Vec<SubscriberEntry>) -> Notification;
}

impl Event for MempoolRecord {
    const EVENT_TYPE: EventType = EventType::MempoolAdded;

    fn into_notification(self, _: Vec<SubscriberEntry>) -> Notification {
        Notification::MempoolAdded(self)
    }
}

impl Event for MempoolDeleted {
    const EVENT_TYPE: EventType = EventType::MempoolDeleted;

    fn into_notification(self, _: Vec<SubscriberEntry>) -> Notification {
        Notification::MempoolDeleted(self)
    }
}

impl Event for SpentOutput {
    const EVENT_TYPE: EventType = EventType::SpentOutput;

    fn address(&self) -> Option<&str> {
        Some(&self.address)
    }

    fn into_notification(self, subscribers: Vec<SubscriberEntry>) -> Notification {
        Notification::SpentOutput(self, subscribers)
    }
}

impl Event for BlockAdded {
    const EVENT_TYPE: EventType = EventType::BlockAdded;

    fn into_notification(self, _: Vec<SubscriberEntry>) -> Notification {
        Notification::BlockAdded(self)
    }
}

impl Event for ResyncRequest {
    const EVENT_TYPE: EventType = EventType::Resync;

    fn into_notification(self, _: Vec<SubscriberEntry>) -> Notification {
        Notification::Resync(self)
    }
}

impl Event for NewTransaction {
    const EVENT_TYPE: EventType = EventType::NewTransaction;

    fn address(&self) -> Option<&str> {
        Some(&self.address)
    }

    fn into_notification(self, subscribers: Vec<SubscriberEntry>) -> Notification {
        Notification::NewTransaction(self, subscribers)
    }
}
