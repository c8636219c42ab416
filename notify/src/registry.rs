//! Concurrent address → subscribers registry.

use crate::notification::SubscriberEntry;
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Display};

/// One registry row, as found in bootstrap files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSubscription {
    pub address: String,
    #[serde(flatten)]
    pub entry: SubscriberEntry,
}

/// Maps blockchain addresses to the subscribers interested in them.
///
/// The map is sharded: operations on different addresses mostly land in
/// different shards and never wait on each other, while operations on the
/// same address are serialized by its shard lock.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    addresses: DashMap<String, HashSet<SubscriberEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entry` for `address`. Returns `false` if it was already registered.
    pub fn subscribe(&self, address: &str, entry: SubscriberEntry) -> bool {
        self.addresses.entry(address.to_owned()).or_default().insert(entry)
    }

    /// Removes `entry` from `address`. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, address: &str, entry: &SubscriberEntry) -> bool {
        match self.addresses.entry(address.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let removed = occupied.get_mut().remove(entry);
                if occupied.get().is_empty() {
                    occupied.remove();
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Returns a sorted snapshot of the subscribers of `address`.
    pub fn lookup(&self, address: &str) -> Vec<SubscriberEntry> {
        let mut entries = self.addresses.get(address).map(|set| set.iter().cloned().collect::<Vec<_>>()).unwrap_or_default();
        entries.sort();
        entries
    }

    pub fn contains(&self, address: &str, entry: &SubscriberEntry) -> bool {
        self.addresses.get(address).is_some_and(|set| set.contains(entry))
    }

    pub fn extend(&self, subscriptions: impl IntoIterator<Item = AddressSubscription>) -> usize {
        subscriptions.into_iter().filter(|x| self.subscribe(&x.address, x.entry.clone())).count()
    }

    /// Number of (address, subscriber) pairs
    pub fn len(&self) -> usize {
        self.addresses.iter().map(|x| x.value().len()).sum()
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn clear(&self) {
        self.addresses.clear();
    }
}

impl Display for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} subscriptions over {} addresses", self.len(), self.address_count())
    }
}
