use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    ops::{Index, IndexMut},
    str::FromStr,
};

/// Event type classifying the channels of the event bus and the notifications
/// pushed to clients.
///
/// Note: adding an event starts here, then goes through the payload in
/// [`crate::notification`], the bus and the protowire conversion.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    MempoolAdded = 0,
    MempoolDeleted,
    SpentOutput,
    BlockAdded,
    Resync,
    NewTransaction,
}

pub const EVENT_COUNT: usize = 6;

pub const EVENT_TYPE_ARRAY: [EventType; EVENT_COUNT] = [
    EventType::MempoolAdded,
    EventType::MempoolDeleted,
    EventType::SpentOutput,
    EventType::BlockAdded,
    EventType::Resync,
    EventType::NewTransaction,
];

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MempoolAdded => "mempool-added",
            EventType::MempoolDeleted => "mempool-deleted",
            EventType::SpentOutput => "spent-output",
            EventType::BlockAdded => "block-added",
            EventType::Resync => "resync",
            EventType::NewTransaction => "new-transaction",
        }
    }

    /// Events of these types are routed through the subscriber registry
    pub fn is_address_keyed(&self) -> bool {
        matches!(self, EventType::SpentOutput | EventType::NewTransaction)
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EVENT_TYPE_ARRAY.into_iter().find(|x| x.as_str() == s).ok_or_else(|| Error::InvalidEventType(s.to_string()))
    }
}

/// Generic array with [`EventType`] strongly-typed index
#[derive(Default, Debug)]
pub struct EventArray<T>([T; EVENT_COUNT]);

impl<T> EventArray<T> {
    pub fn from_fn<F>(cb: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        Self(core::array::from_fn(cb))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventType, &T)> {
        EVENT_TYPE_ARRAY.into_iter().zip(self.0.iter())
    }
}

impl<T> Index<EventType> for EventArray<T> {
    type Output = T;

    fn index(&self, index: EventType) -> &Self::Output {
        &self.0[index as usize]
    }
}

impl<T> IndexMut<EventType> for EventArray<T> {
    fn index_mut(&mut self, index: EventType) -> &mut Self::Output {
        &mut self.0[index as usize]
    }
}
