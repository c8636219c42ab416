//! A payload-less, multi-shot reload signal.
//!
//! Any number of [`ReloadTrigger`] clones may fire; the single [`ReloadListener`]
//! sees at most one pending request at a time, so a burst of signals collapses
//! into one reload.

use async_channel::{Receiver, Sender, TrySendError, bounded};

#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    sender: Sender<()>,
}

impl ReloadTrigger {
    /// Requests a reload. Returns `false` if a request was already pending
    /// or if the listener is gone.
    pub fn fire(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug)]
pub struct ReloadListener {
    receiver: Receiver<()>,
}

impl ReloadListener {
    /// Waits for the next reload request. Returns `false` once every trigger has been dropped.
    pub async fn recv(&self) -> bool {
        self.receiver.recv().await.is_ok()
    }

    /// Discards any pending request, returning how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let mut count = 0;
        while self.receiver.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    pub fn is_pending(&self) -> bool {
        !self.receiver.is_empty()
    }
}

pub fn reload_signal() -> (ReloadTrigger, ReloadListener) {
    let (sender, receiver) = bounded(1);
    (ReloadTrigger { sender }, ReloadListener { receiver })
}
