//! Polls the node and feeds the event bus.
//!
//! The watcher is the only writer of a generation's event bus. It owns the
//! [`EventSenders`] for the whole duration of its run and drops them when the
//! run ends, which closes every channel after the last event was sent.

use crate::{
    error::NodeError,
    feerate::entry_fee_rate,
    node::{DynNodeApi, Transaction, btc_to_satoshi},
};
use nodesvc_core::{
    debug, info,
    task::service::{AsyncService, AsyncServiceError, AsyncServiceFuture, AsyncServiceResult},
    trace, warn,
};
use nodesvc_notify::{
    bus::{BusEvent, EventSenders},
    notification::{BlockAdded, MempoolDeleted, MempoolRecord, NewTransaction, ResyncRequest, SpentOutput},
};
use nodesvc_utils::{reload::ReloadTrigger, triggers::SingleTrigger};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::{select, time::sleep};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BLOCK_CATCHUP: u64 = 100;
pub const DEFAULT_NODE_FAILURE_THRESHOLD: u32 = 5;

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Largest block gap replayed block by block; wider gaps are turned into a resync request. Zero disables the limit.
    pub max_block_catchup: u64,
    /// Consecutive failed polls after which a service reload is requested. Zero disables reload requests.
    pub failure_threshold: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_block_catchup: DEFAULT_MAX_BLOCK_CATCHUP,
            failure_threshold: DEFAULT_NODE_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug)]
enum PollError {
    Node(NodeError),
    /// The reading half of a channel is gone
    BusClosed,
}

impl From<NodeError> for PollError {
    fn from(err: NodeError) -> Self {
        PollError::Node(err)
    }
}

type PollResult = std::result::Result<(), PollError>;

/// What the watcher knows about the node. Both parts are seeded silently by the first successful poll.
#[derive(Debug, Default)]
struct ChainState {
    mempool: Option<HashSet<String>>,
    tip: Option<(u64, String)>,
}

pub struct ChainWatcher {
    node: DynNodeApi,
    config: WatcherConfig,
    senders: Mutex<Option<EventSenders>>,
    reload: Option<ReloadTrigger>,
    shutdown: SingleTrigger,
}

impl ChainWatcher {
    pub const IDENT: &'static str = "chain-watcher";

    pub fn new(node: DynNodeApi, config: WatcherConfig, senders: EventSenders, reload: Option<ReloadTrigger>) -> Self {
        Self { node, config, senders: Mutex::new(Some(senders)), reload, shutdown: SingleTrigger::new() }
    }

    async fn run(self: Arc<Self>, senders: EventSenders) -> AsyncServiceResult<()> {
        let shutdown = self.shutdown.listener.clone();
        let mut state = ChainState::default();
        let mut failures = 0u32;
        info!("{} started, polling the node every {:?}", Self::IDENT, self.config.poll_interval);
        loop {
            let outcome = select! {
                biased;
                _ = shutdown.clone() => break,
                outcome = self.poll(&mut state, &senders) => outcome,
            };
            match outcome {
                Ok(()) => failures = 0,
                Err(PollError::BusClosed) => {
                    warn!("{} event bus closed by its reader, exiting", Self::IDENT);
                    break;
                }
                Err(PollError::Node(err)) => {
                    failures += 1;
                    warn!("{} poll failed ({} in a row): {}", Self::IDENT, failures, err);
                    if self.config.failure_threshold > 0 && failures >= self.config.failure_threshold {
                        failures = 0;
                        if let Some(reload) = self.reload.as_ref() {
                            if reload.fire() {
                                warn!("{} requesting a service reload", Self::IDENT);
                            }
                        }
                    }
                }
            }
            select! {
                biased;
                _ = shutdown.clone() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
        drop(senders);
        debug!("{} exited, event channels closed", Self::IDENT);
        Ok(())
    }

    async fn poll(&self, state: &mut ChainState, senders: &EventSenders) -> PollResult {
        self.poll_mempool(state, senders).await?;
        self.poll_blocks(state, senders).await
    }

    async fn poll_mempool(&self, state: &mut ChainState, senders: &EventSenders) -> PollResult {
        let entries = self.node.get_raw_mempool_verbose().await?;
        let Some(known) = state.mempool.as_mut() else {
            debug!("{} seeded with {} mempool transactions", Self::IDENT, entries.len());
            state.mempool = Some(entries.into_keys().collect());
            return Ok(());
        };

        let mut added = entries.iter().filter(|(hash, _)| !known.contains(*hash)).collect::<Vec<_>>();
        added.sort_by(|a, b| a.0.cmp(b.0));
        for (hash, entry) in added {
            if let Some(fee_rate) = entry_fee_rate(entry) {
                emit(senders, MempoolRecord::new(fee_rate, hash.clone())).await?;
            }
            match self.node.get_raw_transaction(hash).await {
                Ok(transaction) => self.transaction_events(senders, &transaction, None).await?,
                // Most likely mined or evicted since the mempool was read
                Err(err) => debug!("{} skipping outputs of {}: {}", Self::IDENT, hash, err),
            }
            known.insert(hash.clone());
        }

        let mut removed = known.iter().filter(|hash| !entries.contains_key(*hash)).cloned().collect::<Vec<_>>();
        removed.sort();
        for hash in removed {
            known.remove(&hash);
            emit(senders, MempoolDeleted { transaction_hash: hash }).await?;
        }
        Ok(())
    }

    async fn poll_blocks(&self, state: &mut ChainState, senders: &EventSenders) -> PollResult {
        let count = self.node.get_block_count().await?;
        let Some((tip_height, _)) = state.tip else {
            let hash = self.node.get_block_hash(count).await?;
            debug!("{} seeded at block {} {}", Self::IDENT, count, hash);
            state.tip = Some((count, hash));
            return Ok(());
        };

        if count < tip_height {
            return self.resync(state, senders, count, tip_height, count).await;
        }
        if self.config.max_block_catchup > 0 && count - tip_height > self.config.max_block_catchup {
            return self.resync(state, senders, tip_height + 1, count, count).await;
        }

        for height in tip_height + 1..=count {
            let hash = self.node.get_block_hash(height).await?;
            let block = self.node.get_block(&hash).await?;
            let linked = matches!((&state.tip, &block.previous_block_hash), (Some((_, tip)), Some(previous)) if tip == previous);
            if !linked {
                return self.resync(state, senders, height - 1, count, count).await;
            }
            for transaction in block.tx.iter() {
                self.transaction_events(senders, transaction, Some(height)).await?;
            }
            emit(senders, BlockAdded { height, hash: hash.clone() }).await?;
            state.tip = Some((height, hash));
        }
        Ok(())
    }

    /// Asks consumers to rescan `from_height..=to_height` and restarts tracking at `new_tip`.
    async fn resync(&self, state: &mut ChainState, senders: &EventSenders, from_height: u64, to_height: u64, new_tip: u64) -> PollResult {
        let hash = self.node.get_block_hash(new_tip).await?;
        warn!("{} chain discontinuity, requesting a resync of blocks {}..={}", Self::IDENT, from_height, to_height);
        emit(senders, ResyncRequest { from_height, to_height }).await?;
        state.tip = Some((new_tip, hash));
        Ok(())
    }

    async fn transaction_events(&self, senders: &EventSenders, transaction: &Transaction, block_height: Option<u64>) -> PollResult {
        for output in transaction.vout.iter() {
            for address in output.script_pub_key.addresses() {
                let event = NewTransaction {
                    address: address.to_string(),
                    transaction_hash: transaction.txid.clone(),
                    output_index: output.n,
                    amount: btc_to_satoshi(output.value),
                    block_height,
                };
                emit(senders, event).await?;
            }
        }
        for input in transaction.vin.iter() {
            let (Some(txid), Some(vout), Some(prevout)) = (input.txid.as_ref(), input.vout, input.prevout.as_ref()) else {
                continue;
            };
            for address in prevout.script_pub_key.addresses() {
                let event = SpentOutput {
                    address: address.to_string(),
                    transaction_hash: txid.clone(),
                    output_index: vout,
                    spending_transaction_hash: transaction.txid.clone(),
                    amount: btc_to_satoshi(prevout.value),
                };
                emit(senders, event).await?;
            }
        }
        Ok(())
    }
}

/// Waits for channel capacity. Cancellation comes from the caller dropping the poll future.
async fn emit<E: BusEvent>(senders: &EventSenders, event: E) -> PollResult {
    trace!("emitting a {} event", E::EVENT_TYPE);
    senders.send(event).await.map_err(|_| PollError::BusClosed)
}

impl AsyncService for ChainWatcher {
    fn ident(self: Arc<Self>) -> &'static str {
        Self::IDENT
    }

    fn start(self: Arc<Self>) -> AsyncServiceFuture {
        trace!("{} starting", Self::IDENT);
        let senders = self.senders.lock().take();
        Box::pin(async move {
            let senders = senders.ok_or_else(|| AsyncServiceError::Service(format!("{} can only be started once", Self::IDENT)))?;
            self.run(senders).await
        })
    }

    fn signal_exit(self: Arc<Self>) {
        trace!("sending an exit signal to {}", Self::IDENT);
        self.shutdown.trigger.trigger();
    }

    fn stop(self: Arc<Self>) -> AsyncServiceFuture {
        Box::pin(async move {
            trace!("{} stopped", Self::IDENT);
            Ok(())
        })
    }
}
