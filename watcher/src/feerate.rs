//! Mempool fee-rate derivation.

use crate::{
    error::NodeResult,
    node::{DynNodeApi, RawMempoolEntry, SATOSHI_PER_BTC},
};
use async_trait::async_trait;
use nodesvc_core::debug;
use nodesvc_notify::notification::MempoolRecord;

/// Fee rate in satoshis per byte, rounded half up.
pub fn compute_fee_rate(fee: f64, size: u64) -> i64 {
    (fee / size as f64 * SATOSHI_PER_BTC + 0.5).floor() as i64
}

/// The fee rate of a raw entry, if it carries a positive one.
pub fn entry_fee_rate(entry: &RawMempoolEntry) -> Option<i64> {
    let (fee, size) = (entry.fee()?, entry.size()?);
    if size == 0 || !fee.is_finite() {
        return None;
    }
    Some(compute_fee_rate(fee, size)).filter(|&rate| rate > 0)
}

/// Derives one record per entry with a positive fee rate. Order is unspecified.
pub fn mempool_records<'a>(entries: impl IntoIterator<Item = (&'a String, &'a RawMempoolEntry)>) -> Vec<MempoolRecord> {
    entries.into_iter().filter_map(|(hash, entry)| entry_fee_rate(entry).map(|rate| MempoolRecord::new(rate, hash.clone()))).collect()
}

/// A source of the current mempool fee-rate snapshot.
#[async_trait]
pub trait MempoolProvider: Send + Sync {
    async fn mempool(&self) -> NodeResult<Vec<MempoolRecord>>;
}

#[derive(Debug, Clone)]
pub struct FeeEstimator {
    node: DynNodeApi,
}

impl FeeEstimator {
    pub fn new(node: DynNodeApi) -> Self {
        Self { node }
    }

    /// Reads the whole node mempool and derives its fee-rate records.
    pub async fn scan(&self) -> NodeResult<Vec<MempoolRecord>> {
        let entries = self.node.get_raw_mempool_verbose().await?;
        let records = mempool_records(&entries);
        debug!("Mempool scan: {} entries, {} with a positive fee rate", entries.len(), records.len());
        Ok(records)
    }
}

#[async_trait]
impl MempoolProvider for FeeEstimator {
    async fn mempool(&self) -> NodeResult<Vec<MempoolRecord>> {
        self.scan().await
    }
}
