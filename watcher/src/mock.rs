//! In-process node used by tests across the workspace.

use crate::{
    error::{NodeError, NodeResult},
    node::{Block, NodeApi, RawMempoolEntry, Transaction},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

#[derive(Debug, Default)]
struct Inner {
    mempool: HashMap<String, (RawMempoolEntry, Transaction)>,
    /// Blocks indexed by height
    chain: Vec<Block>,
}

impl Inner {
    fn extend_chain(&mut self, blocks: Vec<(&str, Vec<Transaction>)>) -> u64 {
        for (hash, transactions) in blocks {
            let height = self.chain.len() as u64;
            let previous_block_hash = self.chain.last().map(|x| x.hash.clone());
            self.chain.push(Block { hash: hash.to_string(), height, previous_block_hash, tx: transactions });
        }
        self.chain.len().saturating_sub(1) as u64
    }
}

/// A scriptable chain held in memory.
#[derive(Debug, Default)]
pub struct MockNode {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_mempool(&self, hash: &str, entry: RawMempoolEntry, mut transaction: Transaction) {
        transaction.txid = hash.to_string();
        self.inner.lock().mempool.insert(hash.to_string(), (entry, transaction));
    }

    pub fn remove_from_mempool(&self, hash: &str) -> bool {
        self.inner.lock().mempool.remove(hash).is_some()
    }

    /// Appends a block at the next height, linking it to the current tip.
    pub fn push_block(&self, hash: &str, transactions: Vec<Transaction>) -> u64 {
        self.push_blocks(vec![(hash, transactions)])
    }

    /// Appends several blocks at once, returning the new tip height.
    pub fn push_blocks(&self, blocks: Vec<(&str, Vec<Transaction>)>) -> u64 {
        self.inner.lock().extend_chain(blocks)
    }

    /// Replaces every block above `height` with `blocks` in one step.
    pub fn reorganize(&self, height: u64, blocks: Vec<(&str, Vec<Transaction>)>) -> u64 {
        let mut inner = self.inner.lock();
        inner.chain.truncate(height as usize + 1);
        inner.extend_chain(blocks)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of API calls served so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> NodeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failing.load(Ordering::SeqCst) {
            true => Err(NodeError::General("node unreachable".to_string())),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl NodeApi for MockNode {
    async fn get_raw_mempool_verbose(&self) -> NodeResult<HashMap<String, RawMempoolEntry>> {
        self.check()?;
        Ok(self.inner.lock().mempool.iter().map(|(hash, (entry, _))| (hash.clone(), entry.clone())).collect())
    }

    async fn get_block_count(&self) -> NodeResult<u64> {
        self.check()?;
        Ok(self.inner.lock().chain.len().saturating_sub(1) as u64)
    }

    async fn get_block_hash(&self, height: u64) -> NodeResult<String> {
        self.check()?;
        let inner = self.inner.lock();
        let block = inner.chain.get(height as usize).ok_or(NodeError::Rpc { code: -8, message: "Block height out of range".to_string() })?;
        Ok(block.hash.clone())
    }

    async fn get_block(&self, hash: &str) -> NodeResult<Block> {
        self.check()?;
        let inner = self.inner.lock();
        inner.chain.iter().find(|x| x.hash == hash).cloned().ok_or(NodeError::Rpc { code: -5, message: "Block not found".to_string() })
    }

    async fn get_raw_transaction(&self, txid: &str) -> NodeResult<Transaction> {
        self.check()?;
        let inner = self.inner.lock();
        inner
            .mempool
            .get(txid)
            .map(|(_, transaction)| transaction.clone())
            .ok_or(NodeError::Rpc { code: -5, message: "No such mempool or blockchain transaction".to_string() })
    }
}
