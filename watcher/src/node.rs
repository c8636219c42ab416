//! The slice of the node JSON-RPC API consumed by the service.

use crate::error::NodeResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Debug, sync::Arc};

pub const SATOSHI_PER_BTC: f64 = 100_000_000.0;

/// Converts a node BTC amount into satoshis.
pub fn btc_to_satoshi(value: f64) -> u64 {
    (value * SATOSHI_PER_BTC).round() as u64
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MempoolFees {
    pub base: f64,
}

/// One entry of `getrawmempool true`.
///
/// Older nodes report `fee`/`size`, newer ones `fees.base`/`vsize`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMempoolEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fees: Option<MempoolFees>,
}

impl RawMempoolEntry {
    pub fn new(fee: f64, size: u64) -> Self {
        Self { size: Some(size), fee: Some(fee), ..Default::default() }
    }

    /// Fee in BTC
    pub fn fee(&self) -> Option<f64> {
        self.fee.or_else(|| self.fees.as_ref().map(|x| x.base))
    }

    pub fn size(&self) -> Option<u64> {
        self.size.or(self.vsize)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
}

impl ScriptPubKey {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self { address: Some(address.into()), addresses: None }
    }

    /// Every address the script pays to, whatever field the node used.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.address.iter().chain(self.addresses.iter().flatten()).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// The output consumed by an input, as reported with prevout verbosity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrevOut {
    pub value: f64,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<PrevOut>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxIn>,
    #[serde(default)]
    pub vout: Vec<TxOut>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub height: u64,
    #[serde(rename = "previousblockhash", default, skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,
    #[serde(default)]
    pub tx: Vec<Transaction>,
}

/// Read access to a full node.
#[async_trait]
pub trait NodeApi: Send + Sync + Debug {
    /// `getrawmempool true`, keyed by transaction hash
    async fn get_raw_mempool_verbose(&self) -> NodeResult<HashMap<String, RawMempoolEntry>>;

    async fn get_block_count(&self) -> NodeResult<u64>;

    async fn get_block_hash(&self, height: u64) -> NodeResult<String>;

    /// The block with its transactions and the prevouts of their inputs
    async fn get_block(&self, hash: &str) -> NodeResult<Block>;

    async fn get_raw_transaction(&self, txid: &str) -> NodeResult<Transaction>;
}

pub type DynNodeApi = Arc<dyn NodeApi>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mempool_entry_fields() {
        let legacy: RawMempoolEntry = serde_json::from_str(r#"{"size":250,"fee":0.0002,"time":1}"#).unwrap();
        assert_eq!((legacy.fee(), legacy.size()), (Some(0.0002), Some(250)));

        let modern: RawMempoolEntry = serde_json::from_str(r#"{"vsize":141,"weight":561,"fees":{"base":0.00000282,"modified":0.00000282}}"#).unwrap();
        assert_eq!((modern.fee(), modern.size()), (Some(0.00000282), Some(141)));
    }

    #[test]
    fn test_block_with_prevouts() {
        let block: Block = serde_json::from_str(
            r#"{
                "hash": "00000000000000000002",
                "height": 2,
                "previousblockhash": "00000000000000000001",
                "tx": [
                    {"txid": "cb", "vin": [{"coinbase": "03a0"}], "vout": [{"value": 6.25, "n": 0, "scriptPubKey": {"address": "miner"}}]},
                    {"txid": "t1",
                     "vin": [{"txid": "t0", "vout": 1, "prevout": {"value": 0.5, "scriptPubKey": {"addresses": ["alice"]}}}],
                     "vout": [{"value": 0.4999, "n": 0, "scriptPubKey": {"type": "nulldata"}}]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(block.previous_block_hash.as_deref(), Some("00000000000000000001"));
        assert_eq!(block.tx[0].vout[0].script_pub_key.addresses().collect::<Vec<_>>(), vec!["miner"]);
        let prevout = block.tx[1].vin[0].prevout.as_ref().unwrap();
        assert_eq!(prevout.script_pub_key.addresses().collect::<Vec<_>>(), vec!["alice"]);
        assert_eq!(btc_to_satoshi(prevout.value), 50_000_000);
        assert_eq!(block.tx[1].vout[0].script_pub_key.addresses().count(), 0);
    }

    #[test]
    fn test_btc_to_satoshi_rounds() {
        assert_eq!(btc_to_satoshi(0.1 + 0.2), 30_000_000);
        assert_eq!(btc_to_satoshi(0.00000001), 1);
        assert_eq!(btc_to_satoshi(21_000_000.0), 2_100_000_000_000_000);
    }
}
