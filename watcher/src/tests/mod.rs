use crate::{
    mock::MockNode,
    node::{PrevOut, RawMempoolEntry, ScriptPubKey, Transaction, TxIn, TxOut},
    watcher::{ChainWatcher, WatcherConfig},
};
use nodesvc_core::task::service::AsyncService;
use nodesvc_notify::{
    bus::{EventReceivers, event_bus},
    notification::{BlockAdded, MempoolDeleted, MempoolRecord, ResyncRequest},
};
use nodesvc_utils::reload::{ReloadTrigger, reload_signal};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{Receiver, error::TryRecvError},
    task::JoinHandle,
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> WatcherConfig {
    WatcherConfig { poll_interval: Duration::from_millis(10), max_block_catchup: 10, failure_threshold: 3 }
}

fn pay_to(address: &str, value: f64) -> Transaction {
    Transaction {
        txid: String::new(),
        vin: vec![],
        vout: vec![TxOut { value, n: 0, script_pub_key: ScriptPubKey::with_address(address) }],
    }
}

fn spend(txid: &str, previous: &str, from: &str, to: &str, value: f64) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        vin: vec![TxIn {
            txid: Some(previous.to_string()),
            vout: Some(0),
            prevout: Some(PrevOut { value, script_pub_key: ScriptPubKey::with_address(from) }),
            ..Default::default()
        }],
        vout: vec![TxOut { value, n: 0, script_pub_key: ScriptPubKey::with_address(to) }],
    }
}

struct Harness {
    node: Arc<MockNode>,
    watcher: Arc<ChainWatcher>,
    handle: JoinHandle<Result<(), nodesvc_core::task::service::AsyncServiceError>>,
    receivers: EventReceivers,
}

impl Harness {
    async fn start(node: Arc<MockNode>, config: WatcherConfig, capacity: usize, reload: Option<ReloadTrigger>) -> Self {
        let (senders, receivers) = event_bus(capacity).unwrap();
        let watcher = Arc::new(ChainWatcher::new(node.clone(), config, senders, reload));
        let handle = tokio::spawn(watcher.clone().start());
        let harness = Self { node, watcher, handle, receivers };
        // The seeding poll reads the mempool, the block count and the tip hash
        harness.wait_for_calls(3).await;
        harness
    }

    async fn wait_for_calls(&self, calls: usize) {
        timeout(WAIT, async {
            while self.node.calls() < calls {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("the watcher should keep polling");
    }

    async fn shutdown(self) -> EventReceivers {
        self.watcher.clone().signal_exit();
        timeout(WAIT, self.handle).await.expect("the watcher should exit").unwrap().unwrap();
        self.receivers
    }
}

async fn next<T>(receiver: &mut Receiver<T>) -> T {
    timeout(WAIT, receiver.recv()).await.expect("an event should arrive").expect("the channel should be open")
}

fn genesis_node() -> Arc<MockNode> {
    let node = Arc::new(MockNode::new());
    node.push_block("b0", vec![]);
    node
}

#[tokio::test]
async fn test_first_poll_seeds_silently() {
    let node = genesis_node();
    node.add_to_mempool("old", RawMempoolEntry::new(0.0002, 250), pay_to("alice", 1.0));
    let mut harness = Harness::start(node, config(), 16, None).await;
    harness.wait_for_calls(10).await;

    assert!(matches!(harness.receivers.mempool_added.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.new_transaction.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.block_added.try_recv(), Err(TryRecvError::Empty)));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_mempool_changes_are_emitted() {
    let node = genesis_node();
    node.add_to_mempool("old", RawMempoolEntry::new(0.0001, 250), pay_to("carol", 1.0));
    let mut harness = Harness::start(node.clone(), config(), 16, None).await;

    node.add_to_mempool("new", RawMempoolEntry::new(0.0002, 250), spend("", "funding", "bob", "alice", 0.5));
    assert_eq!(next(&mut harness.receivers.mempool_added).await, MempoolRecord::new(80, "new".to_string()));

    let received = next(&mut harness.receivers.new_transaction).await;
    assert_eq!(received.address, "alice");
    assert_eq!(received.transaction_hash, "new");
    assert_eq!(received.amount, 50_000_000);
    assert_eq!(received.block_height, None);

    let spent = next(&mut harness.receivers.spent_output).await;
    assert_eq!((spent.address.as_str(), spent.transaction_hash.as_str()), ("bob", "funding"));
    assert_eq!(spent.spending_transaction_hash, "new");

    node.remove_from_mempool("old");
    assert_eq!(next(&mut harness.receivers.mempool_deleted).await, MempoolDeleted { transaction_hash: "old".to_string() });
    harness.shutdown().await;
}

#[tokio::test]
async fn test_new_blocks_are_emitted() {
    let node = genesis_node();
    let mut harness = Harness::start(node.clone(), config(), 16, None).await;

    node.push_block("b1", vec![spend("t1", "t0", "alice", "bob", 0.25)]);
    let received = next(&mut harness.receivers.new_transaction).await;
    assert_eq!((received.address.as_str(), received.block_height), ("bob", Some(1)));
    let spent = next(&mut harness.receivers.spent_output).await;
    assert_eq!((spent.address.as_str(), spent.amount), ("alice", 25_000_000));
    assert_eq!(next(&mut harness.receivers.block_added).await, BlockAdded { height: 1, hash: "b1".to_string() });

    node.push_blocks(vec![("b2", vec![]), ("b3", vec![])]);
    assert_eq!(next(&mut harness.receivers.block_added).await.height, 2);
    assert_eq!(next(&mut harness.receivers.block_added).await.height, 3);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_rollback_requests_a_resync() {
    let node = genesis_node();
    node.push_blocks(vec![("b1", vec![]), ("b2", vec![])]);
    let mut harness = Harness::start(node.clone(), config(), 16, None).await;

    node.reorganize(0, vec![("x1", vec![])]);
    assert_eq!(next(&mut harness.receivers.resync).await, ResyncRequest { from_height: 1, to_height: 2 });

    node.push_block("x2", vec![]);
    assert_eq!(next(&mut harness.receivers.block_added).await, BlockAdded { height: 2, hash: "x2".to_string() });
    harness.shutdown().await;
}

#[tokio::test]
async fn test_large_gap_requests_a_resync() {
    let node = genesis_node();
    let config = WatcherConfig { max_block_catchup: 2, ..config() };
    let mut harness = Harness::start(node.clone(), config, 16, None).await;

    node.push_blocks(vec![("b1", vec![]), ("b2", vec![]), ("b3", vec![])]);
    assert_eq!(next(&mut harness.receivers.resync).await, ResyncRequest { from_height: 1, to_height: 3 });
    let mut receivers = harness.shutdown().await;
    assert!(receivers.block_added.recv().await.is_none(), "the gap is not replayed");
}

#[tokio::test]
async fn test_failing_node_requests_a_reload() {
    let node = genesis_node();
    let (trigger, listener) = reload_signal();
    let harness = Harness::start(node.clone(), config(), 16, Some(trigger)).await;
    assert!(!listener.is_pending());

    node.set_failing(true);
    assert!(timeout(WAIT, listener.recv()).await.unwrap());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_channels_stay_open_while_the_writer_runs() {
    let node = genesis_node();
    let mut harness = Harness::start(node.clone(), config(), 16, None).await;
    harness.wait_for_calls(20).await;

    assert!(matches!(harness.receivers.mempool_added.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.mempool_deleted.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.spent_output.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.block_added.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.resync.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(harness.receivers.new_transaction.try_recv(), Err(TryRecvError::Empty)));

    node.push_block("b1", vec![]);
    let mut receivers = harness.shutdown().await;
    // Whatever was buffered before the writer exited is still delivered, then the channels close
    while receivers.block_added.recv().await.is_some() {}
    assert!(receivers.mempool_added.recv().await.is_none());
    assert!(receivers.mempool_deleted.recv().await.is_none());
    assert!(receivers.spent_output.recv().await.is_none());
    assert!(receivers.resync.recv().await.is_none());
    assert!(receivers.new_transaction.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_interrupts_a_blocked_send() {
    let node = genesis_node();
    let harness = Harness::start(node.clone(), config(), 1, None).await;
    for index in 0..8 {
        node.add_to_mempool(&format!("tx{index}"), RawMempoolEntry::new(0.0001, 100), Transaction::default());
    }
    harness.wait_for_calls(5).await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_watcher_starts_once() {
    let node = genesis_node();
    let harness = Harness::start(node, config(), 4, None).await;
    assert!(harness.watcher.clone().start().await.is_err());
    harness.shutdown().await;
}
