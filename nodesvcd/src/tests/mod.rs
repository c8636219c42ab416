use crate::{
    args::Args,
    config::{Config, NodeSettings},
    daemon::NodeService,
    error::{DaemonError, DaemonResult},
    generation::NodeConnector,
    supervisor::{ServiceState, State},
};
use nodesvc_core::task::service::AsyncService;
use nodesvc_grpc_core::protowire::{NodeRequest, NodeResponse, node_response::Payload, node_rpc_client::NodeRpcClient};
use nodesvc_notify::notification::{Notification, SubscriberEntry};
use nodesvc_watcher::{
    error::NodeError,
    mock::MockNode,
    node::{DynNodeApi, RawMempoolEntry, ScriptPubKey, Transaction, TxOut},
};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    io::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;

const WAIT: Duration = Duration::from_secs(10);

/// Hands out the same mock node, failing the attempts listed in `failures`.
#[derive(Default)]
struct MockConnector {
    node: Arc<MockNode>,
    attempts: AtomicUsize,
    failures: Mutex<HashSet<usize>>,
}

impl MockConnector {
    fn new(node: Arc<MockNode>) -> Self {
        Self { node, ..Default::default() }
    }

    fn failing_on(self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failures.lock().extend(attempts);
        self
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NodeConnector for MockConnector {
    fn connect(&self, _: &NodeSettings) -> DaemonResult<DynNodeApi> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failures.lock().contains(&attempt) {
            return Err(DaemonError::NodeClient(NodeError::General(format!("connection attempt {attempt} refused"))));
        }
        Ok(self.node.clone())
    }
}

fn config(update: impl FnOnce(&mut Args)) -> Arc<Config> {
    let mut args = Args {
        grpclisten: Some("127.0.0.1:0".parse().unwrap()),
        poll_interval_ms: 10,
        reload_retry_interval_ms: 50,
        node_failure_threshold: 0,
        ..Default::default()
    };
    update(&mut args);
    Arc::new(Config::from_args(&args).unwrap())
}

fn node_with_genesis() -> Arc<MockNode> {
    let node = Arc::new(MockNode::new());
    node.push_block("00", vec![]);
    node
}

struct TestDaemon {
    service: Arc<NodeService>,
    connector: Arc<MockConnector>,
    states: watch::Receiver<ServiceState>,
    history: Arc<Mutex<Vec<ServiceState>>>,
    handle: JoinHandle<()>,
}

impl TestDaemon {
    fn start(config: Arc<Config>, connector: MockConnector) -> Self {
        nodesvc_core::log::try_init_logger("info, nodesvcd_lib=trace");
        let connector = Arc::new(connector);
        let service = Arc::new(NodeService::new(config, connector.clone()));
        let states = service.subscribe_state();

        let history = Arc::new(Mutex::new(vec![]));
        let mut recorder = service.subscribe_state();
        let recorded = history.clone();
        tokio::spawn(async move {
            while recorder.changed().await.is_ok() {
                let state = *recorder.borrow_and_update();
                recorded.lock().push(state);
            }
        });

        let runner = service.clone();
        let handle = tokio::spawn(async move {
            runner.clone().start().await.unwrap();
            runner.stop().await.unwrap();
        });
        Self { service, connector, states, history, handle }
    }

    async fn wait_for(&mut self, generation: u64, state: State) {
        let expected = ServiceState::new(generation, state);
        timeout(WAIT, self.states.wait_for(|x| *x == expected))
            .await
            .unwrap_or_else(|_| panic!("the service should reach {expected}, it is at {}", self.service.state()))
            .unwrap();
    }

    async fn running_address(&mut self, generation: u64) -> SocketAddr {
        self.wait_for(generation, State::Running).await;
        self.service.serve_address().expect("a running generation has an address")
    }

    fn reload(&self) -> bool {
        self.service.reload_trigger().fire()
    }

    async fn shutdown(self) -> Vec<ServiceState> {
        self.service.clone().signal_exit();
        timeout(WAIT, self.handle).await.expect("the service should stop in time").unwrap();
        let last = self.service.state();
        assert_eq!(last.state, State::Stopped);
        // The recorder may lag behind, but always ends up seeing the latest state
        timeout(WAIT, async {
            while self.history.lock().last() != Some(&last) {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("the recorder should catch up");
        let history = self.history.lock().clone();
        history
    }
}

struct TestClient {
    _client: NodeRpcClient<tonic::transport::Channel>,
    requests: mpsc::Sender<NodeRequest>,
    responses: tonic::Streaming<NodeResponse>,
    next_id: u64,
}

impl TestClient {
    async fn connect(address: SocketAddr) -> Self {
        let mut client = NodeRpcClient::connect(format!("http://{address}")).await.unwrap();
        let (requests, receiver) = mpsc::channel(16);
        let responses = client.message_stream(ReceiverStream::new(receiver)).await.unwrap().into_inner();
        Self { _client: client, requests, responses, next_id: 1 }
    }

    async fn next(&mut self) -> Option<NodeResponse> {
        timeout(WAIT, self.responses.message()).await.expect("the server should answer in time").ok().flatten()
    }

    async fn call(&mut self, build: impl FnOnce(u64) -> NodeRequest) -> Payload {
        let id = self.next_id;
        self.next_id += 1;
        self.requests.send(build(id)).await.unwrap();
        loop {
            let response = self.next().await.expect("the stream should stay open");
            if response.id == id && !response.is_notification() {
                return response.payload.expect("responses carry a payload");
            }
        }
    }

    async fn subscribe(&mut self, address: &str, entry: &SubscriberEntry) {
        match self.call(|id| NodeRequest::subscribe(id, address, entry)).await {
            Payload::SubscribeResponse(response) => assert!(response.added),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    async fn generation(&mut self) -> u64 {
        match self.call(NodeRequest::get_service_info).await {
            Payload::GetServiceInfoResponse(response) => response.generation,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    /// Skips notifications until one matches
    async fn wait_for_notification(&mut self, matches: impl Fn(&Notification) -> bool) -> Notification {
        loop {
            let response = self.next().await.expect("the stream should stay open");
            if let Ok(notification) = Notification::try_from(&response) {
                if matches(&notification) {
                    return notification;
                }
            }
        }
    }
}

fn assert_forward_only(history: &[ServiceState]) {
    let rank = |state: State| match state {
        State::Starting => 0,
        State::Running => 1,
        State::Draining => 2,
        State::Stopped => 3,
    };
    for pair in history.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!((a.generation, rank(a.state)) < (b.generation, rank(b.state)), "state went from {a} back to {b}");
    }
}

#[tokio::test]
async fn test_reload_keeps_the_registry() {
    let node = node_with_genesis();
    let mut daemon = TestDaemon::start(config(|_| {}), MockConnector::new(node.clone()));
    let first = daemon.running_address(1).await;

    let entry = SubscriberEntry::new("alice", 0, 1);
    let mut client = TestClient::connect(first).await;
    assert_eq!(client.generation().await, 1);
    client.subscribe("addr1", &entry).await;

    assert!(daemon.reload());
    let second = daemon.running_address(2).await;
    assert_ne!(first, second);

    // The old stream was terminated by the server and its listener is closed
    assert!(client.next().await.is_none());
    assert!(TcpStream::connect(first).await.is_err(), "the listener of the first generation should be closed");

    // Subscriptions survive a server-side termination
    let registry = daemon.service.registry();
    assert_eq!(registry.lookup("addr1"), vec![entry.clone()]);

    let mut client = TestClient::connect(second).await;
    assert_eq!(client.generation().await, 2);
    // Let the new watcher seed its view of the mempool first
    let calls = node.calls();
    timeout(WAIT, async {
        while node.calls() < calls + 3 {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    node.add_to_mempool(
        "t1",
        RawMempoolEntry::new(0.0002, 250),
        Transaction { vout: vec![TxOut { value: 0.5, n: 0, script_pub_key: ScriptPubKey::with_address("addr1") }], ..Default::default() },
    );
    let notification = client.wait_for_notification(|x| matches!(x, Notification::NewTransaction(..))).await;
    match notification {
        Notification::NewTransaction(transaction, subscribers) => {
            assert_eq!(transaction.transaction_hash, "t1");
            assert_eq!(transaction.amount, 50_000_000);
            assert_eq!(subscribers, vec![entry]);
        }
        other => panic!("unexpected notification {other:?}"),
    }

    let history = daemon.shutdown().await;
    assert_forward_only(&history);
    assert_eq!(history.last(), Some(&ServiceState::new(2, State::Stopped)));
}

#[tokio::test]
async fn test_reload_resets_the_registry() {
    let mut daemon = TestDaemon::start(config(|args| args.reset_registry_on_reload = true), MockConnector::new(node_with_genesis()));
    let first = daemon.running_address(1).await;
    let mut client = TestClient::connect(first).await;
    client.subscribe("addr1", &SubscriberEntry::new("alice", 0, 1)).await;
    assert_eq!(daemon.service.registry().len(), 1);

    assert!(daemon.reload());
    daemon.wait_for(2, State::Running).await;
    assert!(daemon.service.registry().is_empty());

    let history = daemon.shutdown().await;
    assert_forward_only(&history);
}

#[tokio::test]
async fn test_reset_registry_reloads_the_bootstrap() {
    let mut bootstrap = tempfile::NamedTempFile::new().unwrap();
    write!(bootstrap, r#"[{{"address": "boot", "userId": "carol", "walletIndex": 1, "addressIndex": 1}}]"#).unwrap();
    let path = bootstrap.path().to_str().unwrap().to_string();
    let mut daemon = TestDaemon::start(
        config(|args| {
            args.reset_registry_on_reload = true;
            args.bootstrap = Some(path);
        }),
        MockConnector::new(node_with_genesis()),
    );

    let mut client = TestClient::connect(daemon.running_address(1).await).await;
    let registry = daemon.service.registry();
    assert_eq!(registry.lookup("boot"), vec![SubscriberEntry::new("carol", 1, 1)]);
    client.subscribe("addr1", &SubscriberEntry::new("alice", 0, 1)).await;

    assert!(daemon.reload());
    daemon.wait_for(2, State::Running).await;
    assert_eq!(registry.len(), 1);
    assert!(registry.lookup("addr1").is_empty());
    assert_eq!(registry.lookup("boot").len(), 1);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_start_is_retried_until_it_succeeds() {
    let connector = MockConnector::new(node_with_genesis()).failing_on([1, 2, 3]);
    let mut daemon = TestDaemon::start(config(|_| {}), connector);
    daemon.wait_for(1, State::Running).await;
    assert_eq!(daemon.connector.attempts(), 4);
    let history = daemon.shutdown().await;
    assert_forward_only(&history);
}

#[tokio::test]
async fn test_shutdown_while_starting() {
    let connector = MockConnector::new(node_with_genesis()).failing_on(1..=1000);
    let mut daemon = TestDaemon::start(config(|_| {}), connector);
    daemon.wait_for(1, State::Starting).await;
    timeout(WAIT, async {
        while daemon.connector.attempts() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(daemon.service.serve_address().is_none());
    let history = daemon.shutdown().await;
    assert_eq!(history.last(), Some(&ServiceState::new(1, State::Stopped)));
}

#[tokio::test]
async fn test_reload_requests_are_ignored_when_not_running() {
    // The first attempt at starting generation 2 fails, keeping the service in Starting for a retry interval
    let connector = MockConnector::new(node_with_genesis()).failing_on([2]);
    let mut daemon = TestDaemon::start(config(|args| args.reload_retry_interval_ms = 300), connector);
    daemon.wait_for(1, State::Running).await;

    assert!(daemon.reload());
    daemon.wait_for(2, State::Starting).await;
    assert!(daemon.reload(), "the request is queued while starting");
    daemon.wait_for(2, State::Running).await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(daemon.service.state(), ServiceState::new(2, State::Running), "the queued request should have been discarded");
    assert_eq!(daemon.connector.attempts(), 3);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_failing_node_triggers_a_reload() {
    let node = node_with_genesis();
    let mut daemon = TestDaemon::start(config(|args| args.node_failure_threshold = 2), MockConnector::new(node.clone()));
    daemon.wait_for(1, State::Running).await;

    node.set_failing(true);
    timeout(WAIT, daemon.states.wait_for(|x| x.generation >= 2 && x.state == State::Running)).await.unwrap().unwrap();
    node.set_failing(false);

    let history = daemon.shutdown().await;
    assert_forward_only(&history);
    assert!(history.iter().any(|x| x.generation >= 2));
}
