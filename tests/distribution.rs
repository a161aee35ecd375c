//! Distribution manager behavior against in-memory runtime fakes.
//!
//! Time-sensitive tests run on a paused clock, so elapsed durations are exact
//! sums of the timers involved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::Instant;

use erlang_language_server::distribution::{
    CaptureRegistry, ConnectTarget, ConnectionStatus, Connector, DistributionError,
    DistributionHandle, DistributionManager, ManagerSettings, NodeLink, RemoteCall, RetrySchedule,
    RuntimeProcess, SpawnSpec, Spawner, TcpConnector, TemplateVars,
};

/// A runtime that refuses the first `failures` connection attempts.
struct FakeNode {
    failures: u32,
    attempts: AtomicU32,
    down: watch::Sender<bool>,
    captures: Mutex<Option<CaptureRegistry>>,
}

impl FakeNode {
    fn new(failures: u32) -> Arc<Self> {
        let (down, _) = watch::channel(false);
        Arc::new(Self {
            failures,
            attempts: AtomicU32::new(0),
            down,
            captures: Mutex::new(None),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn captures(&self) -> CaptureRegistry {
        self.captures.lock().clone().expect("connected at least once")
    }
}

#[async_trait]
impl Connector for FakeNode {
    async fn connect(
        &self,
        target: &ConnectTarget,
        captures: CaptureRegistry,
    ) -> Result<Arc<dyn NodeLink>, DistributionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(DistributionError::Unreachable(target.node.clone()));
        }
        *self.captures.lock() = Some(captures.clone());
        self.down.send_replace(false);
        Ok(Arc::new(FakeLink {
            node: target.node.clone(),
            captures,
            down: self.down.subscribe(),
        }))
    }
}

struct FakeLink {
    node: String,
    captures: CaptureRegistry,
    down: watch::Receiver<bool>,
}

#[async_trait]
impl NodeLink for FakeLink {
    fn node(&self) -> &str {
        &self.node
    }

    async fn call(&self, call: RemoteCall) -> Result<Value, DistributionError> {
        match call.function.as_str() {
            "hang" => std::future::pending().await,
            "echo" => {
                let arg = call.args.first().cloned().unwrap_or(Value::Null);
                self.captures.deliver(call.capture, format!("<{}", arg));
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.captures.deliver(call.capture, ">");
                Ok(arg)
            }
            "raise" => Err(DistributionError::Remote("badarg".into())),
            other => Err(DistributionError::Remote(format!("undef {other}"))),
        }
    }

    async fn closed(&self) {
        let mut down = self.down.clone();
        let _ = down.wait_for(|down| *down).await;
    }
}

struct FakeProcess;

#[async_trait]
impl RuntimeProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_running(&mut self) -> bool {
        true
    }

    async fn kill(&mut self) -> Result<(), DistributionError> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingSpawner {
    spawned: AtomicU32,
}

#[async_trait]
impl Spawner for CountingSpawner {
    async fn spawn(&self, _spec: &SpawnSpec) -> Result<Box<dyn RuntimeProcess>, DistributionError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess))
    }
}

const ATTEMPTS: u32 = 5;
const INTERVAL: Duration = Duration::from_millis(200);

fn settings() -> ManagerSettings {
    ManagerSettings {
        target: ConnectTarget {
            node: "els_runtime@testhost".into(),
            local: "els_test_0000@testhost".into(),
            cookie: Some("secret".into()),
        },
        spawn: Some(SpawnSpec::from_template(
            "erl",
            &["-sname".into(), "{node}".into()],
            None,
            &TemplateVars {
                node: "els_runtime@testhost",
                cookie: Some("secret"),
                port: 9_000,
                bridge: None,
            },
        )),
        retry: RetrySchedule::new(ATTEMPTS, INTERVAL),
        enabled: true,
    }
}

fn start(node: &Arc<FakeNode>) -> (DistributionHandle, Arc<CountingSpawner>) {
    let spawner = Arc::new(CountingSpawner::default());
    let (handle, _task) = DistributionManager::start(settings(), node.clone(), spawner.clone());
    (handle, spawner)
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_node_is_retried_n_times_at_interval() {
    let node = FakeNode::new(u32::MAX);
    let (handle, spawner) = start(&node);

    let started = Instant::now();
    let err = handle.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, DistributionError::ConnectFailed { attempts: ATTEMPTS, .. }),
        "unexpected error: {err}"
    );
    // One direct attempt before the runtime is started, then N retries.
    assert_eq!(node.attempts(), 1 + ATTEMPTS);
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    assert!(elapsed >= INTERVAL * ATTEMPTS, "elapsed {elapsed:?}");
    assert!(elapsed < INTERVAL * ATTEMPTS + Duration::from_millis(50), "elapsed {elapsed:?}");
    assert_eq!(handle.status().status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_spawns_then_succeeds_and_is_idempotent() {
    // Direct attempt and first retry fail, second retry succeeds.
    let node = FakeNode::new(2);
    let (handle, spawner) = start(&node);

    let started = Instant::now();
    handle.connect().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= INTERVAL * 2 && elapsed < INTERVAL * 3, "elapsed {elapsed:?}");
    assert_eq!(handle.status().status, ConnectionStatus::Connected);
    assert_eq!(handle.status().spawned, 1);

    handle.connect().await.unwrap();
    handle.connect().await.unwrap();
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    assert_eq!(node.attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reachable_node_connects_without_spawning() {
    let node = FakeNode::new(0);
    let (handle, spawner) = start(&node);

    handle.connect().await.unwrap();
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
    assert_eq!(handle.status().spawned, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rpc_timeout_is_bounded_and_manager_stays_responsive() {
    let node = FakeNode::new(0);
    let (handle, _) = start(&node);
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let err = handle.rpc_call("m", "hang", vec![], timeout).await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, DistributionError::Timeout { .. }), "unexpected error: {err}");
    assert!(elapsed >= timeout && elapsed < timeout + Duration::from_millis(10), "elapsed {elapsed:?}");

    // The timed-out call no longer owns a sink.
    assert_eq!(node.captures().active(), 0);
    assert_eq!(handle.status().status, ConnectionStatus::Connected);

    let reply = handle
        .rpc_call("m", "echo", vec![json!(7)], timeout)
        .await
        .unwrap();
    assert_eq!(reply.value, json!(7));
    assert_eq!(reply.output, "<7>");
}

#[tokio::test(start_paused = true)]
async fn test_slow_call_does_not_block_other_calls() {
    let node = FakeNode::new(0);
    let (handle, _) = start(&node);
    handle.connect().await.unwrap();

    let slow = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.rpc_call("m", "hang", vec![], Duration::from_secs(60)).await })
    };
    tokio::task::yield_now().await;

    let started = Instant::now();
    let reply = handle
        .rpc_call("m", "echo", vec![json!("fast")], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.value, json!("fast"));
    assert!(started.elapsed() < Duration::from_secs(1));

    slow.abort();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_capture_only_their_own_output() {
    let node = FakeNode::new(0);
    let (handle, _) = start(&node);
    handle.connect().await.unwrap();

    let timeout = Duration::from_secs(1);
    let (a, b, c) = tokio::join!(
        handle.rpc_call("m", "echo", vec![json!(1)], timeout),
        handle.rpc_call("m", "echo", vec![json!(2)], timeout),
        handle.rpc_call("m", "echo", vec![json!(3)], timeout),
    );
    assert_eq!(a.unwrap().output, "<1>");
    assert_eq!(b.unwrap().output, "<2>");
    assert_eq!(c.unwrap().output, "<3>");
    assert_eq!(node.captures().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_remote_error_is_returned_to_caller() {
    let node = FakeNode::new(0);
    let (handle, _) = start(&node);

    let err = handle
        .rpc_call("m", "raise", vec![], Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, DistributionError::Remote(ref reason) if reason == "badarg"));
    assert_eq!(node.captures().active(), 0);
    assert_eq!(handle.status().status, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_node_down_disconnects_and_next_call_reconnects() {
    let node = FakeNode::new(0);
    let (handle, _) = start(&node);
    handle.connect().await.unwrap();
    let mut status = handle.subscribe();

    node.down.send_replace(true);
    status
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .unwrap();
    assert_eq!(node.attempts(), 1);

    // No reconnect happens on its own.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.attempts(), 1);
    assert_eq!(handle.status().status, ConnectionStatus::Disconnected);

    let reply = handle
        .rpc_call("m", "echo", vec![json!("again")], Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.value, json!("again"));
    assert_eq!(node.attempts(), 2);
    assert_eq!(handle.status().status, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_connect_in_progress() {
    let node = FakeNode::new(u32::MAX);
    let (handle, _) = start(&node);

    let connecting = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };
    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
    handle.stop().await;

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(DistributionError::Stopped)));
    assert!(node.attempts() < 1 + ATTEMPTS);
    assert!(matches!(
        handle.rpc_call("m", "echo", vec![], Duration::from_secs(1)).await,
        Err(DistributionError::Stopped)
    ));
}

/// A runtime that accepts connections but never finishes a handshake.
#[derive(Default)]
struct SilentNode {
    attempts: AtomicU32,
}

#[async_trait]
impl Connector for SilentNode {
    async fn connect(
        &self,
        _target: &ConnectTarget,
        _captures: CaptureRegistry,
    ) -> Result<Arc<dyn NodeLink>, DistributionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_silent_node_attempts_are_bounded() {
    let node = Arc::new(SilentNode::default());
    let spawner = Arc::new(CountingSpawner::default());
    let (handle, _task) = DistributionManager::start(settings(), node.clone(), spawner.clone());

    let started = Instant::now();
    let err = handle.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(err, DistributionError::ConnectFailed { attempts: ATTEMPTS, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(node.attempts.load(Ordering::SeqCst), 1 + ATTEMPTS);
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);
    // Direct attempt, the first wait, then N attempts each cut off at I.
    let bound = INTERVAL * (ATTEMPTS + 2);
    assert!(elapsed >= bound && elapsed < bound + Duration::from_millis(50), "elapsed {elapsed:?}");
    assert_eq!(handle.status().status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_silent_direct_attempt() {
    let node = Arc::new(SilentNode::default());
    let spawner = Arc::new(CountingSpawner::default());
    let mut settings = settings();
    settings.retry = RetrySchedule::new(ATTEMPTS, Duration::from_secs(60));
    let (handle, task) = DistributionManager::start(settings, node.clone(), spawner.clone());

    let connecting = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.connect().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(node.attempts.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    handle.stop().await;
    assert!(matches!(connecting.await.unwrap(), Err(DistributionError::Stopped)));
    task.await.unwrap();
    // Well short of the 60s the attempt would otherwise have been allowed.
    assert!(started.elapsed() < Duration::from_secs(30), "elapsed {:?}", started.elapsed());
    assert_eq!(spawner.spawned.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_tcp_peer_that_never_answers_does_not_wedge_the_manager() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let held = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            sockets.push(socket);
        }
    });

    let settings = ManagerSettings {
        target: ConnectTarget {
            node: "els_runtime@127.0.0.1".into(),
            local: "els_test_0000@127.0.0.1".into(),
            cookie: None,
        },
        spawn: None,
        retry: RetrySchedule::new(2, Duration::from_millis(50)),
        enabled: true,
    };
    let (handle, task) = DistributionManager::start(
        settings,
        Arc::new(TcpConnector::new(port)),
        Arc::new(CountingSpawner::default()),
    );

    let connect = tokio::time::timeout(Duration::from_secs(3), handle.connect()).await;
    let err = connect.expect("connect returned").unwrap_err();
    assert!(matches!(err, DistributionError::Unreachable(_)), "unexpected error: {err}");

    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("stop returned");
    task.await.unwrap();
    held.abort();
}
