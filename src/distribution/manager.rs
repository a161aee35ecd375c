//! The distribution manager actor.
//!
//! One task owns the connection state and processes commands from its mailbox
//! strictly in arrival order. Remote calls are issued from the actor (so they
//! always see the current link) but awaited on a helper task per call, which
//! keeps a slow call from stalling connects, status changes or other calls.
//! Node-down notifications reach the actor as events tagged with the link
//! generation they belong to, so a stale monitor cannot disconnect a newer
//! link.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::capture::CaptureRegistry;
use super::error::DistributionError;
use super::link::{ConnectTarget, Connector, NodeLink, RemoteCall, RpcReply};
use super::retry::{RetryOutcome, RetrySchedule};
use super::spawn::{RuntimeProcess, SpawnSpec, Spawner, TemplateVars};
use super::{ConnectionSnapshot, ConnectionStatus};
use crate::config::RuntimeConfig;
use crate::metrics::metrics;

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub target: ConnectTarget,
    /// How to start the runtime when it is not reachable. `None` never spawns.
    pub spawn: Option<SpawnSpec>,
    pub retry: RetrySchedule,
    pub enabled: bool,
}

impl ManagerSettings {
    pub fn from_runtime(config: &RuntimeConfig, local_node: String) -> Self {
        let node = config.target_node();
        let bridge = config.bridge_source();
        let spawn = (!config.start_command.is_empty()).then(|| {
            SpawnSpec::from_template(
                config.start_command.clone(),
                &config.start_args(),
                config.start_path.clone(),
                &TemplateVars {
                    node: &node,
                    cookie: config.cookie.as_deref(),
                    port: config.port,
                    bridge: bridge.as_deref(),
                },
            )
        });
        Self {
            target: ConnectTarget {
                node,
                local: local_node,
                cookie: config.cookie.clone(),
            },
            spawn,
            retry: RetrySchedule::new(config.connect_attempts, config.connect_interval()),
            enabled: config.enabled,
        }
    }
}

enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), DistributionError>>,
    },
    Call {
        module: String,
        function: String,
        args: Vec<Value>,
        timeout: Duration,
        reply: oneshot::Sender<Result<RpcReply, DistributionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

enum Event {
    NodeDown { generation: u64 },
}

/// Cloneable front end of the manager task.
#[derive(Debug, Clone)]
pub struct DistributionHandle {
    commands: mpsc::Sender<Command>,
    cancel: Arc<watch::Sender<bool>>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { .. } => f.write_str("Connect"),
            Command::Call { module, function, .. } => write!(f, "Call({module}:{function})"),
            Command::Stop { .. } => f.write_str("Stop"),
        }
    }
}

impl DistributionHandle {
    /// Connects, spawning the runtime if needed. A no-op when connected.
    pub async fn connect(&self) -> Result<(), DistributionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply }).await?;
        rx.await.map_err(|_| DistributionError::Stopped)?
    }

    /// Calls `module:function(args...)` on the runtime, connecting first when
    /// needed. Waiting is bounded by `timeout`; the remote side is not
    /// cancelled when it expires.
    pub async fn rpc_call(
        &self,
        module: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<RpcReply, DistributionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Call {
            module: module.into(),
            function: function.into(),
            args,
            timeout,
            reply,
        })
        .await?;
        rx.await.map_err(|_| DistributionError::Stopped)?
    }

    /// Latest published connection state. Never waits on the actor.
    pub fn status(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Interrupts any connect in progress, then stops the actor and kills a
    /// runtime it spawned.
    pub async fn stop(&self) {
        self.cancel.send_replace(true);
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), DistributionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DistributionError::Stopped)
    }
}

pub struct DistributionManager {
    settings: ManagerSettings,
    connector: Arc<dyn Connector>,
    spawner: Arc<dyn Spawner>,
    captures: CaptureRegistry,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    cancel: watch::Receiver<bool>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    link: Option<Arc<dyn NodeLink>>,
    generation: u64,
    monitor: Option<JoinHandle<()>>,
    process: Option<Box<dyn RuntimeProcess>>,
}

impl DistributionManager {
    /// Starts the actor task in the Disconnected state.
    pub fn start(
        settings: ManagerSettings,
        connector: Arc<dyn Connector>,
        spawner: Arc<dyn Spawner>,
    ) -> (DistributionHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(MAILBOX_CAPACITY);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (cancel_tx, cancel) = watch::channel(false);
        let (snapshot_tx, snapshot) = watch::channel(ConnectionSnapshot {
            status: ConnectionStatus::Disconnected,
            node: settings.target.node.clone(),
            spawned: 0,
        });

        let manager = Self {
            settings,
            connector,
            spawner,
            captures: CaptureRegistry::new(),
            commands,
            events_tx,
            events,
            cancel,
            snapshot: snapshot_tx,
            link: None,
            generation: 0,
            monitor: None,
            process: None,
        };
        let task = tokio::spawn(manager.run());
        let handle = DistributionHandle {
            commands: commands_tx,
            cancel: Arc::new(cancel_tx),
            snapshot,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("Distribution manager started for {}", self.settings.target.node);
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.handle_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("Distribution command: {:?}", command);
        match command {
            Command::Connect { reply } => {
                let result = self.ensure_connected().await.map(|_| ());
                let _ = reply.send(result);
            }
            Command::Call {
                module,
                function,
                args,
                timeout,
                reply,
            } => {
                let link = match self.ensure_connected().await {
                    Ok(link) => link,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let sink = self.captures.open();
                let call = RemoteCall {
                    module: module.clone(),
                    function: function.clone(),
                    args,
                    capture: sink.id(),
                };
                tokio::spawn(async move {
                    let outcome = tokio::time::timeout(timeout, link.call(call)).await;
                    // The sink is closed on every path before the caller hears back.
                    let output = sink.finish();
                    let result = match outcome {
                        Ok(Ok(value)) => Ok(RpcReply { value, output }),
                        Ok(Err(e)) => Err(e),
                        Err(_) => {
                            metrics().record_rpc_timeout();
                            warn!("{}:{} timed out after {:?}", module, function, timeout);
                            Err(DistributionError::Timeout {
                                module,
                                function,
                                timeout,
                            })
                        }
                    };
                    let _ = reply.send(result);
                });
            }
            Command::Stop { .. } => {}
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::NodeDown { generation } if generation == self.generation && self.link.is_some() => {
                error!("Runtime node {} went down", self.settings.target.node);
                self.link = None;
                self.monitor = None;
                self.publish(ConnectionStatus::Disconnected);
            }
            Event::NodeDown { generation } => {
                debug!("Ignoring node-down for superseded link {}", generation);
            }
        }
    }

    async fn ensure_connected(&mut self) -> Result<Arc<dyn NodeLink>, DistributionError> {
        if let Some(link) = &self.link {
            return Ok(Arc::clone(link));
        }
        if !self.settings.enabled {
            return Err(DistributionError::Disabled);
        }
        let node = self.settings.target.node.clone();
        self.publish(ConnectionStatus::Connecting);

        let limit = self.settings.retry.attempt_timeout();
        let mut cancel = self.cancel.clone();
        let direct = tokio::select! {
            result = connect_within(self.connector.as_ref(), &self.settings.target, self.captures.clone(), limit) => result,
            _ = cancel.wait_for(|stop| *stop) => {
                self.publish(ConnectionStatus::Disconnected);
                return Err(DistributionError::Stopped);
            }
        };
        match direct {
            Ok(link) => return Ok(self.attach(link)),
            Err(e) => debug!("{} not reachable ({}), starting runtime", node, e),
        }

        let Some(spec) = self.settings.spawn.clone() else {
            self.publish(ConnectionStatus::Disconnected);
            error!("Runtime node {} is unreachable and no start command is configured", node);
            return Err(DistributionError::Unreachable(node));
        };
        if let Err(e) = self.ensure_process(&spec).await {
            self.publish(ConnectionStatus::Disconnected);
            error!("Failed to start runtime for {}: {}", node, e);
            return Err(e);
        }

        let connector = Arc::clone(&self.connector);
        let target = self.settings.target.clone();
        let captures = self.captures.clone();
        let outcome = self
            .settings
            .retry
            .run(&mut cancel, |attempt| {
                let connector = Arc::clone(&connector);
                let target = target.clone();
                let captures = captures.clone();
                async move {
                    debug!("Connect attempt {} to {}", attempt, target.node);
                    connect_within(connector.as_ref(), &target, captures, limit).await
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempt } => {
                info!("Connected to {} after {} attempts", node, attempt);
                Ok(self.attach(value))
            }
            RetryOutcome::Exhausted(last) => {
                metrics().record_connect_failure();
                self.publish(ConnectionStatus::Disconnected);
                let attempts = self.settings.retry.attempts;
                match last {
                    Some(e) => error!("Giving up on {} after {} attempts: {}", node, attempts, e),
                    None => error!("Giving up on {}: no connect attempts configured", node),
                }
                Err(DistributionError::ConnectFailed { node, attempts })
            }
            RetryOutcome::Cancelled => {
                self.publish(ConnectionStatus::Disconnected);
                Err(DistributionError::Stopped)
            }
        }
    }

    async fn ensure_process(&mut self, spec: &SpawnSpec) -> Result<(), DistributionError> {
        if let Some(process) = self.process.as_mut() {
            if process.is_running() {
                debug!("Runtime process already running, waiting for it");
                return Ok(());
            }
        }
        self.process = Some(self.spawner.spawn(spec).await?);
        self.snapshot.send_modify(|s| s.spawned += 1);
        Ok(())
    }

    fn attach(&mut self, link: Arc<dyn NodeLink>) -> Arc<dyn NodeLink> {
        self.generation += 1;
        let generation = self.generation;
        if let Some(old) = self.monitor.take() {
            old.abort();
        }

        let events = self.events_tx.clone();
        let watched = Arc::clone(&link);
        self.monitor = Some(tokio::spawn(async move {
            watched.closed().await;
            let _ = events.send(Event::NodeDown { generation });
        }));

        info!("Connected to runtime node {}", link.node());
        self.link = Some(Arc::clone(&link));
        self.publish(ConnectionStatus::Connected);
        link
    }

    fn publish(&self, status: ConnectionStatus) {
        self.snapshot.send_modify(|s| s.status = status);
    }

    async fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.link = None;
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.kill().await {
                warn!("Failed to stop runtime process: {}", e);
            }
        }
        self.publish(ConnectionStatus::Disconnected);
        info!("Distribution manager stopped");
    }
}

/// One connect attempt, handshake included, bounded by `limit`.
async fn connect_within(
    connector: &dyn Connector,
    target: &ConnectTarget,
    captures: CaptureRegistry,
    limit: Duration,
) -> Result<Arc<dyn NodeLink>, DistributionError> {
    match tokio::time::timeout(limit, connector.connect(target, captures)).await {
        Ok(result) => result,
        Err(_) => Err(DistributionError::ConnectTimeout {
            node: target.node.clone(),
            timeout: limit,
        }),
    }
}
