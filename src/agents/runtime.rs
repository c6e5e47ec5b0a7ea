// =============================================================================
// Agent Runtime — uniform pausable, restartable, heartbeat-emitting loop
// =============================================================================
//
// Every agent variant runs on the same state machine:
//
//   idle → connecting → running ⇄ paused → stopping → stopped
//
// Agent "types" are not a class hierarchy; they are `AgentSpec` records plus
// an `AgentBehavior` capability table (message handler, cycle, lifecycle
// hooks). Behavior errors are counted and survived; transport errors and
// cancellation terminate the run and bubble to the supervisor.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{BusConnector, BusError, BusTransport, Channel, Envelope};
use crate::store::{tables, TableStore};

/// Bus poll timeout inside the main loop.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Idle sleep while paused (messages are still processed).
const PAUSED_SLEEP: Duration = Duration::from_millis(500);
/// Heartbeat period, on the bus and in the store.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// State and metrics
// ---------------------------------------------------------------------------

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Connecting,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// Per-agent counters. Shared between the main loop, the heartbeat task, and
/// status snapshots; reset only on process restart.
#[derive(Default)]
pub struct AgentMetrics {
    pub messages_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub cycles_run: AtomicU64,
    pub errors: AtomicU64,
    pub last_heartbeat: RwLock<Option<String>>,
}

/// Serializable point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub cycles_run: u64,
    pub errors: u64,
    pub last_heartbeat: Option<String>,
}

impl AgentMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_heartbeat: self.last_heartbeat.read().clone(),
        }
    }
}

/// Identity and wiring of one agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Stable unique id, e.g. "risk-agent-01".
    pub agent_id: String,
    /// Category label, e.g. "risk", "meta_decision".
    pub agent_type: String,
    pub subscribed_channels: Vec<Channel>,
    pub capabilities: Vec<String>,
}

/// State shared between the main loop, the heartbeat task, the supervisor,
/// and restarts of the same agent.
pub struct AgentShared {
    pub metrics: AgentMetrics,
    state: RwLock<AgentState>,
    paused: AtomicBool,
    started_at: RwLock<Option<DateTime<Utc>>>,
}

impl AgentShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            metrics: AgentMetrics::default(),
            state: RwLock::new(AgentState::Idle),
            paused: AtomicBool::new(false),
            started_at: RwLock::new(None),
        })
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    fn set_state(&self, state: AgentState) {
        *self.state.write() = state;
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn status_label(&self) -> &'static str {
        if self.is_paused() {
            "paused"
        } else {
            "running"
        }
    }
}

// ---------------------------------------------------------------------------
// Behavior contract
// ---------------------------------------------------------------------------

/// What a behavior can do during its callbacks: publish, alert, and read its
/// own identity and counters.
pub struct AgentContext<'a> {
    pub agent_id: &'a str,
    bus: &'a mut dyn BusTransport,
    metrics: &'a AgentMetrics,
    store: &'a Arc<dyn TableStore>,
}

impl<'a> AgentContext<'a> {
    pub(crate) fn new(
        agent_id: &'a str,
        bus: &'a mut dyn BusTransport,
        metrics: &'a AgentMetrics,
        store: &'a Arc<dyn TableStore>,
    ) -> Self {
        Self {
            agent_id,
            bus,
            metrics,
            store,
        }
    }

    /// Publish a payload on `channel`, wrapped in a fresh envelope sourced
    /// from this agent. The payload must be a JSON object.
    pub async fn publish(
        &mut self,
        channel: Channel,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Result<(), BusError> {
        let Value::Object(payload) = payload else {
            return Err(BusError::Transport(
                "payload must be a JSON object".to_string(),
            ));
        };

        let envelope = Envelope::new(self.agent_id, channel, payload, None, correlation_id);
        self.bus.publish(channel, &envelope).await?;
        self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);

        debug!(
            agent_id = %self.agent_id,
            channel = %channel,
            message_id = %envelope.id,
            "published"
        );
        Ok(())
    }

    /// Raise an alert on the bus and persist it. A store failure is logged
    /// and swallowed; the bus copy has already gone out.
    pub async fn send_alert(
        &mut self,
        severity: &str,
        title: &str,
        message: &str,
        metadata: Value,
    ) -> Result<(), BusError> {
        self.publish(
            Channel::Alerts,
            json!({
                "severity": severity,
                "title": title,
                "message": message,
                "metadata": metadata.clone(),
            }),
            None,
        )
        .await?;

        let row = json!({
            "title": title,
            "message": message,
            "severity": severity,
            "source": format!("agent:{}", self.agent_id),
            "metadata": metadata,
        });
        if let Err(e) = self.store.insert(tables::ALERTS, row).await {
            error!(agent_id = %self.agent_id, error = %e, "alert persistence failed");
        }

        Ok(())
    }
}

/// The capability table every agent variant populates. `handle_message` and
/// `cycle` are the work surface; the lifecycle hooks default to no-ops.
#[async_trait]
pub trait AgentBehavior: Send {
    /// Handle one data-plane message.
    async fn handle_message(
        &mut self,
        ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()>;

    /// Run one unit of agent-specific work.
    async fn cycle(&mut self, ctx: &mut AgentContext<'_>) -> anyhow::Result<()>;

    async fn on_start(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_pause(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_resume(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Drives one agent. The behavior and shared state live outside the runtime
/// so that a supervisor restart reuses them (counters survive restarts).
pub struct AgentRuntime {
    spec: AgentSpec,
    shared: Arc<AgentShared>,
    behavior: Arc<tokio::sync::Mutex<Box<dyn AgentBehavior>>>,
    connector: Arc<dyn BusConnector>,
    store: Arc<dyn TableStore>,
    shutdown: watch::Receiver<bool>,
}

impl AgentRuntime {
    pub fn new(
        spec: AgentSpec,
        shared: Arc<AgentShared>,
        behavior: Arc<tokio::sync::Mutex<Box<dyn AgentBehavior>>>,
        connector: Arc<dyn BusConnector>,
        store: Arc<dyn TableStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            spec,
            shared,
            behavior,
            connector,
            store,
            shutdown,
        }
    }

    /// Run the agent until shutdown, cancellation, or a transport error.
    ///
    /// Behavior errors inside the loop are counted and survived. Errors out
    /// of this function are fatal for the run; the supervisor decides
    /// whether to restart.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.shared.set_state(AgentState::Connecting);

        let mut bus = self
            .connector
            .connect()
            .await
            .context("bus connect failed")?;

        let mut channels = self.spec.subscribed_channels.clone();
        for required in [Channel::Control, Channel::Heartbeat] {
            if !channels.contains(&required) {
                channels.push(required);
            }
        }
        bus.subscribe(&channels)
            .await
            .context("bus subscribe failed")?;

        *self.shared.started_at.write() = Some(Utc::now());
        self.shared.set_state(AgentState::Running);
        info!(
            agent_id = %self.spec.agent_id,
            agent_type = %self.spec.agent_type,
            channels = channels.len(),
            "agent loop starting"
        );

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.connector.clone(),
            self.store.clone(),
            self.shared.clone(),
            self.spec.clone(),
        ));

        let behavior = self.behavior.clone();
        let mut behavior = behavior.lock().await;

        let result = self.drive(bus.as_mut(), behavior.as_mut()).await;

        // Teardown runs on every exit path: hook, store mark, transport.
        self.shared.set_state(AgentState::Stopping);
        heartbeat.abort();

        {
            let mut ctx = AgentContext {
                agent_id: &self.spec.agent_id,
                bus: bus.as_mut(),
                metrics: &self.shared.metrics,
                store: &self.store,
            };
            if let Err(e) = behavior.on_stop(&mut ctx).await {
                warn!(agent_id = %self.spec.agent_id, error = %e, "on_stop hook failed");
            }
        }

        if let Err(e) = self
            .store
            .patch(
                tables::AGENTS,
                &[("id", self.spec.agent_id.clone())],
                json!({"status": "stopped"}),
            )
            .await
        {
            warn!(agent_id = %self.spec.agent_id, error = %e, "failed to mark agent stopped");
        }

        let _ = bus.close().await;
        self.shared.set_state(AgentState::Stopped);
        info!(agent_id = %self.spec.agent_id, "agent stopped");

        result
    }

    async fn drive(
        &self,
        bus: &mut dyn BusTransport,
        behavior: &mut dyn AgentBehavior,
    ) -> anyhow::Result<()> {
        {
            let mut ctx = AgentContext {
                agent_id: &self.spec.agent_id,
                bus,
                metrics: &self.shared.metrics,
                store: &self.store,
            };
            behavior.on_start(&mut ctx).await.context("on_start failed")?;
        }

        loop {
            if *self.shutdown.borrow() {
                info!(agent_id = %self.spec.agent_id, "cancellation requested");
                return Ok(());
            }

            if let Some(envelope) = bus.next_message(POLL_TIMEOUT).await? {
                self.shared
                    .metrics
                    .messages_received
                    .fetch_add(1, Ordering::Relaxed);

                if envelope.channel == Channel::Control.as_str() {
                    if self.handle_control(bus, behavior, &envelope).await {
                        return Ok(());
                    }
                } else {
                    let mut ctx = AgentContext {
                        agent_id: &self.spec.agent_id,
                        bus,
                        metrics: &self.shared.metrics,
                        store: &self.store,
                    };
                    if let Err(e) = behavior.handle_message(&mut ctx, &envelope).await {
                        self.shared.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        error!(
                            agent_id = %self.spec.agent_id,
                            channel = %envelope.channel,
                            error = %e,
                            "message handler failed"
                        );
                    }
                }
            }

            if !self.shared.is_paused() {
                let mut ctx = AgentContext {
                    agent_id: &self.spec.agent_id,
                    bus,
                    metrics: &self.shared.metrics,
                    store: &self.store,
                };
                if let Err(e) = behavior.cycle(&mut ctx).await {
                    self.shared.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    error!(agent_id = %self.spec.agent_id, error = %e, "cycle failed");
                }
                self.shared.metrics.cycles_run.fetch_add(1, Ordering::Relaxed);
            } else {
                tokio::time::sleep(PAUSED_SLEEP).await;
            }
        }
    }

    /// Apply a control command. Returns `true` when the agent should stop.
    ///
    /// Commands targeted at a different agent are ignored, as are unknown
    /// commands. A missing target means broadcast.
    async fn handle_control(
        &self,
        bus: &mut dyn BusTransport,
        behavior: &mut dyn AgentBehavior,
        envelope: &Envelope,
    ) -> bool {
        let command = envelope
            .payload
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let target = envelope.payload.get("target").and_then(Value::as_str);

        if let Some(target) = target {
            if target != self.spec.agent_id {
                return false;
            }
        }

        match command {
            "shutdown" => {
                info!(agent_id = %self.spec.agent_id, "shutdown command received");
                true
            }
            "pause" => {
                info!(agent_id = %self.spec.agent_id, "pause command received");
                self.shared.paused.store(true, Ordering::Relaxed);
                self.shared.set_state(AgentState::Paused);
                let mut ctx = AgentContext {
                    agent_id: &self.spec.agent_id,
                    bus,
                    metrics: &self.shared.metrics,
                    store: &self.store,
                };
                if let Err(e) = behavior.on_pause(&mut ctx).await {
                    self.shared.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    error!(agent_id = %self.spec.agent_id, error = %e, "on_pause hook failed");
                }
                false
            }
            "resume" => {
                info!(agent_id = %self.spec.agent_id, "resume command received");
                self.shared.paused.store(false, Ordering::Relaxed);
                self.shared.set_state(AgentState::Running);
                let mut ctx = AgentContext {
                    agent_id: &self.spec.agent_id,
                    bus,
                    metrics: &self.shared.metrics,
                    store: &self.store,
                };
                if let Err(e) = behavior.on_resume(&mut ctx).await {
                    self.shared.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    error!(agent_id = %self.spec.agent_id, error = %e, "on_resume hook failed");
                }
                false
            }
            other => {
                debug!(agent_id = %self.spec.agent_id, command = other, "ignoring unknown control command");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// "meta-decision-agent-01" → "Meta Decision Agent 01".
fn display_name(agent_id: &str) -> String {
    agent_id
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best-effort process resource sample; zeros when unavailable.
fn sample_resources(system: &mut sysinfo::System) -> (f64, f64) {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate};

    let pid = Pid::from_u32(std::process::id());
    system.refresh_memory();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        ProcessRefreshKind::new().with_cpu().with_memory(),
    );

    let Some(process) = system.process(pid) else {
        return (0.0, 0.0);
    };

    let cpu = f64::from(process.cpu_usage());
    let total = system.total_memory();
    let memory = if total > 0 {
        process.memory() as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    ((cpu * 100.0).round() / 100.0, (memory * 100.0).round() / 100.0)
}

/// Runs on its own bus connection, concurrent with the main loop: every 30s
/// publish a heartbeat envelope AND upsert the agent's monitoring row.
async fn heartbeat_loop(
    connector: Arc<dyn BusConnector>,
    store: Arc<dyn TableStore>,
    shared: Arc<AgentShared>,
    spec: AgentSpec,
) {
    let mut bus = match connector.connect().await {
        Ok(bus) => bus,
        Err(e) => {
            error!(agent_id = %spec.agent_id, error = %e, "heartbeat connection failed");
            return;
        }
    };

    let mut system = sysinfo::System::new();

    loop {
        let status = shared.status_label();
        let now = Utc::now().to_rfc3339();

        let metrics = shared.metrics.snapshot();
        let payload = json!({
            "agent_id": spec.agent_id,
            "agent_type": spec.agent_type,
            "status": status,
            "metrics": metrics,
        });
        let envelope = Envelope::new(
            &spec.agent_id,
            Channel::Heartbeat,
            payload.as_object().cloned().unwrap_or_default(),
            None,
            None,
        );
        match bus.publish(Channel::Heartbeat, &envelope).await {
            Ok(()) => {
                shared.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(agent_id = %spec.agent_id, error = %e, "heartbeat publish failed");
            }
        }
        *shared.metrics.last_heartbeat.write() = Some(now.clone());

        let (cpu_usage, memory_usage) = sample_resources(&mut system);
        let uptime = shared
            .started_at
            .read()
            .map(|t| (Utc::now() - t).num_seconds().max(0))
            .unwrap_or(0);

        let row = json!({
            "id": spec.agent_id,
            "name": display_name(&spec.agent_id),
            "type": spec.agent_type,
            "status": status,
            "last_heartbeat": now,
            "cpu_usage": cpu_usage,
            "memory_usage": memory_usage,
            "uptime": uptime,
            "capabilities": spec.capabilities,
            "config": {},
            "error_message": null,
        });
        if let Err(e) = store.upsert(tables::AGENTS, row, "id").await {
            warn!(agent_id = %spec.agent_id, error = %e, "heartbeat row write failed");
        }

        tokio::time::sleep(HEARTBEAT_PERIOD).await;
    }
}
