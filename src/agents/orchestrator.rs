// =============================================================================
// Agent Orchestrator — lifecycle, health, and recovery for the agent fleet
// =============================================================================
//
// Owns every agent task. Crashed agents restart on a 5-second backoff with a
// per-agent cap; an agent that exhausts its cap is abandoned with a single
// critical alert while the rest of the fleet keeps running. Shutdown fans a
// control message out over the bus, then cancels tasks after a grace window.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{BusConnector, Channel, Envelope};
use crate::config::Settings;
use crate::gateway::OrderGateway;
use crate::store::{tables, TableStore};

use super::roster;
use super::runtime::{AgentBehavior, AgentRuntime, AgentShared, AgentSpec, MetricsSnapshot};

/// Backoff between restarts of a crashed agent.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);
/// Grace window per task during shutdown before it is abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Health monitor period.
const MONITOR_PERIOD: Duration = Duration::from_secs(60);
/// Component name in the `system_health` table.
const HEALTH_COMPONENT: &str = "agent_orchestrator";

// ---------------------------------------------------------------------------
// Registry types
// ---------------------------------------------------------------------------

/// One registered agent: its identity plus the state that survives restarts.
#[derive(Clone)]
struct RegisteredAgent {
    spec: AgentSpec,
    shared: Arc<AgentShared>,
    behavior: Arc<tokio::sync::Mutex<Box<dyn AgentBehavior>>>,
    restarts: Arc<AtomicU32>,
}

/// Snapshot of one agent for `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusEntry {
    pub agent_type: String,
    pub running: bool,
    pub restarts: u32,
    pub metrics: MetricsSnapshot,
}

/// Snapshot of the orchestrator and its fleet.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub started_at: Option<String>,
    pub agent_count: usize,
    pub agents: HashMap<String, AgentStatusEntry>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct AgentOrchestrator {
    connector: Arc<dyn BusConnector>,
    store: Arc<dyn TableStore>,
    agents: Arc<RwLock<Vec<RegisteredAgent>>>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    started_at: RwLock<Option<String>>,
    max_restarts: u32,
    shutdown_tx: watch::Sender<bool>,
}

impl AgentOrchestrator {
    pub fn new(connector: Arc<dyn BusConnector>, store: Arc<dyn TableStore>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            connector,
            store,
            agents: Arc::new(RwLock::new(Vec::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            started_at: RwLock::new(None),
            max_restarts: 5,
            shutdown_tx,
        }
    }

    /// Register an agent. Agent ids are unique across the registry, and the
    /// meta-decision agent is expected to be registered before any other.
    pub fn register(
        &self,
        spec: AgentSpec,
        behavior: Box<dyn AgentBehavior>,
    ) -> anyhow::Result<()> {
        let mut agents = self.agents.write();

        if agents.iter().any(|a| a.spec.agent_id == spec.agent_id) {
            anyhow::bail!("agent id already registered: {}", spec.agent_id);
        }
        if agents.is_empty() && spec.agent_type != "meta_decision" {
            warn!(
                agent_id = %spec.agent_id,
                agent_type = %spec.agent_type,
                "meta-decision agent should be registered first (veto authority)"
            );
        }

        info!(agent_id = %spec.agent_id, agent_type = %spec.agent_type, "agent registered");
        agents.push(RegisteredAgent {
            spec,
            shared: AgentShared::new(),
            behavior: Arc::new(tokio::sync::Mutex::new(behavior)),
            restarts: Arc::new(AtomicU32::new(0)),
        });
        Ok(())
    }

    /// Register the default roster, meta-decision first.
    pub fn create_default_agents(
        &self,
        settings: &Settings,
        gateway: Arc<OrderGateway>,
    ) -> anyhow::Result<()> {
        for (spec, behavior) in roster::default_agents(settings, gateway) {
            self.register(spec, behavior)?;
        }
        info!(
            agent_count = self.agents.read().len(),
            "default roster registered with meta-decision authority"
        );
        Ok(())
    }

    /// Start every registered agent under supervision, plus the monitor.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("orchestrator already running");
            return;
        }
        *self.started_at.write() = Some(Utc::now().to_rfc3339());

        let agents = self.agents.read().clone();
        info!(agent_count = agents.len(), "starting agents");

        update_system_health(&self.store, "healthy", "Starting agents").await;

        for agent in agents {
            let agent_id = agent.spec.agent_id.clone();
            let handle = tokio::spawn(supervise(
                agent,
                self.connector.clone(),
                self.store.clone(),
                self.running.clone(),
                self.shutdown_tx.subscribe(),
                self.max_restarts,
            ));
            self.tasks.lock().insert(agent_id.clone(), handle);
            info!(agent_id = %agent_id, "agent task started");
        }

        let monitor = tokio::spawn(monitor_loop(
            self.agents.clone(),
            self.tasks.clone(),
            self.store.clone(),
            self.running.clone(),
        ));
        self.tasks.lock().insert("_monitor".to_string(), monitor);

        info!("all agents started");
    }

    /// Stop the fleet: broadcast shutdown, then cancel with a grace window.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping all agents");

        self.send_command("shutdown", None).await;
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (agent_id, mut handle) in handles {
            if handle.is_finished() {
                continue;
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!(agent_id = %agent_id, "shutdown grace expired; abandoning task");
                handle.abort();
            }
        }

        update_system_health(&self.store, "stopped", "Shutdown complete").await;
        info!("all agents stopped");
    }

    /// Broadcast shutdown and stop.
    pub async fn shutdown(&self) {
        self.send_command("shutdown", None).await;
        self.stop().await;
    }

    /// Publish a control command over the bus, targeted or broadcast.
    pub async fn send_command(&self, command: &str, target: Option<&str>) {
        match self.connector.connect().await {
            Ok(mut bus) => {
                let envelope = Envelope::new(
                    "orchestrator",
                    Channel::Control,
                    json!({"command": command, "target": target})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    None,
                    None,
                );
                if let Err(e) = bus.publish(Channel::Control, &envelope).await {
                    error!(command, error = %e, "control publish failed");
                } else {
                    info!(
                        command,
                        target = target.unwrap_or("all agents"),
                        "control command sent"
                    );
                }
                let _ = bus.close().await;
            }
            Err(e) => error!(command, error = %e, "control connection failed"),
        }
    }

    pub async fn pause_all(&self) {
        self.send_command("pause", None).await;
    }

    pub async fn resume_all(&self) {
        self.send_command("resume", None).await;
    }

    pub async fn pause_agent(&self, agent_id: &str) {
        self.send_command("pause", Some(agent_id)).await;
    }

    pub async fn resume_agent(&self, agent_id: &str) {
        self.send_command("resume", Some(agent_id)).await;
    }

    /// Point-in-time view of the fleet.
    pub fn get_status(&self) -> OrchestratorStatus {
        let agents = self.agents.read();
        let tasks = self.tasks.lock();

        let mut statuses = HashMap::new();
        for agent in agents.iter() {
            statuses.insert(
                agent.spec.agent_id.clone(),
                AgentStatusEntry {
                    agent_type: agent.spec.agent_type.clone(),
                    running: tasks
                        .get(&agent.spec.agent_id)
                        .map(|task| !task.is_finished())
                        .unwrap_or(false),
                    restarts: agent.restarts.load(Ordering::Relaxed),
                    metrics: agent.shared.metrics.snapshot(),
                },
            );
        }

        OrchestratorStatus {
            running: self.running.load(Ordering::SeqCst),
            started_at: self.started_at.read().clone(),
            agent_count: agents.len(),
            agents: statuses,
        }
    }
}

// ---------------------------------------------------------------------------
// Supervision
// ---------------------------------------------------------------------------

/// Run one agent forever, restarting on crash with backoff.
///
/// A clean exit while the system is still running is unexpected and also
/// restarts (without counting against the cap). Exceeding the cap abandons
/// this agent only; the rest of the fleet is unaffected.
async fn supervise(
    agent: RegisteredAgent,
    connector: Arc<dyn BusConnector>,
    store: Arc<dyn TableStore>,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    max_restarts: u32,
) {
    let agent_id = agent.spec.agent_id.clone();

    while running.load(Ordering::SeqCst) {
        let mut runtime = AgentRuntime::new(
            agent.spec.clone(),
            agent.shared.clone(),
            agent.behavior.clone(),
            connector.clone(),
            store.clone(),
            shutdown.clone(),
        );

        match runtime.run().await {
            Ok(()) => {
                if running.load(Ordering::SeqCst) {
                    warn!(agent_id = %agent_id, "agent exited unexpectedly, will restart");
                }
            }
            Err(e) => {
                let attempts = agent.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                error!(agent_id = %agent_id, error = %e, attempts, "agent crashed");

                if attempts > max_restarts {
                    error!(
                        agent_id = %agent_id,
                        max_restarts,
                        "agent exceeded max restarts; giving up on it"
                    );
                    send_agent_failure_alert(&connector, &store, &agent_id, &e.to_string()).await;
                    break;
                }
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        tokio::time::sleep(RESTART_BACKOFF).await;
        info!(
            agent_id = %agent_id,
            attempt = agent.restarts.load(Ordering::SeqCst),
            "restarting agent"
        );
    }
}

/// One critical alert per abandoned agent, on the bus and in the store.
async fn send_agent_failure_alert(
    connector: &Arc<dyn BusConnector>,
    store: &Arc<dyn TableStore>,
    agent_id: &str,
    error: &str,
) {
    let title = format!("Agent {agent_id} Failed");
    let message = format!("Agent exceeded max restart attempts after error: {error}");

    if let Ok(mut bus) = connector.connect().await {
        let envelope = Envelope::new(
            "orchestrator",
            Channel::Alerts,
            json!({
                "severity": "critical",
                "title": title,
                "message": message,
                "metadata": {"agent_id": agent_id},
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
            None,
            None,
        );
        let _ = bus.publish(Channel::Alerts, &envelope).await;
        let _ = bus.close().await;
    }

    let row = json!({
        "title": title,
        "message": message,
        "severity": "critical",
        "source": "agent_orchestrator",
        "metadata": {"agent_id": agent_id},
    });
    if let Err(e) = store.insert(tables::ALERTS, row).await {
        error!(agent_id, error = %e, "failure alert persistence failed");
    }
}

// ---------------------------------------------------------------------------
// Health monitor
// ---------------------------------------------------------------------------

/// Every minute: log the running/total ratio and refresh `system_health`.
async fn monitor_loop(
    agents: Arc<RwLock<Vec<RegisteredAgent>>>,
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    store: Arc<dyn TableStore>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let (running_count, total) = {
            let agents = agents.read();
            let tasks = tasks.lock();
            let count = agents
                .iter()
                .filter(|agent| {
                    tasks
                        .get(&agent.spec.agent_id)
                        .map(|task| !task.is_finished())
                        .unwrap_or(false)
                })
                .count();
            (count, agents.len())
        };

        info!(running = running_count, total, "agent status");

        let status = if running_count == total {
            "healthy"
        } else {
            "degraded"
        };
        update_system_health(&store, status, &format!("{running_count}/{total} agents running"))
            .await;

        tokio::time::sleep(MONITOR_PERIOD).await;
    }
}

async fn update_system_health(store: &Arc<dyn TableStore>, status: &str, details: &str) {
    let row = json!({
        "component": HEALTH_COMPONENT,
        "status": status,
        "details": {"message": details},
        "last_check_at": Utc::now().to_rfc3339(),
    });
    if let Err(e) = store.upsert(tables::SYSTEM_HEALTH, row, "component").await {
        error!(error = %e, "system health update failed");
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runtime::{AgentContext, AgentState};
    use crate::bus::memory::MemoryBus;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct IdleBehavior;

    #[async_trait]
    impl AgentBehavior for IdleBehavior {
        async fn handle_message(
            &mut self,
            _ctx: &mut AgentContext<'_>,
            _message: &Envelope,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Fails `on_start` for the first N runs, then behaves.
    struct FlakyBehavior {
        failures_remaining: u32,
    }

    #[async_trait]
    impl AgentBehavior for FlakyBehavior {
        async fn handle_message(
            &mut self,
            _ctx: &mut AgentContext<'_>,
            _message: &Envelope,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn on_start(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                anyhow::bail!("boot failure");
            }
            Ok(())
        }
    }

    fn spec(agent_id: &str, agent_type: &str) -> AgentSpec {
        AgentSpec {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            subscribed_channels: vec![Channel::Signals],
            capabilities: Vec::new(),
        }
    }

    struct TestPlane {
        store: Arc<MemoryStore>,
        orchestrator: AgentOrchestrator,
    }

    fn plane() -> TestPlane {
        let bus = MemoryBus::new();
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            AgentOrchestrator::new(Arc::new(bus), store.clone() as Arc<dyn TableStore>);
        TestPlane {
            store,
            orchestrator,
        }
    }

    // Generous budget in virtual time: these tests run under a paused clock,
    // and the slowest path (restart cap + a 60s monitor tick) needs minutes.
    async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
        for _ in 0..800 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn agent_state(orchestrator: &AgentOrchestrator, agent_id: &str) -> AgentState {
        let agents = orchestrator.agents.read();
        agents
            .iter()
            .find(|a| a.spec.agent_id == agent_id)
            .map(|a| a.shared.state())
            .expect("agent registered")
    }

    fn cycles(orchestrator: &AgentOrchestrator, agent_id: &str) -> u64 {
        orchestrator.get_status().agents[agent_id].metrics.cycles_run
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let plane = plane();
        plane
            .orchestrator
            .register(spec("meta-decision-agent-01", "meta_decision"), Box::new(IdleBehavior))
            .unwrap();

        let err = plane
            .orchestrator
            .register(spec("meta-decision-agent-01", "meta_decision"), Box::new(IdleBehavior))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_agent_restarts_once_without_alert() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(FlakyBehavior {
                    failures_remaining: 1,
                }),
            )
            .unwrap();

        plane.orchestrator.start().await;

        wait_for(
            || agent_state(&plane.orchestrator, "meta-decision-agent-01") == AgentState::Running,
            "agent recovery",
        )
        .await;

        let status = plane.orchestrator.get_status();
        assert_eq!(status.agents["meta-decision-agent-01"].restarts, 1);
        assert!(
            plane
                .store
                .rows(tables::ALERTS)
                .iter()
                .all(|a| a["severity"] != "critical"),
            "a recovered agent must not raise a critical alert"
        );

        plane.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn agent_exceeding_max_restarts_is_abandoned() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();
        plane
            .orchestrator
            .register(
                spec("signal-agent-01", "signal"),
                Box::new(FlakyBehavior {
                    failures_remaining: u32::MAX,
                }),
            )
            .unwrap();

        plane.orchestrator.start().await;

        // Six consecutive failures exhaust the cap of five.
        wait_for(
            || {
                plane
                    .store
                    .rows(tables::ALERTS)
                    .iter()
                    .any(|a| a["severity"] == "critical")
            },
            "critical alert",
        )
        .await;

        let critical: Vec<Value> = plane
            .store
            .rows(tables::ALERTS)
            .into_iter()
            .filter(|a| a["severity"] == "critical")
            .collect();
        assert_eq!(critical.len(), 1, "exactly one critical alert");
        assert_eq!(critical[0]["title"], "Agent signal-agent-01 Failed");

        let status = plane.orchestrator.get_status();
        assert_eq!(status.agents["signal-agent-01"].restarts, 6);

        // The failed agent's task winds down; the healthy agent keeps going.
        wait_for(
            || !plane.orchestrator.get_status().agents["signal-agent-01"].running,
            "abandoned task",
        )
        .await;
        assert!(status.agents["meta-decision-agent-01"].running);
        assert_eq!(
            agent_state(&plane.orchestrator, "meta-decision-agent-01"),
            AgentState::Running
        );

        plane.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_targets_only_the_named_agent() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();
        plane
            .orchestrator
            .register(spec("signal-agent-01", "signal"), Box::new(IdleBehavior))
            .unwrap();

        plane.orchestrator.start().await;
        wait_for(
            || agent_state(&plane.orchestrator, "signal-agent-01") == AgentState::Running,
            "agents running",
        )
        .await;

        plane.orchestrator.pause_agent("signal-agent-01").await;
        wait_for(
            || agent_state(&plane.orchestrator, "signal-agent-01") == AgentState::Paused,
            "targeted pause",
        )
        .await;
        assert_eq!(
            agent_state(&plane.orchestrator, "meta-decision-agent-01"),
            AgentState::Running,
            "untargeted agent stays running"
        );

        // The paused agent skips its cycle.
        let frozen = cycles(&plane.orchestrator, "signal-agent-01");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cycles(&plane.orchestrator, "signal-agent-01") <= frozen + 1);

        plane.orchestrator.resume_agent("signal-agent-01").await;
        wait_for(
            || agent_state(&plane.orchestrator, "signal-agent-01") == AgentState::Running,
            "targeted resume",
        )
        .await;

        plane.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_pause_affects_all_agents() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();
        plane
            .orchestrator
            .register(spec("risk-agent-01", "risk"), Box::new(IdleBehavior))
            .unwrap();

        plane.orchestrator.start().await;
        wait_for(
            || agent_state(&plane.orchestrator, "risk-agent-01") == AgentState::Running,
            "agents running",
        )
        .await;

        plane.orchestrator.pause_all().await;
        wait_for(
            || {
                agent_state(&plane.orchestrator, "meta-decision-agent-01") == AgentState::Paused
                    && agent_state(&plane.orchestrator, "risk-agent-01") == AgentState::Paused
            },
            "broadcast pause",
        )
        .await;

        plane.orchestrator.resume_all().await;
        wait_for(
            || {
                agent_state(&plane.orchestrator, "meta-decision-agent-01") == AgentState::Running
                    && agent_state(&plane.orchestrator, "risk-agent-01") == AgentState::Running
            },
            "broadcast resume",
        )
        .await;

        plane.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_tasks_and_marks_health() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();

        plane.orchestrator.start().await;
        wait_for(
            || agent_state(&plane.orchestrator, "meta-decision-agent-01") == AgentState::Running,
            "agent running",
        )
        .await;

        plane.orchestrator.stop().await;

        assert!(plane.orchestrator.tasks.lock().is_empty());
        let status = plane.orchestrator.get_status();
        assert!(!status.running);

        let health = plane.store.rows(tables::SYSTEM_HEALTH);
        assert_eq!(health.len(), 1, "health row is upserted, not appended");
        assert_eq!(health[0]["component"], "agent_orchestrator");
        assert_eq!(health[0]["status"], "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn status_snapshot_shape() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();

        let before = plane.orchestrator.get_status();
        assert!(!before.running);
        assert_eq!(before.agent_count, 1);
        assert!(!before.agents["meta-decision-agent-01"].running);

        plane.orchestrator.start().await;
        wait_for(
            || plane.orchestrator.get_status().agents["meta-decision-agent-01"].running,
            "running status",
        )
        .await;

        let during = plane.orchestrator.get_status();
        assert!(during.running);
        assert!(during.started_at.is_some());
        assert_eq!(during.agents["meta-decision-agent-01"].agent_type, "meta_decision");

        plane.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_reports_degraded_fleet() {
        let plane = plane();
        plane
            .orchestrator
            .register(
                spec("meta-decision-agent-01", "meta_decision"),
                Box::new(IdleBehavior),
            )
            .unwrap();
        plane
            .orchestrator
            .register(
                spec("signal-agent-01", "signal"),
                Box::new(FlakyBehavior {
                    failures_remaining: u32::MAX,
                }),
            )
            .unwrap();

        plane.orchestrator.start().await;

        // Once the flaky agent is abandoned, a monitor pass records the
        // degraded fleet.
        wait_for(
            || {
                plane
                    .store
                    .rows(tables::SYSTEM_HEALTH)
                    .iter()
                    .any(|h| h["status"] == "degraded")
            },
            "degraded health row",
        )
        .await;

        plane.orchestrator.stop().await;
    }
}
