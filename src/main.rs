// =============================================================================
// Meridian Control Plane — Main Entry Point
// =============================================================================
//
// With no table store configured the engine comes up against the in-memory
// backend: a safe demo posture where nothing leaves the process.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use meridian::agents::orchestrator::AgentOrchestrator;
use meridian::bus::memory::MemoryBus;
use meridian::config::Settings;
use meridian::gateway::OrderGateway;
use meridian::store::memory::MemoryStore;
use meridian::store::rest::RestStore;
use meridian::store::{tables, TableStore};

/// Gateway writes get a longer window than agent-side heartbeats.
const GATEWAY_STORE_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Control Plane — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let settings = Settings::from_env();

    // ── 1. Persistence ───────────────────────────────────────────────────
    // The orchestrator/agents and the gateway each get their own client;
    // gateway writes carry the longer timeout.
    let (store, gateway_store): (Arc<dyn TableStore>, Arc<dyn TableStore>) =
        match (&settings.store_url, &settings.store_service_key) {
            (Some(url), Some(key)) => (
                Arc::new(RestStore::new(url, key)),
                Arc::new(RestStore::with_timeout(url, key, GATEWAY_STORE_TIMEOUT)),
            ),
            _ => {
                warn!("no table store configured; using in-memory demo store");
                let memory = Arc::new(MemoryStore::new());
                seed_demo_rows(&memory).await;
                (memory.clone(), memory)
            }
        };

    // ── 2. Bus ───────────────────────────────────────────────────────────
    if !settings.bus_url.starts_with("memory://") {
        warn!(bus_url = %settings.bus_url, "unsupported bus scheme; using in-process broker");
    }
    let bus = MemoryBus::new();

    // ── 3. Gateway and orchestrator ──────────────────────────────────────
    let gateway = Arc::new(OrderGateway::new(gateway_store));

    let orchestrator = Arc::new(AgentOrchestrator::new(Arc::new(bus), store));
    orchestrator.create_default_agents(&settings, gateway)?;
    orchestrator.start().await;

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    wait_for_shutdown_signal().await;
    warn!("Shutdown signal received — stopping gracefully");

    orchestrator.shutdown().await;

    info!("Meridian control plane shut down complete.");
    Ok(())
}

/// The demo store starts with the kill switch off and one active book so
/// paper fills have somewhere to land.
async fn seed_demo_rows(store: &Arc<MemoryStore>) {
    let _ = store
        .insert(
            tables::GLOBAL_SETTINGS,
            json!({"global_kill_switch": false}),
        )
        .await;

    let demo_book = Uuid::new_v4();
    let _ = store
        .insert(
            tables::BOOKS,
            json!({"id": demo_book.to_string(), "status": "active", "name": "demo"}),
        )
        .await;
    info!(book_id = %demo_book, "demo book seeded");
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
