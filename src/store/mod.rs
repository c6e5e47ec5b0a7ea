// =============================================================================
// Table Store — typed access to the table-oriented persistence backend
// =============================================================================
//
// A thin asynchronous wrapper over a REST table store with upsert semantics.
// There are no cross-table transactions; callers compensate with ordering
// discipline (the gateway writes order → position → audit in that order).
// =============================================================================

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;

/// Table names the control plane reads and writes.
pub mod tables {
    pub const AGENTS: &str = "agents";
    pub const SYSTEM_HEALTH: &str = "system_health";
    pub const ALERTS: &str = "alerts";
    pub const GLOBAL_SETTINGS: &str = "global_settings";
    pub const BOOKS: &str = "books";
    pub const ORDERS: &str = "orders";
    pub const POSITIONS: &str = "positions";
    pub const AUDIT_EVENTS: &str = "audit_events";
}

/// Persistence failure. Agents log and continue; the gateway treats a
/// pre-trade fetch failure as reason to reject the order.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store table {0} unavailable")]
    Unavailable(String),
}

/// Equality filters applied to a query, `(column, value)` pairs.
pub type Filters<'a> = &'a [(&'a str, String)];

/// Contract the table store must satisfy. All operations are asynchronous;
/// `upsert` is idempotent on the given conflict key.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Fetch rows matching all `filters`, optionally projecting `select`
    /// columns.
    async fn get(
        &self,
        table: &str,
        filters: Filters<'_>,
        select: Option<&str>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert one row.
    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError>;

    /// Insert or merge-update one row, keyed by `on_conflict`.
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<(), StoreError>;

    /// Partially update every row matching `filters`.
    async fn patch(&self, table: &str, filters: Filters<'_>, partial: Value)
        -> Result<(), StoreError>;
}
