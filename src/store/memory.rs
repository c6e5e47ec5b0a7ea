// =============================================================================
// In-Memory Table Store — demo-posture backend and test double
// =============================================================================
//
// Backs the engine when no REST store is configured, and gives tests direct
// row access plus per-table failure injection for the fail-safe paths.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Filters, StoreError, TableStore};

/// In-process table map with equality filtering and merge-upsert semantics.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation against `table` fail with
    /// [`StoreError::Unavailable`] until [`Self::heal_table`] is called.
    pub fn fail_table(&self, table: &str) {
        self.failing.write().insert(table.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.failing.write().remove(table);
    }

    /// Snapshot of all rows in `table`, for assertions.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    fn check_available(&self, table: &str) -> Result<(), StoreError> {
        if self.failing.read().contains(table) {
            return Err(StoreError::Unavailable(table.to_string()));
        }
        Ok(())
    }

    /// Filter comparison over heterogeneous row values: strings compare
    /// directly, everything else through its JSON rendering.
    fn value_matches(row_value: Option<&Value>, filter_value: &str) -> bool {
        match row_value {
            Some(Value::String(s)) => s == filter_value,
            Some(other) => other.to_string() == filter_value,
            None => false,
        }
    }

    fn row_matches(row: &Value, filters: Filters<'_>) -> bool {
        filters
            .iter()
            .all(|(col, val)| Self::value_matches(row.get(*col), val))
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn get(
        &self,
        table: &str,
        filters: Filters<'_>,
        select: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_available(table)?;

        let tables = self.tables.read();
        let rows = tables.get(table).cloned().unwrap_or_default();

        let mut matched: Vec<Value> = rows
            .into_iter()
            .filter(|row| Self::row_matches(row, filters))
            .collect();

        if let Some(cols) = select {
            let wanted: Vec<&str> = cols.split(',').map(str::trim).collect();
            for row in &mut matched {
                if let Value::Object(map) = row {
                    map.retain(|key, _| wanted.contains(&key.as_str()));
                }
            }
        }

        Ok(matched)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        self.check_available(table)?;
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<(), StoreError> {
        self.check_available(table)?;

        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();

        let key = row.get(on_conflict).cloned();
        let existing = key
            .as_ref()
            .and_then(|k| rows.iter().position(|r| r.get(on_conflict) == Some(k)));

        match existing {
            Some(idx) => {
                if let (Value::Object(target), Value::Object(incoming)) = (&mut rows[idx], row) {
                    for (k, v) in incoming {
                        target.insert(k, v);
                    }
                }
            }
            None => rows.push(row),
        }

        Ok(())
    }

    async fn patch(
        &self,
        table: &str,
        filters: Filters<'_>,
        partial: Value,
    ) -> Result<(), StoreError> {
        self.check_available(table)?;

        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();

        for row in rows.iter_mut().filter(|r| Self::row_matches(r, filters)) {
            if let (Value::Object(target), Value::Object(incoming)) = (row, &partial) {
                for (k, v) in incoming {
                    target.insert(k.clone(), v.clone());
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_filtered_get() {
        let store = MemoryStore::new();
        store
            .insert("books", json!({"id": "b1", "status": "active"}))
            .await
            .unwrap();
        store
            .insert("books", json!({"id": "b2", "status": "frozen"}))
            .await
            .unwrap();

        let rows = store
            .get("books", &[("status", "active".to_string())], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "b1");
    }

    #[tokio::test]
    async fn filters_match_non_string_values() {
        let store = MemoryStore::new();
        store
            .insert("positions", json!({"id": "p1", "is_open": true}))
            .await
            .unwrap();

        let rows = store
            .get("positions", &[("is_open", "true".to_string())], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn select_projects_columns() {
        let store = MemoryStore::new();
        store
            .insert("books", json!({"id": "b1", "status": "active", "name": "alpha"}))
            .await
            .unwrap();

        let rows = store.get("books", &[], Some("status")).await.unwrap();
        assert_eq!(rows[0], json!({"status": "active"}));
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_key() {
        let store = MemoryStore::new();
        store
            .upsert(
                "agents",
                json!({"id": "a1", "status": "running", "uptime": 1}),
                "id",
            )
            .await
            .unwrap();
        store
            .upsert("agents", json!({"id": "a1", "status": "paused"}), "id")
            .await
            .unwrap();

        let rows = store.rows("agents");
        assert_eq!(rows.len(), 1, "upsert must be idempotent on the key");
        assert_eq!(rows[0]["status"], "paused");
        assert_eq!(rows[0]["uptime"], 1, "unmentioned fields survive the merge");
    }

    #[tokio::test]
    async fn patch_updates_matching_rows_only() {
        let store = MemoryStore::new();
        store
            .insert("positions", json!({"id": "p1", "size": 1.0, "is_open": true}))
            .await
            .unwrap();
        store
            .insert("positions", json!({"id": "p2", "size": 2.0, "is_open": true}))
            .await
            .unwrap();

        store
            .patch(
                "positions",
                &[("id", "p1".to_string())],
                json!({"is_open": false, "size": 0}),
            )
            .await
            .unwrap();

        let rows = store.rows("positions");
        assert_eq!(rows[0]["is_open"], false);
        assert_eq!(rows[1]["is_open"], true);
    }

    #[tokio::test]
    async fn failure_injection_blocks_table() {
        let store = MemoryStore::new();
        store.fail_table("global_settings");

        let err = store.get("global_settings", &[], None).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.heal_table("global_settings");
        assert!(store.get("global_settings", &[], None).await.is_ok());
    }
}
