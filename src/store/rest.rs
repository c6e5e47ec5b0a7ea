// =============================================================================
// REST Table Store — PostgREST-style adapter
// =============================================================================
//
// SECURITY: the service key is sent as `apikey` + bearer headers and is never
// logged. Filters map to `column=eq.value` query parameters.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::debug;

use super::{Filters, StoreError, TableStore};

/// Default request timeout for agent-side writes (heartbeats, alerts).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST adapter over a table-oriented store with upsert semantics.
#[derive(Clone)]
pub struct RestStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Build a store client with the default 10 s timeout.
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self::with_timeout(base_url, service_key, DEFAULT_TIMEOUT)
    }

    /// Build a store client with an explicit timeout. The gateway uses a
    /// longer window for order writes.
    pub fn with_timeout(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into();
        let service_key = service_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&service_key) {
            default_headers.insert("apikey", val);
        }
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {service_key}")) {
            default_headers.insert("Authorization", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, timeout_s = timeout.as_secs(), "RestStore initialised");

        Self { base_url, client }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn filter_params(filters: Filters<'_>) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|(col, val)| ((*col).to_string(), format!("eq.{val}")))
            .collect()
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TableStore for RestStore {
    async fn get(
        &self,
        table: &str,
        filters: Filters<'_>,
        select: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut params = Self::filter_params(filters);
        if let Some(cols) = select {
            params.push(("select".to_string(), cols.to_string()));
        }

        let response = self
            .client
            .get(self.table_url(table))
            .query(&params)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("GET {table}: {e}")))?;

        let rows: Vec<Value> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Request(format!("GET {table} decode: {e}")))?;

        debug!(table, rows = rows.len(), "store get");
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.table_url(table))
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("POST {table}: {e}")))?;

        Self::check(response).await?;
        debug!(table, "store insert");
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates")
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("UPSERT {table}: {e}")))?;

        Self::check(response).await?;
        debug!(table, on_conflict, "store upsert");
        Ok(())
    }

    async fn patch(
        &self,
        table: &str,
        filters: Filters<'_>,
        partial: Value,
    ) -> Result<(), StoreError> {
        let params = Self::filter_params(filters);

        let response = self
            .client
            .patch(self.table_url(table))
            .query(&params)
            .json(&partial)
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("PATCH {table}: {e}")))?;

        Self::check(response).await?;
        debug!(table, "store patch");
        Ok(())
    }
}
