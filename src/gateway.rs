// =============================================================================
// Order Gateway — the single write path for orders and positions
// =============================================================================
//
// ALL order writes go through this gateway. It is the only writer of the
// `orders` and `positions` tables, and every call runs the same pipeline:
//
//   1. Kill-switch gate (fail safe: unreadable settings block trading)
//   2. Book gate (only status == "active" books may trade)
//   3. Venue execution via the caller-supplied adapter
//   4. Order row persistence
//   5. Position reconciliation (successful non-zero fills only)
//   6. Audit event
//
// Every call resolves to an `OrderResult`; no error escapes to the caller.
// Two concurrent calls for the same (book, instrument) may race on position
// reconciliation; callers needing serialization must serialize externally.
// =============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{tables, StoreError, TableStore};
use crate::types::{
    decimal_from_row, decimal_to_f64, OrderRequest, OrderResult, OrderStatus,
};

/// What a venue adapter reports back for an executed order.
#[derive(Debug, Clone)]
pub struct VenueFill {
    pub filled_size: Decimal,
    pub filled_price: Decimal,
    pub venue_order_id: String,
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

/// Centralized order gateway. Construct once and share via `Arc`.
pub struct OrderGateway {
    store: Arc<dyn TableStore>,
}

impl OrderGateway {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // Pre-trade gates
    // -------------------------------------------------------------------------

    /// Whether the global kill switch is active. A failed fetch counts as
    /// active: when the check cannot be evaluated, trading is blocked.
    async fn kill_switch_active(&self) -> bool {
        match self
            .store
            .get(tables::GLOBAL_SETTINGS, &[], Some("global_kill_switch"))
            .await
        {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get("global_kill_switch"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Err(e) => {
                error!(error = %e, "kill switch check failed; failing safe (blocking trades)");
                true
            }
        }
    }

    /// Whether the book may trade. Missing book, non-active status, or a
    /// failed fetch all block the order.
    async fn book_active(&self, book_id: Uuid) -> bool {
        match self
            .store
            .get(
                tables::BOOKS,
                &[("id", book_id.to_string())],
                Some("status"),
            )
            .await
        {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get("status"))
                .and_then(Value::as_str)
                .map(|status| status == "active")
                .unwrap_or(false),
            Err(e) => {
                error!(book_id = %book_id, error = %e, "book check failed; failing safe");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Persistence steps
    // -------------------------------------------------------------------------

    /// Insert the order row. Decimals become floats here, at the boundary.
    async fn write_order(
        &self,
        order: &OrderRequest,
        result: &OrderResult,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let row = json!({
            "id": result.order_id.to_string(),
            "book_id": order.book_id.to_string(),
            "strategy_id": order.strategy_id.map(|id| id.to_string()),
            "instrument": order.instrument,
            "side": order.side.as_str(),
            "size": decimal_to_f64(order.size),
            "price": order.price.map(decimal_to_f64),
            "status": result.status.as_str(),
            "filled_size": decimal_to_f64(result.filled_size),
            "filled_price": result.filled_price.map(decimal_to_f64),
            "venue_id": order.venue_id.map(|id| id.to_string()),
            "latency_ms": result.latency_ms,
            "created_at": now,
            "updated_at": now,
        });

        self.store.insert(tables::ORDERS, row).await
    }

    /// Fold a fill into the open position for (book, instrument).
    ///
    /// Same-direction fills grow the position at the size-weighted average
    /// entry price. Opposite-direction fills shrink it; crossing zero closes
    /// the position at size 0 (no flip into the new side).
    async fn reconcile_position(&self, order: &OrderRequest, result: &OrderResult) {
        let filled_price = result.filled_price.unwrap_or(Decimal::ZERO);

        let filters = [
            ("book_id", order.book_id.to_string()),
            ("instrument", order.instrument.clone()),
            ("is_open", "true".to_string()),
        ];

        let existing = match self.store.get(tables::POSITIONS, &filters, None).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    order_id = %result.order_id,
                    error = %e,
                    "position lookup failed; skipping reconciliation"
                );
                return;
            }
        };

        let now = Utc::now().to_rfc3339();

        let patch_result = if let Some(position) = existing.first() {
            let position_id = position
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let current_size = decimal_from_row(&position["size"]);
            let current_side = position
                .get("side")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let id_filter = [("id", position_id)];

            if order.side.as_str() == current_side {
                // Adding to the position: size-weighted average entry, in
                // decimal arithmetic so the average never drifts.
                let new_size = current_size + result.filled_size;
                let current_entry = decimal_from_row(&position["entry_price"]);
                let new_entry = if new_size > Decimal::ZERO {
                    (current_size * current_entry + result.filled_size * filled_price) / new_size
                } else {
                    Decimal::ZERO
                };

                self.store
                    .patch(
                        tables::POSITIONS,
                        &id_filter,
                        json!({
                            "size": decimal_to_f64(new_size),
                            "entry_price": decimal_to_f64(new_entry),
                            "updated_at": now,
                        }),
                    )
                    .await
            } else {
                let new_size = current_size - result.filled_size;

                if new_size <= Decimal::ZERO {
                    self.store
                        .patch(
                            tables::POSITIONS,
                            &id_filter,
                            json!({"is_open": false, "size": 0, "updated_at": now}),
                        )
                        .await
                } else {
                    // Entry price is unchanged on reductions.
                    self.store
                        .patch(
                            tables::POSITIONS,
                            &id_filter,
                            json!({"size": decimal_to_f64(new_size), "updated_at": now}),
                        )
                        .await
                }
            }
        } else {
            self.store
                .insert(
                    tables::POSITIONS,
                    json!({
                        "id": Uuid::new_v4().to_string(),
                        "book_id": order.book_id.to_string(),
                        "strategy_id": order.strategy_id.map(|id| id.to_string()),
                        "instrument": order.instrument,
                        "side": order.side.as_str(),
                        "size": decimal_to_f64(result.filled_size),
                        "entry_price": decimal_to_f64(filled_price),
                        "mark_price": decimal_to_f64(filled_price),
                        "is_open": true,
                        "updated_at": now,
                    }),
                )
                .await
        };

        if let Err(e) = patch_result {
            error!(order_id = %result.order_id, error = %e, "position update failed");
        }
    }

    async fn log_audit_event(&self, order: &OrderRequest, result: &OrderResult) {
        let row = json!({
            "action": "order_created",
            "resource_type": "order",
            "resource_id": result.order_id.to_string(),
            "severity": "info",
            "after_state": {
                "instrument": order.instrument,
                "side": order.side.as_str(),
                "size": decimal_to_f64(order.size),
                "status": result.status.as_str(),
                "success": result.success,
            },
        });

        if let Err(e) = self.store.insert(tables::AUDIT_EVENTS, row).await {
            error!(order_id = %result.order_id, error = %e, "audit event write failed");
        }
    }

    /// An order row failed to persist after the venue side effect already
    /// happened. Record the anomaly so the books can be repaired later.
    async fn log_persist_anomaly(&self, result: &OrderResult, write_error: &StoreError) {
        let row = json!({
            "action": "order_persist_failed",
            "resource_type": "order",
            "resource_id": result.order_id.to_string(),
            "severity": "warning",
            "after_state": {
                "filled_size": decimal_to_f64(result.filled_size),
                "error": write_error.to_string(),
            },
        });

        if let Err(e) = self.store.insert(tables::AUDIT_EVENTS, row).await {
            error!(order_id = %result.order_id, error = %e, "anomaly audit write failed");
        }
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    /// Create a `pending` order without venue execution (staging).
    ///
    /// Unlike [`Self::submit_and_execute`], a persistence failure here has no
    /// venue side effect to protect, so the call is rejected outright.
    pub async fn submit_order(&self, order: &OrderRequest) -> OrderResult {
        let start = Instant::now();
        let order_id = Uuid::new_v4();

        if self.kill_switch_active().await {
            warn!(order_id = %order_id, "order rejected: global kill switch is active");
            return OrderResult::rejected(
                order_id,
                "Global kill switch is active",
                elapsed_ms(start),
            );
        }

        if !self.book_active(order.book_id).await {
            warn!(order_id = %order_id, book_id = %order.book_id, "order rejected: book not active");
            return OrderResult::rejected(
                order_id,
                "Book is not active or frozen",
                elapsed_ms(start),
            );
        }

        let result = OrderResult {
            success: true,
            order_id,
            status: OrderStatus::Pending,
            filled_size: Decimal::ZERO,
            filled_price: None,
            venue_order_id: None,
            error: None,
            latency_ms: elapsed_ms(start),
        };

        if let Err(e) = self.write_order(order, &result).await {
            error!(order_id = %order_id, error = %e, "order write failed");
            return OrderResult::rejected(
                order_id,
                "Failed to write order to database",
                elapsed_ms(start),
            );
        }

        self.log_audit_event(order, &result).await;

        info!(
            order_id = %order_id,
            instrument = %order.instrument,
            side = %order.side,
            "pending order staged"
        );
        result
    }

    /// Submit an order and execute it on a venue.
    ///
    /// `execute_fn` is the venue adapter: it receives the order and returns
    /// the fill. A full fill reports `filled`; anything less reports
    /// `partially_filled`; an adapter error reports `rejected` carrying the
    /// error message. The result is returned in every case.
    pub async fn submit_and_execute<F, Fut>(
        &self,
        order: &OrderRequest,
        execute_fn: F,
    ) -> OrderResult
    where
        F: FnOnce(OrderRequest) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<VenueFill>> + Send,
    {
        let start = Instant::now();
        let order_id = Uuid::new_v4();

        if self.kill_switch_active().await {
            warn!(order_id = %order_id, "order rejected: global kill switch is active");
            return OrderResult::rejected(
                order_id,
                "Global kill switch is active",
                elapsed_ms(start),
            );
        }

        if !self.book_active(order.book_id).await {
            warn!(order_id = %order_id, book_id = %order.book_id, "order rejected: book not active");
            return OrderResult::rejected(
                order_id,
                "Book is not active or frozen",
                elapsed_ms(start),
            );
        }

        let mut result = match execute_fn(order.clone()).await {
            Ok(fill) => {
                let status = if fill.filled_size == order.size {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartiallyFilled
                };

                info!(
                    order_id = %order_id,
                    instrument = %order.instrument,
                    side = %order.side,
                    filled_size = %fill.filled_size,
                    filled_price = %fill.filled_price,
                    status = %status,
                    "venue execution complete"
                );

                OrderResult {
                    success: true,
                    order_id,
                    status,
                    filled_size: fill.filled_size,
                    filled_price: Some(fill.filled_price),
                    venue_order_id: Some(fill.venue_order_id),
                    error: None,
                    latency_ms: elapsed_ms(start),
                }
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "venue execution failed");
                OrderResult::rejected(order_id, e.to_string(), elapsed_ms(start))
            }
        };

        // The venue side effect has already happened, so a write failure
        // cannot reject the call; it is surfaced in the result and recorded
        // as an audit anomaly instead.
        if let Err(e) = self.write_order(order, &result).await {
            error!(order_id = %order_id, error = %e, "order write failed after execution");
            self.log_persist_anomaly(&result, &e).await;
            result.error = Some(format!("order row write failed: {e}"));
        }

        if result.success && result.filled_size > Decimal::ZERO {
            self.reconcile_position(order, &result).await;
        }

        self.log_audit_event(order, &result).await;

        result
    }
}

impl std::fmt::Debug for OrderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderGateway").finish()
    }
}
