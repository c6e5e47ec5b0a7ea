// =============================================================================
// Execution Planner — ordered leg execution with unwind on partial failure
// =============================================================================
//
// Executes multi-leg plans (e.g. spot arbitrage: buy on venue A, sell on
// venue B). Legs run strictly in declared order. When a leg fails and the
// plan requests it, every already-filled leg is reversed so that a partially
// failed execution leaves no committed exposure: the caller receives an
// empty order list.
//
// Accounting rule: every attempted order is persisted through the caller's
// save-order sink, success or failure, unwind legs included.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::store::{tables, TableStore};
use crate::types::{
    decimal_to_f64, ExecutionPlan, Order, OrderStatus, TradeIntent,
};

/// Venue-side order placement. Adapters mutate `status` and `filled_size`
/// on the returned order, and must track attempted orders even when they
/// fail so that accounting stays accurate.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn place_order(&self, order: Order) -> anyhow::Result<Order>;
}

/// Executes multi-leg plans against a set of venue adapters.
pub struct ExecutionPlanner {
    store: Arc<dyn TableStore>,
}

impl ExecutionPlanner {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Execute `plan` for `intent` leg by leg.
    ///
    /// Returns the committed orders when every leg fills. When a leg fails
    /// with `unwind_on_fail` set, filled legs are reversed and the result is
    /// empty; without it, the already-filled legs stand and are returned.
    pub async fn execute_plan<S, Fut>(
        &self,
        intent: &TradeIntent,
        plan: &ExecutionPlan,
        adapters: &HashMap<String, Arc<dyn VenueAdapter>>,
        save_order: S,
    ) -> Vec<Order>
    where
        S: Fn(Order) -> Fut,
        Fut: Future<Output = ()>,
    {
        let max_gap = Duration::from_millis(plan.max_time_between_legs_ms);
        let mut committed: Vec<Order> = Vec::new();
        let mut last_leg_done: Option<Instant> = None;

        for (index, leg) in plan.legs.iter().enumerate() {
            // The inter-leg clock runs from the previous leg's completion to
            // this leg's submission; a breach counts as a leg failure.
            if let Some(done_at) = last_leg_done {
                let gap = done_at.elapsed();
                if gap > max_gap {
                    warn!(
                        intent_id = %intent.id,
                        leg = index,
                        gap_ms = gap.as_millis() as u64,
                        max_gap_ms = plan.max_time_between_legs_ms,
                        "inter-leg time budget breached"
                    );
                    return self
                        .fail_leg(intent, plan, &committed, adapters, &save_order, index, "inter-leg time budget breached")
                        .await;
                }
            }

            let mut order = Order::new(
                intent.book_id,
                intent.strategy_id,
                leg.venue.clone(),
                leg.instrument.clone(),
                leg.side,
                leg.size,
            );

            let Some(adapter) = adapters.get(&leg.venue) else {
                warn!(intent_id = %intent.id, venue = %leg.venue, "no adapter for venue");
                order.status = OrderStatus::Rejected;
                save_order(order).await;
                return self
                    .fail_leg(intent, plan, &committed, adapters, &save_order, index, "no adapter for venue")
                    .await;
            };

            match adapter.place_order(order.clone()).await {
                Ok(placed) if placed.status == OrderStatus::Filled => {
                    // The leg completes when the adapter returns; the clock
                    // for the next leg starts here, not after persistence.
                    last_leg_done = Some(Instant::now());
                    info!(
                        intent_id = %intent.id,
                        leg = index,
                        venue = %leg.venue,
                        side = %leg.side,
                        size = %leg.size,
                        "leg filled"
                    );
                    committed.push(placed.clone());
                    save_order(placed).await;
                }
                Ok(placed) => {
                    warn!(
                        intent_id = %intent.id,
                        leg = index,
                        venue = %leg.venue,
                        status = %placed.status,
                        "leg not filled"
                    );
                    save_order(placed).await;
                    return self
                        .fail_leg(intent, plan, &committed, adapters, &save_order, index, "leg not filled")
                        .await;
                }
                Err(e) => {
                    warn!(
                        intent_id = %intent.id,
                        leg = index,
                        venue = %leg.venue,
                        error = %e,
                        "leg placement failed"
                    );
                    order.status = OrderStatus::Rejected;
                    save_order(order).await;
                    return self
                        .fail_leg(intent, plan, &committed, adapters, &save_order, index, &e.to_string())
                        .await;
                }
            }
        }

        info!(
            intent_id = %intent.id,
            legs = committed.len(),
            "all legs filled"
        );
        committed
    }

    /// A leg failed. Unwind if the plan asks for it; otherwise the filled
    /// legs stand.
    #[allow(clippy::too_many_arguments)]
    async fn fail_leg<S, Fut>(
        &self,
        intent: &TradeIntent,
        plan: &ExecutionPlan,
        committed: &[Order],
        adapters: &HashMap<String, Arc<dyn VenueAdapter>>,
        save_order: &S,
        failed_leg: usize,
        reason: &str,
    ) -> Vec<Order>
    where
        S: Fn(Order) -> Fut,
        Fut: Future<Output = ()>,
    {
        if !plan.unwind_on_fail {
            warn!(
                intent_id = %intent.id,
                failed_leg,
                committed = committed.len(),
                "leg failed without unwind; committed legs stand"
            );
            return committed.to_vec();
        }

        self.unwind(intent, committed, adapters, save_order).await;
        self.record_unwind(intent, committed.len(), failed_leg, reason)
            .await;

        // The external contract: a partially failed legged execution has no
        // committed trades from the caller's perspective.
        Vec::new()
    }

    /// Submit a reversing order for every already-filled leg.
    async fn unwind<S, Fut>(
        &self,
        intent: &TradeIntent,
        committed: &[Order],
        adapters: &HashMap<String, Arc<dyn VenueAdapter>>,
        save_order: &S,
    ) where
        S: Fn(Order) -> Fut,
        Fut: Future<Output = ()>,
    {
        for filled in committed {
            let mut reversing = Order::new(
                intent.book_id,
                intent.strategy_id,
                filled.venue.clone(),
                filled.instrument.clone(),
                filled.side.opposite(),
                filled.size,
            );

            let Some(adapter) = adapters.get(&filled.venue) else {
                error!(
                    intent_id = %intent.id,
                    venue = %filled.venue,
                    "no adapter for unwind leg; manual intervention required"
                );
                reversing.status = OrderStatus::Rejected;
                save_order(reversing).await;
                continue;
            };

            match adapter.place_order(reversing.clone()).await {
                Ok(placed) => {
                    info!(
                        intent_id = %intent.id,
                        venue = %filled.venue,
                        side = %placed.side,
                        size = %placed.size,
                        "unwind order placed"
                    );
                    save_order(placed).await;
                }
                Err(e) => {
                    // An unwind failure leaves real exposure behind; the
                    // alert below is the operator's signal to intervene.
                    error!(
                        intent_id = %intent.id,
                        venue = %filled.venue,
                        error = %e,
                        "unwind order failed"
                    );
                    reversing.status = OrderStatus::Rejected;
                    save_order(reversing).await;
                }
            }
        }
    }

    /// Persist the alert and audit trail for an unwound execution.
    async fn record_unwind(
        &self,
        intent: &TradeIntent,
        unwound_legs: usize,
        failed_leg: usize,
        reason: &str,
    ) {
        let alert = json!({
            "title": "Legged Execution Unwound",
            "message": format!(
                "Leg {failed_leg} of intent {} failed ({reason}); {unwound_legs} filled leg(s) reversed",
                intent.id
            ),
            "severity": "critical",
            "source": "execution_planner",
            "metadata": {
                "intent_id": intent.id.to_string(),
                "instrument": intent.instrument,
                "target_exposure_usd": decimal_to_f64(intent.target_exposure_usd),
            },
        });
        if let Err(e) = self.store.insert(tables::ALERTS, alert).await {
            error!(intent_id = %intent.id, error = %e, "unwind alert write failed");
        }

        let audit = json!({
            "action": "execution_unwound",
            "resource_type": "trade_intent",
            "resource_id": intent.id.to_string(),
            "severity": "warning",
            "after_state": {
                "failed_leg": failed_leg,
                "unwound_legs": unwound_legs,
                "reason": reason,
            },
        });
        if let Err(e) = self.store.insert(tables::AUDIT_EVENTS, audit).await {
            error!(intent_id = %intent.id, error = %e, "unwind audit write failed");
        }
    }
}
