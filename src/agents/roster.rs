// =============================================================================
// Stock Agent Roster — the default control-plane protocol participants
// =============================================================================
//
// Strategy logic lives outside the control plane; these behaviors are the
// minimal protocol participants the orchestrator registers by default. The
// causal chain for one proposal, stitched by correlation_id:
//
//   signals → (meta-decision veto gate) → risk_check → (risk limits)
//           → risk_approved → (execution agent via the order gateway) → fills
//
// The meta-decision agent is the only one with veto authority; it sits
// structurally first and everything trade-shaped passes it before risk.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{Channel, Envelope};
use crate::config::Settings;
use crate::gateway::{OrderGateway, VenueFill};
use crate::types::{OrderRequest, OrderSide, OrderType};

use super::runtime::{AgentBehavior, AgentContext, AgentSpec};

/// Proposals below this confidence are vetoed outright.
const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn payload_decimal(payload: &Map<String, Value>, key: &str) -> Option<Decimal> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .and_then(|f| Decimal::try_from(f).ok())
}

fn payload_uuid(payload: &Map<String, Value>, key: &str) -> Option<Uuid> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn payload_side(payload: &Map<String, Value>) -> Option<OrderSide> {
    match payload.get("side").and_then(Value::as_str) {
        Some("buy") => Some(OrderSide::Buy),
        Some("sell") => Some(OrderSide::Sell),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Meta-decision agent (veto authority)
// ---------------------------------------------------------------------------

/// Reviews every proposal on `signals`. Vetoed proposals are announced on
/// `risk_rejected`; survivors are forwarded to `risk_check` with the
/// original correlation id intact.
pub struct MetaDecisionBehavior {
    min_confidence: f64,
    vetoes_issued: u64,
}

impl MetaDecisionBehavior {
    pub fn new() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            vetoes_issued: 0,
        }
    }
}

impl Default for MetaDecisionBehavior {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBehavior for MetaDecisionBehavior {
    async fn handle_message(
        &mut self,
        ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()> {
        if message.channel != Channel::Signals.as_str() {
            return Ok(());
        }

        let confidence = message
            .payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let correlation = message.correlation_id.clone();
        let mut forwarded = message.payload.clone();

        if confidence < self.min_confidence {
            self.vetoes_issued += 1;
            let reason = format!(
                "vetoed by {}: confidence {confidence:.2} below floor {:.2}",
                ctx.agent_id, self.min_confidence
            );
            warn!(
                agent_id = %ctx.agent_id,
                source = %message.source_agent,
                confidence,
                "proposal vetoed"
            );
            forwarded.insert("reason".to_string(), json!(reason));
            ctx.publish(Channel::RiskRejected, Value::Object(forwarded), correlation)
                .await?;
            return Ok(());
        }

        debug!(agent_id = %ctx.agent_id, confidence, "proposal forwarded to risk");
        ctx.publish(Channel::RiskCheck, Value::Object(forwarded), correlation)
            .await?;
        Ok(())
    }

    async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Risk agent
// ---------------------------------------------------------------------------

/// Single source of truth for pre-trade limits. Approves or rejects
/// everything arriving on `risk_check`.
pub struct RiskBehavior {
    max_notional: Decimal,
}

impl RiskBehavior {
    pub fn new(max_notional: Decimal) -> Self {
        Self { max_notional }
    }
}

#[async_trait]
impl AgentBehavior for RiskBehavior {
    async fn handle_message(
        &mut self,
        ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()> {
        if message.channel != Channel::RiskCheck.as_str() {
            return Ok(());
        }

        let correlation = message.correlation_id.clone();
        let mut forwarded = message.payload.clone();

        let size = payload_decimal(&message.payload, "size");
        let price = payload_decimal(&message.payload, "price")
            .or_else(|| payload_decimal(&message.payload, "mark_price"));

        let verdict = match (size, price) {
            (Some(size), Some(price)) => {
                let notional = size * price;
                if notional > self.max_notional {
                    Err(format!(
                        "notional {notional} exceeds limit {}",
                        self.max_notional
                    ))
                } else {
                    Ok(notional)
                }
            }
            _ => Err("proposal is unpriced".to_string()),
        };

        match verdict {
            Ok(notional) => {
                info!(agent_id = %ctx.agent_id, notional = %notional, "proposal approved");
                ctx.publish(Channel::RiskApproved, Value::Object(forwarded), correlation)
                    .await?;
            }
            Err(reason) => {
                warn!(agent_id = %ctx.agent_id, reason = %reason, "proposal rejected");
                forwarded.insert("reason".to_string(), json!(reason));
                ctx.publish(Channel::RiskRejected, Value::Object(forwarded), correlation)
                    .await?;
            }
        }

        Ok(())
    }

    async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Capital allocation agent
// ---------------------------------------------------------------------------

/// Tracks deployed capital from the fill stream against the configured
/// total. Allocation policy beyond bookkeeping is a strategy concern.
pub struct CapitalAllocationBehavior {
    total_capital: Decimal,
    allocated: Decimal,
}

impl CapitalAllocationBehavior {
    pub fn new(total_capital: Decimal) -> Self {
        Self {
            total_capital,
            allocated: Decimal::ZERO,
        }
    }

    pub fn available(&self) -> Decimal {
        self.total_capital - self.allocated
    }
}

#[async_trait]
impl AgentBehavior for CapitalAllocationBehavior {
    async fn handle_message(
        &mut self,
        ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()> {
        if message.channel != Channel::Fills.as_str() {
            return Ok(());
        }

        let success = message
            .payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !success {
            return Ok(());
        }

        let filled_size = payload_decimal(&message.payload, "filled_size").unwrap_or(Decimal::ZERO);
        let filled_price =
            payload_decimal(&message.payload, "filled_price").unwrap_or(Decimal::ZERO);
        self.allocated += filled_size * filled_price;

        debug!(
            agent_id = %ctx.agent_id,
            allocated = %self.allocated,
            available = %self.available(),
            "capital allocation updated"
        );
        Ok(())
    }

    async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signal agent
// ---------------------------------------------------------------------------

/// Strategy shell: counts the market data it sees and carries the strategy
/// tags. Signal generation itself is an external collaborator publishing on
/// `signals`.
pub struct SignalBehavior {
    market_updates_seen: u64,
}

impl SignalBehavior {
    pub fn new() -> Self {
        Self {
            market_updates_seen: 0,
        }
    }
}

impl Default for SignalBehavior {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBehavior for SignalBehavior {
    async fn handle_message(
        &mut self,
        _ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()> {
        if message.channel == Channel::MarketData.as_str() {
            self.market_updates_seen += 1;
        }
        Ok(())
    }

    async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Execution agent
// ---------------------------------------------------------------------------

/// Executes only approved intents, and only through the order gateway. The
/// paper venue fills at the proposal price; real venue adapters replace the
/// execute closure in deployment.
pub struct ExecutionBehavior {
    gateway: Arc<OrderGateway>,
}

impl ExecutionBehavior {
    pub fn new(gateway: Arc<OrderGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl AgentBehavior for ExecutionBehavior {
    async fn handle_message(
        &mut self,
        ctx: &mut AgentContext<'_>,
        message: &Envelope,
    ) -> anyhow::Result<()> {
        if message.channel != Channel::RiskApproved.as_str() {
            return Ok(());
        }

        let payload = &message.payload;
        let book_id = payload_uuid(payload, "book_id")
            .ok_or_else(|| anyhow::anyhow!("approved proposal missing book_id"))?;
        let instrument = payload
            .get("instrument")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("approved proposal missing instrument"))?;
        let side = payload_side(payload)
            .ok_or_else(|| anyhow::anyhow!("approved proposal missing side"))?;
        let size = payload_decimal(payload, "size")
            .ok_or_else(|| anyhow::anyhow!("approved proposal missing size"))?;
        let price = payload_decimal(payload, "price");
        let strategy_id = payload_uuid(payload, "strategy_id");

        let order_type = if price.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let order = OrderRequest::new(
            book_id,
            strategy_id,
            instrument,
            side,
            size,
            price,
            order_type,
            None,
        )?;

        let fill_price = price
            .or_else(|| payload_decimal(payload, "mark_price"))
            .ok_or_else(|| anyhow::anyhow!("no price available to fill against"))?;

        let result = self
            .gateway
            .submit_and_execute(&order, move |request| async move {
                Ok(VenueFill {
                    filled_size: request.size,
                    filled_price: fill_price,
                    venue_order_id: format!("paper-{}", Uuid::new_v4()),
                })
            })
            .await;

        if !result.success {
            let error = result.error.clone().unwrap_or_default();
            warn!(
                agent_id = %ctx.agent_id,
                order_id = %result.order_id,
                error = %error,
                "approved order rejected by gateway"
            );
            ctx.send_alert(
                "warning",
                "Order Rejected",
                &error,
                json!({"order_id": result.order_id.to_string(), "instrument": instrument}),
            )
            .await?;
        }

        ctx.publish(
            Channel::Fills,
            json!({
                "order_id": result.order_id.to_string(),
                "instrument": instrument,
                "side": side.as_str(),
                "status": result.status.as_str(),
                "success": result.success,
                "filled_size": crate::types::decimal_to_f64(result.filled_size),
                "filled_price": result.filled_price.map(crate::types::decimal_to_f64),
                "venue_order_id": result.venue_order_id,
            }),
            message.correlation_id.clone(),
        )
        .await?;

        Ok(())
    }

    async fn cycle(&mut self, _ctx: &mut AgentContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Default roster
// ---------------------------------------------------------------------------

/// The default agent set, meta-decision first. Registration order matters:
/// the veto authority is structurally prior to every other agent.
pub fn default_agents(
    settings: &Settings,
    gateway: Arc<OrderGateway>,
) -> Vec<(AgentSpec, Box<dyn AgentBehavior>)> {
    vec![
        (
            AgentSpec {
                agent_id: "meta-decision-agent-01".to_string(),
                agent_type: "meta_decision".to_string(),
                subscribed_channels: vec![Channel::Signals],
                capabilities: vec!["veto".to_string()],
            },
            Box::new(MetaDecisionBehavior::new()),
        ),
        (
            AgentSpec {
                agent_id: "capital-allocation-agent-01".to_string(),
                agent_type: "capital_allocation".to_string(),
                subscribed_channels: vec![Channel::Fills],
                capabilities: vec!["allocation".to_string()],
            },
            Box::new(CapitalAllocationBehavior::new(settings.total_capital)),
        ),
        (
            AgentSpec {
                agent_id: "risk-agent-01".to_string(),
                agent_type: "risk".to_string(),
                subscribed_channels: vec![Channel::RiskCheck],
                capabilities: vec!["pre_trade_limits".to_string()],
            },
            Box::new(RiskBehavior::new(settings.total_capital)),
        ),
        (
            AgentSpec {
                agent_id: "signal-agent-01".to_string(),
                agent_type: "signal".to_string(),
                subscribed_channels: vec![Channel::MarketData],
                capabilities: vec![
                    "trend_following".to_string(),
                    "mean_reversion".to_string(),
                    "funding_arbitrage".to_string(),
                ],
            },
            Box::new(SignalBehavior::new()),
        ),
        (
            AgentSpec {
                agent_id: "execution-agent-01".to_string(),
                agent_type: "execution".to_string(),
                subscribed_channels: vec![Channel::RiskApproved],
                capabilities: settings.enabled_venues.clone(),
            },
            Box::new(ExecutionBehavior::new(gateway)),
        ),
    ]
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::runtime::AgentMetrics;
    use crate::bus::memory::MemoryBus;
    use crate::bus::{BusConnector, BusTransport};
    use crate::store::memory::MemoryStore;
    use crate::store::{tables, TableStore};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Rig {
        bus: MemoryBus,
        conn: Box<dyn BusTransport>,
        metrics: AgentMetrics,
        store: Arc<dyn TableStore>,
    }

    async fn rig() -> Rig {
        let bus = MemoryBus::new();
        let conn = bus.connect().await.unwrap();
        Rig {
            bus,
            conn,
            metrics: AgentMetrics::default(),
            store: Arc::new(MemoryStore::new()),
        }
    }

    async fn probe(bus: &MemoryBus, channels: &[Channel]) -> Box<dyn BusTransport> {
        let mut conn = bus.connect().await.unwrap();
        conn.subscribe(channels).await.unwrap();
        conn
    }

    fn signal_envelope(confidence: f64, book_id: Uuid) -> Envelope {
        Envelope::new(
            "signal-agent-01",
            Channel::Signals,
            json!({
                "book_id": book_id.to_string(),
                "instrument": "BTC-USD",
                "side": "buy",
                "size": 0.1,
                "price": 50000.0,
                "confidence": confidence,
            })
            .as_object()
            .cloned()
            .unwrap(),
            None,
            Some("chain-1".to_string()),
        )
    }

    #[tokio::test]
    async fn meta_decision_vetoes_low_confidence() {
        let mut rig = rig().await;
        let mut probe = probe(&rig.bus, &[Channel::RiskRejected, Channel::RiskCheck]).await;

        let mut behavior = MetaDecisionBehavior::new();
        let envelope = signal_envelope(0.2, Uuid::new_v4());

        let mut ctx = AgentContext::new(
            "meta-decision-agent-01",
            rig.conn.as_mut(),
            &rig.metrics,
            &rig.store,
        );
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let rejection = probe
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("veto announcement");
        assert_eq!(rejection.channel, "risk_rejected");
        assert!(rejection.payload["reason"]
            .as_str()
            .unwrap()
            .contains("vetoed"));
        assert_eq!(rejection.correlation_id.as_deref(), Some("chain-1"));
        assert_eq!(behavior.vetoes_issued, 1);
    }

    #[tokio::test]
    async fn meta_decision_forwards_confident_proposals() {
        let mut rig = rig().await;
        let mut probe = probe(&rig.bus, &[Channel::RiskCheck]).await;

        let mut behavior = MetaDecisionBehavior::new();
        let envelope = signal_envelope(0.9, Uuid::new_v4());

        let mut ctx = AgentContext::new(
            "meta-decision-agent-01",
            rig.conn.as_mut(),
            &rig.metrics,
            &rig.store,
        );
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let forwarded = probe
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("forwarded proposal");
        assert_eq!(forwarded.channel, "risk_check");
        assert_eq!(forwarded.payload["instrument"], "BTC-USD");
        assert_eq!(forwarded.correlation_id.as_deref(), Some("chain-1"));
    }

    #[tokio::test]
    async fn risk_agent_rejects_oversized_notional() {
        let mut rig = rig().await;
        let mut probe = probe(&rig.bus, &[Channel::RiskApproved, Channel::RiskRejected]).await;

        // 0.1 * 50000 = 5000 notional against a 1000 limit.
        let mut behavior = RiskBehavior::new(dec!(1000));
        let mut envelope = signal_envelope(0.9, Uuid::new_v4());
        envelope.channel = Channel::RiskCheck.as_str().to_string();

        let mut ctx = AgentContext::new("risk-agent-01", rig.conn.as_mut(), &rig.metrics, &rig.store);
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let verdict = probe
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("risk verdict");
        assert_eq!(verdict.channel, "risk_rejected");
        assert!(verdict.payload["reason"]
            .as_str()
            .unwrap()
            .contains("exceeds limit"));
    }

    #[tokio::test]
    async fn risk_agent_approves_within_limit() {
        let mut rig = rig().await;
        let mut probe = probe(&rig.bus, &[Channel::RiskApproved]).await;

        let mut behavior = RiskBehavior::new(dec!(100000));
        let mut envelope = signal_envelope(0.9, Uuid::new_v4());
        envelope.channel = Channel::RiskCheck.as_str().to_string();

        let mut ctx = AgentContext::new("risk-agent-01", rig.conn.as_mut(), &rig.metrics, &rig.store);
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let verdict = probe
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("risk verdict");
        assert_eq!(verdict.channel, "risk_approved");
        assert_eq!(verdict.correlation_id.as_deref(), Some("chain-1"));
    }

    #[tokio::test]
    async fn execution_agent_fills_through_gateway() {
        let bus = MemoryBus::new();
        let mut conn = bus.connect().await.unwrap();
        let mut fills_probe = probe(&bus, &[Channel::Fills]).await;

        let book_id = Uuid::new_v4();
        let memory = Arc::new(MemoryStore::new());
        memory
            .insert(tables::GLOBAL_SETTINGS, json!({"global_kill_switch": false}))
            .await
            .unwrap();
        memory
            .insert(
                tables::BOOKS,
                json!({"id": book_id.to_string(), "status": "active"}),
            )
            .await
            .unwrap();
        let store: Arc<dyn TableStore> = memory.clone();
        let gateway = Arc::new(OrderGateway::new(store.clone()));

        let mut behavior = ExecutionBehavior::new(gateway);
        let metrics = AgentMetrics::default();

        let mut envelope = signal_envelope(0.9, book_id);
        envelope.channel = Channel::RiskApproved.as_str().to_string();

        let mut ctx = AgentContext::new("execution-agent-01", conn.as_mut(), &metrics, &store);
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let fill = fills_probe
            .next_message(Duration::from_millis(200))
            .await
            .unwrap()
            .expect("fill event");
        assert_eq!(fill.channel, "fills");
        assert_eq!(fill.payload["success"], true);
        assert_eq!(fill.payload["status"], "filled");
        assert_eq!(fill.payload["filled_size"], 0.1);
        assert_eq!(fill.correlation_id.as_deref(), Some("chain-1"));

        assert_eq!(memory.rows(tables::ORDERS).len(), 1);
        assert_eq!(memory.rows(tables::POSITIONS).len(), 1);
    }

    #[tokio::test]
    async fn execution_agent_alerts_on_gateway_rejection() {
        let bus = MemoryBus::new();
        let mut conn = bus.connect().await.unwrap();

        let book_id = Uuid::new_v4();
        let memory = Arc::new(MemoryStore::new());
        memory
            .insert(tables::GLOBAL_SETTINGS, json!({"global_kill_switch": true}))
            .await
            .unwrap();
        let store: Arc<dyn TableStore> = memory.clone();
        let gateway = Arc::new(OrderGateway::new(store.clone()));

        let mut behavior = ExecutionBehavior::new(gateway);
        let metrics = AgentMetrics::default();

        let mut envelope = signal_envelope(0.9, book_id);
        envelope.channel = Channel::RiskApproved.as_str().to_string();

        let mut ctx = AgentContext::new("execution-agent-01", conn.as_mut(), &metrics, &store);
        behavior.handle_message(&mut ctx, &envelope).await.unwrap();

        let alerts = memory.rows(tables::ALERTS);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["title"], "Order Rejected");
        assert_eq!(alerts[0]["severity"], "warning");
    }

    #[tokio::test]
    async fn capital_allocation_tracks_fills() {
        let mut rig = rig().await;

        let mut behavior = CapitalAllocationBehavior::new(dec!(100000));
        let fill = Envelope::new(
            "execution-agent-01",
            Channel::Fills,
            json!({
                "success": true,
                "filled_size": 0.1,
                "filled_price": 50000.0,
            })
            .as_object()
            .cloned()
            .unwrap(),
            None,
            None,
        );

        let mut ctx = AgentContext::new(
            "capital-allocation-agent-01",
            rig.conn.as_mut(),
            &rig.metrics,
            &rig.store,
        );
        behavior.handle_message(&mut ctx, &fill).await.unwrap();

        assert_eq!(behavior.available(), dec!(95000));
    }

    #[test]
    fn default_roster_puts_meta_decision_first() {
        let settings = Settings::default();
        let store: Arc<dyn TableStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(OrderGateway::new(store));

        let agents = default_agents(&settings, gateway);
        assert_eq!(agents.len(), 5);
        assert_eq!(agents[0].0.agent_type, "meta_decision");
        assert!(agents[0].0.capabilities.contains(&"veto".to_string()));

        let ids: Vec<&str> = agents.iter().map(|(s, _)| s.agent_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "meta-decision-agent-01",
                "capital-allocation-agent-01",
                "risk-agent-01",
                "signal-agent-01",
                "execution-agent-01",
            ]
        );
    }
}
