// =============================================================================
// Shared types used across the Meridian control plane
// =============================================================================
//
// Sizes and prices are `rust_decimal::Decimal` everywhere inside the engine.
// Conversion to `f64` happens only at the persistence boundary (row building
// in the gateway and planner), never in position arithmetic.
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The reversing direction, used when unwinding a filled leg.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
        }
    }
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Filled => "filled",
            Self::PartiallyFilled => "partially_filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Raised when an order request fails construction-time validation.
/// Invalid requests never reach the gateway.
#[derive(Debug, thiserror::Error)]
#[error("order validation failed: {0}")]
pub struct ValidationError(pub String);

// ---------------------------------------------------------------------------
// Order request / result (gateway contract)
// ---------------------------------------------------------------------------

/// Request to create a new order. Construct via [`OrderRequest::new`], which
/// enforces the size invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub book_id: Uuid,
    pub strategy_id: Option<Uuid>,
    /// e.g. "BTC-USD".
    pub instrument: String,
    pub side: OrderSide,
    /// Strictly positive; validated at construction.
    pub size: Decimal,
    /// Required for limit orders, `None` for market orders.
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub venue_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl OrderRequest {
    /// Build a validated order request.
    ///
    /// Returns a [`ValidationError`] when `size` is not strictly positive.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book_id: Uuid,
        strategy_id: Option<Uuid>,
        instrument: impl Into<String>,
        side: OrderSide,
        size: Decimal,
        price: Option<Decimal>,
        order_type: OrderType,
        venue_id: Option<Uuid>,
    ) -> Result<Self, ValidationError> {
        if size <= Decimal::ZERO {
            return Err(ValidationError(format!(
                "size must be greater than 0 (got {size})"
            )));
        }

        Ok(Self {
            book_id,
            strategy_id,
            instrument: instrument.into(),
            side,
            size,
            price,
            order_type,
            venue_id,
            metadata: HashMap::new(),
        })
    }
}

/// Outcome of a gateway call. Every gateway entry point resolves to exactly
/// one of these; the gateway never panics or raises to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    /// Generated at gateway entry, present on every result.
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub filled_price: Option<Decimal>,
    pub venue_order_id: Option<String>,
    pub error: Option<String>,
    /// Wall-clock latency of the whole pipeline, measured even on rejection.
    pub latency_ms: i64,
}

impl OrderResult {
    /// A gate or pipeline rejection carrying a human-readable reason.
    pub fn rejected(order_id: Uuid, error: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            success: false,
            order_id,
            status: OrderStatus::Rejected,
            filled_size: Decimal::ZERO,
            filled_price: None,
            venue_order_id: None,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders as the planner sees them (one row per attempted leg)
// ---------------------------------------------------------------------------

/// A single venue order tracked by the execution planner. Unlike
/// [`OrderRequest`], this carries its fill state — venue adapters mutate
/// `status` and `filled_size` in their returned copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub book_id: Uuid,
    pub strategy_id: Option<Uuid>,
    pub venue: String,
    pub instrument: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub filled_price: Option<Decimal>,
    pub created_at: String,
}

impl Order {
    pub fn new(
        book_id: Uuid,
        strategy_id: Option<Uuid>,
        venue: impl Into<String>,
        instrument: impl Into<String>,
        side: OrderSide,
        size: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            strategy_id,
            venue: venue.into(),
            instrument: instrument.into(),
            side,
            size,
            price: None,
            status: OrderStatus::Pending,
            filled_size: Decimal::ZERO,
            filled_price: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade intents and execution plans
// ---------------------------------------------------------------------------

/// A proposed trade; feedstock for the execution planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub id: Uuid,
    pub book_id: Uuid,
    pub strategy_id: Option<Uuid>,
    pub instrument: String,
    pub direction: OrderSide,
    pub target_exposure_usd: Decimal,
    pub max_loss_usd: Decimal,
    /// Signal confidence in [0, 1].
    pub confidence: f64,
}

/// How a multi-order intent is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Legs submitted one at a time in declared order.
    Legged,
}

/// One venue-specific order within a multi-leg plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLeg {
    pub venue: String,
    pub instrument: String,
    pub side: OrderSide,
    pub size: Decimal,
}

/// An ordered multi-leg execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub legs: Vec<ExecutionLeg>,
    /// Upper bound on the gap between one leg completing and the next being
    /// submitted. A breach is treated as a leg failure.
    pub max_time_between_legs_ms: u64,
    pub unwind_on_fail: bool,
}

// ---------------------------------------------------------------------------
// Decimal boundary helper
// ---------------------------------------------------------------------------

/// Convert a decimal to the float representation used in persistence rows.
/// This is the only place precision is allowed to drop.
pub fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

/// Parse a decimal back out of a persistence row float.
pub fn decimal_from_row(value: &Value) -> Decimal {
    value
        .as_f64()
        .and_then(|f| Decimal::try_from(f).ok())
        .unwrap_or(Decimal::ZERO)
}
