// =============================================================================
// Message Bus — canonical envelope, channel registry, transport contract
// =============================================================================
//
// Every agent communicates exclusively through named channels carrying
// `Envelope` messages. Delivery is at-most-once and fire-and-forget: the bus
// is not a durable log, and a subscriber only sees messages published after
// its subscribe completes.
// =============================================================================

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Channel registry
// ---------------------------------------------------------------------------

/// The fixed set of logical channels. Channels are flat; subscription is by
/// exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    MarketData,
    Signals,
    RiskCheck,
    RiskApproved,
    RiskRejected,
    Execution,
    Fills,
    Heartbeat,
    Control,
    Alerts,
}

impl Channel {
    /// Every channel in the registry.
    pub const ALL: [Channel; 10] = [
        Channel::MarketData,
        Channel::Signals,
        Channel::RiskCheck,
        Channel::RiskApproved,
        Channel::RiskRejected,
        Channel::Execution,
        Channel::Fills,
        Channel::Heartbeat,
        Channel::Control,
        Channel::Alerts,
    ];

    /// The wire key for this channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::Signals => "signals",
            Self::RiskCheck => "risk_check",
            Self::RiskApproved => "risk_approved",
            Self::RiskRejected => "risk_rejected",
            Self::Execution => "execution",
            Self::Fills => "fills",
            Self::Heartbeat => "heartbeat",
            Self::Control => "control",
            Self::Alerts => "alerts",
        }
    }

    /// Resolve a wire key back to a channel. Exact match only.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == key)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Raised when an envelope cannot be decoded (missing required field or a
/// payload that is not a key→value mapping).
#[derive(Debug, thiserror::Error)]
#[error("invalid envelope: {0}")]
pub struct ParseError(#[from] serde_json::Error);

/// Canonical message envelope. Immutable once created; field order in the
/// serialized form follows the declaration order below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Wall-clock creation time, ISO-8601 with explicit UTC offset.
    pub timestamp: DateTime<Utc>,
    pub source_agent: String,
    /// `None` means broadcast.
    pub target_agent: Option<String>,
    /// A wire key from the channel registry.
    pub channel: String,
    pub payload: Map<String, Value>,
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Create a new envelope. `correlation_id` is auto-generated when absent
    /// so that every message can anchor a causal chain.
    pub fn new(
        source: impl Into<String>,
        channel: Channel,
        payload: Map<String, Value>,
        target: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_agent: source.into(),
            target_agent: target,
            channel: channel.as_str().to_string(),
            payload,
            correlation_id: Some(correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string())),
        }
    }

    /// Serialize to the self-describing wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope shape is always serializable")
    }

    /// Parse the wire form back into an envelope.
    pub fn from_json(data: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(data)?)
    }
}

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

/// Transport-level failure. The agent runtime treats these as fatal for the
/// current run; the supervisor restarts the agent.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection closed")]
    Closed,
    #[error("bus transport failure: {0}")]
    Transport(String),
}

/// A handle to the broker that can mint per-agent connections. Connections
/// are never shared between agents.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusTransport>, BusError>;
}

/// One agent's connection to the bus.
///
/// `next_message` must return within the given timeout so the agent loop can
/// keep its ~100ms poll cadence; `None` means no message arrived in time.
#[async_trait]
pub trait BusTransport: Send {
    async fn subscribe(&mut self, channels: &[Channel]) -> Result<(), BusError>;
    async fn unsubscribe(&mut self) -> Result<(), BusError>;
    async fn publish(&mut self, channel: Channel, envelope: &Envelope) -> Result<(), BusError>;
    async fn next_message(&mut self, timeout: Duration) -> Result<Option<Envelope>, BusError>;
    async fn close(&mut self) -> Result<(), BusError>;
}
