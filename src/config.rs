// =============================================================================
// Settings — process configuration from the environment
// =============================================================================
//
// The control plane reads its configuration once at startup. When the store
// is not configured the engine falls back to the in-memory backend, so a
// bare `cargo run` comes up in a safe demo posture with no external writes.
// =============================================================================

use rust_decimal::Decimal;
use tracing::info;

/// Default capital when `TOTAL_CAPITAL` is unset.
const DEFAULT_TOTAL_CAPITAL: &str = "100000";

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Broker endpoint. `memory://local` selects the in-process bus.
    pub bus_url: String,
    /// Base URL of the REST table store; `None` selects the in-memory store.
    pub store_url: Option<String>,
    pub store_service_key: Option<String>,
    /// Capital managed by the capital-allocation agent.
    pub total_capital: Decimal,
    /// Venue names the execution agent may route to.
    pub enabled_venues: Vec<String>,
    /// Restart cap per agent before the supervisor gives up on it.
    pub max_restarts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus_url: "memory://local".to_string(),
            store_url: None,
            store_service_key: None,
            total_capital: Decimal::from(100_000),
            enabled_venues: vec!["coinbase".to_string(), "kraken".to_string()],
            max_restarts: 5,
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to safe defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bus_url = std::env::var("BUS_URL").unwrap_or(defaults.bus_url);
        let store_url = std::env::var("STORE_URL").ok().filter(|s| !s.is_empty());
        let store_service_key = std::env::var("STORE_SERVICE_KEY")
            .ok()
            .filter(|s| !s.is_empty());

        let total_capital = std::env::var("TOTAL_CAPITAL")
            .unwrap_or_else(|_| DEFAULT_TOTAL_CAPITAL.to_string())
            .parse::<Decimal>()
            .unwrap_or(defaults.total_capital);

        let enabled_venues = std::env::var("ENABLED_VENUES")
            .map(|raw| parse_venues(&raw))
            .unwrap_or(defaults.enabled_venues);

        let settings = Self {
            bus_url,
            store_url,
            store_service_key,
            total_capital,
            enabled_venues,
            max_restarts: defaults.max_restarts,
        };

        info!(
            bus_url = %settings.bus_url,
            store_configured = settings.store_url.is_some(),
            total_capital = %settings.total_capital,
            venues = ?settings.enabled_venues,
            "settings loaded"
        );

        settings
    }
}

/// Split a comma-separated venue list, dropping empties.
fn parse_venues(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_safe() {
        let settings = Settings::default();
        assert_eq!(settings.bus_url, "memory://local");
        assert!(settings.store_url.is_none(), "no external store by default");
        assert_eq!(settings.total_capital, Decimal::from(100_000));
        assert_eq!(settings.enabled_venues, vec!["coinbase", "kraken"]);
        assert_eq!(settings.max_restarts, 5);
    }

    #[test]
    fn venue_list_parsing() {
        assert_eq!(
            parse_venues("Coinbase, kraken ,binance"),
            vec!["coinbase", "kraken", "binance"]
        );
        assert_eq!(parse_venues(""), Vec::<String>::new());
        assert_eq!(parse_venues("solo"), vec!["solo"]);
    }
}
