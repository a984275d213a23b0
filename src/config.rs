//! Configuration module for the live synchronization engine

use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL for the content get/subscribe/unsubscribe services
    pub rest_endpoint: String,

    /// WebSocket endpoint delivering the live feed
    pub ws_endpoint: String,

    /// Language sent in the client context of every request
    pub language: String,

    /// How long a fresh subscription may stay silent before it is declared dead
    pub watchdog_timeout_ms: u64,

    /// Extra attempts for the existence probe after a transport failure
    pub probe_retries: u32,

    /// Reconnection settings for the feed socket
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,

    /// Port for the health and metrics server
    pub health_port: u16,

    /// Events followed by the daemon (live data and secondary markets)
    pub event_ids: Vec<String>,

    /// Markets followed by the daemon, as `(market_id, event_id)`
    pub market_ids: Vec<(String, String)>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let event_ids = split_list(&env::var("EVENT_IDS").unwrap_or_default());

        // MARKET_IDS entries look like `market_id@event_id`
        let market_ids = split_list(&env::var("MARKET_IDS").unwrap_or_default())
            .into_iter()
            .map(|entry| match entry.split_once('@') {
                Some((market, event)) => Ok((market.to_string(), event.to_string())),
                None => Err(anyhow::anyhow!(
                    "MARKET_IDS entry `{}` must be `market_id@event_id`",
                    entry
                )),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            rest_endpoint: env::var("REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            ws_endpoint: env::var("WS_ENDPOINT").unwrap_or(defaults.ws_endpoint),
            language: env::var("LANGUAGE").unwrap_or(defaults.language),
            watchdog_timeout_ms: env::var("WATCHDOG_TIMEOUT_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(defaults.watchdog_timeout_ms),
            probe_retries: env::var("PROBE_RETRIES")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(defaults.probe_retries),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(defaults.reconnect_delay_ms),
            max_reconnect_attempts: env::var("MAX_RECONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(defaults.max_reconnect_attempts),
            health_port: env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .unwrap_or(defaults.health_port),
            event_ids,
            market_ids,
        })
    }

    /// Watchdog window as a duration
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://feeds.example.com".to_string(),
            ws_endpoint: "wss://feeds.example.com/socket".to_string(),
            language: "en".to_string(),
            watchdog_timeout_ms: 4000,
            probe_retries: 1,
            reconnect_delay_ms: 1000,
            max_reconnect_attempts: 10,
            health_port: 9090,
            event_ids: Vec::new(),
            market_ids: Vec::new(),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
