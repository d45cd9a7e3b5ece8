//! Configuration management for the sniper bot system.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub rpc: RpcConfig,
    pub quote_api: QuoteApiConfig,
    pub honeypot: HoneypotApiConfig,
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoint.
    pub http_url: String,
    /// WebSocket endpoint for log and token-stream subscriptions.
    pub ws_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoneypotApiConfig {
    /// Primary screening provider (scores 0 = safe .. 100 = danger).
    pub primary_url: Option<String>,
    pub primary_api_key: Option<String>,
    /// Secondary provider (scores 0 = danger .. 100 = safe, inverted on ingest).
    pub secondary_url: Option<String>,
    pub secondary_api_key: Option<String>,
}

/// Policy applied when a token has no cached safety verdict yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTokenPolicy {
    /// Trade anyway while the background check runs.
    Proceed,
    /// Refuse the trade until a verdict exists.
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// What to do when a token has never been screened before.
    pub unknown_token_policy: UnknownTokenPolicy,
    /// When true, a total holder-analysis outage is scored as worst-case
    /// (100% concentration) instead of unknown. Raises an operator alert
    /// whenever it fires.
    pub holder_worst_case_on_outage: bool,
    /// Optional random delay window before execution, in milliseconds.
    pub privacy_delay_min_ms: u64,
    pub privacy_delay_max_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            rpc: RpcConfig {
                http_url: env::var("RPC_HTTP_URL").map_err(|_| Error::Config {
                    message: "RPC_HTTP_URL environment variable not set".to_string(),
                })?,
                ws_url: env::var("RPC_WS_URL").map_err(|_| Error::Config {
                    message: "RPC_WS_URL environment variable not set".to_string(),
                })?,
                request_timeout_ms: env::var("RPC_REQUEST_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10_000),
            },
            quote_api: QuoteApiConfig {
                base_url: env::var("QUOTE_API_URL")
                    .unwrap_or_else(|_| "https://quote-api.jup.ag/v6".to_string()),
                api_key: env::var("QUOTE_API_KEY").ok(),
            },
            honeypot: HoneypotApiConfig {
                primary_url: env::var("HONEYPOT_PRIMARY_URL").ok(),
                primary_api_key: env::var("HONEYPOT_PRIMARY_API_KEY").ok(),
                secondary_url: env::var("HONEYPOT_SECONDARY_URL").ok(),
                secondary_api_key: env::var("HONEYPOT_SECONDARY_API_KEY").ok(),
            },
            bot: BotConfig {
                unknown_token_policy: match env::var("UNKNOWN_TOKEN_POLICY").as_deref() {
                    Ok("proceed") => UnknownTokenPolicy::Proceed,
                    _ => UnknownTokenPolicy::Reject,
                },
                holder_worst_case_on_outage: env::var("HOLDER_WORST_CASE_ON_OUTAGE")
                    .map(|v| v == "true")
                    .unwrap_or(false),
                privacy_delay_min_ms: env::var("PRIVACY_DELAY_MIN_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                privacy_delay_max_ms: env::var("PRIVACY_DELAY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
        })
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/sniper_test".to_string(),
                max_connections: 2,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            rpc: RpcConfig {
                http_url: "http://127.0.0.1:8899".to_string(),
                ws_url: "ws://127.0.0.1:8900".to_string(),
                request_timeout_ms: 2_000,
            },
            quote_api: QuoteApiConfig {
                base_url: "http://127.0.0.1:9999".to_string(),
                api_key: None,
            },
            honeypot: HoneypotApiConfig {
                primary_url: None,
                primary_api_key: None,
                secondary_url: None,
                secondary_api_key: None,
            },
            bot: BotConfig {
                unknown_token_policy: UnknownTokenPolicy::Reject,
                holder_worst_case_on_outage: false,
                privacy_delay_min_ms: 0,
                privacy_delay_max_ms: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_token_policy_defaults_to_reject() {
        let config = Config::test_config();
        assert_eq!(config.bot.unknown_token_policy, UnknownTokenPolicy::Reject);
        assert!(!config.bot.holder_worst_case_on_outage);
    }
}
