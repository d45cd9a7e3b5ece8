//! Long-lived WebSocket subscriber for new-token streams.
//!
//! Supervision rules: a heartbeat watchdog closes connections that go quiet,
//! reconnects use exponential backoff with full jitter, and a bounded number
//! of consecutive failures terminates the source with an error event. Parse
//! failures and rate-limited drops are counted, never fatal.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use sniper_core::rate_limit::TokenBucket;
use sniper_core::types::{DexSource, NewTokenEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Configuration for one stream source.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub source: DexSource,
    /// Close and reconnect if no message arrives within this window.
    pub stale_timeout: Duration,
    /// Base delay for exponential backoff.
    pub reconnect_base: Duration,
    /// Backoff ceiling.
    pub reconnect_cap: Duration,
    /// Consecutive failed attempts before the source gives up.
    pub max_reconnect_attempts: u32,
    /// Intake budget; messages beyond it are dropped and counted.
    pub intake_capacity: u32,
    pub intake_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            source: DexSource::TokenStream,
            stale_timeout: Duration::from_secs(90),
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            intake_capacity: 100,
            intake_interval: Duration::from_secs(60),
        }
    }
}

/// Counters exposed for operator dashboards.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub messages: AtomicU64,
    pub dropped: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU64,
}

/// Exponential backoff with full jitter: uniform in
/// `[0, min(cap, base * 2^attempt)]`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let ceiling = exp.min(cap);
    if ceiling.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=ceiling.as_millis() as u64))
}

/// A long-lived subscriber over one new-token WebSocket endpoint.
pub struct TokenStreamSubscriber {
    config: StreamConfig,
    event_tx: broadcast::Sender<NewTokenEvent>,
    stats: Arc<StreamStats>,
    limiter: TokenBucket,
}

impl TokenStreamSubscriber {
    pub fn new(config: StreamConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1_024);
        let limiter = TokenBucket::new(config.intake_capacity, config.intake_interval);
        Self {
            config,
            event_tx,
            stats: Arc::new(StreamStats::default()),
            limiter,
        }
    }

    /// Subscribe to parsed token events.
    pub fn subscribe(&self) -> broadcast::Receiver<NewTokenEvent> {
        self.event_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Establish the subscription and supervise it until the retry budget is
    /// exhausted.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match self.connect_and_stream().await {
                    Ok(()) => {
                        info!(source = ?self.config.source, "Stream closed cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        attempt += 1;
                        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                        if attempt > self.config.max_reconnect_attempts {
                            error!(
                                source = ?self.config.source,
                                attempts = attempt,
                                error = %e,
                                "Stream terminated: reconnect attempts exhausted"
                            );
                            return;
                        }
                        warn!(
                            source = ?self.config.source,
                            attempt,
                            error = %e,
                            "Stream error, backing off"
                        );
                    }
                }

                let delay = backoff_delay(
                    attempt,
                    self.config.reconnect_base,
                    self.config.reconnect_cap,
                );
                tokio::time::sleep(delay).await;
            }
        })
    }

    async fn connect_and_stream(&self) -> sniper_core::Result<()> {
        let (ws, _) = connect_async(&self.config.ws_url).await?;
        let (mut sink, mut source) = ws.split();

        sink.send(Message::Text(
            serde_json::json!({"method": "subscribeNewToken"})
                .to_string()
                .into(),
        ))
        .await?;

        info!(source = ?self.config.source, url = %self.config.ws_url, "Stream subscribed");

        loop {
            let frame = tokio::time::timeout(self.config.stale_timeout, source.next()).await;
            match frame {
                Err(_) => {
                    // Heartbeat: nothing arrived inside the stale window.
                    return Err(sniper_core::Error::Timeout(format!(
                        "no message in {:?}",
                        self.config.stale_timeout
                    )));
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(Message::Text(text)))) => {
                    if let Some(event) = self.handle_frame(&text) {
                        let _ = self.event_tx.send(event);
                    }
                }
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    sink.send(Message::Pong(payload)).await?;
                }
                Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Parse one frame, applying the intake budget. Confirmation frames are
    /// dropped silently; unparseable payloads are counted.
    pub fn handle_frame(&self, text: &str) -> Option<NewTokenEvent> {
        if !self.limiter.try_acquire() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let raw: RawTokenFrame = match serde_json::from_str(text) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Unparseable stream frame");
                return None;
            }
        };

        // Subscription confirmations carry no mint.
        let mint = raw.mint?;
        let signature = raw.signature?;

        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        Some(NewTokenEvent {
            source: self.config.source,
            mint,
            symbol: raw.symbol,
            creator: raw.trader_public_key.or(raw.creator),
            initial_liquidity_sol: raw.sol_in_pool,
            signature,
            observed_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTokenFrame {
    mint: Option<String>,
    symbol: Option<String>,
    creator: Option<String>,
    #[serde(rename = "traderPublicKey")]
    trader_public_key: Option<String>,
    #[serde(rename = "solInPool")]
    sol_in_pool: Option<Decimal>,
    signature: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(capacity: u32) -> TokenStreamSubscriber {
        TokenStreamSubscriber::new(StreamConfig {
            intake_capacity: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_parses_token_frame() {
        let sub = subscriber(100);
        let event = sub
            .handle_frame(
                r#"{"mint": "MintA", "symbol": "TKN", "traderPublicKey": "Creator1",
                    "solInPool": "12.5", "signature": "sig123"}"#,
            )
            .unwrap();

        assert_eq!(event.mint, "MintA");
        assert_eq!(event.symbol.as_deref(), Some("TKN"));
        assert_eq!(event.creator.as_deref(), Some("Creator1"));
        assert_eq!(event.initial_liquidity_sol, Some(Decimal::new(125, 1)));
        assert_eq!(event.signature, "sig123");
        assert_eq!(sub.stats().messages.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_confirmation_frames_are_dropped() {
        let sub = subscriber(100);
        assert!(sub
            .handle_frame(r#"{"message": "successfully subscribed"}"#)
            .is_none());
        // Not a parse error and not a message; just dropped.
        assert_eq!(sub.stats().parse_errors.load(Ordering::Relaxed), 0);
        assert_eq!(sub.stats().messages.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_parse_errors_are_counted_not_fatal() {
        let sub = subscriber(100);
        assert!(sub.handle_frame("not json at all").is_none());
        assert!(sub.handle_frame("{\"mint\": 42}").is_none());
        assert_eq!(sub.stats().parse_errors.load(Ordering::Relaxed), 2);

        // The stream keeps working afterwards.
        assert!(sub
            .handle_frame(r#"{"mint": "M", "signature": "s"}"#)
            .is_some());
    }

    #[test]
    fn test_intake_budget_drops_excess() {
        let sub = subscriber(2);
        let frame = r#"{"mint": "M", "signature": "s"}"#;
        assert!(sub.handle_frame(frame).is_some());
        assert!(sub.handle_frame(frame).is_some());
        assert!(sub.handle_frame(frame).is_none());
        assert_eq!(sub.stats().dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);

        for attempt in 0..20 {
            let delay = backoff_delay(attempt, base, cap);
            let ceiling = base
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(cap);
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay <= cap);
        }
    }

    #[test]
    fn test_backoff_is_jittered() {
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(30);
        let samples: Vec<Duration> = (0..16).map(|_| backoff_delay(3, base, cap)).collect();
        let all_equal = samples.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_equal, "full jitter should vary: {samples:?}");
    }
}
