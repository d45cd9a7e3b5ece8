//! Pool discovery from DEX program logs.
//!
//! Each DEX is described by data: its program id, the instruction markers
//! that indicate pool creation, the minimum account count, and the
//! account-index convention that locates the pool and the two mints.
//! [`PoolLogSubscriber`] keeps a supervised log subscription open and runs
//! every matching transaction through [`detect_pool`].

use crate::stream::backoff_delay;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sniper_core::rate_limit::TokenBucket;
use sniper_core::types::{DexSource, RawPoolDetection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Account-index convention for one DEX program.
#[derive(Debug, Clone)]
pub struct DexProgram {
    pub source: DexSource,
    pub program_id: &'static str,
    /// Instruction markers that appear in program logs on pool creation.
    pub instructions: &'static [&'static str],
    pub min_accounts: usize,
    pub pool_index: usize,
    pub mint_a_index: usize,
    pub mint_b_index: usize,
}

/// The DEX programs the bot watches.
pub fn known_programs() -> &'static [DexProgram] {
    &[
        DexProgram {
            source: DexSource::RaydiumAmm,
            program_id: "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
            instructions: &["InitializePool", "initialize2"],
            min_accounts: 18,
            pool_index: 4,
            mint_a_index: 8,
            mint_b_index: 9,
        },
        DexProgram {
            source: DexSource::RaydiumClmm,
            program_id: "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK",
            instructions: &["InitializePoolV2", "CreatePool"],
            min_accounts: 13,
            pool_index: 2,
            mint_a_index: 3,
            mint_b_index: 4,
        },
        DexProgram {
            source: DexSource::MeteoraDlmm,
            program_id: "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo",
            instructions: &["InitializeLbPair"],
            min_accounts: 10,
            pool_index: 0,
            mint_a_index: 1,
            mint_b_index: 2,
        },
        DexProgram {
            source: DexSource::BondingCurve,
            program_id: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
            instructions: &["create", "create_v2"],
            min_accounts: 8,
            pool_index: 2,
            mint_a_index: 0,
            // Bonding-curve pools trade against wrapped SOL.
            mint_b_index: 7,
        },
    ]
}

/// A transaction already decoded into logs and account keys.
#[derive(Debug, Clone)]
pub struct ParsedPoolTx {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<DateTime<Utc>>,
    pub logs: Vec<String>,
    pub account_keys: Vec<String>,
}

/// Map a transaction onto a pool detection, if any watched program created a
/// pool in it.
pub fn detect_pool(tx: &ParsedPoolTx) -> Option<RawPoolDetection> {
    for program in known_programs() {
        if !tx
            .logs
            .iter()
            .any(|log| log.contains(program.program_id))
        {
            continue;
        }

        let matched = tx.logs.iter().any(|log| {
            program
                .instructions
                .iter()
                .any(|marker| log.contains(&format!("Instruction: {marker}")))
        });
        if !matched {
            continue;
        }

        if tx.account_keys.len() < program.min_accounts {
            debug!(
                signature = %tx.signature,
                source = ?program.source,
                accounts = tx.account_keys.len(),
                min = program.min_accounts,
                "Pool creation with too few accounts, skipping"
            );
            continue;
        }

        return Some(RawPoolDetection {
            pool: tx.account_keys[program.pool_index].clone(),
            mint_a: tx.account_keys[program.mint_a_index].clone(),
            mint_b: tx.account_keys[program.mint_b_index].clone(),
            source: program.source,
            signature: tx.signature.clone(),
            slot: tx.slot,
            block_time: tx.block_time,
        });
    }

    None
}

/// Configuration for the program-log subscriber.
#[derive(Debug, Clone)]
pub struct PoolLogConfig {
    pub ws_url: String,
    /// Close and reconnect if no frame arrives within this window.
    pub stale_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub intake_capacity: u32,
    pub intake_interval: Duration,
}

impl Default for PoolLogConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            stale_timeout: Duration::from_secs(90),
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            intake_capacity: 100,
            intake_interval: Duration::from_secs(60),
        }
    }
}

/// Counters for the log subscriber.
#[derive(Debug, Default)]
pub struct PoolLogStats {
    pub detections: AtomicU64,
    pub dropped: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct LogNotification {
    params: Option<LogParams>,
}

#[derive(Debug, Deserialize)]
struct LogParams {
    result: LogResult,
}

#[derive(Debug, Deserialize)]
struct LogResult {
    context: LogContext,
    value: LogValue,
}

#[derive(Debug, Deserialize)]
struct LogContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogValue {
    signature: String,
    err: Option<serde_json::Value>,
    logs: Vec<String>,
    #[serde(rename = "accountKeys", default)]
    account_keys: Vec<String>,
    #[serde(rename = "blockTime", default)]
    block_time: Option<i64>,
}

/// Long-lived subscriber over DEX program logs.
///
/// Supervision mirrors the token stream: heartbeat watchdog, jittered
/// exponential reconnect with a retry budget, and an intake rate cap.
pub struct PoolLogSubscriber {
    config: PoolLogConfig,
    detection_tx: broadcast::Sender<RawPoolDetection>,
    stats: Arc<PoolLogStats>,
    limiter: TokenBucket,
}

impl PoolLogSubscriber {
    pub fn new(config: PoolLogConfig) -> Self {
        let (detection_tx, _) = broadcast::channel(1_024);
        let limiter = TokenBucket::new(config.intake_capacity, config.intake_interval);
        Self {
            config,
            detection_tx,
            stats: Arc::new(PoolLogStats::default()),
            limiter,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawPoolDetection> {
        self.detection_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<PoolLogStats> {
        self.stats.clone()
    }

    fn subscribe_frame() -> String {
        let mentions: Vec<&str> = known_programs().iter().map(|p| p.program_id).collect();
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                {"mentions": mentions},
                {"commitment": "confirmed"}
            ],
        })
        .to_string()
    }

    /// Establish the subscription and supervise it until the retry budget is
    /// exhausted.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match self.connect_and_stream().await {
                    Ok(()) => {
                        info!("Pool log stream closed cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        attempt += 1;
                        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                        if attempt > self.config.max_reconnect_attempts {
                            error!(
                                attempts = attempt,
                                error = %e,
                                "Pool log stream terminated: reconnect attempts exhausted"
                            );
                            return;
                        }
                        warn!(attempt, error = %e, "Pool log stream error, backing off");
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

        sink.send(Message::Text(Self::subscribe_frame().into())).await?;
        info!(url = %self.config.ws_url, "Pool log stream subscribed");

        loop {
            let frame = tokio::time::timeout(self.config.stale_timeout, source.next()).await;
            match frame {
                Err(_) => {
                    return Err(sniper_core::Error::Timeout(format!(
                        "no log frame in {:?}",
                        self.config.stale_timeout
                    )));
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(Message::Text(text)))) => {
                    if let Some(detection) = self.handle_frame(&text) {
                        let _ = self.detection_tx.send(detection);
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

    /// Parse one subscription frame into a pool detection, if it carries a
    /// successful transaction that matches a watched creation instruction.
    pub fn handle_frame(&self, text: &str) -> Option<RawPoolDetection> {
        if !self.limiter.try_acquire() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let notification: LogNotification = match serde_json::from_str(text) {
            Ok(notification) => notification,
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Unparseable log frame");
                return None;
            }
        };

        // Subscription confirmations carry no params.
        let result = notification.params?.result;
        if result.value.err.is_some() {
            return None;
        }

        let tx = ParsedPoolTx {
            signature: result.value.signature,
            slot: result.context.slot,
            block_time: result
                .value
                .block_time
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            logs: result.value.logs,
            account_keys: result.value.account_keys,
        };

        let detection = detect_pool(&tx)?;
        self.stats.detections.fetch_add(1, Ordering::Relaxed);
        Some(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::types::token::WSOL_MINT;

    fn raydium_tx(accounts: usize) -> ParsedPoolTx {
        let mut account_keys: Vec<String> =
            (0..accounts).map(|i| format!("Account{i}")).collect();
        if accounts > 9 {
            account_keys[9] = WSOL_MINT.to_string();
        }
        ParsedPoolTx {
            signature: "sig".to_string(),
            slot: 1_000,
            block_time: Some(Utc::now()),
            logs: vec![
                format!(
                    "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 invoke [1]"
                ),
                "Program log: Instruction: initialize2".to_string(),
            ],
            account_keys,
        }
    }

    #[test]
    fn test_detects_raydium_pool_creation() {
        let detection = detect_pool(&raydium_tx(20)).unwrap();
        assert_eq!(detection.source, DexSource::RaydiumAmm);
        assert_eq!(detection.pool, "Account4");
        assert_eq!(detection.mint_a, "Account8");
        assert_eq!(detection.mint_b, WSOL_MINT);

        let (base, quote) = detection.base_and_quote();
        assert_eq!(base, "Account8");
        assert_eq!(quote, WSOL_MINT);
    }

    #[test]
    fn test_too_few_accounts_is_rejected() {
        assert!(detect_pool(&raydium_tx(10)).is_none());
    }

    #[test]
    fn test_unrelated_logs_are_ignored() {
        let tx = ParsedPoolTx {
            signature: "sig".to_string(),
            slot: 1,
            block_time: None,
            logs: vec![
                "Program TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA invoke [1]".to_string(),
                "Program log: Instruction: Transfer".to_string(),
            ],
            account_keys: (0..20).map(|i| format!("Account{i}")).collect(),
        };
        assert!(detect_pool(&tx).is_none());
    }

    #[test]
    fn test_program_match_requires_creation_instruction() {
        let mut tx = raydium_tx(20);
        tx.logs[1] = "Program log: Instruction: Swap".to_string();
        assert!(detect_pool(&tx).is_none());
    }

    #[test]
    fn test_detects_bonding_curve_create() {
        let tx = ParsedPoolTx {
            signature: "sig2".to_string(),
            slot: 2_000,
            block_time: None,
            logs: vec![
                "Program 6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P invoke [1]".to_string(),
                "Program log: Instruction: create".to_string(),
            ],
            account_keys: (0..8).map(|i| format!("Curve{i}")).collect(),
        };
        let detection = detect_pool(&tx).unwrap();
        assert_eq!(detection.source, DexSource::BondingCurve);
        assert_eq!(detection.mint_a, "Curve0");
        assert_eq!(detection.pool, "Curve2");
    }

    fn log_frame(logs: &[&str], accounts: usize) -> String {
        let account_keys: Vec<String> = {
            let mut keys: Vec<String> = (0..accounts).map(|i| format!("Account{i}")).collect();
            if accounts > 9 {
                keys[9] = WSOL_MINT.to_string();
            }
            keys
        };
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": {"slot": 5000},
                    "value": {
                        "signature": "logsig",
                        "err": null,
                        "logs": logs,
                        "accountKeys": account_keys,
                        "blockTime": 1700000000i64,
                    }
                },
                "subscription": 1
            }
        })
        .to_string()
    }

    #[test]
    fn test_subscriber_parses_creation_frame() {
        let sub = PoolLogSubscriber::new(PoolLogConfig::default());
        let frame = log_frame(
            &[
                "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 invoke [1]",
                "Program log: Instruction: initialize2",
            ],
            20,
        );
        let detection = sub.handle_frame(&frame).unwrap();
        assert_eq!(detection.source, DexSource::RaydiumAmm);
        assert_eq!(detection.signature, "logsig");
        assert_eq!(detection.slot, 5000);
        assert!(detection.block_time.is_some());
        assert_eq!(sub.stats().detections.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscriber_drops_confirmation_and_failed_tx() {
        let sub = PoolLogSubscriber::new(PoolLogConfig::default());
        // Subscription confirmation has no params.
        assert!(sub
            .handle_frame(r#"{"jsonrpc":"2.0","result":23,"id":1}"#)
            .is_none());

        // Failed transactions never become detections.
        let mut failed: serde_json::Value =
            serde_json::from_str(&log_frame(
                &[
                    "Program 675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8 invoke [1]",
                    "Program log: Instruction: initialize2",
                ],
                20,
            ))
            .unwrap();
        failed["params"]["result"]["value"]["err"] = serde_json::json!({"InstructionError": []});
        assert!(sub.handle_frame(&failed.to_string()).is_none());
    }

    #[test]
    fn test_subscriber_counts_parse_errors() {
        let sub = PoolLogSubscriber::new(PoolLogConfig::default());
        assert!(sub.handle_frame("garbage").is_none());
        assert_eq!(sub.stats().parse_errors.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscribe_frame_mentions_all_programs() {
        let frame = PoolLogSubscriber::subscribe_frame();
        for program in known_programs() {
            assert!(frame.contains(program.program_id));
        }
        assert!(frame.contains("logsSubscribe"));
    }

    #[test]
    fn test_detects_dlmm_pair() {
        let tx = ParsedPoolTx {
            signature: "sig3".to_string(),
            slot: 3_000,
            block_time: None,
            logs: vec![
                "Program LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo invoke [1]".to_string(),
                "Program log: Instruction: InitializeLbPair".to_string(),
            ],
            account_keys: (0..10).map(|i| format!("Pair{i}")).collect(),
        };
        let detection = detect_pool(&tx).unwrap();
        assert_eq!(detection.source, DexSource::MeteoraDlmm);
    }
}
