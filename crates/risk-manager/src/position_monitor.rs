//! Per-position price polling and exit triggering.
//!
//! One logical poller per open position. Price-feed failures are counted
//! and skipped; a single exit trigger per position ends its watcher.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sniper_core::api::{QuoteApi, QuoteRequest};
use sniper_core::db::PositionStore;
use sniper_core::types::token::WSOL_MINT;
use sniper_core::types::{ExitTrigger, Position};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source of current prices, on the same scale as `Position::entry_price`
/// (SOL per smallest token unit).
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price(&self, position: &Position) -> sniper_core::Result<Decimal>;
}

/// Prices a position by quoting a full sell of its balance.
pub struct QuotePriceFeed {
    quote: Arc<dyn QuoteApi>,
    /// Fee payer used for quoting.
    probe_pubkey: String,
}

impl QuotePriceFeed {
    pub fn new(quote: Arc<dyn QuoteApi>, probe_pubkey: String) -> Self {
        Self { quote, probe_pubkey }
    }
}

#[async_trait]
impl PriceFeed for QuotePriceFeed {
    async fn price(&self, position: &Position) -> sniper_core::Result<Decimal> {
        if position.current_balance == 0 {
            return Ok(Decimal::ZERO);
        }
        let quote = self
            .quote
            .get_quote(&QuoteRequest {
                input_mint: position.mint.clone(),
                output_mint: WSOL_MINT.to_string(),
                amount: position.current_balance,
                user_public_key: self.probe_pubkey.clone(),
                slippage_bps: 100,
            })
            .await
            .map_err(|e| sniper_core::Error::Api {
                message: format!("price quote failed: {e}"),
                status: None,
            })?;

        Ok(Decimal::from(quote.output_amount)
            / Decimal::from(1_000_000_000u64)
            / Decimal::from(position.current_balance))
    }
}

/// An exit decision for one position.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub position_id: Uuid,
    pub trigger: ExitTrigger,
    pub price: Decimal,
    pub pnl_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Decide whether a position should exit at `price`.
///
/// Precedence: take-profit, then stop-loss, then trailing stop. The caller
/// updates `highest_price` before evaluating.
pub fn evaluate_exit(position: &Position, price: Decimal) -> Option<ExitTrigger> {
    let pnl_pct = position.pnl_pct(price);

    if let Some(tp) = position.take_profit_pct {
        if pnl_pct >= tp {
            return Some(ExitTrigger::TakeProfit);
        }
    }
    if let Some(sl) = position.stop_loss_pct {
        if pnl_pct <= -sl {
            return Some(ExitTrigger::StopLoss);
        }
    }
    if let Some(trail) = position.trailing_stop_pct {
        let floor = position.highest_price * (Decimal::ONE - trail / Decimal::ONE_HUNDRED);
        if price <= floor && !position.highest_price.is_zero() {
            return Some(ExitTrigger::TrailingStop);
        }
    }
    None
}

/// Supervises one poller task per open position.
pub struct PositionMonitor {
    feed: Arc<dyn PriceFeed>,
    positions: Arc<dyn PositionStore>,
    config: MonitorConfig,
    signal_tx: mpsc::Sender<ExitSignal>,
    signal_rx: std::sync::Mutex<Option<mpsc::Receiver<ExitSignal>>>,
    watchers: DashMap<Uuid, tokio::task::JoinHandle<()>>,
    pub price_failures: Arc<AtomicU64>,
}

impl PositionMonitor {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        positions: Arc<dyn PositionStore>,
        config: MonitorConfig,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(256);
        Self {
            feed,
            positions,
            config,
            signal_tx,
            signal_rx: std::sync::Mutex::new(Some(signal_rx)),
            watchers: DashMap::new(),
            price_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take the exit-signal receiver (can only be called once).
    pub fn take_signal_receiver(&self) -> Option<mpsc::Receiver<ExitSignal>> {
        self.signal_rx.lock().unwrap().take()
    }

    /// Start polling a position. The watcher ends after emitting one exit
    /// signal, or when stopped.
    pub fn watch(self: &Arc<Self>, mut position: Position) {
        let monitor = self.clone();
        let position_id = position.id;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let price = match monitor.feed.price(&position).await {
                    Ok(price) => price,
                    Err(e) => {
                        monitor.price_failures.fetch_add(1, Ordering::Relaxed);
                        debug!(position_id = %position.id, error = %e, "Price tick skipped");
                        continue;
                    }
                };

                if price > position.highest_price {
                    position.highest_price = price;
                    if let Err(e) = monitor.positions.update(&position).await {
                        warn!(position_id = %position.id, error = %e, "Failed to persist peak price");
                    }
                }

                if let Some(trigger) = evaluate_exit(&position, price) {
                    let signal = ExitSignal {
                        position_id: position.id,
                        trigger,
                        price,
                        pnl_pct: position.pnl_pct(price),
                    };
                    info!(
                        position_id = %position.id,
                        trigger = ?trigger,
                        price = %price,
                        pnl_pct = %signal.pnl_pct,
                        "Exit trigger"
                    );
                    let _ = monitor.signal_tx.send(signal).await;
                    break;
                }
            }
            monitor.watchers.remove(&position_id);
        });

        self.watchers.insert(position_id, handle);
    }

    /// Stop watching one position.
    pub fn stop(&self, position_id: Uuid) {
        if let Some((_, handle)) = self.watchers.remove(&position_id) {
            handle.abort();
        }
    }

    /// Stop every watcher.
    pub fn stop_all(&self) {
        let ids: Vec<Uuid> = self.watchers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.stop(id);
        }
    }

    pub fn watching(&self) -> usize {
        self.watchers.len()
    }
}
