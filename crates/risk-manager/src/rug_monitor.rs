//! On-chain rug detection.
//!
//! Captures a baseline at watch time and compares every tick: liquidity
//! drained, supply manipulated, top holders dumping, or a revoked authority
//! coming back.

use dashmap::DashMap;
use rust_decimal::Decimal;
use sniper_core::api::RpcApi;
use sniper_core::types::{RugReason, RugSeverity};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to watch for one position.
#[derive(Debug, Clone)]
pub struct RugWatchTarget {
    pub position_id: Uuid,
    pub mint: String,
    /// The pool's quote-token vault; liquidity tracking is skipped when the
    /// discovery source did not provide it.
    pub pool_quote_vault: Option<String>,
}

/// On-chain observations the comparisons run against.
#[derive(Debug, Clone, PartialEq)]
pub struct RugBaseline {
    pub liquidity: Option<u64>,
    pub supply: u64,
    pub top10_total: u64,
    pub mint_authority_revoked: bool,
    pub freeze_authority_revoked: bool,
}

/// A detected rug indicator.
#[derive(Debug, Clone)]
pub struct RugAlert {
    pub position_id: Uuid,
    pub reason: RugReason,
    pub severity: RugSeverity,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct RugMonitorConfig {
    pub tick_interval: Duration,
}

impl Default for RugMonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Compare a fresh observation against the baseline.
///
/// Thresholds: liquidity drop > 50%, supply change > 10%, top-10 balance
/// drop > 30%, any authority re-enabled after baseline revocation.
pub fn compare_baseline(baseline: &RugBaseline, current: &RugBaseline) -> Option<RugReason> {
    if let (Some(base), Some(now)) = (baseline.liquidity, current.liquidity) {
        if base > 0 && now < base / 2 {
            return Some(RugReason::LiquidityRemoval);
        }
    }

    if baseline.supply > 0 {
        let delta = baseline.supply.abs_diff(current.supply);
        if delta * 10 > baseline.supply {
            return Some(RugReason::SupplyManipulation);
        }
    }

    if baseline.top10_total > 0 {
        let floor = baseline.top10_total - baseline.top10_total * 30 / 100;
        if current.top10_total < floor {
            return Some(RugReason::HolderDump);
        }
    }

    if (baseline.mint_authority_revoked && !current.mint_authority_revoked)
        || (baseline.freeze_authority_revoked && !current.freeze_authority_revoked)
    {
        return Some(RugReason::AuthorityReenabled);
    }

    None
}

/// Watches on-chain invariants for open positions.
pub struct RugMonitor {
    rpc: Arc<dyn RpcApi>,
    config: RugMonitorConfig,
    alert_tx: mpsc::Sender<RugAlert>,
    alert_rx: std::sync::Mutex<Option<mpsc::Receiver<RugAlert>>>,
    watchers: DashMap<Uuid, tokio::task::JoinHandle<()>>,
}

impl RugMonitor {
    pub fn new(rpc: Arc<dyn RpcApi>, config: RugMonitorConfig) -> Self {
        let (alert_tx, alert_rx) = mpsc::channel(64);
        Self {
            rpc,
            config,
            alert_tx,
            alert_rx: std::sync::Mutex::new(Some(alert_rx)),
            watchers: DashMap::new(),
        }
    }

    /// Take the alert receiver (can only be called once).
    pub fn take_alert_receiver(&self) -> Option<mpsc::Receiver<RugAlert>> {
        self.alert_rx.lock().unwrap().take()
    }

    /// Capture a baseline and start watching. The watcher ends after its
    /// first alert or when stopped.
    pub fn watch(self: &Arc<Self>, target: RugWatchTarget) {
        let monitor = self.clone();
        let position_id = target.position_id;

        let handle = tokio::spawn(async move {
            let baseline = loop {
                match monitor.observe(&target).await {
                    Ok(baseline) => break baseline,
                    Err(e) => {
                        warn!(
                            position_id = %target.position_id,
                            error = %e,
                            "Rug baseline capture failed, retrying"
                        );
                        tokio::time::sleep(monitor.config.tick_interval).await;
                    }
                }
            };
            info!(
                position_id = %target.position_id,
                mint = %target.mint,
                supply = baseline.supply,
                "Rug watch armed"
            );

            let mut ticker = tokio::time::interval(monitor.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick already observed

            loop {
                ticker.tick().await;

                let current = match monitor.observe(&target).await {
                    Ok(current) => current,
                    Err(e) => {
                        debug!(position_id = %target.position_id, error = %e, "Rug tick skipped");
                        continue;
                    }
                };

                if let Some(reason) = compare_baseline(&baseline, &current) {
                    let alert = RugAlert {
                        position_id: target.position_id,
                        reason,
                        severity: reason.severity(),
                        detail: format!(
                            "baseline {:?} vs current {:?}",
                            baseline, current
                        ),
                    };
                    error!(
                        position_id = %target.position_id,
                        reason = ?reason,
                        severity = ?alert.severity,
                        "Rug indicator detected"
                    );
                    let _ = monitor.alert_tx.send(alert).await;
                    break;
                }
            }
            monitor.watchers.remove(&position_id);
        });

        self.watchers.insert(position_id, handle);
    }

    pub fn stop(&self, position_id: Uuid) {
        if let Some((_, handle)) = self.watchers.remove(&position_id) {
            handle.abort();
        }
    }

    pub fn watching(&self) -> usize {
        self.watchers.len()
    }

    async fn observe(&self, target: &RugWatchTarget) -> sniper_core::Result<RugBaseline> {
        let liquidity = match &target.pool_quote_vault {
            Some(vault) => Some(self.rpc.get_token_account_balance(vault).await?.amount),
            None => None,
        };

        let (largest, mint_info) = tokio::join!(
            self.rpc.get_token_largest_accounts(&target.mint),
            self.rpc.get_mint_info(&target.mint)
        );
        let largest = largest?;
        let mint_info = mint_info?;

        Ok(RugBaseline {
            liquidity,
            supply: mint_info.supply,
            top10_total: largest.iter().take(10).map(|a| a.amount).sum(),
            mint_authority_revoked: mint_info.mint_authority.is_none(),
            freeze_authority_revoked: mint_info.freeze_authority.is_none(),
        })
    }
}

/// Liquidity-drop severity helper used by alert consumers.
pub fn liquidity_drop_pct(baseline: u64, current: u64) -> Decimal {
    if baseline == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(baseline.saturating_sub(current)) / Decimal::from(baseline)
        * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sniper_core::api::{
        Blockhash, MintInfo, SimulationResult, TokenAccountBalance, TokenAmount, TxStatus,
    };
    use std::sync::Mutex;

    fn baseline() -> RugBaseline {
        RugBaseline {
            liquidity: Some(100_000_000_000), // 100 SOL
            supply: 1_000_000,
            top10_total: 400_000,
            mint_authority_revoked: true,
            freeze_authority_revoked: true,
        }
    }

    #[test]
    fn test_liquidity_removal_over_half() {
        let mut current = baseline();
        current.liquidity = Some(10_000_000_000); // 100 -> 10 SOL
        assert_eq!(
            compare_baseline(&baseline(), &current),
            Some(RugReason::LiquidityRemoval)
        );
        assert_eq!(RugReason::LiquidityRemoval.severity(), RugSeverity::Critical);

        // A 40% drop is not a removal.
        current.liquidity = Some(60_000_000_000);
        assert_eq!(compare_baseline(&baseline(), &current), None);
    }

    #[test]
    fn test_supply_manipulation() {
        let mut current = baseline();
        current.supply = 1_150_000; // +15%
        assert_eq!(
            compare_baseline(&baseline(), &current),
            Some(RugReason::SupplyManipulation)
        );

        current.supply = 1_050_000; // +5%
        assert_eq!(compare_baseline(&baseline(), &current), None);
    }

    #[test]
    fn test_holder_dump() {
        let mut current = baseline();
        current.top10_total = 250_000; // -37.5%
        assert_eq!(
            compare_baseline(&baseline(), &current),
            Some(RugReason::HolderDump)
        );

        current.top10_total = 300_000; // -25%
        assert_eq!(compare_baseline(&baseline(), &current), None);
    }

    #[test]
    fn test_authority_reenabled() {
        let mut current = baseline();
        current.mint_authority_revoked = false;
        assert_eq!(
            compare_baseline(&baseline(), &current),
            Some(RugReason::AuthorityReenabled)
        );
        assert_eq!(
            RugReason::AuthorityReenabled.severity(),
            RugSeverity::Critical
        );
    }

    #[test]
    fn test_liquidity_drop_pct() {
        assert_eq!(liquidity_drop_pct(100, 10), Decimal::from(90));
        assert_eq!(liquidity_drop_pct(0, 10), Decimal::ZERO);
    }

    struct DrainingRpc {
        /// Vault balances returned in order; last value repeats.
        balances: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl RpcApi for DrainingRpc {
        async fn simulate_transaction(&self, _tx: &str) -> sniper_core::Result<SimulationResult> {
            unimplemented!()
        }
        async fn send_transaction(&self, _tx: &str) -> sniper_core::Result<String> {
            unimplemented!()
        }
        async fn get_signature_status(
            &self,
            _sig: &str,
        ) -> sniper_core::Result<Option<TxStatus>> {
            unimplemented!()
        }
        async fn get_token_largest_accounts(
            &self,
            _mint: &str,
        ) -> sniper_core::Result<Vec<TokenAccountBalance>> {
            Ok(vec![TokenAccountBalance {
                address: "holder".to_string(),
                amount: 400_000,
                decimals: 6,
            }])
        }
        async fn get_mint_info(&self, _mint: &str) -> sniper_core::Result<MintInfo> {
            Ok(MintInfo {
                supply: 1_000_000,
                decimals: 6,
                mint_authority: None,
                freeze_authority: None,
            })
        }
        async fn get_token_supply(&self, _mint: &str) -> sniper_core::Result<TokenAmount> {
            unimplemented!()
        }
        async fn get_token_account_balance(
            &self,
            _account: &str,
        ) -> sniper_core::Result<TokenAmount> {
            let mut balances = self.balances.lock().unwrap();
            let amount = if balances.len() > 1 {
                balances.remove(0)
            } else {
                balances[0]
            };
            Ok(TokenAmount { amount, decimals: 9 })
        }
        async fn get_latest_blockhash(&self) -> sniper_core::Result<Blockhash> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_watcher_alerts_on_drained_pool() {
        let rpc = Arc::new(DrainingRpc {
            // Baseline sees 100 SOL, the next observation 10 SOL.
            balances: Mutex::new(vec![100_000_000_000, 10_000_000_000]),
        });
        let monitor = Arc::new(RugMonitor::new(
            rpc,
            RugMonitorConfig {
                tick_interval: Duration::from_millis(10),
            },
        ));
        let mut rx = monitor.take_alert_receiver().unwrap();

        let position_id = Uuid::new_v4();
        monitor.watch(RugWatchTarget {
            position_id,
            mint: "Mint".to_string(),
            pool_quote_vault: Some("Vault".to_string()),
        });

        let alert = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("alert within deadline")
            .unwrap();
        assert_eq!(alert.position_id, position_id);
        assert_eq!(alert.reason, RugReason::LiquidityRemoval);
        assert_eq!(alert.severity, RugSeverity::Critical);
    }
}
