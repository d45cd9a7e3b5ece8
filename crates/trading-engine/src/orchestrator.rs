//! Ties one trade request together: safety screen, wallet selection,
//! optional privacy delay, execution, and position creation.

use crate::executor::{ExecutionRequest, OrderExecutor};
use honeypot::{HoneypotDetector, HoneypotVerdict};
use rand::Rng;
use rust_decimal::Decimal;
use sniper_core::config::UnknownTokenPolicy;
use sniper_core::db::PositionStore;
use sniper_core::types::{
    ExecutionErrorCode, FilterConfig, FilterPreset, Order, OrderConfig, Position, TokenFacts,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use vault::{RotationStrategy, WalletRotator};

/// An already-parsed trade request from the command surface.
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub user_ref: String,
    pub session_token: String,
    pub output_mint: String,
    /// Input size in lamports.
    pub amount_lamports: u64,
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    pub strategy: RotationStrategy,
    pub preset: FilterPreset,
    /// Overrides the preset's configuration when set.
    pub filter_config: Option<FilterConfig>,
    /// Liquidity observed at discovery time, if the request came from the
    /// discovery pipeline.
    pub observed_liquidity_sol: Option<Decimal>,
    pub mev_protection: bool,
}

/// Result record returned to the command surface.
#[derive(Debug, Clone)]
pub enum TradeOutcome {
    Confirmed {
        order_id: Uuid,
        signature: String,
        output_amount: u64,
        position: Position,
        commission_usd: Option<Decimal>,
    },
    Rejected {
        code: ExecutionErrorCode,
        message: String,
    },
}

/// Orchestrator policy knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub unknown_token_policy: UnknownTokenPolicy,
    /// Random pre-execution delay window in milliseconds; disabled when the
    /// upper bound is zero.
    pub privacy_delay_min_ms: u64,
    pub privacy_delay_max_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            unknown_token_policy: UnknownTokenPolicy::Reject,
            privacy_delay_min_ms: 0,
            privacy_delay_max_ms: 0,
        }
    }
}

pub struct Orchestrator {
    detector: Arc<HoneypotDetector>,
    rotator: Arc<WalletRotator>,
    executor: Arc<OrderExecutor>,
    positions: Arc<dyn PositionStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        detector: Arc<HoneypotDetector>,
        rotator: Arc<WalletRotator>,
        executor: Arc<OrderExecutor>,
        positions: Arc<dyn PositionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            detector,
            rotator,
            executor,
            positions,
            config,
        }
    }

    /// Handle one trade request end to end.
    pub async fn handle(&self, request: TradeRequest) -> anyhow::Result<TradeOutcome> {
        // Safety screen first; a verdict may be served from cache.
        let verdict = self.detector.screen(&request.output_mint).await?;

        let verdict = match verdict {
            Some(verdict) => {
                if verdict.is_honeypot {
                    return Ok(TradeOutcome::Rejected {
                        code: ExecutionErrorCode::FilterRejected,
                        message: format!(
                            "honeypot detected (score {}): trading blocked",
                            verdict.score
                        ),
                    });
                }
                Some(verdict)
            }
            None => match self.config.unknown_token_policy {
                UnknownTokenPolicy::Reject => {
                    return Ok(TradeOutcome::Rejected {
                        code: ExecutionErrorCode::FilterRejected,
                        message: "token has no safety verdict yet, retry shortly".to_string(),
                    });
                }
                UnknownTokenPolicy::Proceed => {
                    warn!(
                        mint = %request.output_mint,
                        "Proceeding on unscreened token per policy"
                    );
                    None
                }
            },
        };

        // Wallet selection.
        let wallet = match self.rotator.select(&request.user_ref, request.strategy).await {
            Ok(wallet) => wallet,
            Err(e) => {
                return Ok(TradeOutcome::Rejected {
                    code: ExecutionErrorCode::Unknown,
                    message: format!("wallet selection failed: {}", e.code()),
                })
            }
        };

        self.privacy_delay().await;

        let facts = build_facts(&request, verdict.as_ref());
        let filter_config = request
            .filter_config
            .clone()
            .unwrap_or_else(|| crate::filter::FilterEngine::preset(request.preset));

        let mut order = Order::new(
            &request.user_ref,
            OrderConfig {
                output_mint: request.output_mint.clone(),
                amount: request.amount_lamports,
                mev_protection: request.mev_protection,
                take_profit_pct: request.take_profit_pct,
                stop_loss_pct: request.stop_loss_pct,
                trailing_stop_pct: request.trailing_stop_pct,
                ..Default::default()
            },
        );
        self.executor.state_machine().create(&order).await?;

        let execution = ExecutionRequest {
            session_token: request.session_token.clone(),
            wallet_address: wallet.address.clone(),
            filter_config,
            preset: request.preset,
            facts,
        };

        match self.executor.execute_order(&mut order, &execution).await {
            Ok(outcome) => {
                self.positions.insert(&outcome.position).await?;
                self.rotator.mark_used(&wallet).await.ok();

                info!(
                    order_id = %order.id,
                    position_id = %outcome.position.id,
                    signature = %outcome.signature,
                    "Trade confirmed, position opened"
                );
                Ok(TradeOutcome::Confirmed {
                    order_id: order.id,
                    signature: outcome.signature,
                    output_amount: outcome.output_amount,
                    position: outcome.position,
                    commission_usd: outcome.commission_usd,
                })
            }
            Err(error) => Ok(TradeOutcome::Rejected {
                code: error.code,
                message: error.message,
            }),
        }
    }

    async fn privacy_delay(&self) {
        if self.config.privacy_delay_max_ms == 0 {
            return;
        }
        let min = self
            .config
            .privacy_delay_min_ms
            .min(self.config.privacy_delay_max_ms);
        let delay = rand::rng().random_range(min..=self.config.privacy_delay_max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Merge the discovery-time observation and the screening verdict into the
/// facts the filter engine gates on.
fn build_facts(request: &TradeRequest, verdict: Option<&HoneypotVerdict>) -> TokenFacts {
    let mut facts = TokenFacts::new(&request.output_mint);
    facts.liquidity_sol = request.observed_liquidity_sol;

    if let Some(verdict) = verdict {
        facts.risk_score = Some(verdict.score);
        facts.risk_confidence = Some(verdict.confidence);

        if let Some(findings) = &verdict.findings {
            facts.sell_simulation_ok = Some(findings.can_buy && findings.can_sell);
            facts.buy_tax_pct = Some(findings.buy_tax_pct);
            facts.sell_tax_pct = Some(findings.sell_tax_pct);
            facts.top10_holders_pct = findings.top10_holders_pct;
            facts.developer_pct = findings.developer_pct;
            facts.single_holder_pct = findings.developer_pct;
            facts.mint_authority = findings.mint_authority.clone();
            facts.freeze_authority = findings.freeze_authority.clone();
            facts.liquidity_locked = findings.liquidity_locked;
        }
    }

    facts
}
