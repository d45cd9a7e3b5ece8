//! Exit execution with trigger-scaled urgency.
//!
//! Rug exits trade precision for speed: wide slippage and the highest
//! priority tier. A failed exit leaves the position open and escalates to
//! the operator; only an operator closes a position manually.

use chrono::Utc;
use rust_decimal::Decimal;
use sniper_core::db::PositionStore;
use sniper_core::types::token::WSOL_MINT;
use sniper_core::types::{
    ExitTrigger, FilterConfig, FilterPreset, Order, OrderConfig, Position, PositionStatus,
    PriorityFeeTier, TokenFacts,
};
use std::sync::Arc;
use tracing::{error, info};
use trading_engine::{ExecutionRequest, OrderExecutor};

/// Session context the exit runs under.
#[derive(Debug, Clone)]
pub struct ExitContext {
    pub session_token: String,
    pub wallet_address: String,
}

/// A completed exit.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub order: Order,
    pub exit_signature: String,
    pub realized_pnl_sol: Decimal,
    pub status: PositionStatus,
}

/// Urgency parameters per trigger.
fn urgency(trigger: ExitTrigger) -> (u16, PriorityFeeTier, u32) {
    match trigger {
        // Rug exits: 25% slippage, highest tier, extra retries.
        ExitTrigger::Rug { .. } => (2_500, PriorityFeeTier::Ultra, 5),
        ExitTrigger::StopLoss => (1_000, PriorityFeeTier::High, 3),
        ExitTrigger::TakeProfit | ExitTrigger::TrailingStop => (500, PriorityFeeTier::High, 3),
    }
}

/// Closes positions by reusing the order executor in the sell direction.
pub struct ExitExecutor {
    executor: Arc<OrderExecutor>,
    positions: Arc<dyn PositionStore>,
}

impl ExitExecutor {
    pub fn new(executor: Arc<OrderExecutor>, positions: Arc<dyn PositionStore>) -> Self {
        Self { executor, positions }
    }

    /// Sell a position's full balance. On success the position is closed
    /// with its realized P&L; on failure it stays open.
    pub async fn exit_position(
        &self,
        position: &mut Position,
        trigger: ExitTrigger,
        context: &ExitContext,
    ) -> anyhow::Result<ExitOutcome> {
        let (slippage_bps, priority_fee, max_retries) = urgency(trigger);

        let mut order = Order::new(
            &position.user_ref,
            OrderConfig {
                input_mint: position.mint.clone(),
                output_mint: WSOL_MINT.to_string(),
                amount: position.current_balance,
                slippage_bps,
                priority_fee,
                mev_protection: matches!(trigger, ExitTrigger::Rug { .. }),
                max_retries,
                ..Default::default()
            },
        );
        self.executor.state_machine().create(&order).await?;

        info!(
            position_id = %position.id,
            trigger = ?trigger,
            slippage_bps,
            priority = ?priority_fee,
            "Exiting position"
        );

        // Exits bypass entry filters; the decision was already made.
        let request = ExecutionRequest {
            session_token: context.session_token.clone(),
            wallet_address: context.wallet_address.clone(),
            filter_config: FilterConfig::default(),
            preset: FilterPreset::Custom,
            facts: TokenFacts::new(&position.mint),
        };

        let outcome = match self.executor.execute_order(&mut order, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The position stays OPEN; repeated failures escalate.
                error!(
                    position_id = %position.id,
                    code = e.code.as_str(),
                    "OPERATOR ALERT: exit failed, position remains open: {}",
                    e.message
                );
                return Err(anyhow::anyhow!("exit failed: {e}"));
            }
        };

        let realized_pnl_sol = (Decimal::from(outcome.output_amount)
            - Decimal::from(position.entry_input_amount))
            / Decimal::from(1_000_000_000u64);

        let status = match trigger {
            ExitTrigger::TakeProfit => PositionStatus::ClosedProfit,
            ExitTrigger::StopLoss => PositionStatus::ClosedLoss,
            ExitTrigger::Rug { .. } => PositionStatus::ClosedRug,
            ExitTrigger::TrailingStop => {
                if realized_pnl_sol >= Decimal::ZERO {
                    PositionStatus::ClosedProfit
                } else {
                    PositionStatus::ClosedLoss
                }
            }
        };

        position.status = status;
        position.exit_signature = Some(outcome.signature.clone());
        position.realized_pnl_sol = Some(realized_pnl_sol);
        position.current_balance = 0;
        position.closed_at = Some(Utc::now());
        self.positions.update(position).await?;

        info!(
            position_id = %position.id,
            status = ?status,
            realized_pnl_sol = %realized_pnl_sol,
            signature = %outcome.signature,
            "Position closed"
        );

        Ok(ExitOutcome {
            order,
            exit_signature: outcome.signature,
            realized_pnl_sol,
            status,
        })
    }
}
