//! Position tracking types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    ClosedProfit,
    ClosedLoss,
    ClosedManual,
    ClosedRug,
}

impl PositionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, PositionStatus::Open)
    }
}

/// On-chain rug indicator observed by the rug monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RugReason {
    /// Pool liquidity dropped more than 50% from baseline.
    LiquidityRemoval,
    /// Total supply changed more than 10%.
    SupplyManipulation,
    /// Aggregate top-10 holder balance dropped more than 30%.
    HolderDump,
    /// A previously revoked authority was re-enabled.
    AuthorityReenabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RugSeverity {
    Warning,
    Critical,
}

impl RugReason {
    pub fn severity(&self) -> RugSeverity {
        match self {
            RugReason::LiquidityRemoval | RugReason::AuthorityReenabled => RugSeverity::Critical,
            RugReason::SupplyManipulation | RugReason::HolderDump => RugSeverity::Warning,
        }
    }
}

/// Why a position should be exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "trigger")]
pub enum ExitTrigger {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Rug { reason: RugReason },
}

/// An open or closed position produced by a confirmed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub order_ref: Uuid,
    pub user_ref: String,
    /// The held token's mint.
    pub mint: String,
    pub entry_signature: String,
    /// Lamports spent to open.
    pub entry_input_amount: u64,
    /// Tokens received, in smallest units.
    pub entry_output_amount: u64,
    /// Current token balance, in smallest units.
    pub current_balance: u64,
    /// Entry price in SOL per whole token.
    pub entry_price: Decimal,
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
    /// Highest price observed since entry, for trailing stops.
    pub highest_price: Decimal,
    pub status: PositionStatus,
    pub exit_signature: Option<String>,
    /// Realized profit and loss in SOL, set when the position closes.
    pub realized_pnl_sol: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Signed price change since entry, as a percentage.
    pub fn pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED
    }
}
