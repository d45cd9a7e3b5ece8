//! Order lifecycle types: configuration, state machine states, and the
//! execution error taxonomy.

use crate::types::filter::FilterResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed priority-fee tiers, in microlamports per compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityFeeTier {
    None,
    Low,
    Medium,
    High,
    Turbo,
    Ultra,
}

impl PriorityFeeTier {
    pub fn microlamports(&self) -> u64 {
        match self {
            PriorityFeeTier::None => 0,
            PriorityFeeTier::Low => 10_000,
            PriorityFeeTier::Medium => 50_000,
            PriorityFeeTier::High => 200_000,
            PriorityFeeTier::Turbo => 500_000,
            PriorityFeeTier::Ultra => 1_000_000,
        }
    }
}

/// Configuration for one swap order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in the input token's smallest units.
    pub amount: u64,
    /// Maximum acceptable slippage in basis points.
    pub slippage_bps: u16,
    pub priority_fee: PriorityFeeTier,
    /// Submit through the MEV-bundle endpoint instead of plain RPC.
    pub mev_protection: bool,
    pub max_retries: u32,
    /// Per-attempt confirmation timeout in milliseconds.
    pub timeout_ms: u64,
    pub take_profit_pct: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub trailing_stop_pct: Option<Decimal>,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            input_mint: crate::types::token::WSOL_MINT.to_string(),
            output_mint: String::new(),
            amount: 0,
            slippage_bps: 100, // 1%
            priority_fee: PriorityFeeTier::Medium,
            mev_protection: false,
            max_retries: 3,
            timeout_ms: 30_000,
            take_profit_pct: None,
            stop_loss_pct: None,
            trailing_stop_pct: None,
        }
    }
}

/// Machine-readable execution error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorCode {
    FilterRejected,
    NoRoute,
    InsufficientBalance,
    SlippageExceeded,
    TransactionTimeout,
    TransactionFailed,
    NetworkError,
    MaxRetriesExceeded,
    Unknown,
}

impl ExecutionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorCode::FilterRejected => "FILTER_REJECTED",
            ExecutionErrorCode::NoRoute => "NO_ROUTE",
            ExecutionErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ExecutionErrorCode::SlippageExceeded => "SLIPPAGE_EXCEEDED",
            ExecutionErrorCode::TransactionTimeout => "TRANSACTION_TIMEOUT",
            ExecutionErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ExecutionErrorCode::NetworkError => "NETWORK_ERROR",
            ExecutionErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ExecutionErrorCode::Unknown => "UNKNOWN",
        }
    }
}

/// A typed execution error: the code is machine-readable, the message is for
/// display only.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ExecutionError {
    pub code: ExecutionErrorCode,
    pub message: String,
}

impl ExecutionError {
    pub fn new(code: ExecutionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Order lifecycle state with per-state payloads.
///
/// ```text
/// PENDING      -> VALIDATED | FAILED
/// VALIDATED    -> SIMULATING | FAILED
/// SIMULATING   -> SIGNING | FAILED
/// SIGNING      -> BROADCASTING | FAILED
/// BROADCASTING -> CONFIRMING | FAILED
/// CONFIRMING   -> CONFIRMING | CONFIRMED | FAILED
/// CONFIRMED    -> (terminal)
/// FAILED       -> (terminal)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Validated {
        filter: FilterResult,
    },
    Simulating,
    Signing {
        quote_id: String,
        expected_output: u64,
        price_impact_pct: Decimal,
    },
    Broadcasting {
        signature: String,
        sent_at: DateTime<Utc>,
    },
    Confirming {
        signature: String,
        sent_at: DateTime<Utc>,
        confirmation_depth: u32,
    },
    Confirmed {
        signature: String,
        slot: u64,
        input_amount: u64,
        output_amount: u64,
        price_impact_pct: Decimal,
        execution_time_ms: u64,
    },
    Failed {
        error: ExecutionError,
        retry_count: u32,
    },
}

impl OrderState {
    pub fn name(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Validated { .. } => "VALIDATED",
            OrderState::Simulating => "SIMULATING",
            OrderState::Signing { .. } => "SIGNING",
            OrderState::Broadcasting { .. } => "BROADCASTING",
            OrderState::Confirming { .. } => "CONFIRMING",
            OrderState::Confirmed { .. } => "CONFIRMED",
            OrderState::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Confirmed { .. } | OrderState::Failed { .. })
    }

    /// Whether the transition table permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (_, Failed { .. }) => !self.is_terminal(),
            (Pending, Validated { .. }) => true,
            (Validated { .. }, Simulating) => true,
            (Simulating, Signing { .. }) => true,
            (Signing { .. }, Broadcasting { .. }) => true,
            (Broadcasting { .. }, Confirming { .. }) => true,
            (Confirming { .. }, Confirming { .. }) => true,
            (Confirming { .. }, Confirmed { .. }) => true,
            _ => false,
        }
    }
}

/// A swap order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_ref: String,
    pub config: OrderConfig,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(user_ref: impl Into<String>, config: OrderConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_ref: user_ref.into(),
            config,
            state: OrderState::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing() -> OrderState {
        OrderState::Signing {
            quote_id: "q1".to_string(),
            expected_output: 1_000,
            price_impact_pct: Decimal::ZERO,
        }
    }

    fn failed() -> OrderState {
        OrderState::Failed {
            error: ExecutionError::new(ExecutionErrorCode::Unknown, "test"),
            retry_count: 0,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(OrderState::Simulating.can_transition_to(&signing()));
        assert!(signing().can_transition_to(&OrderState::Broadcasting {
            signature: "sig".to_string(),
            sent_at: Utc::now(),
        }));
    }

    #[test]
    fn test_any_non_terminal_state_can_fail() {
        assert!(OrderState::Pending.can_transition_to(&failed()));
        assert!(signing().can_transition_to(&failed()));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let confirmed = OrderState::Confirmed {
            signature: "sig".to_string(),
            slot: 1,
            input_amount: 1,
            output_amount: 1,
            price_impact_pct: Decimal::ZERO,
            execution_time_ms: 10,
        };
        assert!(!confirmed.can_transition_to(&failed()));
        assert!(!failed().can_transition_to(&OrderState::Pending));
        assert!(confirmed.is_terminal());
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        assert!(!OrderState::Pending.can_transition_to(&OrderState::Simulating));
        assert!(!OrderState::Pending.can_transition_to(&signing()));
    }

    #[test]
    fn test_confirming_may_repeat() {
        let confirming = OrderState::Confirming {
            signature: "sig".to_string(),
            sent_at: Utc::now(),
            confirmation_depth: 1,
        };
        let deeper = OrderState::Confirming {
            signature: "sig".to_string(),
            sent_at: Utc::now(),
            confirmation_depth: 2,
        };
        assert!(confirming.can_transition_to(&deeper));
    }

    #[test]
    fn test_priority_fee_tiers() {
        assert_eq!(PriorityFeeTier::None.microlamports(), 0);
        assert_eq!(PriorityFeeTier::Ultra.microlamports(), 1_000_000);
    }

    #[test]
    fn test_error_code_strings() {
        assert_eq!(
            ExecutionErrorCode::FilterRejected.as_str(),
            "FILTER_REJECTED"
        );
        let err = ExecutionError::new(ExecutionErrorCode::NoRoute, "no route for mint");
        assert_eq!(err.to_string(), "NO_ROUTE: no route for mint");
    }
}
