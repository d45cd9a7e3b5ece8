//! Shared domain types.

pub mod filter;
pub mod order;
pub mod position;
pub mod token;
pub mod wallet;

pub use filter::{FilterConfig, FilterPreset, FilterResult, Violation, ViolationSeverity};
pub use order::{
    ExecutionError, ExecutionErrorCode, Order, OrderConfig, OrderState, PriorityFeeTier,
};
pub use position::{ExitTrigger, Position, PositionStatus, RugReason, RugSeverity};
pub use token::{DexSource, NewTokenEvent, RawPoolDetection, TokenFacts};
pub use wallet::EncryptedKey;
