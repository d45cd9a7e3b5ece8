//! Trading engine: token filtering, the order state machine, swap
//! execution, commission accounting, and the per-request orchestrator.

pub mod commission;
pub mod executor;
pub mod filter;
pub mod orchestrator;
pub mod state_machine;

pub use commission::{CommissionConfig, CommissionEngine};
pub use executor::{ExecutionOutcome, ExecutionRequest, ExecutorConfig, OrderExecutor};
pub use filter::FilterEngine;
pub use orchestrator::{Orchestrator, TradeOutcome, TradeRequest};
pub use state_machine::OrderStateMachine;
