//! Risk management: per-position exit monitoring, on-chain rug detection,
//! and urgency-scaled exit execution.

pub mod exit;
pub mod position_monitor;
pub mod rug_monitor;

pub use exit::{ExitContext, ExitExecutor, ExitOutcome};
pub use position_monitor::{evaluate_exit, ExitSignal, MonitorConfig, PositionMonitor, PriceFeed};
pub use rug_monitor::{RugAlert, RugBaseline, RugMonitor, RugMonitorConfig, RugWatchTarget};
