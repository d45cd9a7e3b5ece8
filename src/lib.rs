//! Automated on-chain token sniper.
//!
//! This is the root crate tying the workspace together for the runner
//! binary and the end-to-end tests. For actual functionality, use the
//! individual crates directly:
//!
//! - `sniper-core`: Shared types, chain clients, storage, resilience primitives
//! - `vault`: Encrypted key custody, sessions, wallet rotation
//! - `honeypot`: Multi-provider risk screening and buy/sell simulation
//! - `discovery`: New-token and pool-creation streams
//! - `trading-engine`: Filters, order state machine, execution
//! - `risk-manager`: Position and rug monitoring, exit execution

pub use discovery;
pub use honeypot;
pub use risk_manager;
pub use sniper_core;
pub use trading_engine;
pub use vault;
