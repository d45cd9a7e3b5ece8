//! Filter configuration and evaluation result types.
//!
//! The evaluation logic lives in the trading engine; the shapes live here so
//! orders can embed the result of the filter stage.

use crate::types::token::TokenFacts;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Named presets for filter configurations. Presets are data: each maps to a
/// concrete [`FilterConfig`] in the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPreset {
    Conservative,
    Balanced,
    Aggressive,
    Custom,
}

/// A filter configuration. Every field is optional; an absent field disables
/// that filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    // Authority
    pub require_mint_disabled: Option<bool>,
    pub require_freeze_disabled: Option<bool>,

    // Liquidity
    pub min_liquidity_sol: Option<Decimal>,
    pub max_liquidity_sol: Option<Decimal>,
    pub require_liquidity_locked: Option<bool>,
    pub min_liquidity_lock_pct: Option<Decimal>,

    // Holders
    pub max_top10_holders_pct: Option<Decimal>,
    pub max_single_holder_pct: Option<Decimal>,
    pub min_holders: Option<u64>,
    pub max_developer_pct: Option<Decimal>,

    // Taxes, in percent
    pub max_buy_tax: Option<Decimal>,
    pub max_sell_tax: Option<Decimal>,

    // Pool
    pub min_pool_supply_pct: Option<Decimal>,
    pub max_pool_supply_pct: Option<Decimal>,

    // Socials
    pub require_twitter: Option<bool>,
    pub require_website: Option<bool>,
    pub require_telegram: Option<bool>,

    // Honeypot screening
    pub max_risk_score: Option<u8>,
    pub min_confidence: Option<Decimal>,
    pub require_sell_simulation: Option<bool>,

    // Metadata
    pub require_metadata: Option<bool>,

    // Allow / deny lists of mints
    pub blacklist: Option<Vec<String>>,
    pub whitelist: Option<Vec<String>>,
}

/// Severity of a single filter violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
}

/// One violated filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// The configuration field that failed, e.g. `min_liquidity_sol`.
    pub filter: String,
    pub severity: ViolationSeverity,
    pub message: String,
}

/// Outcome of evaluating a filter configuration against token facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
    pub preset: FilterPreset,
    pub token_facts: TokenFacts,
    pub checked_at: DateTime<Utc>,
}

impl FilterResult {
    /// Names of all violated filters, for compact logging.
    pub fn violated_filters(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.filter.as_str()).collect()
    }
}
