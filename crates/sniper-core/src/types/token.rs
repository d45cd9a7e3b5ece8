//! Token and pool discovery types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wrapped SOL mint.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDT mint.
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

/// DEX that a pool detection originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DexSource {
    RaydiumAmm,
    RaydiumClmm,
    MeteoraDlmm,
    BondingCurve,
    TokenStream,
}

impl DexSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DexSource::RaydiumAmm => "raydium_amm",
            DexSource::RaydiumClmm => "raydium_clmm",
            DexSource::MeteoraDlmm => "meteora_dlmm",
            DexSource::BondingCurve => "bonding_curve",
            DexSource::TokenStream => "token_stream",
        }
    }
}

/// A newly observed token, emitted by a discovery source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTokenEvent {
    pub source: DexSource,
    pub mint: String,
    pub symbol: Option<String>,
    pub creator: Option<String>,
    /// Initial pool liquidity in SOL, when the source reports it.
    pub initial_liquidity_sol: Option<Decimal>,
    /// Transaction signature that created the token or pool.
    pub signature: String,
    pub observed_at: DateTime<Utc>,
}

/// A pool creation parsed out of DEX program logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPoolDetection {
    pub pool: String,
    pub mint_a: String,
    pub mint_b: String,
    pub source: DexSource,
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<DateTime<Utc>>,
}

impl RawPoolDetection {
    /// Canonical (base, quote) ordering: wrapped SOL is always quote, then
    /// stables, then alphabetical by mint.
    pub fn base_and_quote(&self) -> (&str, &str) {
        canonical_base_quote(&self.mint_a, &self.mint_b)
    }
}

/// Canonical base/quote determination for a mint pair.
pub fn canonical_base_quote<'a>(mint_a: &'a str, mint_b: &'a str) -> (&'a str, &'a str) {
    if mint_a == WSOL_MINT {
        return (mint_b, mint_a);
    }
    if mint_b == WSOL_MINT {
        return (mint_a, mint_b);
    }
    let is_stable = |m: &str| m == USDC_MINT || m == USDT_MINT;
    if is_stable(mint_a) && !is_stable(mint_b) {
        return (mint_b, mint_a);
    }
    if is_stable(mint_b) && !is_stable(mint_a) {
        return (mint_a, mint_b);
    }
    if mint_a <= mint_b {
        (mint_a, mint_b)
    } else {
        (mint_b, mint_a)
    }
}

/// Everything the filter engine can gate on for one candidate token.
///
/// `None` means the fact could not be established; filters over unknown
/// facts record a violation rather than silently passing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenFacts {
    pub mint: String,

    // Authorities
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,

    // Liquidity
    pub liquidity_sol: Option<Decimal>,
    pub liquidity_locked: Option<bool>,
    pub liquidity_lock_pct: Option<Decimal>,

    // Holders
    pub top10_holders_pct: Option<Decimal>,
    pub single_holder_pct: Option<Decimal>,
    pub developer_pct: Option<Decimal>,
    pub holder_count: Option<u64>,

    // Taxes, in percent
    pub buy_tax_pct: Option<Decimal>,
    pub sell_tax_pct: Option<Decimal>,

    // Pool
    pub pool_supply_pct: Option<Decimal>,

    // Socials
    pub has_twitter: Option<bool>,
    pub has_website: Option<bool>,
    pub has_telegram: Option<bool>,

    // Honeypot screening
    pub risk_score: Option<u8>,
    pub risk_confidence: Option<Decimal>,
    pub sell_simulation_ok: Option<bool>,

    // On-chain metadata PDA
    pub has_metadata: Option<bool>,
}

impl TokenFacts {
    pub fn new(mint: impl Into<String>) -> Self {
        Self {
            mint: mint.into(),
            ..Default::default()
        }
    }
}
