//! Transaction-level buy/sell simulation provider.
//!
//! Quotes a probe buy and the matching sell, simulates both unsigned
//! transactions against the RPC, and derives taxes and holder concentration.
//! The whole check races a single timeout; the losing branch is dropped with
//! its in-flight requests.

use crate::provider::{HoneypotProvider, ProviderReport, RiskFlag};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sniper_core::api::{QuoteApi, QuoteError, QuoteRequest, RpcApi};
use sniper_core::types::token::WSOL_MINT;
use sniper_core::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Configuration for the simulation provider.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Probe size in lamports (default 0.1 SOL).
    pub probe_lamports: u64,
    /// Upper bound for the entire check.
    pub total_timeout: Duration,
    /// Public key quoted against; any funded-looking address works since
    /// simulation runs with signature verification off.
    pub probe_pubkey: String,
    /// Score a total holder-analysis outage as worst-case concentration
    /// instead of unknown. Raises an operator alert when it fires.
    pub worst_case_holder_fallback: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            probe_lamports: 100_000_000,
            total_timeout: Duration::from_secs(3),
            probe_pubkey: WSOL_MINT.to_string(),
            worst_case_holder_fallback: false,
        }
    }
}

/// Everything the simulation learned about one token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationFindings {
    pub can_buy: bool,
    pub can_sell: bool,
    pub buy_tax_pct: Decimal,
    pub sell_tax_pct: Decimal,
    pub top10_holders_pct: Option<Decimal>,
    pub developer_pct: Option<Decimal>,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    pub liquidity_locked: Option<bool>,
    pub supply: Option<u64>,
    pub decimals: Option<u8>,
    pub is_honeypot: bool,
    pub honeypot_reason: Option<String>,
}

/// Apply the scoring heuristics to a set of findings.
///
/// Returns the capped score and flags, and fills `is_honeypot` /
/// `honeypot_reason` on the findings.
pub fn score_findings(findings: &mut SimulationFindings) -> (u8, Vec<RiskFlag>) {
    let mut score: u32 = 0;
    let mut flags = Vec::new();

    if findings.can_buy && !findings.can_sell {
        flags.push(RiskFlag::SellSimulationFailed);
        score += 70;
        findings.is_honeypot = true;
        findings.honeypot_reason = Some("buy succeeds but sell cannot be executed".to_string());
    }

    if !findings.sell_tax_pct.is_zero()
        && findings.sell_tax_pct > findings.buy_tax_pct * Decimal::from(3)
    {
        findings.is_honeypot = true;
        findings.honeypot_reason.get_or_insert_with(|| {
            format!(
                "sell tax {}% is more than 3x buy tax {}%",
                findings.sell_tax_pct, findings.buy_tax_pct
            )
        });
    }

    if let Some(top10) = findings.top10_holders_pct {
        if top10 > Decimal::from(90) {
            findings.is_honeypot = true;
            findings
                .honeypot_reason
                .get_or_insert_with(|| format!("top-10 holders control {top10}% of supply"));
        }
        if top10 > Decimal::from(80) {
            flags.push(RiskFlag::Centralized);
            score += 20;
        }
    }

    if findings.sell_tax_pct > Decimal::from(50) {
        flags.push(RiskFlag::HighSellTax);
        score += 40;
    }

    if let Some(dev) = findings.developer_pct {
        if dev > Decimal::from(50) {
            flags.push(RiskFlag::SingleHolderMajority);
            score += 30;
        }
    }

    if findings.liquidity_locked == Some(false) {
        flags.push(RiskFlag::UnlockedLiquidity);
        score += 30;
    }

    (score.min(100) as u8, flags)
}

/// First-class simulation provider.
pub struct SimulationProvider {
    rpc: Arc<dyn RpcApi>,
    quote: Arc<dyn QuoteApi>,
    config: SimulationConfig,
}

impl SimulationProvider {
    pub fn new(rpc: Arc<dyn RpcApi>, quote: Arc<dyn QuoteApi>, config: SimulationConfig) -> Self {
        Self { rpc, quote, config }
    }

    async fn run(&self, mint: &str) -> Result<(u8, Vec<RiskFlag>, SimulationFindings)> {
        // Step 1: probe buy quote. No route here means the token cannot be
        // screened yet, which is a provider failure, not a verdict.
        let buy_quote = self
            .quote
            .get_quote(&QuoteRequest {
                input_mint: WSOL_MINT.to_string(),
                output_mint: mint.to_string(),
                amount: self.config.probe_lamports,
                user_public_key: self.config.probe_pubkey.clone(),
                slippage_bps: 100,
            })
            .await
            .map_err(|e| Error::Api {
                message: format!("buy quote failed: {e}"),
                status: None,
            })?;

        // Step 2: sell quote for the expected buy output. A missing sell
        // route is the honeypot signal itself.
        let sell_quote = match self
            .quote
            .get_quote(&QuoteRequest {
                input_mint: mint.to_string(),
                output_mint: WSOL_MINT.to_string(),
                amount: buy_quote.output_amount,
                user_public_key: self.config.probe_pubkey.clone(),
                slippage_bps: 100,
            })
            .await
        {
            Ok(quote) => Some(quote),
            Err(QuoteError::NoRoute { .. }) | Err(QuoteError::MinimumAmount) => None,
            Err(e) => {
                return Err(Error::Api {
                    message: format!("sell quote failed: {e}"),
                    status: None,
                })
            }
        };

        // Steps 3 + 4: simulate both transactions in parallel with holder
        // analysis.
        let buy_sim = self.rpc.simulate_transaction(&buy_quote.unsigned_transaction);
        let sell_sim = async {
            match &sell_quote {
                Some(quote) => Some(
                    self.rpc
                        .simulate_transaction(&quote.unsigned_transaction)
                        .await,
                ),
                None => None,
            }
        };
        let holders = self.holder_analysis(mint);
        let (buy_sim, sell_sim, holders) = tokio::join!(buy_sim, sell_sim, holders);

        // A chain-side simulation error is conclusive; a transport error is
        // inconclusive and must not manufacture a honeypot verdict.
        let can_buy = match &buy_sim {
            Ok(sim) => sim.succeeded(),
            Err(e) => {
                debug!(error = %e, "Buy simulation inconclusive");
                true
            }
        };
        let can_sell = match (&sell_quote, &sell_sim) {
            (None, _) => false,
            (Some(_), Some(Ok(sim))) => sim.succeeded(),
            (Some(_), Some(Err(e))) => {
                debug!(error = %e, "Sell simulation inconclusive");
                true
            }
            (Some(_), None) => true,
        };

        // Step 5: tax derivation from route fees.
        let buy_tax_pct = Decimal::from(buy_quote.fee_bps()) / Decimal::ONE_HUNDRED;
        let sell_tax_pct = sell_quote
            .as_ref()
            .map(|q| Decimal::from(q.fee_bps()) / Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO);

        let mut findings = SimulationFindings {
            can_buy,
            can_sell,
            buy_tax_pct,
            sell_tax_pct,
            ..Default::default()
        };

        match holders {
            Ok(analysis) => {
                findings.top10_holders_pct = Some(analysis.top10_pct);
                findings.developer_pct = Some(analysis.developer_pct);
                findings.mint_authority = analysis.mint_authority;
                findings.freeze_authority = analysis.freeze_authority;
                findings.supply = Some(analysis.supply);
                findings.decimals = Some(analysis.decimals);
            }
            Err(e) if self.config.worst_case_holder_fallback => {
                // Deliberate safety bias: a total holder-analysis outage is
                // treated as maximum concentration. Operators are alerted
                // because this forces high-risk verdicts during RPC outages.
                error!(
                    mint = %mint,
                    error = %e,
                    "OPERATOR ALERT: holder analysis unavailable, applying worst-case concentration"
                );
                findings.top10_holders_pct = Some(Decimal::ONE_HUNDRED);
                findings.developer_pct = Some(Decimal::ONE_HUNDRED);
            }
            Err(e) => {
                warn!(mint = %mint, error = %e, "Holder analysis unavailable");
            }
        }

        // Step 6: heuristics.
        let (score, flags) = score_findings(&mut findings);
        Ok((score, flags, findings))
    }

    async fn holder_analysis(&self, mint: &str) -> Result<HolderAnalysis> {
        let (largest, mint_info) = tokio::join!(
            self.rpc.get_token_largest_accounts(mint),
            self.rpc.get_mint_info(mint)
        );
        let largest = largest?;
        let mint_info = mint_info?;

        if mint_info.supply == 0 {
            return Err(Error::InvalidToken(format!("mint {mint} has zero supply")));
        }
        let supply = Decimal::from(mint_info.supply);

        let top10_sum: u64 = largest.iter().take(10).map(|a| a.amount).sum();
        let top10_pct = Decimal::from(top10_sum) / supply * Decimal::ONE_HUNDRED;
        let developer_pct = largest
            .first()
            .map(|a| Decimal::from(a.amount) / supply * Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO);

        Ok(HolderAnalysis {
            top10_pct,
            developer_pct,
            mint_authority: mint_info.mint_authority,
            freeze_authority: mint_info.freeze_authority,
            supply: mint_info.supply,
            decimals: mint_info.decimals,
        })
    }
}

struct HolderAnalysis {
    top10_pct: Decimal,
    developer_pct: Decimal,
    mint_authority: Option<String>,
    freeze_authority: Option<String>,
    supply: u64,
    decimals: u8,
}

#[async_trait]
impl HoneypotProvider for SimulationProvider {
    fn name(&self) -> &str {
        "simulation"
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn check(&self, mint: &str) -> Result<ProviderReport> {
        let started = Instant::now();

        let (score, mut flags, findings) =
            tokio::time::timeout(self.config.total_timeout, self.run(mint))
                .await
                .map_err(|_| Error::Timeout("simulation exceeded total budget".to_string()))??;

        if findings.mint_authority.is_some() {
            flags.push(RiskFlag::MintAuthority);
        }
        if findings.freeze_authority.is_some() {
            flags.push(RiskFlag::FreezeAuthority);
        }

        Ok(ProviderReport::new(
            score,
            flags,
            serde_json::to_value(&findings).map_err(Error::from)?,
            started.elapsed().as_millis() as u64,
        ))
    }
}
