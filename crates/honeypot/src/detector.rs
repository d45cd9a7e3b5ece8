//! Provider orchestration, verdict aggregation, and the verdict cache.

use crate::provider::{HoneypotProvider, RiskFlag};
use crate::simulation::SimulationFindings;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sniper_core::store::{keys, SharedStore};
use sniper_core::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Risk classification derived from the aggregated score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskLevel::Low,
            30..=69 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

/// Aggregated verdict for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotVerdict {
    pub mint: String,
    /// Maximum normalized score across responding providers, in `[0, 100]`.
    pub score: u8,
    pub risk_level: RiskLevel,
    pub flags: Vec<RiskFlag>,
    pub is_honeypot: bool,
    /// Share of attempted providers that responded, in `[0, 1]`.
    pub confidence: Decimal,
    /// True when no provider responded at all.
    pub unknown: bool,
    pub providers: Vec<String>,
    /// Simulation-layer findings, when the simulation provider responded.
    pub findings: Option<SimulationFindings>,
    pub checked_at: DateTime<Utc>,
}

/// Detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Stop querying once one provider has responded.
    pub stop_on_first_success: bool,
    /// Maximum providers to query per check.
    pub max_providers: usize,
    /// Verdict cache lifetime.
    pub cache_ttl: Duration,
    /// Trusted mints that skip the pipeline entirely.
    pub whitelist: HashSet<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            stop_on_first_success: false,
            max_providers: 3,
            cache_ttl: Duration::from_secs(3_600),
            whitelist: HashSet::new(),
        }
    }
}

/// Multi-provider honeypot detector with a shared-store verdict cache.
pub struct HoneypotDetector {
    providers: Vec<Arc<dyn HoneypotProvider>>,
    store: Arc<dyn SharedStore>,
    config: DetectorConfig,
    /// Joined provider names; part of the cache key so a provider-set change
    /// invalidates old verdicts.
    provider_set: String,
    /// Mints with a background check already in flight.
    in_flight: DashSet<String>,
}

impl HoneypotDetector {
    pub fn new(
        mut providers: Vec<Arc<dyn HoneypotProvider>>,
        store: Arc<dyn SharedStore>,
        config: DetectorConfig,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());
        let provider_set = providers
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join("+");
        Self {
            providers,
            store,
            config,
            provider_set,
            in_flight: DashSet::new(),
        }
    }

    /// Fast-path screen: returns the cached verdict, or `None` for a token
    /// that has never been checked. A cache miss kicks off a background
    /// check that populates the cache for the next caller.
    pub async fn screen(self: &Arc<Self>, mint: &str) -> Result<Option<HoneypotVerdict>> {
        if let Some(verdict) = self.whitelisted(mint) {
            return Ok(Some(verdict));
        }

        if let Some(cached) = self.cached(mint).await? {
            return Ok(Some(cached));
        }

        if self.in_flight.insert(mint.to_string()) {
            let detector = self.clone();
            let mint = mint.to_string();
            tokio::spawn(async move {
                if let Err(e) = detector.check_now(&mint).await {
                    warn!(mint = %mint, error = %e, "Background honeypot check failed");
                }
                detector.in_flight.remove(&mint);
            });
        }

        Ok(None)
    }

    /// Full check: query providers in priority order, aggregate, cache.
    pub async fn check_now(&self, mint: &str) -> Result<HoneypotVerdict> {
        if let Some(verdict) = self.whitelisted(mint) {
            return Ok(verdict);
        }

        let mut attempted = 0usize;
        let mut responded: Vec<(String, u8, Vec<RiskFlag>, serde_json::Value)> = Vec::new();

        for provider in &self.providers {
            if attempted >= self.config.max_providers {
                break;
            }
            if !provider.is_available().await {
                debug!(provider = %provider.name(), "Provider unavailable, skipping");
                continue;
            }
            attempted += 1;

            match provider.check(mint).await {
                Ok(report) => {
                    debug!(
                        provider = %provider.name(),
                        score = report.score,
                        latency_ms = report.latency_ms,
                        "Provider responded"
                    );
                    responded.push((
                        provider.name().to_string(),
                        report.score,
                        report.flags,
                        report.data,
                    ));
                    if self.config.stop_on_first_success {
                        break;
                    }
                }
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "Provider failed");
                }
            }
        }

        let verdict = self.aggregate(mint, attempted, responded);
        self.cache_verdict(&verdict).await;

        info!(
            mint = %mint,
            score = verdict.score,
            risk = ?verdict.risk_level,
            confidence = %verdict.confidence,
            "Honeypot verdict"
        );
        Ok(verdict)
    }

    // Private methods

    fn whitelisted(&self, mint: &str) -> Option<HoneypotVerdict> {
        if !self.config.whitelist.contains(mint) {
            return None;
        }
        Some(HoneypotVerdict {
            mint: mint.to_string(),
            score: 0,
            risk_level: RiskLevel::Low,
            flags: Vec::new(),
            is_honeypot: false,
            confidence: Decimal::ONE,
            unknown: false,
            providers: vec!["whitelist".to_string()],
            findings: None,
            checked_at: Utc::now(),
        })
    }

    fn aggregate(
        &self,
        mint: &str,
        attempted: usize,
        responded: Vec<(String, u8, Vec<RiskFlag>, serde_json::Value)>,
    ) -> HoneypotVerdict {
        if responded.is_empty() {
            return HoneypotVerdict {
                mint: mint.to_string(),
                score: 0,
                risk_level: RiskLevel::Low,
                flags: vec![RiskFlag::Unknown],
                is_honeypot: false,
                confidence: Decimal::ZERO,
                unknown: true,
                providers: Vec::new(),
                findings: None,
                checked_at: Utc::now(),
            };
        }

        let mut score = 0u8;
        let mut flags: Vec<RiskFlag> = Vec::new();
        let mut providers = Vec::new();
        let mut findings: Option<SimulationFindings> = None;

        for (name, provider_score, provider_flags, data) in responded.iter() {
            score = score.max(*provider_score);
            for flag in provider_flags {
                if !flags.contains(flag) {
                    flags.push(*flag);
                }
            }
            if name == "simulation" {
                findings = serde_json::from_value(data.clone()).ok();
            }
            providers.push(name.clone());
        }

        let is_honeypot = findings.as_ref().map(|f| f.is_honeypot).unwrap_or(false)
            || score >= 100
            || flags.contains(&RiskFlag::SellSimulationFailed);

        let confidence = Decimal::from(responded.len() as u64)
            / Decimal::from(attempted.max(responded.len()) as u64);

        HoneypotVerdict {
            mint: mint.to_string(),
            score,
            risk_level: RiskLevel::from_score(score),
            flags,
            is_honeypot,
            confidence,
            unknown: false,
            providers,
            findings,
            checked_at: Utc::now(),
        }
    }

    async fn cached(&self, mint: &str) -> Result<Option<HoneypotVerdict>> {
        let key = keys::honeypot_verdict(mint, &self.provider_set);
        match self.store.get(&key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    async fn cache_verdict(&self, verdict: &HoneypotVerdict) {
        let key = keys::honeypot_verdict(&verdict.mint, &self.provider_set);
        match serde_json::to_string(verdict) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&key, &raw, Some(self.config.cache_ttl)).await {
                    // Cache failures degrade open; the verdict still stands.
                    warn!(mint = %verdict.mint, error = %e, "Failed to cache verdict");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize verdict"),
        }
    }
}
