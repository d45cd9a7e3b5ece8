//! HTTP risk providers.
//!
//! Each provider is data: a name, a priority, a URL shape, optional headers,
//! and a parse function that maps the provider's response onto the shared
//! report shape. Score conventions differ per provider and are normalized
//! here so everything downstream sees 0 = safe, 100 = malicious.

use crate::provider::{HoneypotProvider, ProviderReport, RiskFlag};
use async_trait::async_trait;
use serde_json::Value;
use sniper_core::{Error, Result};
use std::time::Instant;

/// Parsed fields pulled out of a provider response before normalization.
struct ParsedVerdict {
    /// Score in the provider's native convention.
    raw_score: u8,
    flags: Vec<RiskFlag>,
    /// Definitive rugged/honeypot call by the provider.
    definitive: bool,
}

/// How the provider's native score maps onto ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScoreConvention {
    /// 0 = safe .. 100 = danger; used directly.
    DangerHigh,
    /// 0 = danger .. 100 = safe; inverted on ingest.
    SafeHigh,
}

type ParseFn = fn(&Value) -> Result<ParsedVerdict>;

/// A configurable HTTP JSON provider.
pub struct HttpProvider {
    name: String,
    priority: u8,
    url_prefix: String,
    api_key_header: Option<(String, String)>,
    convention: ScoreConvention,
    parse: ParseFn,
    client: reqwest::Client,
}

impl HttpProvider {
    /// The primary screening provider. Scores 0 = safe .. 100 = danger.
    pub fn primary(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            name: "riskscan".to_string(),
            priority: 1,
            url_prefix: format!("{}/v1/tokens/", base_url.trim_end_matches('/')),
            api_key_header: api_key.map(|k| ("x-api-key".to_string(), k)),
            convention: ScoreConvention::DangerHigh,
            parse: parse_riskscan,
            client: reqwest::Client::new(),
        }
    }

    /// The secondary provider. Scores 0 = danger .. 100 = safe, inverted on
    /// ingest.
    pub fn secondary(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            name: "tokenguard".to_string(),
            priority: 2,
            url_prefix: format!("{}/api/report/", base_url.trim_end_matches('/')),
            api_key_header: api_key.map(|k| ("authorization".to_string(), k)),
            convention: ScoreConvention::SafeHigh,
            parse: parse_tokenguard,
            client: reqwest::Client::new(),
        }
    }

    fn normalize(&self, parsed: ParsedVerdict) -> (u8, Vec<RiskFlag>) {
        if parsed.definitive {
            return (100, parsed.flags);
        }
        let score = match self.convention {
            ScoreConvention::DangerHigh => parsed.raw_score,
            ScoreConvention::SafeHigh => 100 - parsed.raw_score.min(100),
        };
        (score.min(100), parsed.flags)
    }
}

#[async_trait]
impl HoneypotProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn check(&self, mint: &str) -> Result<ProviderReport> {
        let started = Instant::now();
        let url = format!("{}{}", self.url_prefix, mint);

        let mut request = self.client.get(&url);
        if let Some((header, value)) = &self.api_key_header {
            request = request.header(header, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("provider {} timed out", self.name))
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(Error::RateLimited(format!(
                "provider {} rate limited upstream",
                self.name
            )));
        }
        if !(200..300).contains(&status) {
            return Err(Error::Api {
                message: format!("provider {} returned {status}", self.name),
                status: Some(status),
            });
        }

        let body: Value = response.json().await?;
        let parsed = (self.parse)(&body)?;
        let (score, flags) = self.normalize(parsed);

        Ok(ProviderReport::new(
            score,
            flags,
            body,
            started.elapsed().as_millis() as u64,
        ))
    }
}

fn flag_from_name(name: &str) -> Option<RiskFlag> {
    match name {
        "mint_authority" | "mintable" => Some(RiskFlag::MintAuthority),
        "freeze_authority" | "freezable" => Some(RiskFlag::FreezeAuthority),
        "low_liquidity" => Some(RiskFlag::LowLiquidity),
        "unlocked_liquidity" | "lp_unlocked" => Some(RiskFlag::UnlockedLiquidity),
        "centralized" | "top_holders" => Some(RiskFlag::Centralized),
        "single_holder" => Some(RiskFlag::SingleHolderMajority),
        "high_sell_tax" | "sell_tax" => Some(RiskFlag::HighSellTax),
        "owner_change" | "upgradeable" => Some(RiskFlag::OwnerChangePossible),
        "sell_failed" | "cannot_sell" => Some(RiskFlag::SellSimulationFailed),
        _ => Some(RiskFlag::Unknown),
    }
}

fn parse_riskscan(body: &Value) -> Result<ParsedVerdict> {
    let raw_score = body
        .get("score")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Api {
            message: "riskscan response missing score".to_string(),
            status: None,
        })? as u8;

    let flags = body
        .get("risks")
        .and_then(Value::as_array)
        .map(|risks| {
            risks
                .iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str))
                .filter_map(flag_from_name)
                .collect()
        })
        .unwrap_or_default();

    let definitive = body
        .get("rugged")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ParsedVerdict {
        raw_score: raw_score.min(100),
        flags,
        definitive,
    })
}

fn parse_tokenguard(body: &Value) -> Result<ParsedVerdict> {
    let raw_score = body
        .get("safetyScore")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Api {
            message: "tokenguard response missing safetyScore".to_string(),
            status: None,
        })? as u8;

    let flags = body
        .get("warnings")
        .and_then(Value::as_array)
        .map(|warnings| {
            warnings
                .iter()
                .filter_map(Value::as_str)
                .filter_map(flag_from_name)
                .collect()
        })
        .unwrap_or_default();

    let definitive = body
        .get("isHoneypot")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ParsedVerdict {
        raw_score: raw_score.min(100),
        flags,
        definitive,
    })
}
