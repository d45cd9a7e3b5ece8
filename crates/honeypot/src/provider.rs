//! The provider surface and the guard that wraps every provider with a rate
//! limiter, a circuit breaker, and a timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sniper_core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use sniper_core::rate_limit::TokenBucket;
use sniper_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Closed set of risk flags a provider can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFlag {
    MintAuthority,
    FreezeAuthority,
    LowLiquidity,
    UnlockedLiquidity,
    Centralized,
    SingleHolderMajority,
    HighSellTax,
    OwnerChangePossible,
    SellSimulationFailed,
    Unknown,
}

/// A provider's normalized verdict for one token.
///
/// Scores are always normalized to 0 = safe, 100 = certainly malicious
/// before they leave the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReport {
    /// Normalized risk score in `[0, 100]`.
    pub score: u8,
    pub flags: Vec<RiskFlag>,
    /// Provider-specific payload for diagnostics and fact extraction.
    pub data: serde_json::Value,
    pub latency_ms: u64,
}

impl ProviderReport {
    pub fn new(score: u8, flags: Vec<RiskFlag>, data: serde_json::Value, latency_ms: u64) -> Self {
        debug_assert!(score <= 100);
        Self {
            score: score.min(100),
            flags,
            data,
            latency_ms,
        }
    }
}

/// A risk provider. Smaller `priority` values are queried earlier.
#[async_trait]
pub trait HoneypotProvider: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> u8;

    async fn is_available(&self) -> bool;

    async fn check(&self, mint: &str) -> Result<ProviderReport>;
}

/// Default provider budget: 60 requests per 60 seconds.
pub const DEFAULT_PROVIDER_RATE: (u32, Duration) = (60, Duration::from_secs(60));

/// Composes a token bucket, a named circuit breaker, and a timeout around a
/// provider. All providers share exactly this failure-isolation shape.
pub struct GuardedProvider {
    inner: Arc<dyn HoneypotProvider>,
    breaker: Arc<CircuitBreaker>,
    limiter: TokenBucket,
    timeout: Duration,
}

impl GuardedProvider {
    pub fn new(
        inner: Arc<dyn HoneypotProvider>,
        breaker: Arc<CircuitBreaker>,
        rate: (u32, Duration),
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker,
            limiter: TokenBucket::new(rate.0, rate.1),
            timeout,
        }
    }
}

#[async_trait]
impl HoneypotProvider for GuardedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn priority(&self) -> u8 {
        self.inner.priority()
    }

    async fn is_available(&self) -> bool {
        self.breaker.is_available().await && self.inner.is_available().await
    }

    async fn check(&self, mint: &str) -> Result<ProviderReport> {
        if !self.limiter.try_acquire() {
            // Dropping to the next provider beats stalling the screen.
            return Err(Error::RateLimited(format!(
                "provider {} over budget",
                self.inner.name()
            )));
        }

        let inner = &self.inner;
        let timeout = self.timeout;
        let result = self
            .breaker
            .execute(async {
                match tokio::time::timeout(timeout, inner.check(mint)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "provider {} timed out",
                        inner.name()
                    ))),
                }
            })
            .await;

        match result {
            Ok(report) => Ok(report),
            Err(CircuitBreakerError::Open { name, retry_after_ms }) => {
                warn!(provider = %name, retry_after_ms, "Provider circuit open, skipping");
                Err(Error::RateLimited(format!("circuit open for {name}")))
            }
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }
}
