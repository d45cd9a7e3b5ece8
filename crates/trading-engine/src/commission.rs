//! Per-trade commission accounting.

use lru::LruCache;
use rust_decimal::Decimal;
use sniper_core::api::{QuoteApi, RpcApi};
use sniper_core::{Error, Result};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

/// Commission configuration, in basis points of trade value with a USD
/// floor.
#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub bps: u32,
    pub min_commission_usd: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            bps: 100, // 1%
            min_commission_usd: Decimal::new(1, 2), // $0.01
        }
    }
}

/// Token-decimal cache capacity.
const DECIMALS_CACHE_SIZE: usize = 1_000;

/// Computes the commission owed on a confirmed trade.
pub struct CommissionEngine {
    rpc: Arc<dyn RpcApi>,
    quote: Arc<dyn QuoteApi>,
    decimals: Mutex<LruCache<String, u8>>,
    config: CommissionConfig,
}

impl CommissionEngine {
    pub fn new(rpc: Arc<dyn RpcApi>, quote: Arc<dyn QuoteApi>, config: CommissionConfig) -> Self {
        Self {
            rpc,
            quote,
            decimals: Mutex::new(LruCache::new(
                NonZeroUsize::new(DECIMALS_CACHE_SIZE).expect("non-zero capacity"),
            )),
            config,
        }
    }

    /// Commission in USD for an output of `amount` smallest units:
    /// `max(min_commission, ui_amount * price * bps / 10_000)`.
    pub async fn compute(&self, output_mint: &str, amount: u64) -> Result<Decimal> {
        let decimals = self.token_decimals(output_mint).await?;
        let price = self
            .quote
            .get_token_price(output_mint)
            .await
            .map_err(|e| Error::Api {
                message: format!("price lookup failed: {e}"),
                status: None,
            })?;

        let ui_amount = Decimal::from(amount) / Decimal::from(10u64.pow(decimals as u32));
        let commission =
            ui_amount * price * Decimal::from(self.config.bps) / Decimal::from(10_000u32);
        let commission = commission.max(self.config.min_commission_usd);

        debug!(
            mint = %output_mint,
            ui_amount = %ui_amount,
            price = %price,
            commission = %commission,
            "Commission computed"
        );
        Ok(commission)
    }

    async fn token_decimals(&self, mint: &str) -> Result<u8> {
        if let Some(decimals) = self.decimals.lock().unwrap().get(mint) {
            return Ok(*decimals);
        }

        let info = self.rpc.get_mint_info(mint).await?;
        self.decimals
            .lock()
            .unwrap()
            .put(mint.to_string(), info.decimals);
        Ok(info.decimals)
    }
}
