//! Quote/swap aggregator client.
//!
//! The aggregator prices a swap route and returns an unsigned transaction;
//! a separate execution endpoint submits the signed transaction through the
//! aggregator's MEV-protected path.

use crate::config::QuoteApiConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed quote failures. Input-shaped rejections are never retried; only
/// `Api` and `Timeout` count against the quote circuit breaker.
#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    #[error("no route between {input_mint} and {output_mint}")]
    NoRoute {
        input_mint: String,
        output_mint: String,
    },

    #[error("insufficient balance for quote")]
    InsufficientBalance,

    #[error("amount below route minimum")]
    MinimumAmount,

    #[error("quote API error: {0}")]
    Api(String),

    #[error("quote API timed out")]
    Timeout,
}

impl QuoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QuoteError::Api(_) | QuoteError::Timeout)
    }
}

/// A quote request.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in smallest units.
    pub amount: u64,
    pub user_public_key: String,
    pub slippage_bps: u16,
}

/// One hop of the quoted route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHop {
    pub fee_amount: u64,
    pub fee_mint: String,
}

/// A priced route with its unsigned transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount: u64,
    pub output_amount: u64,
    pub price_impact_pct: Decimal,
    pub route_plan: Vec<RouteHop>,
    /// Base64-encoded unsigned transaction.
    pub unsigned_transaction: String,
    pub request_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    /// Sum of route fees denominated in the input mint.
    pub fn total_route_fees(&self) -> u64 {
        self.route_plan.iter().map(|hop| hop.fee_amount).sum()
    }

    /// Aggregate route fee in basis points of the input amount.
    pub fn fee_bps(&self) -> u64 {
        if self.input_amount == 0 {
            return 0;
        }
        self.total_route_fees() * 10_000 / self.input_amount
    }
}

/// Result of submitting a signed transaction through the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub signature: String,
    pub status: String,
}

/// The quote/swap API surface the core consumes.
#[async_trait]
pub trait QuoteApi: Send + Sync {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;

    /// Submit a signed transaction through the aggregator's execution
    /// endpoint (atomic-inclusion, sandwich-protected path).
    async fn execute_swap(
        &self,
        signed_tx_base64: &str,
        request_id: &str,
    ) -> Result<SwapResult, QuoteError>;

    /// Spot price of a token in USD.
    async fn get_token_price(&self, mint: &str) -> Result<Decimal, QuoteError>;
}

/// HTTP client for the aggregator.
pub struct QuoteClient {
    base_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl QuoteClient {
    pub fn new(config: &QuoteApiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http_client: reqwest::Client::new(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Map an error body onto the typed taxonomy. Aggregator error codes are
    /// uppercase snake; message matching is the fallback.
    fn classify_error(status: u16, body: &str) -> QuoteError {
        let lowered = body.to_lowercase();
        if lowered.contains("no_route") || lowered.contains("no route") {
            // Mints are filled in by the caller, which knows them.
            return QuoteError::NoRoute {
                input_mint: String::new(),
                output_mint: String::new(),
            };
        }
        if lowered.contains("insufficient") {
            return QuoteError::InsufficientBalance;
        }
        if lowered.contains("minimum") || lowered.contains("amount too small") {
            return QuoteError::MinimumAmount;
        }
        QuoteError::Api(format!("status {status}: {body}"))
    }
}

#[async_trait]
impl QuoteApi for QuoteClient {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        #[derive(Deserialize)]
        struct RawQuote {
            #[serde(rename = "inAmount")]
            in_amount: String,
            #[serde(rename = "outAmount")]
            out_amount: String,
            #[serde(rename = "priceImpactPct")]
            price_impact_pct: Decimal,
            #[serde(rename = "routePlan")]
            route_plan: Vec<RawHop>,
            #[serde(rename = "transaction")]
            transaction: String,
            #[serde(rename = "requestId")]
            request_id: String,
            #[serde(rename = "expiresAt")]
            expires_at: DateTime<Utc>,
        }
        #[derive(Deserialize)]
        struct RawHop {
            #[serde(rename = "feeAmount")]
            fee_amount: String,
            #[serde(rename = "feeMint")]
            fee_mint: String,
        }

        let url = format!("{}/quote", self.base_url);
        let response = self
            .request(self.http_client.get(&url).query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", &request.amount.to_string()),
                ("userPublicKey", request.user_public_key.as_str()),
                ("slippageBps", &request.slippage_bps.to_string()),
            ]))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteError::Timeout
                } else {
                    QuoteError::Api(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            let mut error = Self::classify_error(status, &body);
            if let QuoteError::NoRoute {
                input_mint,
                output_mint,
            } = &mut error
            {
                *input_mint = request.input_mint.clone();
                *output_mint = request.output_mint.clone();
            }
            return Err(error);
        }

        let raw: RawQuote = response
            .json()
            .await
            .map_err(|e| QuoteError::Api(format!("malformed quote response: {e}")))?;

        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| QuoteError::Api(format!("unparseable amount '{s}'")))
        };

        Ok(Quote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            input_amount: parse(&raw.in_amount)?,
            output_amount: parse(&raw.out_amount)?,
            price_impact_pct: raw.price_impact_pct,
            route_plan: raw
                .route_plan
                .iter()
                .map(|hop| {
                    Ok(RouteHop {
                        fee_amount: parse(&hop.fee_amount)?,
                        fee_mint: hop.fee_mint.clone(),
                    })
                })
                .collect::<Result<_, QuoteError>>()?,
            unsigned_transaction: raw.transaction,
            request_id: raw.request_id,
            expires_at: raw.expires_at,
        })
    }

    async fn execute_swap(
        &self,
        signed_tx_base64: &str,
        request_id: &str,
    ) -> Result<SwapResult, QuoteError> {
        #[derive(Deserialize)]
        struct RawResult {
            signature: String,
            status: String,
        }

        let url = format!("{}/execute", self.base_url);
        let response = self
            .request(self.http_client.post(&url).json(&serde_json::json!({
                "signedTransaction": signed_tx_base64,
                "requestId": request_id,
            })))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteError::Timeout
                } else {
                    QuoteError::Api(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        let raw: RawResult = response
            .json()
            .await
            .map_err(|e| QuoteError::Api(format!("malformed execute response: {e}")))?;

        Ok(SwapResult {
            signature: raw.signature,
            status: raw.status,
        })
    }

    async fn get_token_price(&self, mint: &str) -> Result<Decimal, QuoteError> {
        #[derive(Deserialize)]
        struct RawPrice {
            #[serde(rename = "usdPrice")]
            usd_price: Decimal,
        }

        let url = format!("{}/price", self.base_url);
        let response = self
            .request(self.http_client.get(&url).query(&[("ids", mint)]))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuoteError::Timeout
                } else {
                    QuoteError::Api(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        let prices: std::collections::HashMap<String, RawPrice> = response
            .json()
            .await
            .map_err(|e| QuoteError::Api(format!("malformed price response: {e}")))?;

        prices
            .get(mint)
            .map(|p| p.usd_price)
            .ok_or_else(|| QuoteError::Api(format!("no price for {mint}")))
    }
}
