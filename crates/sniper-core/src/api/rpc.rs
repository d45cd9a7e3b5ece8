//! Chain JSON-RPC client.
//!
//! Only the calls the core consumes are modeled. Failures are distinguished
//! as transport, timeout, rate-limit, and chain error so call sites can pick
//! a retry policy per category.

use crate::config::RpcConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of `simulateTransaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Chain-side error, if the transaction would fail.
    pub err: Option<serde_json::Value>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationResult {
    pub fn succeeded(&self) -> bool {
        self.err.is_none()
    }
}

/// Confirmation status for a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatus {
    pub slot: u64,
    /// Confirmation depth; `None` once rooted.
    pub confirmations: Option<u64>,
    pub err: Option<serde_json::Value>,
    pub confirmed: bool,
}

/// One entry from `getTokenLargestAccounts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenAccountBalance {
    pub address: String,
    pub amount: u64,
    pub decimals: u8,
}

/// Parsed mint account info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintInfo {
    pub supply: u64,
    pub decimals: u8,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
}

/// A token amount in smallest units plus its decimals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenAmount {
    pub amount: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

/// The chain RPC surface the core consumes.
#[async_trait]
pub trait RpcApi: Send + Sync {
    /// Simulate an unsigned transaction with `sigVerify=false` and
    /// `replaceRecentBlockhash=true` at `confirmed` commitment.
    async fn simulate_transaction(&self, tx_base64: &str) -> Result<SimulationResult>;

    async fn send_transaction(&self, tx_base64: &str) -> Result<String>;

    async fn get_signature_status(&self, signature: &str) -> Result<Option<TxStatus>>;

    /// Largest token accounts for a mint (the chain returns at most 20).
    async fn get_token_largest_accounts(&self, mint: &str) -> Result<Vec<TokenAccountBalance>>;

    async fn get_mint_info(&self, mint: &str) -> Result<MintInfo>;

    async fn get_token_supply(&self, mint: &str) -> Result<TokenAmount>;

    async fn get_token_account_balance(&self, account: &str) -> Result<TokenAmount>;

    async fn get_latest_blockhash(&self) -> Result<Blockhash>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// `value` wrapper used by commitment-aware RPC responses.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

/// HTTP JSON-RPC client.
pub struct RpcClient {
    http_url: String,
    http_client: reqwest::Client,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .expect("reqwest client construction only fails on invalid TLS config");
        Self {
            http_url: config.http_url.clone(),
            http_client,
        }
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.http_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("RPC {method} timed out"))
                } else {
                    Error::Http(e)
                }
            })?;

        if response.status().as_u16() == 429 {
            return Err(Error::RateLimited(format!("RPC {method} rate limited")));
        }

        let body: JsonRpcResponse<T> = response.json().await?;

        if let Some(error) = body.error {
            return Err(Error::Rpc {
                message: error.message,
                code: Some(error.code),
            });
        }

        body.result.ok_or_else(|| Error::Rpc {
            message: format!("RPC {method} returned no result"),
            code: None,
        })
    }
}

fn parse_amount(raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| Error::Rpc {
        message: format!("unparseable token amount '{raw}'"),
        code: None,
    })
}

#[async_trait]
impl RpcApi for RpcClient {
    async fn simulate_transaction(&self, tx_base64: &str) -> Result<SimulationResult> {
        #[derive(Deserialize)]
        struct RawSimulation {
            err: Option<serde_json::Value>,
            logs: Option<Vec<String>>,
            #[serde(rename = "unitsConsumed")]
            units_consumed: Option<u64>,
        }

        let params = serde_json::json!([tx_base64, {
            "sigVerify": false,
            "replaceRecentBlockhash": true,
            "commitment": "confirmed",
            "encoding": "base64",
        }]);

        let raw: WithContext<RawSimulation> =
            self.rpc_call("simulateTransaction", params).await?;

        Ok(SimulationResult {
            err: raw.value.err,
            logs: raw.value.logs.unwrap_or_default(),
            units_consumed: raw.value.units_consumed,
        })
    }

    async fn send_transaction(&self, tx_base64: &str) -> Result<String> {
        let params = serde_json::json!([tx_base64, {
            "encoding": "base64",
            "skipPreflight": true,
            "maxRetries": 0,
        }]);

        self.rpc_call("sendTransaction", params).await
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<TxStatus>> {
        #[derive(Deserialize)]
        struct RawStatus {
            slot: u64,
            confirmations: Option<u64>,
            err: Option<serde_json::Value>,
            #[serde(rename = "confirmationStatus")]
            confirmation_status: Option<String>,
        }

        let params = serde_json::json!([[signature], {"searchTransactionHistory": true}]);
        let raw: WithContext<Vec<Option<RawStatus>>> =
            self.rpc_call("getSignatureStatuses", params).await?;

        Ok(raw.value.into_iter().next().flatten().map(|s| TxStatus {
            slot: s.slot,
            confirmations: s.confirmations,
            confirmed: matches!(
                s.confirmation_status.as_deref(),
                Some("confirmed") | Some("finalized")
            ),
            err: s.err,
        }))
    }

    async fn get_token_largest_accounts(&self, mint: &str) -> Result<Vec<TokenAccountBalance>> {
        #[derive(Deserialize)]
        struct RawBalance {
            address: String,
            amount: String,
            decimals: u8,
        }

        let params = serde_json::json!([mint, {"commitment": "confirmed"}]);
        let raw: WithContext<Vec<RawBalance>> =
            self.rpc_call("getTokenLargestAccounts", params).await?;

        raw.value
            .into_iter()
            .map(|b| {
                Ok(TokenAccountBalance {
                    amount: parse_amount(&b.amount)?,
                    address: b.address,
                    decimals: b.decimals,
                })
            })
            .collect()
    }

    async fn get_mint_info(&self, mint: &str) -> Result<MintInfo> {
        #[derive(Deserialize)]
        struct RawAccount {
            data: RawData,
        }
        #[derive(Deserialize)]
        struct RawData {
            parsed: RawParsed,
        }
        #[derive(Deserialize)]
        struct RawParsed {
            info: RawMintInfo,
        }
        #[derive(Deserialize)]
        struct RawMintInfo {
            supply: String,
            decimals: u8,
            #[serde(rename = "mintAuthority")]
            mint_authority: Option<String>,
            #[serde(rename = "freezeAuthority")]
            freeze_authority: Option<String>,
        }

        let params = serde_json::json!([mint, {"encoding": "jsonParsed", "commitment": "confirmed"}]);
        let raw: WithContext<Option<RawAccount>> =
            self.rpc_call("getAccountInfo", params).await?;

        let account = raw.value.ok_or_else(|| Error::Rpc {
            message: format!("mint account {mint} not found"),
            code: None,
        })?;

        Ok(MintInfo {
            supply: parse_amount(&account.data.parsed.info.supply)?,
            decimals: account.data.parsed.info.decimals,
            mint_authority: account.data.parsed.info.mint_authority,
            freeze_authority: account.data.parsed.info.freeze_authority,
        })
    }

    async fn get_token_supply(&self, mint: &str) -> Result<TokenAmount> {
        #[derive(Deserialize)]
        struct RawAmount {
            amount: String,
            decimals: u8,
        }

        let params = serde_json::json!([mint, {"commitment": "confirmed"}]);
        let raw: WithContext<RawAmount> = self.rpc_call("getTokenSupply", params).await?;

        Ok(TokenAmount {
            amount: parse_amount(&raw.value.amount)?,
            decimals: raw.value.decimals,
        })
    }

    async fn get_token_account_balance(&self, account: &str) -> Result<TokenAmount> {
        #[derive(Deserialize)]
        struct RawAmount {
            amount: String,
            decimals: u8,
        }

        let params = serde_json::json!([account, {"commitment": "confirmed"}]);
        let raw: WithContext<RawAmount> =
            self.rpc_call("getTokenAccountBalance", params).await?;

        Ok(TokenAmount {
            amount: parse_amount(&raw.value.amount)?,
            decimals: raw.value.decimals,
        })
    }

    async fn get_latest_blockhash(&self) -> Result<Blockhash> {
        #[derive(Deserialize)]
        struct RawBlockhash {
            blockhash: String,
            #[serde(rename = "lastValidBlockHeight")]
            last_valid_block_height: u64,
        }

        let params = serde_json::json!([{"commitment": "confirmed"}]);
        let raw: WithContext<RawBlockhash> =
            self.rpc_call("getLatestBlockhash", params).await?;

        Ok(Blockhash {
            blockhash: raw.value.blockhash,
            last_valid_block_height: raw.value.last_valid_block_height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount("123").is_ok());
        assert!(parse_amount("12.5").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_simulation_success_flag() {
        let ok = SimulationResult {
            err: None,
            logs: vec![],
            units_consumed: Some(5_000),
        };
        assert!(ok.succeeded());

        let failed = SimulationResult {
            err: Some(serde_json::json!({"InstructionError": [0, "Custom"]})),
            logs: vec![],
            units_consumed: None,
        };
        assert!(!failed.succeeded());
    }
}
