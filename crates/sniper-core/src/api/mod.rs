//! Outbound API clients: chain RPC and the quote/swap aggregator.

pub mod quote;
pub mod rpc;

pub use quote::{Quote, QuoteApi, QuoteClient, QuoteError, QuoteRequest, RouteHop, SwapResult};
pub use rpc::{
    Blockhash, MintInfo, RpcApi, RpcClient, SimulationResult, TokenAccountBalance, TokenAmount,
    TxStatus,
};
