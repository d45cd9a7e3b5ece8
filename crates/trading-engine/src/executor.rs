//! Order execution: filter, quote, sign, broadcast, confirm.
//!
//! Every outbound call goes through the named circuit breaker for that
//! dependency. Input-shaped quote rejections (no route, insufficient
//! balance) do not count against the breaker; only transport failures do.

use crate::commission::CommissionEngine;
use crate::filter::FilterEngine;
use crate::state_machine::OrderStateMachine;
use chrono::Utc;
use rust_decimal::Decimal;
use sniper_core::api::{QuoteApi, QuoteError, QuoteRequest, RpcApi};
use sniper_core::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use sniper_core::types::{
    ExecutionError, ExecutionErrorCode, FilterConfig, FilterPreset, Order, OrderState, Position,
    PositionStatus, TokenFacts,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vault::SessionEngine;

/// Breaker names for the executor's dependencies.
const BREAKER_RPC: &str = "rpc";
const BREAKER_QUOTE: &str = "quote-api";
const BREAKER_BUNDLE: &str = "mev-bundle";

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Simulate the unsigned transaction before signing.
    pub simulate_before_sign: bool,
    /// Confirmation poll cadence.
    pub confirm_poll_interval: Duration,
    /// Base for the 1s/2s/4s retry backoff.
    pub retry_backoff_base: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            simulate_before_sign: true,
            confirm_poll_interval: Duration::from_millis(500),
            retry_backoff_base: Duration::from_secs(1),
        }
    }
}

/// Per-order execution context supplied by the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub session_token: String,
    /// The selected wallet's public address, quoted against and used as the
    /// transaction fee payer.
    pub wallet_address: String,
    pub filter_config: FilterConfig,
    pub preset: FilterPreset,
    pub facts: TokenFacts,
}

/// A confirmed execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub order_id: Uuid,
    pub signature: String,
    pub slot: u64,
    pub input_amount: u64,
    pub output_amount: u64,
    pub price_impact_pct: Decimal,
    pub execution_time_ms: u64,
    pub position: Position,
    pub commission_usd: Option<Decimal>,
}

/// Drives orders through the state machine to confirmation.
pub struct OrderExecutor {
    rpc: Arc<dyn RpcApi>,
    quote: Arc<dyn QuoteApi>,
    sessions: Arc<SessionEngine>,
    breakers: Arc<CircuitBreakerRegistry>,
    machine: Arc<OrderStateMachine>,
    commission: Option<Arc<CommissionEngine>>,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(
        rpc: Arc<dyn RpcApi>,
        quote: Arc<dyn QuoteApi>,
        sessions: Arc<SessionEngine>,
        breakers: Arc<CircuitBreakerRegistry>,
        machine: Arc<OrderStateMachine>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            rpc,
            quote,
            sessions,
            breakers,
            machine,
            commission: None,
            config,
        }
    }

    pub fn with_commission(mut self, commission: Arc<CommissionEngine>) -> Self {
        self.commission = Some(commission);
        self
    }

    pub fn state_machine(&self) -> Arc<OrderStateMachine> {
        self.machine.clone()
    }

    /// Execute an order end to end. On error the order is left in FAILED
    /// with the same typed error that is returned.
    pub async fn execute_order(
        &self,
        order: &mut Order,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let started = Instant::now();
        info!(
            order_id = %order.id,
            mint = %order.config.output_mint,
            amount = order.config.amount,
            "Executing order"
        );

        // 1. Filter gate.
        let filter = FilterEngine::evaluate(&request.filter_config, request.preset, &request.facts);
        if !filter.passed {
            let names = filter.violated_filters().join(", ");
            return Err(self
                .fail(
                    order,
                    ExecutionErrorCode::FilterRejected,
                    format!("filters violated: {names}"),
                    0,
                )
                .await);
        }
        self.advance(order, OrderState::Validated { filter }).await?;

        // 2. Quote.
        let quote = match self.fetch_quote(order, request).await {
            Ok(quote) => quote,
            Err((code, message)) => return Err(self.fail(order, code, message, 0).await),
        };

        // 3. Pre-sign simulation.
        self.advance(order, OrderState::Simulating).await?;
        if self.config.simulate_before_sign {
            if let Err((code, message)) = self.simulate(&quote.unsigned_transaction).await {
                return Err(self.fail(order, code, message, 0).await);
            }
        }

        // 4. Sign through a scoped handle; the plaintext key lives only
        // inside this block and zeroes itself when the handle drops.
        self.advance(
            order,
            OrderState::Signing {
                quote_id: quote.request_id.clone(),
                expected_output: quote.output_amount,
                price_impact_pct: quote.price_impact_pct,
            },
        )
        .await?;

        let signed_tx = {
            let handle = match self.sessions.signing_handle(&request.session_token).await {
                Ok(handle) => handle,
                Err(e) => {
                    return Err(self
                        .fail(
                            order,
                            ExecutionErrorCode::Unknown,
                            format!("signing unavailable: {}", e.code()),
                            0,
                        )
                        .await)
                }
            };
            match handle.sign_transaction_base64(&quote.unsigned_transaction) {
                Ok(tx) => tx,
                Err(e) => {
                    return Err(self
                        .fail(
                            order,
                            ExecutionErrorCode::Unknown,
                            format!("transaction signing failed: {}", e.code()),
                            0,
                        )
                        .await)
                }
            }
        };

        // 5. Broadcast and confirm, with bounded retries.
        let (signature, slot, retries) = match self
            .broadcast_and_confirm(order, &signed_tx, &quote.request_id)
            .await
        {
            Ok(confirmed) => confirmed,
            Err((code, message, retries)) => {
                return Err(self.fail(order, code, message, retries).await)
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        self.advance(
            order,
            OrderState::Confirmed {
                signature: signature.clone(),
                slot,
                input_amount: order.config.amount,
                output_amount: quote.output_amount,
                price_impact_pct: quote.price_impact_pct,
                execution_time_ms,
            },
        )
        .await?;

        let position = build_position(order, &signature, quote.output_amount);

        let commission_usd = match &self.commission {
            Some(engine) => match engine
                .compute(&order.config.output_mint, quote.output_amount)
                .await
            {
                Ok(amount) => Some(amount),
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Commission computation failed");
                    None
                }
            },
            None => None,
        };

        info!(
            order_id = %order.id,
            signature = %signature,
            slot,
            retries,
            execution_time_ms,
            "Order confirmed"
        );

        Ok(ExecutionOutcome {
            order_id: order.id,
            signature,
            slot,
            input_amount: order.config.amount,
            output_amount: quote.output_amount,
            price_impact_pct: quote.price_impact_pct,
            execution_time_ms,
            position,
            commission_usd,
        })
    }

    // Private methods

    async fn fetch_quote(
        &self,
        order: &Order,
        request: &ExecutionRequest,
    ) -> Result<sniper_core::api::Quote, (ExecutionErrorCode, String)> {
        let breaker = self.breakers.get(BREAKER_QUOTE);
        let quote_request = QuoteRequest {
            input_mint: order.config.input_mint.clone(),
            output_mint: order.config.output_mint.clone(),
            amount: order.config.amount,
            user_public_key: request.wallet_address.clone(),
            slippage_bps: order.config.slippage_bps,
        };

        // Only transient failures count against the breaker; a route or
        // balance rejection is a fact about the request, not the dependency.
        let result = breaker
            .execute(async {
                match self.quote.get_quote(&quote_request).await {
                    Err(e) if e.is_transient() => Err(e),
                    other => Ok(other),
                }
            })
            .await;

        match result {
            Ok(Ok(quote)) => Ok(quote),
            Ok(Err(e)) => Err(map_quote_error(&e)),
            Err(CircuitBreakerError::Open { .. }) => Err((
                ExecutionErrorCode::NetworkError,
                "quote API circuit open".to_string(),
            )),
            Err(CircuitBreakerError::Inner(e)) => Err(map_quote_error(&e)),
        }
    }

    async fn simulate(&self, unsigned_tx: &str) -> Result<(), (ExecutionErrorCode, String)> {
        let breaker = self.breakers.get(BREAKER_RPC);
        match breaker.execute(self.rpc.simulate_transaction(unsigned_tx)).await {
            Ok(sim) if sim.succeeded() => Ok(()),
            Ok(sim) => Err((
                ExecutionErrorCode::TransactionFailed,
                format!("simulation rejected: {:?}", sim.err),
            )),
            Err(CircuitBreakerError::Open { .. }) => Err((
                ExecutionErrorCode::NetworkError,
                "RPC circuit open".to_string(),
            )),
            Err(CircuitBreakerError::Inner(e)) => {
                Err((ExecutionErrorCode::NetworkError, e.to_string()))
            }
        }
    }

    /// Broadcast the signed transaction and poll for confirmation, retrying
    /// on timeout or stale blockhash with 1s/2s/4s backoff.
    async fn broadcast_and_confirm(
        &self,
        order: &mut Order,
        signed_tx: &str,
        request_id: &str,
    ) -> Result<(String, u64, u32), (ExecutionErrorCode, String, u32)> {
        let max_retries = order.config.max_retries;
        let mut retry: u32 = 0;

        loop {
            let signature = match self.broadcast(order, signed_tx, request_id).await {
                Ok(signature) => signature,
                Err((code, message)) => {
                    if code == ExecutionErrorCode::NetworkError && retry < max_retries {
                        retry += 1;
                        self.backoff(retry).await;
                        continue;
                    }
                    return Err((code, message, retry));
                }
            };

            self.note_broadcast(order, &signature)
                .await
                .map_err(|(c, m)| (c, m, retry))?;

            match self.confirm(order, &signature).await {
                ConfirmOutcome::Confirmed(slot) => return Ok((signature, slot, retry)),
                ConfirmOutcome::TimedOut => {
                    if retry < max_retries {
                        retry += 1;
                        debug!(order_id = %order.id, retry, "Confirmation timed out, retrying");
                        self.backoff(retry).await;
                        continue;
                    }
                    return Err((
                        ExecutionErrorCode::MaxRetriesExceeded,
                        format!("confirmation timed out after {} attempts", retry + 1),
                        retry,
                    ));
                }
                ConfirmOutcome::ChainReject(reason) => {
                    // Stale blockhashes are worth a resend; anything else is
                    // the chain's final word.
                    if reason.contains("Blockhash") && retry < max_retries {
                        retry += 1;
                        self.backoff(retry).await;
                        continue;
                    }
                    return Err((ExecutionErrorCode::TransactionFailed, reason, retry));
                }
            }
        }
    }

    async fn broadcast(
        &self,
        order: &Order,
        signed_tx: &str,
        request_id: &str,
    ) -> Result<String, (ExecutionErrorCode, String)> {
        if order.config.mev_protection {
            let breaker = self.breakers.get(BREAKER_BUNDLE);
            match breaker.execute(self.quote.execute_swap(signed_tx, request_id)).await {
                Ok(result) => Ok(result.signature),
                Err(CircuitBreakerError::Open { .. }) => Err((
                    ExecutionErrorCode::NetworkError,
                    "MEV bundle endpoint circuit open".to_string(),
                )),
                Err(CircuitBreakerError::Inner(e)) => {
                    Err((ExecutionErrorCode::NetworkError, e.to_string()))
                }
            }
        } else {
            let breaker = self.breakers.get(BREAKER_RPC);
            match breaker.execute(self.rpc.send_transaction(signed_tx)).await {
                Ok(signature) => Ok(signature),
                Err(CircuitBreakerError::Open { .. }) => Err((
                    ExecutionErrorCode::NetworkError,
                    "RPC circuit open".to_string(),
                )),
                Err(CircuitBreakerError::Inner(e)) => {
                    Err((ExecutionErrorCode::NetworkError, e.to_string()))
                }
            }
        }
    }

    async fn note_broadcast(
        &self,
        order: &mut Order,
        signature: &str,
    ) -> Result<(), (ExecutionErrorCode, String)> {
        let next = match &order.state {
            OrderState::Signing { .. } => OrderState::Broadcasting {
                signature: signature.to_string(),
                sent_at: Utc::now(),
            },
            OrderState::Confirming {
                confirmation_depth, ..
            } => OrderState::Confirming {
                signature: signature.to_string(),
                sent_at: Utc::now(),
                confirmation_depth: confirmation_depth + 1,
            },
            other => {
                // Broadcast is only reachable from SIGNING or a retry.
                panic!("broadcast from unexpected state {}", other.name());
            }
        };
        self.advance(order, next)
            .await
            .map_err(|e| (e.code, e.message))?;

        if matches!(order.state, OrderState::Broadcasting { .. }) {
            self.advance(
                order,
                OrderState::Confirming {
                    signature: signature.to_string(),
                    sent_at: Utc::now(),
                    confirmation_depth: 0,
                },
            )
            .await
            .map_err(|e| (e.code, e.message))?;
        }
        Ok(())
    }

    async fn confirm(&self, order: &Order, signature: &str) -> ConfirmOutcome {
        let breaker = self.breakers.get(BREAKER_RPC);
        let deadline = Instant::now() + Duration::from_millis(order.config.timeout_ms);

        while Instant::now() < deadline {
            match breaker.execute(self.rpc.get_signature_status(signature)).await {
                Ok(Some(status)) => {
                    if let Some(err) = &status.err {
                        return ConfirmOutcome::ChainReject(format!("{err:?}"));
                    }
                    if status.confirmed {
                        return ConfirmOutcome::Confirmed(status.slot);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Transport trouble during polling; the deadline bounds it.
                    debug!(order_id = %order.id, error = %e, "Status poll failed");
                }
            }
            tokio::time::sleep(self.config.confirm_poll_interval).await;
        }

        ConfirmOutcome::TimedOut
    }

    async fn backoff(&self, retry: u32) {
        let delay = self
            .config
            .retry_backoff_base
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        tokio::time::sleep(delay).await;
    }

    async fn advance(
        &self,
        order: &mut Order,
        next: OrderState,
    ) -> Result<(), ExecutionError> {
        self.machine.advance(order, next).await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "Failed to persist order transition");
            ExecutionError::new(ExecutionErrorCode::Unknown, "order persistence failed")
        })
    }

    async fn fail(
        &self,
        order: &mut Order,
        code: ExecutionErrorCode,
        message: String,
        retries: u32,
    ) -> ExecutionError {
        match self.machine.fail(order, code, message.clone(), retries).await {
            Ok(error) => error,
            Err(persist) => {
                error!(order_id = %order.id, error = %persist, "Failed to persist order failure");
                ExecutionError::new(code, message)
            }
        }
    }
}

enum ConfirmOutcome {
    Confirmed(u64),
    TimedOut,
    ChainReject(String),
}

fn map_quote_error(error: &QuoteError) -> (ExecutionErrorCode, String) {
    match error {
        QuoteError::NoRoute { .. } => (ExecutionErrorCode::NoRoute, error.to_string()),
        QuoteError::MinimumAmount => (ExecutionErrorCode::NoRoute, error.to_string()),
        QuoteError::InsufficientBalance => {
            (ExecutionErrorCode::InsufficientBalance, error.to_string())
        }
        QuoteError::Api(message) => (ExecutionErrorCode::NetworkError, message.clone()),
        QuoteError::Timeout => (
            ExecutionErrorCode::NetworkError,
            "quote API timed out".to_string(),
        ),
    }
}

fn build_position(order: &Order, signature: &str, output_amount: u64) -> Position {
    // Entry price in SOL per smallest token unit; monitors price on the
    // same scale.
    let entry_price = if output_amount > 0 {
        Decimal::from(order.config.amount)
            / Decimal::from(1_000_000_000u64)
            / Decimal::from(output_amount)
    } else {
        Decimal::ZERO
    };

    Position {
        id: Uuid::new_v4(),
        order_ref: order.id,
        user_ref: order.user_ref.clone(),
        mint: order.config.output_mint.clone(),
        entry_signature: signature.to_string(),
        entry_input_amount: order.config.amount,
        entry_output_amount: output_amount,
        current_balance: output_amount,
        entry_price,
        take_profit_pct: order.config.take_profit_pct,
        stop_loss_pct: order.config.stop_loss_pct,
        trailing_stop_pct: order.config.trailing_stop_pct,
        highest_price: entry_price,
        status: PositionStatus::Open,
        exit_signature: None,
        realized_pnl_sol: None,
        opened_at: Utc::now(),
        closed_at: None,
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::{FakeQuoteApi, ScriptedRpc};
    use super::*;
    use sniper_core::api::TxStatus;
    use sniper_core::circuit_breaker::CircuitBreakerConfig;
    use sniper_core::db::{InMemoryOrderSink, InMemoryWalletDirectory};
    use sniper_core::store::MemoryStore;
    use sniper_core::types::OrderConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use vault::WalletVault;

    const PASSWORD: &str = "executor12";
    const MINT: &str = "MintOut11111111111111111111111111111111111111";

    struct Harness {
        executor: OrderExecutor,
        sink: Arc<InMemoryOrderSink>,
        session_token: String,
        wallet_address: String,
        sessions: Arc<SessionEngine>,
    }

    async fn harness(rpc: ScriptedRpc, quote_api: FakeQuoteApi) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let wallets = Arc::new(InMemoryWalletDirectory::new());
        let vault = WalletVault::new(wallets.clone());
        let created = vault.create_wallet("user", PASSWORD, None).await.unwrap();
        let sessions = Arc::new(SessionEngine::new(store.clone(), wallets));
        let session_token = sessions.unlock("user", PASSWORD, false).await.unwrap();

        let sink = Arc::new(InMemoryOrderSink::new());
        let machine = Arc::new(OrderStateMachine::new(sink.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            None,
            CircuitBreakerConfig {
                persistence_enabled: false,
                ..Default::default()
            },
        ));

        let executor = OrderExecutor::new(
            Arc::new(rpc),
            Arc::new(quote_api),
            sessions.clone(),
            breakers,
            machine,
            ExecutorConfig {
                confirm_poll_interval: Duration::from_millis(5),
                retry_backoff_base: Duration::from_millis(5),
                ..Default::default()
            },
        );

        Harness {
            executor,
            sink,
            session_token,
            wallet_address: created.address,
            sessions,
        }
    }

    fn request(h: &Harness) -> ExecutionRequest {
        ExecutionRequest {
            session_token: h.session_token.clone(),
            wallet_address: h.wallet_address.clone(),
            filter_config: FilterConfig::default(),
            preset: FilterPreset::Custom,
            facts: TokenFacts::new(MINT),
        }
    }

    fn order() -> Order {
        Order::new(
            "user",
            OrderConfig {
                output_mint: MINT.to_string(),
                amount: 1_000_000_000,
                timeout_ms: 500,
                max_retries: 2,
                take_profit_pct: Some(Decimal::from(50)),
                stop_loss_pct: Some(Decimal::from(20)),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_happy_path_reaches_confirmed() {
        let h = harness(ScriptedRpc::confirming_after(1), FakeQuoteApi { no_route: false }).await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        let outcome = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap();

        assert_eq!(outcome.signature, "sig-abc");
        assert_eq!(outcome.slot, 42);
        assert!(outcome.output_amount > 0);
        assert_eq!(outcome.position.status, PositionStatus::Open);
        assert_eq!(outcome.position.take_profit_pct, Some(Decimal::from(50)));
        assert!(matches!(order.state, OrderState::Confirmed { .. }));

        let path: Vec<String> = h
            .sink
            .transitions_for(order.id)
            .await
            .into_iter()
            .map(|(_, to)| to)
            .collect();
        assert_eq!(
            path,
            vec![
                "VALIDATED",
                "SIMULATING",
                "SIGNING",
                "BROADCASTING",
                "CONFIRMING",
                "CONFIRMED"
            ]
        );
    }

    #[tokio::test]
    async fn test_filter_reject_lists_violation() {
        let h = harness(ScriptedRpc::confirming_after(0), FakeQuoteApi { no_route: false }).await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        let mut req = request(&h);
        req.filter_config.min_liquidity_sol = Some(Decimal::from(10));
        req.facts.liquidity_sol = Some(Decimal::from(2));

        let error = h
            .executor
            .execute_order(&mut order, &req)
            .await
            .unwrap_err();

        assert_eq!(error.code, ExecutionErrorCode::FilterRejected);
        assert!(error.message.contains("min_liquidity_sol"));
        assert!(matches!(order.state, OrderState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_no_route_is_typed() {
        let h = harness(ScriptedRpc::confirming_after(0), FakeQuoteApi { no_route: true }).await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        let error = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap_err();
        assert_eq!(error.code, ExecutionErrorCode::NoRoute);
    }

    #[tokio::test]
    async fn test_chain_reject_surfaces_reason() {
        let h = harness(
            ScriptedRpc::rejecting("InstructionError: custom program error"),
            FakeQuoteApi { no_route: false },
        )
        .await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        let error = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap_err();
        assert_eq!(error.code, ExecutionErrorCode::TransactionFailed);
        assert!(error.message.contains("InstructionError"));
    }

    #[tokio::test]
    async fn test_stale_blockhash_is_retried() {
        let h = harness(
            ScriptedRpc::rejecting("BlockhashNotFound"),
            FakeQuoteApi { no_route: false },
        )
        .await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        // First confirm poll rejects with a stale blockhash, the resend
        // confirms (scripted statuses exhausted -> confirmed).
        let outcome = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap();
        assert_eq!(outcome.signature, "sig-abc");
        assert!(matches!(order.state, OrderState::Confirmed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_exhausts_retries() {
        // Never confirms within the 60ms budget.
        let rpc = ScriptedRpc {
            statuses: Mutex::new(VecDeque::new()),
            sends: Mutex::new(0),
        };
        // Pre-load enough Nones to outlast every attempt.
        for _ in 0..1_000 {
            rpc.statuses.lock().unwrap().push_back(None);
        }

        let h = harness(rpc, FakeQuoteApi { no_route: false }).await;
        let mut order = Order::new(
            "user",
            OrderConfig {
                output_mint: MINT.to_string(),
                amount: 1_000_000_000,
                timeout_ms: 60,
                max_retries: 1,
                ..Default::default()
            },
        );
        h.executor.state_machine().create(&order).await.unwrap();

        let error = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap_err();
        assert_eq!(error.code, ExecutionErrorCode::MaxRetriesExceeded);
        match &order.state {
            OrderState::Failed { retry_count, .. } => assert_eq!(*retry_count, 1),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_destroyed_session_fails_before_broadcast() {
        let h = harness(ScriptedRpc::confirming_after(0), FakeQuoteApi { no_route: false }).await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();

        h.sessions.destroy(&h.session_token).await.unwrap();

        let error = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap_err();
        assert!(error.message.contains("SESSION"));
        assert!(matches!(order.state, OrderState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_mev_path_uses_bundle_endpoint() {
        let h = harness(ScriptedRpc::confirming_after(0), FakeQuoteApi { no_route: false }).await;
        let mut order = order();
        order.config.mev_protection = true;
        h.executor.state_machine().create(&order).await.unwrap();

        let outcome = h
            .executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap();
        assert_eq!(outcome.signature, "bundle-sig");
    }

    #[tokio::test]
    async fn test_recorded_path_is_monotonic() {
        let h = harness(ScriptedRpc::confirming_after(2), FakeQuoteApi { no_route: false }).await;
        let mut order = order();
        h.executor.state_machine().create(&order).await.unwrap();
        h.executor
            .execute_order(&mut order, &request(&h))
            .await
            .unwrap();

        // Every recorded (from, to) pair must be a legal edge.
        let legal = |from: &str, to: &str| match from {
            "PENDING" => matches!(to, "VALIDATED" | "FAILED"),
            "VALIDATED" => matches!(to, "SIMULATING" | "FAILED"),
            "SIMULATING" => matches!(to, "SIGNING" | "FAILED"),
            "SIGNING" => matches!(to, "BROADCASTING" | "FAILED"),
            "BROADCASTING" => matches!(to, "CONFIRMING" | "FAILED"),
            "CONFIRMING" => matches!(to, "CONFIRMING" | "CONFIRMED" | "FAILED"),
            _ => false,
        };
        for (from, to) in h.sink.transitions_for(order.id).await {
            assert!(legal(&from, &to), "illegal edge {from} -> {to}");
        }
    }
}
