//! End-to-end scenarios over in-memory infrastructure: discovery facts in,
//! screening, filtering, execution, position monitoring, and exits.

use async_trait::async_trait;
use chrono::Utc;
use honeypot::{
    DetectorConfig, HoneypotDetector, HoneypotProvider, SimulationConfig, SimulationProvider,
};
use risk_manager::{
    evaluate_exit, ExitContext, ExitExecutor, MonitorConfig, PositionMonitor, PriceFeed,
    RugMonitor, RugMonitorConfig, RugWatchTarget,
};
use rust_decimal::Decimal;
use sniper_core::api::{
    Blockhash, MintInfo, Quote, QuoteApi, QuoteError, QuoteRequest, RpcApi, SimulationResult,
    SwapResult, TokenAccountBalance, TokenAmount, TxStatus,
};
use sniper_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use sniper_core::config::UnknownTokenPolicy;
use sniper_core::db::{
    InMemoryOrderSink, InMemoryPositionStore, InMemoryWalletDirectory, PositionStore,
};
use sniper_core::store::MemoryStore;
use sniper_core::types::token::WSOL_MINT;
use sniper_core::types::{
    ExecutionErrorCode, ExitTrigger, FilterConfig, FilterPreset, Position, PositionStatus,
    PriorityFeeTier, RugReason, RugSeverity,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trading_engine::orchestrator::OrchestratorConfig;
use trading_engine::{
    ExecutorConfig, Orchestrator, OrderExecutor, OrderStateMachine, TradeOutcome, TradeRequest,
};
use uuid::Uuid;
use vault::{RotationStrategy, SessionEngine, WalletRotator, WalletVault};

const PASSWORD: &str = "endtoend99";
const MINT: &str = "TokenT11111111111111111111111111111111111111";

fn unsigned_tx() -> String {
    use base64::Engine;
    let mut tx = vec![1u8];
    tx.extend_from_slice(&[0u8; 64]);
    tx.extend_from_slice(b"swap message bytes");
    base64::engine::general_purpose::STANDARD.encode(tx)
}

/// One fake chain backing both the RPC and the quote aggregator.
struct FakeChain {
    /// Whether a token -> SOL route exists.
    sell_route: bool,
    /// Tokens received for the buy leg.
    buy_output: u64,
    /// Lamports received for selling the full position balance.
    sell_output_lamports: u64,
    /// Largest holder balances for holder analysis.
    largest: Vec<u64>,
    supply: u64,
    /// Pool vault balances served in order; the last repeats.
    vault_balances: Mutex<VecDeque<u64>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            sell_route: true,
            buy_output: 5_000_000,
            sell_output_lamports: 95_000_000,
            largest: vec![100_000, 50_000, 25_000],
            supply: 10_000_000,
            vault_balances: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl QuoteApi for FakeChain {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let selling = request.output_mint == WSOL_MINT;
        if selling && !self.sell_route {
            return Err(QuoteError::NoRoute {
                input_mint: request.input_mint.clone(),
                output_mint: request.output_mint.clone(),
            });
        }
        let output_amount = if selling {
            self.sell_output_lamports
        } else {
            self.buy_output
        };
        Ok(Quote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            input_amount: request.amount,
            output_amount,
            price_impact_pct: Decimal::new(12, 1),
            route_plan: vec![sniper_core::api::RouteHop {
                fee_amount: request.amount / 10_000, // 1 bp
                fee_mint: request.input_mint.clone(),
            }],
            unsigned_transaction: unsigned_tx(),
            request_id: "req-e2e".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(1),
        })
    }

    async fn execute_swap(&self, _tx: &str, _id: &str) -> Result<SwapResult, QuoteError> {
        Ok(SwapResult {
            signature: "bundle-sig-e2e".to_string(),
            status: "submitted".to_string(),
        })
    }

    async fn get_token_price(&self, _mint: &str) -> Result<Decimal, QuoteError> {
        Ok(Decimal::ONE)
    }
}

#[async_trait]
impl RpcApi for FakeChain {
    async fn simulate_transaction(&self, _tx: &str) -> sniper_core::Result<SimulationResult> {
        Ok(SimulationResult {
            err: None,
            logs: vec![],
            units_consumed: Some(20_000),
        })
    }

    async fn send_transaction(&self, _tx: &str) -> sniper_core::Result<String> {
        Ok("sig-e2e".to_string())
    }

    async fn get_signature_status(&self, _sig: &str) -> sniper_core::Result<Option<TxStatus>> {
        Ok(Some(TxStatus {
            slot: 99,
            confirmations: None,
            err: None,
            confirmed: true,
        }))
    }

    async fn get_token_largest_accounts(
        &self,
        _mint: &str,
    ) -> sniper_core::Result<Vec<TokenAccountBalance>> {
        Ok(self
            .largest
            .iter()
            .enumerate()
            .map(|(i, &amount)| TokenAccountBalance {
                address: format!("holder{i}"),
                amount,
                decimals: 6,
            })
            .collect())
    }

    async fn get_mint_info(&self, _mint: &str) -> sniper_core::Result<MintInfo> {
        Ok(MintInfo {
            supply: self.supply,
            decimals: 6,
            mint_authority: None,
            freeze_authority: None,
        })
    }

    async fn get_token_supply(&self, _mint: &str) -> sniper_core::Result<TokenAmount> {
        Ok(TokenAmount {
            amount: self.supply,
            decimals: 6,
        })
    }

    async fn get_token_account_balance(&self, _account: &str) -> sniper_core::Result<TokenAmount> {
        let mut balances = self.vault_balances.lock().unwrap();
        let amount = match balances.len() {
            0 => 100_000_000_000,
            1 => balances[0],
            _ => balances.pop_front().unwrap(),
        };
        Ok(TokenAmount { amount, decimals: 9 })
    }

    async fn get_latest_blockhash(&self) -> sniper_core::Result<Blockhash> {
        Ok(Blockhash {
            blockhash: "hash".to_string(),
            last_valid_block_height: 1,
        })
    }
}

struct World {
    orchestrator: Orchestrator,
    positions: Arc<InMemoryPositionStore>,
    session_token: String,
    wallet_address: String,
    executor: Arc<OrderExecutor>,
}

/// Wire the full stack over one fake chain.
async fn world(chain: Arc<FakeChain>) -> World {
    let store = Arc::new(MemoryStore::new());
    let wallets = Arc::new(InMemoryWalletDirectory::new());
    let vault = WalletVault::new(wallets.clone());
    let created = vault.create_wallet("user-1", PASSWORD, None).await.unwrap();
    let sessions = Arc::new(SessionEngine::new(store.clone(), wallets.clone()));
    let session_token = sessions.unlock("user-1", PASSWORD, false).await.unwrap();

    let simulation = Arc::new(SimulationProvider::new(
        chain.clone(),
        chain.clone(),
        SimulationConfig::default(),
    ));
    let detector = Arc::new(HoneypotDetector::new(
        vec![simulation as Arc<dyn HoneypotProvider>],
        store.clone(),
        DetectorConfig::default(),
    ));
    // Populate the verdict cache the way the discovery pipeline would.
    detector.check_now(MINT).await.unwrap();

    let rotator = Arc::new(WalletRotator::new(wallets, store.clone()));
    let machine = Arc::new(OrderStateMachine::new(Arc::new(InMemoryOrderSink::new())));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        None,
        CircuitBreakerConfig {
            persistence_enabled: false,
            ..Default::default()
        },
    ));
    let executor = Arc::new(OrderExecutor::new(
        chain.clone(),
        chain.clone(),
        sessions,
        breakers,
        machine,
        ExecutorConfig {
            confirm_poll_interval: Duration::from_millis(5),
            retry_backoff_base: Duration::from_millis(5),
            ..Default::default()
        },
    ));

    let positions = Arc::new(InMemoryPositionStore::new());
    let orchestrator = Orchestrator::new(
        detector,
        rotator,
        executor.clone(),
        positions.clone(),
        OrchestratorConfig {
            unknown_token_policy: UnknownTokenPolicy::Reject,
            ..Default::default()
        },
    );

    World {
        orchestrator,
        positions,
        session_token,
        wallet_address: created.address,
        executor,
    }
}

fn trade_request(world: &World, liquidity_sol: i64) -> TradeRequest {
    TradeRequest {
        user_ref: "user-1".to_string(),
        session_token: world.session_token.clone(),
        output_mint: MINT.to_string(),
        amount_lamports: 1_000_000_000,
        take_profit_pct: Some(Decimal::from(50)),
        stop_loss_pct: Some(Decimal::from(20)),
        trailing_stop_pct: None,
        strategy: RotationStrategy::PrimaryOnly,
        preset: FilterPreset::Custom,
        filter_config: Some(FilterConfig {
            min_liquidity_sol: Some(Decimal::from(5)),
            max_risk_score: Some(70),
            ..Default::default()
        }),
        observed_liquidity_sol: Some(Decimal::from(liquidity_sol)),
        mev_protection: false,
    }
}

fn open_position(entry_lamports: u64, tp: Option<i64>, sl: Option<i64>) -> Position {
    Position {
        id: Uuid::new_v4(),
        order_ref: Uuid::new_v4(),
        user_ref: "user-1".to_string(),
        mint: MINT.to_string(),
        entry_signature: "entry-sig".to_string(),
        entry_input_amount: entry_lamports,
        entry_output_amount: 1_000_000,
        current_balance: 1_000_000,
        entry_price: Decimal::new(1, 3),
        take_profit_pct: tp.map(Decimal::from),
        stop_loss_pct: sl.map(Decimal::from),
        trailing_stop_pct: None,
        highest_price: Decimal::new(1, 3),
        status: PositionStatus::Open,
        exit_signature: None,
        realized_pnl_sol: None,
        opened_at: Utc::now(),
        closed_at: None,
    }
}

#[tokio::test]
async fn s1_happy_path_confirms_and_opens_position() {
    let world = world(Arc::new(FakeChain::default())).await;

    match world
        .orchestrator
        .handle(trade_request(&world, 12))
        .await
        .unwrap()
    {
        TradeOutcome::Confirmed {
            signature,
            output_amount,
            position,
            ..
        } => {
            assert!(!signature.is_empty());
            assert!(output_amount > 0);
            assert_eq!(position.status, PositionStatus::Open);
            assert_eq!(position.take_profit_pct, Some(Decimal::from(50)));
            assert_eq!(position.stop_loss_pct, Some(Decimal::from(20)));
            assert_eq!(world.positions.list_open().await.unwrap().len(), 1);
        }
        TradeOutcome::Rejected { code, message } => {
            panic!("expected confirmation, got {code:?}: {message}")
        }
    }
}

#[tokio::test]
async fn s2_honeypot_never_reaches_execution() {
    // No sell route: the simulation layer marks the token a honeypot.
    let world = world(Arc::new(FakeChain {
        sell_route: false,
        ..Default::default()
    }))
    .await;

    match world
        .orchestrator
        .handle(trade_request(&world, 12))
        .await
        .unwrap()
    {
        TradeOutcome::Rejected { code, message } => {
            assert_eq!(code, ExecutionErrorCode::FilterRejected);
            assert!(message.contains("honeypot"), "message: {message}");
        }
        TradeOutcome::Confirmed { .. } => panic!("honeypot must never confirm"),
    }
    assert!(world.positions.list_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn s3_filter_reject_names_liquidity() {
    let world = world(Arc::new(FakeChain::default())).await;

    let mut request = trade_request(&world, 2);
    request.filter_config = Some(FilterConfig {
        min_liquidity_sol: Some(Decimal::from(10)),
        ..Default::default()
    });

    match world.orchestrator.handle(request).await.unwrap() {
        TradeOutcome::Rejected { code, message } => {
            assert_eq!(code, ExecutionErrorCode::FilterRejected);
            assert!(message.contains("min_liquidity_sol"), "message: {message}");
        }
        TradeOutcome::Confirmed { .. } => panic!("filter must reject"),
    }
    assert!(world.positions.list_open().await.unwrap().is_empty());
}

struct FixedFeed(Decimal);

#[async_trait]
impl PriceFeed for FixedFeed {
    async fn price(&self, _position: &Position) -> sniper_core::Result<Decimal> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn s4_take_profit_closes_with_gain() {
    // Entry 1 SOL; selling the position returns 2 SOL.
    let chain = Arc::new(FakeChain {
        sell_output_lamports: 2_000_000_000,
        ..Default::default()
    });
    let world = world(chain).await;

    let monitor = Arc::new(PositionMonitor::new(
        Arc::new(FixedFeed(Decimal::new(15, 4))), // entry 0.001 -> +50%
        world.positions.clone(),
        MonitorConfig {
            tick_interval: Duration::from_millis(10),
        },
    ));
    let mut signals = monitor.take_signal_receiver().unwrap();

    let mut position = open_position(1_000_000_000, Some(50), Some(20));
    world.positions.insert(&position).await.unwrap();
    monitor.watch(position.clone());

    let signal = tokio::time::timeout(Duration::from_secs(2), signals.recv())
        .await
        .expect("take-profit signal")
        .unwrap();
    assert_eq!(signal.trigger, ExitTrigger::TakeProfit);

    let exits = ExitExecutor::new(world.executor.clone(), world.positions.clone());
    let outcome = exits
        .exit_position(
            &mut position,
            signal.trigger,
            &ExitContext {
                session_token: world.session_token.clone(),
                wallet_address: world.wallet_address.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, PositionStatus::ClosedProfit);
    assert!(outcome.realized_pnl_sol > Decimal::ZERO);
}

#[tokio::test]
async fn s5_stop_loss_closes_with_loss() {
    // Entry 3 SOL; selling returns 2 SOL.
    let chain = Arc::new(FakeChain {
        sell_output_lamports: 2_000_000_000,
        ..Default::default()
    });
    let world = world(chain).await;

    // -30% breaches the 20% stop.
    let mut position = open_position(3_000_000_000, Some(50), Some(20));
    assert_eq!(
        evaluate_exit(&position, Decimal::new(7, 4)),
        Some(ExitTrigger::StopLoss)
    );

    world.positions.insert(&position).await.unwrap();
    let exits = ExitExecutor::new(world.executor.clone(), world.positions.clone());
    let outcome = exits
        .exit_position(
            &mut position,
            ExitTrigger::StopLoss,
            &ExitContext {
                session_token: world.session_token.clone(),
                wallet_address: world.wallet_address.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, PositionStatus::ClosedLoss);
    assert!(outcome.realized_pnl_sol < Decimal::ZERO);
}

#[tokio::test]
async fn s6_rug_exit_is_fast_and_urgent() {
    // Pool drains from 100 SOL to 10 SOL between observations.
    let chain = Arc::new(FakeChain {
        sell_output_lamports: 100_000_000,
        vault_balances: Mutex::new(VecDeque::from([100_000_000_000, 10_000_000_000])),
        ..Default::default()
    });
    let world = world(chain.clone()).await;

    let rug_monitor = Arc::new(RugMonitor::new(
        chain,
        RugMonitorConfig {
            tick_interval: Duration::from_millis(10),
        },
    ));
    let mut alerts = rug_monitor.take_alert_receiver().unwrap();

    let mut position = open_position(1_000_000_000, None, None);
    world.positions.insert(&position).await.unwrap();

    let started = Instant::now();
    rug_monitor.watch(RugWatchTarget {
        position_id: position.id,
        mint: position.mint.clone(),
        pool_quote_vault: Some("Vault111".to_string()),
    });

    let alert = tokio::time::timeout(Duration::from_secs(2), alerts.recv())
        .await
        .expect("rug alert")
        .unwrap();
    assert_eq!(alert.reason, RugReason::LiquidityRemoval);
    assert_eq!(alert.severity, RugSeverity::Critical);

    let exits = ExitExecutor::new(world.executor.clone(), world.positions.clone());
    let outcome = exits
        .exit_position(
            &mut position,
            ExitTrigger::Rug {
                reason: alert.reason,
            },
            &ExitContext {
                session_token: world.session_token.clone(),
                wallet_address: world.wallet_address.clone(),
            },
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.order.config.slippage_bps, 2_500);
    assert_eq!(outcome.order.config.priority_fee, PriorityFeeTier::Ultra);
    assert_eq!(outcome.status, PositionStatus::ClosedRug);
}

#[tokio::test]
async fn s7_round_robin_fairness_under_concurrency() {
    let wallets = Arc::new(InMemoryWalletDirectory::new());
    let vault = WalletVault::new(wallets.clone());
    for _ in 0..5 {
        vault.create_wallet("user-7", PASSWORD, None).await.unwrap();
    }
    let rotator = Arc::new(WalletRotator::new(wallets, Arc::new(MemoryStore::new())));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let rotator = rotator.clone();
        handles.push(tokio::spawn(async move {
            rotator
                .select("user-7", RotationStrategy::RoundRobin)
                .await
                .unwrap()
                .wallet_id
        }));
    }

    let mut counts = std::collections::HashMap::new();
    for handle in handles {
        *counts.entry(handle.await.unwrap()).or_insert(0u32) += 1;
    }

    let total: u32 = counts.values().sum();
    let max = *counts.values().max().unwrap();
    let min = *counts.values().min().unwrap();
    assert_eq!(total, 20);
    assert_eq!(counts.len(), 5);
    assert!(
        (max as f64) / (min as f64) < 3.0,
        "distribution too skewed: {counts:?}"
    );
}

#[tokio::test]
async fn risk_scores_are_always_in_range() {
    for chain in [
        FakeChain::default(),
        FakeChain {
            sell_route: false,
            ..Default::default()
        },
        FakeChain {
            largest: vec![9_900_000, 50_000, 25_000],
            ..Default::default()
        },
    ] {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(chain);
        let simulation = Arc::new(SimulationProvider::new(
            chain.clone(),
            chain.clone(),
            SimulationConfig::default(),
        ));
        let detector = HoneypotDetector::new(
            vec![simulation as Arc<dyn HoneypotProvider>],
            store,
            DetectorConfig::default(),
        );
        let verdict = detector.check_now(MINT).await.unwrap();
        assert!(verdict.score <= 100);
    }
}

#[tokio::test]
async fn commission_never_undershoots_minimum() {
    let chain = Arc::new(FakeChain::default());
    let engine = trading_engine::CommissionEngine::new(
        chain.clone(),
        chain,
        trading_engine::CommissionConfig {
            bps: 1,
            min_commission_usd: Decimal::new(50, 2),
        },
    );

    // Tiny trade: raw commission would be far below the $0.50 floor.
    let commission = engine.compute(MINT, 10).await.unwrap();
    assert!(commission >= Decimal::new(50, 2));
}
