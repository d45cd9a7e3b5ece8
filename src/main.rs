//! Runner daemon: discovery, screening, and position supervision.
//!
//! The chat-facing command surface drives trades through the orchestrator;
//! this daemon keeps the always-on parts alive: it subscribes to new-token
//! streams, screens candidates into the verdict cache, and supervises open
//! positions. Exit triggers that need signing material are escalated to the
//! operator because only the command surface holds live sessions.

use anyhow::Context;
use clap::Parser;
use discovery::{PoolLogConfig, PoolLogSubscriber, StreamConfig, TokenStreamSubscriber};
use honeypot::{
    DetectorConfig, GuardedProvider, HoneypotDetector, HoneypotProvider, HttpProvider,
    SimulationConfig, SimulationProvider,
};
use risk_manager::{MonitorConfig, PositionMonitor, RugMonitor, RugMonitorConfig, RugWatchTarget};
use sniper_core::api::{QuoteClient, RpcClient};
use sniper_core::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use sniper_core::config::Config;
use sniper_core::db::{self, PositionRepository, PositionStore};
use sniper_core::store::{RedisStore, SharedStore};
use sniper_core::types::{FilterPreset, TokenFacts};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trading_engine::FilterEngine;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "sniper-bot", about = "On-chain token sniper daemon")]
struct Args {
    /// Filter preset applied when screening discovered tokens.
    #[arg(long, default_value = "balanced")]
    preset: String,

    /// Skip position supervision (discovery and screening only).
    #[arg(long)]
    no_monitors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let preset = match args.preset.as_str() {
        "conservative" => FilterPreset::Conservative,
        "aggressive" => FilterPreset::Aggressive,
        _ => FilterPreset::Balanced,
    };

    let config = Config::from_env().context("loading configuration")?;
    info!(preset = ?preset, "Starting sniper-bot daemon");

    let pool = db::connect(&config.database)
        .await
        .context("connecting to database")?;
    db::migrate(&pool).await.context("running migrations")?;
    let store: Arc<dyn SharedStore> = Arc::new(
        RedisStore::connect(&config.redis.url)
            .await
            .context("connecting to shared store")?,
    );

    let breakers = Arc::new(CircuitBreakerRegistry::new(
        Some(store.clone()),
        CircuitBreakerConfig::default(),
    ));

    let rpc = Arc::new(RpcClient::new(&config.rpc));
    let quote = Arc::new(QuoteClient::new(&config.quote_api));

    // Honeypot providers: the simulation layer first, HTTP providers behind
    // it, every one wrapped in a rate limiter and its own breaker.
    let mut providers: Vec<Arc<dyn HoneypotProvider>> = Vec::new();
    let simulation = Arc::new(SimulationProvider::new(
        rpc.clone(),
        quote.clone(),
        SimulationConfig {
            worst_case_holder_fallback: config.bot.holder_worst_case_on_outage,
            ..Default::default()
        },
    ));
    providers.push(Arc::new(GuardedProvider::new(
        simulation,
        breakers.get("provider:simulation"),
        honeypot::provider::DEFAULT_PROVIDER_RATE,
        Duration::from_secs(4),
    )));
    if let Some(url) = &config.honeypot.primary_url {
        let provider = Arc::new(HttpProvider::primary(
            url,
            config.honeypot.primary_api_key.clone(),
        ));
        let breaker = breakers.get(&format!("provider:{}", provider.name()));
        providers.push(Arc::new(GuardedProvider::new(
            provider,
            breaker,
            honeypot::provider::DEFAULT_PROVIDER_RATE,
            Duration::from_secs(5),
        )));
    }
    if let Some(url) = &config.honeypot.secondary_url {
        let provider = Arc::new(HttpProvider::secondary(
            url,
            config.honeypot.secondary_api_key.clone(),
        ));
        let breaker = breakers.get(&format!("provider:{}", provider.name()));
        providers.push(Arc::new(GuardedProvider::new(
            provider,
            breaker,
            honeypot::provider::DEFAULT_PROVIDER_RATE,
            Duration::from_secs(5),
        )));
    }
    let detector = Arc::new(HoneypotDetector::new(
        providers,
        store.clone(),
        DetectorConfig::default(),
    ));

    // Recover breaker state from the shared store before taking traffic.
    breakers.load_all().await;

    // Supervise positions that were open when the process last stopped.
    let positions: Arc<dyn PositionStore> = Arc::new(PositionRepository::new(pool.clone()));
    if !args.no_monitors {
        spawn_position_supervision(rpc.clone(), quote.clone(), positions.clone()).await?;
    }

    // Discovery -> screening pipeline: the new-token stream plus the DEX
    // program-log monitor.
    let subscriber = Arc::new(TokenStreamSubscriber::new(StreamConfig {
        ws_url: config.rpc.ws_url.clone(),
        ..Default::default()
    }));
    let mut tokens = subscriber.subscribe();
    let stream_handle = subscriber.clone().start();

    let pool_logs = Arc::new(PoolLogSubscriber::new(PoolLogConfig {
        ws_url: config.rpc.ws_url.clone(),
        ..Default::default()
    }));
    let mut pools = pool_logs.subscribe();
    let pool_handle = pool_logs.clone().start();

    let filter_config = FilterEngine::preset(preset);
    info!("Discovery pipeline running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            event = tokens.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Discovery consumer lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        error!("Discovery stream terminated");
                        break;
                    }
                };

                match detector.screen(&event.mint).await {
                    Ok(Some(verdict)) => {
                        let mut facts = TokenFacts::new(&event.mint);
                        facts.liquidity_sol = event.initial_liquidity_sol;
                        facts.risk_score = Some(verdict.score);
                        facts.risk_confidence = Some(verdict.confidence);
                        let result = FilterEngine::evaluate(&filter_config, preset, &facts);
                        info!(
                            mint = %event.mint,
                            source = ?event.source,
                            score = verdict.score,
                            passed = result.passed,
                            violations = ?result.violated_filters(),
                            "Candidate screened"
                        );
                    }
                    Ok(None) => {
                        info!(mint = %event.mint, "Screening in background");
                    }
                    Err(e) => {
                        warn!(mint = %event.mint, error = %e, "Screening failed");
                    }
                }
            }
            detection = pools.recv() => {
                let detection = match detection {
                    Ok(detection) => detection,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Pool log consumer lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        error!("Pool log stream terminated");
                        break;
                    }
                };

                let (base, quote_mint) = detection.base_and_quote();
                info!(
                    pool = %detection.pool,
                    base = %base,
                    quote = %quote_mint,
                    source = ?detection.source,
                    slot = detection.slot,
                    "Pool detected"
                );
                if let Err(e) = detector.screen(base).await {
                    warn!(mint = %base, error = %e, "Screening failed");
                }
            }
        }
    }

    stream_handle.abort();
    pool_handle.abort();
    Ok(())
}

/// Re-arm monitors for every open position and escalate their triggers.
///
/// The daemon holds no session material, so a trigger is an operator page,
/// not an automatic exit; the command surface performs supervised exits.
async fn spawn_position_supervision(
    rpc: Arc<RpcClient>,
    quote: Arc<QuoteClient>,
    positions: Arc<dyn PositionStore>,
) -> anyhow::Result<()> {
    let open = positions.list_open().await?;
    info!(count = open.len(), "Re-arming monitors for open positions");

    let feed = Arc::new(risk_manager::position_monitor::QuotePriceFeed::new(
        quote,
        sniper_core::types::token::WSOL_MINT.to_string(),
    ));
    let monitor = Arc::new(PositionMonitor::new(
        feed,
        positions.clone(),
        MonitorConfig::default(),
    ));
    let rug_monitor = Arc::new(RugMonitor::new(rpc, RugMonitorConfig::default()));

    let mut signals = monitor
        .take_signal_receiver()
        .expect("receiver taken once at startup");
    let mut alerts = rug_monitor
        .take_alert_receiver()
        .expect("receiver taken once at startup");

    for position in open {
        rug_monitor.watch(RugWatchTarget {
            position_id: position.id,
            mint: position.mint.clone(),
            pool_quote_vault: None,
        });
        monitor.watch(position);
    }

    tokio::spawn(async move {
        // The monitors live as long as this supervision loop.
        let _monitor = monitor;
        let _rug_monitor = rug_monitor;
        loop {
            tokio::select! {
                Some(signal) = signals.recv() => {
                    error!(
                        position_id = %signal.position_id,
                        trigger = ?signal.trigger,
                        pnl_pct = %signal.pnl_pct,
                        "OPERATOR ALERT: exit trigger fired, unlock a session to exit"
                    );
                }
                Some(alert) = alerts.recv() => {
                    error!(
                        position_id = %alert.position_id,
                        reason = ?alert.reason,
                        severity = ?alert.severity,
                        "OPERATOR ALERT: rug indicator, immediate exit required"
                    );
                }
                else => break,
            }
        }
    });

    Ok(())
}
