// Conditional DCA order engine
// Main entry point: wire the components, run the scheduler until ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use dca_engine::config::load_config;
use dca_engine::gateway::ChainGateway;
use dca_engine::oracle::PriceOracle;
use dca_engine::orders::OrderStore;
use dca_engine::registry::TokenRegistry;
use dca_engine::scheduler::{ExecutionScheduler, SchedulerConfig};
use dca_engine::swap::{Quoter, SwapExecutor};
use dca_engine::vault::{FileKeyVault, KeyVault};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dca-engine", about = "Price-triggered DCA order engine")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config().context("failed to load configuration")?;
    info!("engine starting on chain {} via {}", config.chain_id, config.rpc_url);

    let registry = Arc::new(TokenRegistry::new(
        &config.native_symbol,
        &config.wrapped_native_symbol,
        config.wrapped_native_address,
        config.tokens.clone(),
    )?);
    info!("token registry: {:?}", registry.symbols());

    let gateway = Arc::new(ChainGateway::connect(&config.rpc_url)?);
    let vault: Arc<dyn KeyVault> = Arc::new(FileKeyVault::new(config.keys_file.clone()));
    let oracle = Arc::new(PriceOracle::new(
        config.price_api_url.clone(),
        Duration::from_secs(config.price_ttl_secs),
        Duration::from_secs(config.price_timeout_secs),
    ));

    let store = Arc::new(match &config.order_store_path {
        Some(path) => OrderStore::load(path)?,
        None => {
            warn!("ORDER_STORE_PATH not set, orders will not survive a restart");
            OrderStore::in_memory()
        }
    });
    let counts = store.counts().await;
    info!("order store ready: {} active orders", counts.active);

    let quoter = Quoter::new(gateway.clone(), registry.clone(), config.router_address);
    let executor = Arc::new(SwapExecutor::new(
        gateway.clone(),
        quoter,
        registry.clone(),
        vault,
        config.router_address,
    ));

    let scheduler = Arc::new(ExecutionScheduler::new(
        oracle,
        store,
        executor,
        registry,
        SchedulerConfig {
            coin_id: config.price_coin_id.clone(),
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            health_interval: Duration::from_secs(config.health_interval_secs),
            auto_restart: config.auto_restart,
        },
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let tick_task = tokio::spawn(scheduler.clone().run(stop_rx.clone()));
    let health_task = tokio::spawn(scheduler.clone().run_health(stop_rx));

    tokio::signal::ctrl_c().await.context("ctrl-c handler failed")?;
    info!("shutdown requested, draining in-flight work");
    stop_tx.send(true).ok();

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = tick_task.await;
        let _ = health_task.await;
    })
    .await;
    if drained.is_err() {
        warn!("graceful shutdown window elapsed with a tick still in flight");
    }

    let status = scheduler.status();
    info!(
        "engine stopped after {} ticks: {} executed, {} failed, {} expired",
        status.total_ticks, status.orders_executed, status.orders_failed, status.orders_expired
    );
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
