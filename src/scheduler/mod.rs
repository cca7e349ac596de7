//! Execution Scheduler
//!
//! A single cooperative loop: read the reference price, select eligible
//! orders, dispatch them through the swap executor, apply results, sweep
//! expiries, update stats. Ticks are serialized; a long-running execution
//! stretches the tick and the next one is deferred, never overlapped.
//!
//! A slower companion loop monitors health: the oracle must have produced
//! a fresh sample within the last ten minutes and the order store must be
//! reachable. With auto-restart enabled an unreachable store suspends
//! ticking until a reload succeeds.
//!
//! Author: AI-Generated
//! Created: 2026-02-07

use crate::gateway::Chain;
use crate::oracle::PriceOracle;
use crate::orders::service::{is_ready, should_execute};
use crate::orders::store::OrderStore;
use crate::registry::TokenRegistry;
use crate::swap::executor::SwapExecutor;
use crate::types::Order;
use crate::units;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Oracle silence tolerated before health flags it.
const MAX_PRICE_SILENCE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Coin id of the reference asset driving every trigger.
    pub coin_id: String,
    pub tick_interval: Duration,
    pub health_interval: Duration,
    pub auto_restart: bool,
}

#[derive(Debug, Default, Clone)]
struct TickStats {
    total_ticks: u64,
    skipped_ticks: u64,
    orders_executed: u64,
    orders_failed: u64,
    orders_expired: u64,
    last_price: Option<Decimal>,
    last_tick_at: Option<DateTime<Utc>>,
}

/// Snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub last_price: Option<Decimal>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub total_ticks: u64,
    pub skipped_ticks: u64,
    pub orders_executed: u64,
    pub orders_failed: u64,
    pub orders_expired: u64,
}

/// What a tick does with one claimed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Not eligible; untouched this tick.
    Leave,
    /// Trigger observed unsatisfied for the first time; arm the order.
    Prime,
    /// Primed and the trigger holds; dispatch.
    Execute,
}

/// Pure eligibility decision. An unprimed order never executes, no matter
/// how favorable the price: it must first be seen on the unsatisfied side.
pub fn decide(order: &Order, price: Decimal) -> TickDecision {
    if order.primed {
        if should_execute(order.trigger_condition, order.trigger_price, price) {
            TickDecision::Execute
        } else {
            TickDecision::Leave
        }
    } else if is_ready(order.trigger_condition, order.trigger_price, price) {
        TickDecision::Prime
    } else {
        TickDecision::Leave
    }
}

pub struct ExecutionScheduler<C: Chain> {
    oracle: Arc<PriceOracle>,
    store: Arc<OrderStore>,
    executor: Arc<SwapExecutor<C>>,
    registry: Arc<TokenRegistry>,
    config: SchedulerConfig,
    stats: RwLock<TickStats>,
    running: AtomicBool,
    started_at: Instant,
}

impl<C: Chain + 'static> ExecutionScheduler<C> {
    pub fn new(
        oracle: Arc<PriceOracle>,
        store: Arc<OrderStore>,
        executor: Arc<SwapExecutor<C>>,
        registry: Arc<TokenRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            oracle,
            store,
            executor,
            registry,
            config,
            stats: RwLock::new(TickStats::default()),
            running: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Main tick loop. Runs until the stop signal flips.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "scheduler started: tick every {:?}, watching {}",
            self.config.tick_interval, self.config.coin_id
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = stop.changed() => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("scheduler stopped");
    }

    /// Health loop, on its own slower cadence.
    pub async fn run_health(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; nothing useful to
        // check at boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.health_check().await,
                _ = stop.changed() => break,
            }
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let stats = self.stats.read().expect("stats lock").clone();
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_price: stats.last_price,
            last_tick_at: stats.last_tick_at,
            total_ticks: stats.total_ticks,
            skipped_ticks: stats.skipped_ticks,
            orders_executed: stats.orders_executed,
            orders_failed: stats.orders_failed,
            orders_expired: stats.orders_expired,
        }
    }

    async fn tick(&self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("scheduler suspended, tick skipped");
            return;
        }

        let tick_at = Utc::now();
        let spot = match self.oracle.get_spot(&self.config.coin_id).await {
            Ok(spot) => spot,
            Err(e) => {
                // A missing price is not a failure; the window re-opens
                // next tick.
                warn!("tick skipped, no usable price: {e}");
                self.bump(|s| s.skipped_ticks += 1);
                return;
            }
        };
        if spot.price <= Decimal::ZERO {
            warn!("tick skipped, non-positive price {}", spot.price);
            self.bump(|s| s.skipped_ticks += 1);
            return;
        }
        let price = spot.price;

        let orders = self.store.claim_for_tick(tick_at).await;
        debug!("tick: price={price} claimed={} degraded={}", orders.len(), spot.degraded);

        let mut executed = 0u64;
        let mut failed = 0u64;
        // Claimed orders arrive in created-at order; one order's failure
        // never blocks the rest of the tick.
        for order in &orders {
            match decide(order, price) {
                TickDecision::Leave => {}
                TickDecision::Prime => match self.store.set_primed(&order.id, order.updated_at).await {
                    Ok(true) => debug!("order {} primed at price {price}", order.id),
                    Ok(false) => debug!("order {} prime lost the write race", order.id),
                    Err(e) => warn!("order {} prime failed: {e}", order.id),
                },
                TickDecision::Execute => {
                    if self.execute_order(order, price).await {
                        executed += 1;
                    } else {
                        failed += 1;
                    }
                }
            }
        }

        let swept = match self.store.sweep_expired(Utc::now()).await {
            Ok(n) => n as u64,
            Err(e) => {
                warn!("expiry sweep failed: {e}");
                0
            }
        };

        self.bump(|s| {
            s.total_ticks += 1;
            s.orders_executed += executed;
            s.orders_failed += failed;
            s.orders_expired += swept;
            s.last_price = Some(price);
            s.last_tick_at = Some(tick_at);
        });
    }

    /// Run one attempt for an eligible order and write the outcome back.
    /// Returns true when the order executed.
    async fn execute_order(&self, order: &Order, price: Decimal) -> bool {
        info!(
            "order {} eligible: price {} crossed trigger {} {}",
            order.id, price, order.trigger_condition, order.trigger_price
        );

        let from_decimals = match self.registry.resolve(&order.from_symbol) {
            Ok(token) => token.decimals,
            Err(e) => {
                // A symbol that no longer resolves can never execute.
                warn!("order {} references unknown token: {e}", order.id);
                let _ = self.store.mark_failed(&order.id, order.updated_at, e.code()).await;
                return false;
            }
        };
        let amount = units::format_units(order.from_amount_raw, from_decimals);

        self.store.begin_attempt(&order.id).await;
        let result = self
            .executor
            .execute(
                &order.owner_key,
                &order.from_symbol,
                &order.to_symbol,
                &amount,
                order.max_slippage_bps,
            )
            .await;
        self.store.end_attempt(&order.id).await;

        let succeeded = if result.success {
            let tx_hash = result.swap_tx_hash.clone().unwrap_or_default();
            match self
                .store
                .mark_executed(&order.id, order.updated_at, &tx_hash, Utc::now())
                .await
            {
                Ok(true) => {
                    info!(
                        "order {} executed: {} {} -> {} {} ({})",
                        order.id,
                        amount,
                        order.from_symbol,
                        result.final_received.as_deref().unwrap_or("?"),
                        result.final_received_symbol.as_deref().unwrap_or(&order.to_symbol),
                        tx_hash
                    );
                    true
                }
                Ok(false) => {
                    warn!("order {} executed on-chain but lost the store write", order.id);
                    true
                }
                Err(e) => {
                    warn!("order {} executed on-chain but store update failed: {e}", order.id);
                    true
                }
            }
        } else {
            let reason = result
                .error_code
                .clone()
                .unwrap_or_else(|| "transaction_failed".to_string());
            error!(
                "order {} attempt failed: {} ({reason})",
                order.id,
                result.error.as_deref().unwrap_or("unknown")
            );
            if let Err(e) = self.store.mark_failed(&order.id, order.updated_at, &reason).await {
                warn!("order {} failure not recorded: {e}", order.id);
            }
            false
        };

        // An owner cancel that landed mid-attempt applies now, unless the
        // attempt already moved the order to executed.
        if let Err(e) = self.store.apply_deferred_cancel(&order.id).await {
            warn!("order {} deferred cancel check failed: {e}", order.id);
        }

        succeeded
    }

    async fn health_check(&self) {
        match self.oracle.last_fresh_age() {
            Some(age) if age <= MAX_PRICE_SILENCE => {}
            Some(age) => warn!("health: last fresh price sample is {age:?} old"),
            None => warn!("health: price oracle has never produced a fresh sample"),
        }

        if self.store.is_reachable() {
            return;
        }
        error!("health: order store unreachable");
        if !self.config.auto_restart {
            return;
        }

        warn!("health: suspending ticks and reloading the order store");
        self.running.store(false, Ordering::SeqCst);
        match self.store.reload().await {
            Ok(n) => {
                info!("health: order store reloaded with {n} orders, resuming");
                self.running.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("health: order store reload failed, staying suspended: {e}"),
        }
    }

    fn bump<F: FnOnce(&mut TickStats)>(&self, f: F) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}
