//! Order Store
//!
//! Persistent set of DCA orders. In-memory map with a JSON file behind it,
//! written with the temp-file-then-rename pattern so a crash mid-write
//! never truncates state.
//!
//! Mutations are serialized per order through an optimistic lock on
//! `updated_at`: writers pass the stamp they last observed and lose the
//! write (Ok(false)) if someone got there first. Terminal states never
//! change once reached.
//!
//! Author: AI-Generated
//! Created: 2026-02-06

use crate::errors::{EngineError, EngineResult};
use crate::types::{Order, OrderStatus};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Per-owner cap on concurrently active orders.
pub const MAX_ACTIVE_PER_OWNER: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    updated_at: DateTime<Utc>,
    orders: Vec<Order>,
}

struct Inner {
    orders: HashMap<String, Order>,
    /// Orders currently inside an executor attempt. A cancel that lands
    /// here is deferred until the attempt terminates.
    in_flight: HashSet<String>,
}

pub struct OrderStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

/// Totals by status, for logging and the status surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreCounts {
    pub active: usize,
    pub executed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub expired: usize,
}

impl OrderStore {
    /// Memory-only store (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner { orders: HashMap::new(), in_flight: HashSet::new() }),
            path: None,
        }
    }

    /// File-backed store. A missing file starts empty; a malformed file is
    /// a startup error, not silent data loss.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let orders = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read order store {}", path.display()))?;
            let file: StoreFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse order store {}", path.display()))?;
            info!("order store loaded: {} orders from {}", file.orders.len(), path.display());
            file.orders.into_iter().map(|o| (o.id.clone(), o)).collect()
        } else {
            info!("order store starting empty at {}", path.display());
            HashMap::new()
        };
        Ok(Self {
            inner: RwLock::new(Inner { orders, in_flight: HashSet::new() }),
            path: Some(path),
        })
    }

    pub async fn create(&self, order: Order) -> EngineResult<Order> {
        let mut inner = self.inner.write().await;
        let active = inner
            .orders
            .values()
            .filter(|o| o.owner_key == order.owner_key && o.is_active())
            .count();
        if active >= MAX_ACTIVE_PER_OWNER {
            return Err(EngineError::QuotaExceeded);
        }
        inner.orders.insert(order.id.clone(), order.clone());
        self.persist(&inner)?;
        debug!("order {} created for {}", order.id, order.owner_key);
        Ok(order)
    }

    pub async fn list(
        &self,
        owner_key: &str,
        status: Option<OrderStatus>,
        limit: Option<usize>,
    ) -> Vec<Order> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.owner_key == owner_key)
            .filter(|o| status.map(|s| o.status == s).unwrap_or(true))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            orders.truncate(limit);
        }
        orders
    }

    pub async fn get(&self, owner_key: &str, id: &str) -> EngineResult<Order> {
        let inner = self.inner.read().await;
        inner
            .orders
            .get(id)
            .filter(|o| o.owner_key == owner_key)
            .cloned()
            .ok_or(EngineError::NotFound)
    }

    /// Orders the scheduler may act on this tick: active, not expired, and
    /// with retry budget left. Ordered by creation time.
    pub async fn claim_for_tick(&self, now: DateTime<Utc>) -> Vec<Order> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.is_active() && !o.is_expired(now) && o.retries_left())
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        orders
    }

    /// Mark an order as inside an executor attempt. Cancels arriving while
    /// marked are deferred.
    pub async fn begin_attempt(&self, id: &str) {
        self.inner.write().await.in_flight.insert(id.to_string());
    }

    pub async fn end_attempt(&self, id: &str) {
        self.inner.write().await.in_flight.remove(id);
    }

    /// Record that the trigger was observed unsatisfied, arming the order.
    pub async fn set_primed(&self, id: &str, expected: DateTime<Utc>) -> EngineResult<bool> {
        self.compare_and_update(id, expected, |o| {
            o.primed = true;
        })
        .await
    }

    pub async fn mark_executed(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        tx_hash: &str,
        at: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let applied = self
            .compare_and_update(id, expected, |o| {
                o.status = OrderStatus::Executed;
                o.executed_at = Some(at);
                o.execution_tx_hash = Some(tx_hash.to_string());
            })
            .await?;
        if applied {
            info!("order {id} executed: {tx_hash}");
        }
        Ok(applied)
    }

    /// Record a failed attempt. The retry counter increments; at the cap
    /// the order turns terminal.
    pub async fn mark_failed(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        reason: &str,
    ) -> EngineResult<bool> {
        let applied = self
            .compare_and_update(id, expected, |o| {
                o.retry_count += 1;
                o.last_failure_reason = Some(reason.to_string());
                if o.retry_count >= o.max_retries {
                    o.status = OrderStatus::Failed;
                }
            })
            .await?;
        if applied {
            debug!("order {id} attempt failed: {reason}");
        }
        Ok(applied)
    }

    /// Owner-initiated cancel. Only an active order can be cancelled; a
    /// cancel landing mid-attempt is deferred until the attempt terminates.
    pub async fn mark_cancelled(&self, owner_key: &str, id: &str) -> EngineResult<Order> {
        let mut inner = self.inner.write().await;
        let in_flight = inner.in_flight.contains(id);
        let order = inner
            .orders
            .get_mut(id)
            .filter(|o| o.owner_key == owner_key)
            .ok_or(EngineError::NotFound)?;
        if order.status.is_terminal() {
            return Err(EngineError::TerminalState);
        }
        if in_flight {
            // Flag only; leaving the stamp untouched lets the in-flight
            // attempt still record its outcome. Success makes the cancel
            // moot, failure applies it right after the attempt.
            order.cancel_requested = true;
            let order = order.clone();
            self.persist(&inner)?;
            info!("order {id} cancel deferred: attempt in flight");
            return Ok(order);
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        let order = order.clone();
        self.persist(&inner)?;
        info!("order {id} cancelled by owner");
        Ok(order)
    }

    /// Apply a cancel that was deferred by an in-flight attempt. True when
    /// the order actually moved to cancelled.
    pub async fn apply_deferred_cancel(&self, id: &str) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        let order = inner.orders.get_mut(id).ok_or(EngineError::NotFound)?;
        if !order.is_active() || !order.cancel_requested {
            return Ok(false);
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        self.persist(&inner)?;
        info!("order {id} cancelled (deferred)");
        Ok(true)
    }

    /// Expire every active order past its deadline. Returns the count.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let mut inner = self.inner.write().await;
        let mut swept = 0;
        for order in inner.orders.values_mut() {
            if order.is_active() && order.is_expired(now) {
                order.status = OrderStatus::Expired;
                order.updated_at = now;
                swept += 1;
            }
        }
        if swept > 0 {
            self.persist(&inner)?;
            info!("expired {swept} orders");
        }
        Ok(swept)
    }

    pub async fn counts(&self) -> StoreCounts {
        let inner = self.inner.read().await;
        let mut counts = StoreCounts::default();
        for order in inner.orders.values() {
            match order.status {
                OrderStatus::Active => counts.active += 1,
                OrderStatus::Executed => counts.executed += 1,
                OrderStatus::Cancelled => counts.cancelled += 1,
                OrderStatus::Failed => counts.failed += 1,
                OrderStatus::Expired => counts.expired += 1,
            }
        }
        counts
    }

    /// Health probe: the backing file (or its directory) must be usable.
    pub fn is_reachable(&self) -> bool {
        match &self.path {
            None => true,
            Some(path) => {
                if path.exists() {
                    std::fs::read_to_string(path).is_ok()
                } else {
                    path.parent().map(|p| p.exists()).unwrap_or(false)
                }
            }
        }
    }

    /// Re-read the backing file, replacing in-memory state. Used by the
    /// health monitor's auto-restart path. No-op for memory stores.
    pub async fn reload(&self) -> EngineResult<usize> {
        let Some(path) = &self.path else { return Ok(0) };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Upstream(format!("order store reload: {e}")))?;
        let file: StoreFile = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Upstream(format!("order store reload parse: {e}")))?;
        let mut inner = self.inner.write().await;
        inner.orders = file.orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        Ok(inner.orders.len())
    }

    async fn compare_and_update<F>(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        mutate: F,
    ) -> EngineResult<bool>
    where
        F: FnOnce(&mut Order),
    {
        let mut inner = self.inner.write().await;
        let order = inner.orders.get_mut(id).ok_or(EngineError::NotFound)?;
        if order.status.is_terminal() {
            return Err(EngineError::TerminalState);
        }
        if order.updated_at != expected {
            debug!("order {id} update lost the optimistic lock");
            return Ok(false);
        }
        mutate(order);
        order.updated_at = Utc::now();
        self.persist(&inner)?;
        Ok(true)
    }

    /// Write to temp file first, then rename (atomic).
    fn persist(&self, inner: &Inner) -> EngineResult<()> {
        let Some(path) = &self.path else { return Ok(()) };

        let mut orders: Vec<Order> = inner.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let file = StoreFile { version: 1, updated_at: Utc::now(), orders };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| EngineError::Upstream(format!("order store serialize: {e}")))?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &json)
            .map_err(|e| EngineError::Upstream(format!("order store write: {e}")))?;
        std::fs::rename(&temp_path, path)
            .map_err(|e| EngineError::Upstream(format!("order store rename: {e}")))?;
        Ok(())
    }
}
