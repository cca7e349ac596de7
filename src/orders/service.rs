//! DCA Service
//!
//! Order CRUD with creation-time validation, plus the trigger predicates
//! the scheduler evaluates each tick.
//!
//! Trigger semantics: an order only becomes executable after a directional
//! crossing. `is_ready` holds while the trigger is NOT satisfied; the first
//! tick at which it holds arms (`primes`) the order, and only a primed
//! order for which `should_execute` holds is dispatched. An order whose
//! trigger is already met at creation therefore never fires immediately.
//!
//! Author: AI-Generated
//! Created: 2026-02-06

use crate::errors::{EngineError, EngineResult};
use crate::gateway::Chain;
use crate::orders::store::OrderStore;
use crate::registry::TokenRegistry;
use crate::swap::quoter;
use crate::types::{Order, OrderStatus, TriggerCondition, MAX_RETRIES};
use crate::units;
use crate::vault::KeyVault;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Trigger price bounds: (0, 10^9] in quote currency per from-unit.
pub static MAX_TRIGGER_PRICE: Lazy<Decimal> = Lazy::new(|| Decimal::from(1_000_000_000u64));

pub const DEFAULT_SLIPPAGE_BPS: u32 = 100;
pub const DEFAULT_EXPIRY_DAYS: i64 = 30;

/// Closed create-order payload. Collaborators parse loose input into this;
/// anything they cannot place in these fields is rejected upstream.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub owner_key: String,
    pub from_symbol: String,
    pub to_symbol: String,
    /// Human decimal amount of the `from` token.
    pub from_amount: String,
    pub trigger_price: Decimal,
    pub trigger_condition: TriggerCondition,
    pub slippage_bps: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct DcaService<C: Chain> {
    store: Arc<OrderStore>,
    registry: Arc<TokenRegistry>,
    chain: Arc<C>,
    vault: Arc<dyn KeyVault>,
}

impl<C: Chain> DcaService<C> {
    pub fn new(
        store: Arc<OrderStore>,
        registry: Arc<TokenRegistry>,
        chain: Arc<C>,
        vault: Arc<dyn KeyVault>,
    ) -> Self {
        Self { store, registry, chain, vault }
    }

    /// Validate and persist a new order.
    pub async fn create_order(&self, req: CreateOrderRequest) -> EngineResult<Order> {
        if req.trigger_price <= Decimal::ZERO || req.trigger_price > *MAX_TRIGGER_PRICE {
            return Err(EngineError::InvalidArgument(format!(
                "trigger price {} outside (0, {}]",
                req.trigger_price, *MAX_TRIGGER_PRICE
            )));
        }

        let slippage_bps = req.slippage_bps.unwrap_or(DEFAULT_SLIPPAGE_BPS);
        quoter::validate_slippage(slippage_bps)?;
        quoter::check_deny_list(&req.from_symbol, &req.to_symbol)?;

        let from = self.registry.resolve(&req.from_symbol)?.clone();
        let to = self.registry.resolve(&req.to_symbol)?.clone();
        // Same routability rules as execution; fail at the API boundary
        // instead of on the first eligible tick.
        quoter::build_path(&self.registry, &from, &to)?;

        let from_amount_raw = units::parse_units(&req.from_amount, from.decimals)?;
        if from_amount_raw.is_zero() {
            return Err(EngineError::InvalidArgument("amount must be positive".into()));
        }

        // Live funding check against the declared spending token.
        let owner_address = self.vault.address_for(&req.owner_key).await?;
        let balance = if from.is_native {
            self.chain.native_balance(owner_address).await?
        } else {
            self.chain.erc20_balance(from.address, owner_address).await?
        };
        if balance < from_amount_raw {
            return Err(EngineError::InsufficientBalance {
                have: balance.to_string(),
                need: from_amount_raw.to_string(),
            });
        }

        let now = Utc::now();
        let expires_at = req.expires_at.unwrap_or(now + Duration::days(DEFAULT_EXPIRY_DAYS));
        if expires_at <= now {
            return Err(EngineError::InvalidArgument("expiry is in the past".into()));
        }

        let order = Order {
            id: Uuid::new_v4().to_string(),
            owner_key: req.owner_key,
            from_symbol: from.symbol.clone(),
            to_symbol: to.symbol.clone(),
            from_amount_raw,
            trigger_price: req.trigger_price,
            trigger_condition: req.trigger_condition,
            max_slippage_bps: slippage_bps,
            expires_at,
            status: OrderStatus::Active,
            retry_count: 0,
            max_retries: MAX_RETRIES,
            primed: false,
            cancel_requested: false,
            last_failure_reason: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            execution_tx_hash: None,
        };

        let order = self.store.create(order).await?;
        info!(
            "order {} created: {} {} -> {} when price {} {}",
            order.id, req.from_amount, order.from_symbol, order.to_symbol,
            order.trigger_condition, order.trigger_price
        );
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        owner_key: &str,
        status: Option<OrderStatus>,
        limit: Option<usize>,
    ) -> Vec<Order> {
        self.store.list(owner_key, status, limit).await
    }

    pub async fn get_order(&self, owner_key: &str, id: &str) -> EngineResult<Order> {
        self.store.get(owner_key, id).await
    }

    pub async fn cancel_order(&self, owner_key: &str, id: &str) -> EngineResult<Order> {
        self.store.mark_cancelled(owner_key, id).await
    }
}

/// True when the trigger is satisfied at price `p`.
pub fn should_execute(condition: TriggerCondition, trigger: Decimal, p: Decimal) -> bool {
    match condition {
        TriggerCondition::Above => p >= trigger,
        TriggerCondition::Below => p <= trigger,
    }
}

/// True when the trigger is NOT yet satisfied at price `p`; observing this
/// arms the order.
pub fn is_ready(condition: TriggerCondition, trigger: Decimal, p: Decimal) -> bool {
    match condition {
        TriggerCondition::Above => p < trigger,
        TriggerCondition::Below => p > trigger,
    }
}
