// Core data structures for the order engine.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum failed attempts before an order turns terminal.
pub const MAX_RETRIES: u32 = 3;

/// Price direction that arms an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerCondition {
    /// Execute once the reference price rises to or above the trigger.
    Above,
    /// Execute once the reference price falls to or below the trigger.
    Below,
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TriggerCondition::Above => write!(f, "above"),
            TriggerCondition::Below => write!(f, "below"),
        }
    }
}

impl TriggerCondition {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "above" => Some(TriggerCondition::Above),
            "below" => Some(TriggerCondition::Below),
            _ => None,
        }
    }
}

/// Order lifecycle state. Only `Active` may transition; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Executed,
    Cancelled,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            OrderStatus::Active => "active",
            OrderStatus::Executed => "executed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A user-authored conditional swap instruction.
///
/// `from_amount_raw` is the smallest-unit integer derived from the token's
/// declared decimals at creation time. It is stored exactly and never
/// renormalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Stable identifier of the authoring user; resolved to a signing
    /// address through the key vault, never stored here.
    pub owner_key: String,
    pub from_symbol: String,
    pub to_symbol: String,
    pub from_amount_raw: U256,
    /// Quote currency per one unit of the `from` token.
    pub trigger_price: Decimal,
    pub trigger_condition: TriggerCondition,
    pub max_slippage_bps: u32,
    pub expires_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Set on the first tick at which the trigger was NOT yet satisfied.
    /// Execution requires `primed`; prevents firing on an order whose
    /// trigger was already met at creation.
    #[serde(default)]
    pub primed: bool,
    /// Set while an owner cancel arrived mid-attempt; applied once the
    /// in-flight attempt terminates without executing.
    #[serde(default)]
    pub cancel_requested: bool,
    pub last_failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_tx_hash: Option<String>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status == OrderStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether another failed attempt is still allowed.
    pub fn retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Output of the quoter for a single prospective swap.
#[derive(Debug, Clone)]
pub struct Quote {
    /// Router hop addresses, wrapped-native substituted at native ends.
    pub path: Vec<Address>,
    pub from_amount_raw: U256,
    pub to_amount_raw: U256,
    /// floor(to_amount_raw * (10000 - slippage_bps) / 10000)
    pub minimum_received_raw: U256,
    /// to_amount / from_amount in human units. Informational.
    pub price: Decimal,
    pub deadline: DateTime<Utc>,
    pub slippage_bps: u32,
}

/// Structured outcome of one swap execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub success: bool,
    pub swap_tx_hash: Option<String>,
    pub wrap_tx_hash: Option<String>,
    pub unwrap_tx_hash: Option<String>,
    pub final_received_symbol: Option<String>,
    /// Human-formatted received amount.
    pub final_received: Option<String>,
    /// Raw received amount in the received token's smallest unit.
    pub final_received_raw: Option<U256>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Non-fatal warning code (currently only `unwrap_failed`).
    pub warning: Option<String>,
}

impl SwapResult {
    pub fn failure(error: String, code: &'static str) -> Self {
        Self {
            success: false,
            swap_tx_hash: None,
            wrap_tx_hash: None,
            unwrap_tx_hash: None,
            final_received_symbol: None,
            final_received: None,
            final_received_raw: None,
            error: Some(error),
            error_code: Some(code.to_string()),
            warning: None,
        }
    }
}
