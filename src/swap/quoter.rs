//! Quoter
//!
//! Builds the router path for a prospective swap, prices it through the
//! router's `getAmountsOut`, and derives the slippage-bounded minimum
//! output and the execution deadline.
//!
//! Path rules:
//! - a native leg is substituted with the wrapped-native token
//! - a pair is direct iff one end is the wrapped-native token
//! - any other ERC-20 pair hops through wrapped-native
//!
//! Author: AI-Generated
//! Created: 2026-02-05

use crate::errors::{EngineError, EngineResult};
use crate::gateway::Chain;
use crate::registry::{Token, TokenRegistry};
use crate::types::Quote;
use crate::units;
use alloy::primitives::{Address, U256};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pairs touching these symbols are refused outright. The USDT pool on the
/// target chain is mispriced upstream; routing through it burns users.
pub const DENY_LISTED_SYMBOLS: &[&str] = &["USDT"];

/// How long a quote stays executable.
pub const DEADLINE_WINDOW: Duration = Duration::from_secs(15 * 60);

pub const MIN_SLIPPAGE_BPS: u32 = 1;
pub const MAX_SLIPPAGE_BPS: u32 = 5000;

pub struct Quoter<C: Chain> {
    chain: Arc<C>,
    registry: Arc<TokenRegistry>,
    router: Address,
}

impl<C: Chain> Quoter<C> {
    pub fn new(chain: Arc<C>, registry: Arc<TokenRegistry>, router: Address) -> Self {
        Self { chain, registry, router }
    }

    /// Quote a swap of `amount` (human decimal string of the `from` token)
    /// with the given slippage tolerance.
    pub async fn quote(
        &self,
        from_symbol: &str,
        to_symbol: &str,
        amount: &str,
        slippage_bps: u32,
    ) -> EngineResult<Quote> {
        validate_slippage(slippage_bps)?;
        check_deny_list(from_symbol, to_symbol)?;

        let from = self.registry.resolve(from_symbol)?;
        let to = self.registry.resolve(to_symbol)?;
        let path = build_path(&self.registry, from, to)?;

        let from_amount_raw = units::parse_units(amount, from.decimals)?;
        if from_amount_raw.is_zero() {
            return Err(EngineError::InvalidArgument("amount must be positive".into()));
        }

        let amounts = self
            .chain
            .get_amounts_out(self.router, from_amount_raw, path.clone())
            .await
            .map_err(|e| match e {
                // A router revert here means no pool can fill the path.
                EngineError::TransactionFailed(msg) => EngineError::PairUnsupported(msg),
                other => other,
            })?;

        if amounts.len() != path.len() {
            return Err(EngineError::Upstream(format!(
                "getAmountsOut returned {} amounts for a {}-hop path",
                amounts.len(),
                path.len()
            )));
        }
        let to_amount_raw = *amounts.last().expect("non-empty path");
        if to_amount_raw.is_zero() {
            return Err(EngineError::PairUnsupported(format!(
                "{from_symbol}->{to_symbol} quotes to zero output"
            )));
        }

        let minimum_received_raw = minimum_received(to_amount_raw, slippage_bps);
        let price = implied_price(from_amount_raw, from.decimals, to_amount_raw, to.decimals);
        let deadline = Utc::now()
            + chrono::Duration::from_std(DEADLINE_WINDOW).expect("constant window fits");

        debug!(
            "quote {from_symbol}->{to_symbol}: in={from_amount_raw} out={to_amount_raw} min={minimum_received_raw} hops={}",
            path.len()
        );

        Ok(Quote {
            path,
            from_amount_raw,
            to_amount_raw,
            minimum_received_raw,
            price,
            deadline,
            slippage_bps,
        })
    }
}

pub fn validate_slippage(slippage_bps: u32) -> EngineResult<()> {
    if !(MIN_SLIPPAGE_BPS..=MAX_SLIPPAGE_BPS).contains(&slippage_bps) {
        return Err(EngineError::InvalidArgument(format!(
            "slippage {slippage_bps} bps outside [{MIN_SLIPPAGE_BPS}, {MAX_SLIPPAGE_BPS}]"
        )));
    }
    Ok(())
}

pub fn check_deny_list(from_symbol: &str, to_symbol: &str) -> EngineResult<()> {
    for symbol in [from_symbol, to_symbol] {
        if DENY_LISTED_SYMBOLS.contains(&symbol.to_uppercase().as_str()) {
            return Err(EngineError::PairUnsupported(format!(
                "{symbol} pairs are deny-listed (mispriced upstream pool)"
            )));
        }
    }
    Ok(())
}

/// Router hop addresses for the pair, with wrapped-native substituted at
/// native ends. Rejects same-token routes, including native<->wrapped.
pub fn build_path(
    registry: &TokenRegistry,
    from: &Token,
    to: &Token,
) -> EngineResult<Vec<Address>> {
    if from.symbol == to.symbol {
        return Err(EngineError::InvalidArgument("from and to are the same token".into()));
    }

    let wrapped = registry.wrapped_native();
    let routed_from = registry.routed(from);
    let routed_to = registry.routed(to);

    if routed_from.address == routed_to.address {
        // XFI<->WXFI collapses to the same routed token; that is a
        // wrap/unwrap request, not a swap.
        return Err(EngineError::InvalidArgument(
            "native and wrapped-native cannot be swapped against each other".into(),
        ));
    }

    if routed_from.address == wrapped.address || routed_to.address == wrapped.address {
        Ok(vec![routed_from.address, routed_to.address])
    } else {
        Ok(vec![routed_from.address, wrapped.address, routed_to.address])
    }
}

/// floor(to_amount * (10000 - slippage_bps) / 10000); U256 division floors.
pub fn minimum_received(to_amount: U256, slippage_bps: u32) -> U256 {
    to_amount * U256::from(10_000u32 - slippage_bps) / U256::from(10_000u32)
}

/// to/from in human units. Informational only; log lines and order records.
fn implied_price(from_raw: U256, from_decimals: u8, to_raw: U256, to_decimals: u8) -> Decimal {
    let from_f = units::to_f64(from_raw, from_decimals);
    let to_f = units::to_f64(to_raw, to_decimals);
    if from_f <= 0.0 {
        return Decimal::ZERO;
    }
    Decimal::from_f64_retain(to_f / from_f).unwrap_or(Decimal::ZERO)
}
