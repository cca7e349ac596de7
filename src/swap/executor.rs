//! Swap Executor
//!
//! Runs one swap as an ordered sequence of phases:
//!   A validate balances/allowance
//!   B approve with visibility polling
//!   C wrap native (native source only)
//!   D dispatch the router swap and wait for inclusion
//!   E unwrap (native destination only, non-fatal)
//!
//! A failed phase returns immediately with its coded error; no further
//! phase runs. The overall call is one logical operation at the
//! application layer but up to four on-chain transactions; they are not
//! atomic on-chain.
//!
//! Native legs are normalized around the wrapped-native token: a native
//! source is deposited into the wrapped contract before the swap, a native
//! destination is withdrawn from it after, and the router always sees
//! token-for-token.
//!
//! Author: AI-Generated
//! Created: 2026-02-05

use crate::errors::{EngineError, EngineResult};
use crate::gateway::Chain;
use crate::registry::TokenRegistry;
use crate::swap::quoter::Quoter;
use crate::types::SwapResult;
use crate::units;
use crate::vault::KeyVault;
use alloy::primitives::{Address, U256};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Allowance visibility poll: attempts and spacing.
pub const APPROVE_POLL_ATTEMPTS: u32 = 5;
pub const APPROVE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Receipt wait for the unwrap step, which has no quote deadline.
const UNWRAP_TIMEOUT: Duration = Duration::from_secs(120);

pub struct SwapExecutor<C: Chain> {
    chain: Arc<C>,
    quoter: Quoter<C>,
    registry: Arc<TokenRegistry>,
    vault: Arc<dyn KeyVault>,
    router: Address,
    approve_poll_interval: Duration,
}

impl<C: Chain> SwapExecutor<C> {
    pub fn new(
        chain: Arc<C>,
        quoter: Quoter<C>,
        registry: Arc<TokenRegistry>,
        vault: Arc<dyn KeyVault>,
        router: Address,
    ) -> Self {
        Self {
            chain,
            quoter,
            registry,
            vault,
            router,
            approve_poll_interval: APPROVE_POLL_INTERVAL,
        }
    }

    /// Shrink the allowance poll spacing (tests).
    pub fn with_approve_poll_interval(mut self, interval: Duration) -> Self {
        self.approve_poll_interval = interval;
        self
    }

    /// Execute one swap for `owner_key`. Never panics and never returns a
    /// raw error: failures come back as a coded, unsuccessful result.
    pub async fn execute(
        &self,
        owner_key: &str,
        from_symbol: &str,
        to_symbol: &str,
        amount: &str,
        slippage_bps: u32,
    ) -> SwapResult {
        match self
            .run_phases(owner_key, from_symbol, to_symbol, amount, slippage_bps)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!("swap {from_symbol}->{to_symbol} for {owner_key} failed: {e}");
                SwapResult::failure(e.to_string(), e.code())
            }
        }
    }

    async fn run_phases(
        &self,
        owner_key: &str,
        from_symbol: &str,
        to_symbol: &str,
        amount: &str,
        slippage_bps: u32,
    ) -> EngineResult<SwapResult> {
        let from = self.registry.resolve(from_symbol)?.clone();
        let to = self.registry.resolve(to_symbol)?.clone();
        let wrapped = self.registry.wrapped_native().clone();
        let routed_from = self.registry.routed(&from).clone();
        let routed_to = self.registry.routed(&to).clone();

        let quote = self
            .quoter
            .quote(from_symbol, to_symbol, amount, slippage_bps)
            .await?;
        let amount_raw = quote.from_amount_raw;

        // The signer exists only for the scope of this call.
        let signer = self.vault.signer_for(owner_key).await?;
        let recipient = signer.address();

        // ── Phase A: validate ────────────────────────────────────────
        // A native source is spent from the native balance (Phase C wraps
        // it); everything else is spent from the routed ERC-20 balance.
        let spendable = if from.is_native {
            self.chain.native_balance(recipient).await?
        } else {
            self.chain.erc20_balance(routed_from.address, recipient).await?
        };
        if spendable < amount_raw {
            return Err(EngineError::InsufficientBalance {
                have: spendable.to_string(),
                need: amount_raw.to_string(),
            });
        }

        // The router always pulls the routed ERC-20, wrapped included.
        let allowance = self
            .chain
            .erc20_allowance(routed_from.address, recipient, self.router)
            .await?;
        let needs_approval = allowance < amount_raw;

        // ── Phase B: approve ─────────────────────────────────────────
        if needs_approval {
            let approve_amount = approve_with_buffer(amount_raw);
            self.chain
                .erc20_approve(&signer, routed_from.address, self.router, approve_amount)
                .await?;
            info!(
                "approval submitted for {}: {} (needed {})",
                routed_from.symbol, approve_amount, amount_raw
            );

            let mut visible = false;
            for _ in 0..APPROVE_POLL_ATTEMPTS {
                tokio::time::sleep(self.approve_poll_interval).await;
                let current = self
                    .chain
                    .erc20_allowance(routed_from.address, recipient, self.router)
                    .await?;
                if current >= amount_raw {
                    visible = true;
                    break;
                }
            }
            if !visible {
                return Err(EngineError::InsufficientAllowance);
            }
        }

        // ── Phase C: wrap ────────────────────────────────────────────
        let mut wrap_tx_hash = None;
        if from.is_native {
            let receipt = self
                .chain
                .wrap_native(&signer, wrapped.address, amount_raw, until(&quote.deadline)?)
                .await
                .map_err(|e| EngineError::WrapFailed(e.to_string()))?;
            if !receipt.succeeded() {
                return Err(EngineError::WrapFailed("deposit reverted".into()));
            }
            info!("wrapped {} native: {}", amount_raw, receipt.tx_hash);
            wrap_tx_hash = Some(receipt.tx_hash);
        }

        // ── Phase D: swap ────────────────────────────────────────────
        let balance_before = self.chain.erc20_balance(routed_to.address, recipient).await?;
        let deadline_secs = U256::from(quote.deadline.timestamp().max(0) as u64);

        let receipt = self
            .chain
            .swap_exact_tokens_for_tokens(
                &signer,
                self.router,
                amount_raw,
                quote.minimum_received_raw,
                quote.path.clone(),
                recipient,
                deadline_secs,
                until(&quote.deadline)?,
            )
            .await
            .map_err(|e| match e {
                EngineError::TransactionFailed(reason) => map_router_revert(&reason),
                other => other,
            })?;
        if !receipt.succeeded() {
            return Err(EngineError::TransactionFailed("swap reverted on-chain".into()));
        }
        let swap_tx_hash = receipt.tx_hash;

        let balance_after = self.chain.erc20_balance(routed_to.address, recipient).await?;
        let received = balance_after.saturating_sub(balance_before);
        info!(
            "swap included: {} {} -> {} {} ({})",
            amount, from.symbol, units::format_units(received, routed_to.decimals),
            routed_to.symbol, swap_tx_hash
        );

        // ── Phase E: unwrap ──────────────────────────────────────────
        if to.is_native {
            // Withdraw the full wrapped balance the recipient holds now.
            let wrapped_balance = self.chain.erc20_balance(wrapped.address, recipient).await?;
            match self
                .chain
                .unwrap_native(&signer, wrapped.address, wrapped_balance, UNWRAP_TIMEOUT)
                .await
            {
                Ok(receipt) if receipt.succeeded() => {
                    info!("unwrapped {} to native: {}", wrapped_balance, receipt.tx_hash);
                    return Ok(SwapResult {
                        success: true,
                        swap_tx_hash: Some(swap_tx_hash),
                        wrap_tx_hash,
                        unwrap_tx_hash: Some(receipt.tx_hash),
                        final_received_symbol: Some(to.symbol.clone()),
                        final_received: Some(units::format_units(wrapped_balance, 18)),
                        final_received_raw: Some(wrapped_balance),
                        error: None,
                        error_code: None,
                        warning: None,
                    });
                }
                // The swap already succeeded; the user is left holding
                // wrapped-native and the result stays successful.
                Ok(_) | Err(_) => {
                    warn!("unwrap failed after successful swap; user holds {}", wrapped.symbol);
                    return Ok(SwapResult {
                        success: true,
                        swap_tx_hash: Some(swap_tx_hash),
                        wrap_tx_hash,
                        unwrap_tx_hash: None,
                        final_received_symbol: Some(wrapped.symbol.clone()),
                        final_received: Some(units::format_units(received, wrapped.decimals)),
                        final_received_raw: Some(received),
                        error: None,
                        error_code: None,
                        warning: Some("unwrap_failed".to_string()),
                    });
                }
            }
        }

        Ok(SwapResult {
            success: true,
            swap_tx_hash: Some(swap_tx_hash),
            wrap_tx_hash,
            unwrap_tx_hash: None,
            final_received_symbol: Some(to.symbol.clone()),
            final_received: Some(units::format_units(received, routed_to.decimals)),
            final_received_raw: Some(received),
            error: None,
            error_code: None,
            warning: None,
        })
    }
}

/// Approval amount with 10% headroom, rounded up. The buffer protects
/// against fee-on-transfer tokens and immediate retries.
pub fn approve_with_buffer(amount: U256) -> U256 {
    (amount * U256::from(110u64) + U256::from(99u64)) / U256::from(100u64)
}

/// Map a V2 router revert reason onto the engine's closed error set.
pub fn map_router_revert(reason: &str) -> EngineError {
    let upper = reason.to_uppercase();
    if upper.contains("INSUFFICIENT_OUTPUT_AMOUNT") {
        EngineError::SlippageExceeded
    } else if upper.contains("EXPIRED") {
        EngineError::DeadlineExpired
    } else {
        EngineError::TransactionFailed(reason.to_string())
    }
}

/// Remaining wall-clock time before `deadline`; expired quotes abort here.
fn until(deadline: &chrono::DateTime<Utc>) -> EngineResult<Duration> {
    (*deadline - Utc::now()).to_std().map_err(|_| EngineError::DeadlineExpired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{MockChain, SwapOutcome};
    use crate::registry::TokenRegistry;
    use crate::vault::StaticKeyVault;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn addr(n: u8) -> Address {
        Address::from([n; 20])
    }

    fn wxfi() -> Address {
        addr(1)
    }

    fn usdc() -> Address {
        addr(2)
    }

    fn weth() -> Address {
        addr(3)
    }

    fn router() -> Address {
        addr(9)
    }

    fn one_xfi() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    fn setup(chain: Arc<MockChain>) -> SwapExecutor<MockChain> {
        let registry = Arc::new(
            TokenRegistry::new(
                "XFI",
                "WXFI",
                wxfi(),
                vec![("USDC".into(), usdc(), 6), ("WETH".into(), weth(), 18)],
            )
            .unwrap(),
        );
        let vault = Arc::new(StaticKeyVault::new(&[("alice", TEST_KEY)]));
        let quoter = Quoter::new(chain.clone(), registry.clone(), router());
        SwapExecutor::new(chain, quoter, registry, vault, router())
            .with_approve_poll_interval(Duration::from_millis(1))
    }

    async fn alice() -> Address {
        use crate::vault::KeyVault;
        StaticKeyVault::new(&[("alice", TEST_KEY)])
            .signer_for("alice")
            .await
            .unwrap()
            .address()
    }

    #[tokio::test]
    async fn test_native_source_wraps_then_swaps_tokens_for_tokens() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        chain.set_native_balance(me, U256::from(5u64) * one_xfi());
        chain.script_allowances(vec![U256::MAX]);
        let out = U256::from(90_000_000u64); // 90 USDC
        chain.set_amounts_out(vec![U256::from(3u64) * one_xfi(), out]);
        chain.set_swap_credit(usdc(), me, out);

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "XFI", "USDC", "3", 100).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.wrap_tx_hash.is_some());
        assert!(result.swap_tx_hash.is_some());
        assert!(result.unwrap_tx_hash.is_none());
        assert_eq!(chain.wrap_calls.lock().unwrap().as_slice(), &[U256::from(3u64) * one_xfi()]);

        let swaps = chain.swap_calls.lock().unwrap();
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].2, vec![wxfi(), usdc()]);
        assert_eq!(result.final_received_symbol.as_deref(), Some("USDC"));
        assert_eq!(result.final_received.as_deref(), Some("90"));
    }

    #[tokio::test]
    async fn test_native_destination_unwraps_after_swap() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        let ten_usdc = U256::from(10_000_000u64);
        let out = U256::from(200u64) * one_xfi();
        chain.set_erc20_balance(usdc(), me, ten_usdc);
        chain.script_allowances(vec![U256::MAX]);
        chain.set_amounts_out(vec![ten_usdc, out]);
        chain.set_swap_credit(wxfi(), me, out);

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "XFI", "10", 100).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.wrap_tx_hash.is_none());
        assert!(result.unwrap_tx_hash.is_some());
        assert_eq!(chain.unwrap_calls.lock().unwrap().as_slice(), &[out]);
        assert_eq!(result.final_received_symbol.as_deref(), Some("XFI"));
        assert_eq!(result.final_received_raw, Some(out));
    }

    #[tokio::test]
    async fn test_approval_becomes_visible_on_second_poll() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        let ten_usdc = U256::from(10_000_000u64);
        chain.set_erc20_balance(usdc(), me, ten_usdc);
        // Phase A read, then two polls: 0, 0, sufficient.
        chain.script_allowances(vec![U256::ZERO, U256::ZERO, U256::MAX]);
        chain.set_amounts_out(vec![ten_usdc, one_xfi(), U256::from(5u64) * one_xfi()]);
        chain.set_swap_credit(weth(), me, U256::from(5u64) * one_xfi());

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "WETH", "10", 100).await;

        assert!(result.success, "{:?}", result.error);
        let approvals = chain.approve_calls.lock().unwrap();
        assert_eq!(approvals.len(), 1);
        // ceil(10_000_000 * 1.10)
        assert_eq!(approvals[0].2, U256::from(11_000_000u64));
        // 1 validate read + 2 polls
        assert_eq!(chain.allowance_reads(), 3);
    }

    #[tokio::test]
    async fn test_approval_never_visible_reports_insufficient_allowance() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        chain.set_erc20_balance(usdc(), me, U256::from(10_000_000u64));
        chain.script_allowances(vec![U256::ZERO]);
        chain.set_amounts_out(vec![U256::from(10_000_000u64), one_xfi()]);

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "XFI", "10", 100).await;

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("insufficient_allowance"));
        // 1 validate read + APPROVE_POLL_ATTEMPTS polls
        assert_eq!(chain.allowance_reads(), 1 + APPROVE_POLL_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_router_slippage_revert_maps_to_slippage_exceeded() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        chain.set_erc20_balance(usdc(), me, U256::from(10_000_000u64));
        chain.script_allowances(vec![U256::MAX]);
        chain.set_amounts_out(vec![U256::from(10_000_000u64), U256::from(100u64)]);
        chain.set_swap_outcome(SwapOutcome::RevertReason(
            "UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT".into(),
        ));

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "XFI", "10", 500).await;

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("slippage_exceeded"));
    }

    #[tokio::test]
    async fn test_unwrap_failure_is_non_fatal() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        let ten_usdc = U256::from(10_000_000u64);
        let out = U256::from(200u64) * one_xfi();
        chain.set_erc20_balance(usdc(), me, ten_usdc);
        chain.script_allowances(vec![U256::MAX]);
        chain.set_amounts_out(vec![ten_usdc, out]);
        chain.set_swap_credit(wxfi(), me, out);
        chain.fail_unwrap();

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "XFI", "10", 100).await;

        assert!(result.success);
        assert!(result.swap_tx_hash.is_some());
        assert!(result.unwrap_tx_hash.is_none());
        assert_eq!(result.warning.as_deref(), Some("unwrap_failed"));
        assert_eq!(result.final_received_symbol.as_deref(), Some("WXFI"));
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_in_phase_a() {
        let chain = Arc::new(MockChain::default());
        chain.set_amounts_out(vec![U256::from(10_000_000u64), one_xfi()]);

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "USDC", "XFI", "10", 100).await;

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("insufficient_balance"));
        assert!(chain.swap_calls.lock().unwrap().is_empty());
        assert!(chain.approve_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_revert_fails_with_wrap_failed() {
        let chain = Arc::new(MockChain::default());
        let me = alice().await;

        chain.set_native_balance(me, U256::from(5u64) * one_xfi());
        chain.script_allowances(vec![U256::MAX]);
        chain.set_amounts_out(vec![one_xfi(), U256::from(30_000_000u64)]);
        chain.fail_wrap();

        let executor = setup(chain.clone());
        let result = executor.execute("alice", "XFI", "USDC", "1", 100).await;

        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("wrap_failed"));
        assert!(chain.swap_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_approve_buffer_rounds_up() {
        assert_eq!(approve_with_buffer(U256::from(100u64)), U256::from(110u64));
        assert_eq!(approve_with_buffer(U256::from(101u64)), U256::from(112u64)); // ceil(111.1)
        assert_eq!(approve_with_buffer(U256::from(1u64)), U256::from(2u64)); // ceil(1.1)
    }

    #[test]
    fn test_map_router_revert() {
        assert_eq!(
            map_router_revert("UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT"),
            EngineError::SlippageExceeded
        );
        assert_eq!(map_router_revert("UniswapV2Router: EXPIRED"), EngineError::DeadlineExpired);
        assert_eq!(
            map_router_revert("TransferHelper: TRANSFER_FROM_FAILED").code(),
            "transaction_failed"
        );
    }
}
