//! Chain Gateway
//!
//! JSON-RPC wrapper: read contract state, submit signed transactions, wait
//! for inclusion. The gateway is the only component that handles decrypted
//! signing material, and only for the duration of one call: each write
//! builds a throwaway signing provider from the caller's signer and drops
//! it with the call.
//!
//! Transient RPC failures retry once with a short backoff, then surface as
//! `upstream_error`. Contract reverts are never retried.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use crate::contracts::{IERC20, IUniswapV2Router02, IWrappedNative};
use crate::errors::{EngineError, EngineResult};
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Receipt outcome of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// What the engine keeps from a transaction receipt.
#[derive(Debug, Clone)]
pub struct ReceiptSummary {
    pub tx_hash: String,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    pub effective_gas_price: u128,
}

impl ReceiptSummary {
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// The gateway operation set consumed by the quoter and the swap executor.
/// Production impl is [`ChainGateway`]; tests script a mock.
#[async_trait]
pub trait Chain: Send + Sync {
    async fn native_balance(&self, addr: Address) -> EngineResult<U256>;

    async fn erc20_balance(&self, token: Address, holder: Address) -> EngineResult<U256>;

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256>;

    /// Submit an approval. Returns after submission, not inclusion; the
    /// caller polls `erc20_allowance` for visibility.
    async fn erc20_approve(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> EngineResult<String>;

    async fn get_amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> EngineResult<Vec<U256>>;

    /// Dispatch the swap and wait for inclusion, bounded by `timeout`.
    /// Timeout surfaces as `deadline_expired`.
    #[allow(clippy::too_many_arguments)]
    async fn swap_exact_tokens_for_tokens(
        &self,
        signer: &PrivateKeySigner,
        router: Address,
        amount_in: U256,
        min_out: U256,
        path: Vec<Address>,
        recipient: Address,
        deadline: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary>;

    /// `deposit()` on the wrapped-native contract with value = `amount`.
    /// Waits for inclusion.
    async fn wrap_native(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        amount: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary>;

    /// `withdraw(amount)` on the wrapped-native contract. Waits for inclusion.
    async fn unwrap_native(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        amount: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary>;
}

/// HTTP JSON-RPC gateway.
pub struct ChainGateway {
    provider: DynProvider,
    rpc_url: String,
    read_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl ChainGateway {
    pub fn connect(rpc_url: &str) -> EngineResult<Self> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| EngineError::InvalidArgument(format!("invalid RPC url: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self {
            provider,
            rpc_url: rpc_url.to_string(),
            read_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_secs(2),
        })
    }

    /// Throwaway provider that signs with the given key. Built per write,
    /// dropped with it.
    fn signing_provider(&self, signer: &PrivateKeySigner) -> EngineResult<DynProvider> {
        let url: reqwest::Url = self
            .rpc_url
            .parse()
            .map_err(|e| EngineError::InvalidArgument(format!("invalid RPC url: {e}")))?;
        let wallet = EthereumWallet::from(signer.clone());
        Ok(ProviderBuilder::new().wallet(wallet).connect_http(url).erased())
    }

    /// Poll for the receipt of a submitted transaction until `timeout`.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let status = if receipt.status() {
                        ReceiptStatus::Success
                    } else {
                        ReceiptStatus::Reverted
                    };
                    return Ok(ReceiptSummary {
                        tx_hash: format!("{tx_hash:#x}"),
                        status,
                        gas_used: receipt.gas_used as u64,
                        effective_gas_price: receipt.effective_gas_price as u128,
                    });
                }
                Ok(None) => {}
                Err(e) => debug!("receipt poll for {tx_hash:#x} errored: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::DeadlineExpired);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    /// Run a read, retrying once on transient failure or timeout.
    async fn read_with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        match tokio::time::timeout(self.read_timeout, call()).await {
            Ok(Ok(v)) => return Ok(v),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => warn!("{what} failed, retrying once: {e}"),
            Err(_) => warn!("{what} timed out, retrying once"),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        match tokio::time::timeout(self.read_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Upstream(format!("{what} timed out"))),
        }
    }
}

/// Split contract-call failures into reverts (terminal for the step) and
/// transport problems (retryable upstream).
fn classify(err: impl std::fmt::Display, what: &str) -> EngineError {
    let msg = err.to_string();
    if msg.to_lowercase().contains("revert") {
        EngineError::TransactionFailed(format!("{what}: {msg}"))
    } else {
        EngineError::Upstream(format!("{what}: {msg}"))
    }
}

#[async_trait]
impl Chain for ChainGateway {
    async fn native_balance(&self, addr: Address) -> EngineResult<U256> {
        self.read_with_retry("native balance", || async {
            self.provider
                .get_balance(addr)
                .await
                .map_err(|e| EngineError::Upstream(format!("native balance: {e}")))
        })
        .await
    }

    async fn erc20_balance(&self, token: Address, holder: Address) -> EngineResult<U256> {
        let erc20 = IERC20::new(token, self.provider.clone());
        self.read_with_retry("balanceOf", || async {
            erc20
                .balanceOf(holder)
                .call()
                .await
                .map_err(|e| classify(e, "balanceOf"))
        })
        .await
    }

    async fn erc20_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256> {
        let erc20 = IERC20::new(token, self.provider.clone());
        self.read_with_retry("allowance", || async {
            erc20
                .allowance(owner, spender)
                .call()
                .await
                .map_err(|e| classify(e, "allowance"))
        })
        .await
    }

    async fn erc20_approve(
        &self,
        signer: &PrivateKeySigner,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> EngineResult<String> {
        let provider = self.signing_provider(signer)?;
        let erc20 = IERC20::new(token, provider);
        let pending = erc20
            .approve(spender, amount)
            .send()
            .await
            .map_err(|e| classify(e, "approve"))?;
        let tx_hash = *pending.tx_hash();
        debug!("approve submitted: token={token} spender={spender} tx={tx_hash:#x}");
        Ok(format!("{tx_hash:#x}"))
    }

    async fn get_amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> EngineResult<Vec<U256>> {
        let router = IUniswapV2Router02::new(router, self.provider.clone());
        let router = &router;
        self.read_with_retry("getAmountsOut", || {
            let path = path.clone();
            async move {
                router
                    .getAmountsOut(amount_in, path)
                    .call()
                    .await
                    .map_err(|e| classify(e, "getAmountsOut"))
            }
        })
        .await
    }

    async fn swap_exact_tokens_for_tokens(
        &self,
        signer: &PrivateKeySigner,
        router: Address,
        amount_in: U256,
        min_out: U256,
        path: Vec<Address>,
        recipient: Address,
        deadline: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary> {
        let provider = self.signing_provider(signer)?;
        let router = IUniswapV2Router02::new(router, provider);
        let pending = router
            .swapExactTokensForTokens(amount_in, min_out, path, recipient, deadline)
            .send()
            .await
            .map_err(|e| classify(e, "swapExactTokensForTokens"))?;
        let tx_hash = *pending.tx_hash();
        debug!("swap submitted: tx={tx_hash:#x}");
        self.wait_for_receipt(tx_hash, timeout).await
    }

    async fn wrap_native(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        amount: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary> {
        let provider = self.signing_provider(signer)?;
        let contract = IWrappedNative::new(wrapped, provider);
        let pending = contract
            .deposit()
            .value(amount)
            .send()
            .await
            .map_err(|e| classify(e, "deposit"))?;
        let tx_hash = *pending.tx_hash();
        debug!("wrap submitted: amount={amount} tx={tx_hash:#x}");
        self.wait_for_receipt(tx_hash, timeout).await
    }

    async fn unwrap_native(
        &self,
        signer: &PrivateKeySigner,
        wrapped: Address,
        amount: U256,
        timeout: Duration,
    ) -> EngineResult<ReceiptSummary> {
        let provider = self.signing_provider(signer)?;
        let contract = IWrappedNative::new(wrapped, provider);
        let pending = contract
            .withdraw(amount)
            .send()
            .await
            .map_err(|e| classify(e, "withdraw"))?;
        let tx_hash = *pending.tx_hash();
        debug!("unwrap submitted: amount={amount} tx={tx_hash:#x}");
        self.wait_for_receipt(tx_hash, timeout).await
    }
}

/// Scripted in-memory chain for tests. Balances and allowance reads are
/// driven by the test; writes are recorded for assertions.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum SwapOutcome {
        Success,
        RevertReason(String),
        Timeout,
    }

    #[derive(Default)]
    pub struct MockChain {
        pub native_balances: Mutex<HashMap<Address, U256>>,
        /// (token, holder) -> balance
        pub erc20_balances: Mutex<HashMap<(Address, Address), U256>>,
        /// Scripted allowance reads, consumed front to back; when exhausted
        /// every further read returns the last scripted value (or zero).
        allowance_script: Mutex<Vec<U256>>,
        amounts_out: Mutex<Option<Vec<U256>>>,
        swap_outcome: Mutex<Option<SwapOutcome>>,
        /// Credited to (token, holder) when a swap succeeds, so balance
        /// deltas are observable.
        swap_credit: Mutex<Option<(Address, Address, U256)>>,
        wrap_fails: Mutex<bool>,
        unwrap_fails: Mutex<bool>,

        pub approve_calls: Mutex<Vec<(Address, Address, U256)>>,
        pub swap_calls: Mutex<Vec<(U256, U256, Vec<Address>, U256)>>,
        pub wrap_calls: Mutex<Vec<U256>>,
        pub unwrap_calls: Mutex<Vec<U256>>,
        allowance_reads: Mutex<u32>,
    }

    impl MockChain {
        pub fn set_native_balance(&self, addr: Address, amount: U256) {
            self.native_balances.lock().unwrap().insert(addr, amount);
        }

        pub fn set_erc20_balance(&self, token: Address, holder: Address, amount: U256) {
            self.erc20_balances.lock().unwrap().insert((token, holder), amount);
        }

        pub fn script_allowances(&self, reads: Vec<U256>) {
            *self.allowance_script.lock().unwrap() = reads;
        }

        pub fn set_amounts_out(&self, amounts: Vec<U256>) {
            *self.amounts_out.lock().unwrap() = Some(amounts);
        }

        pub fn set_amounts_out_revert(&self) {
            *self.amounts_out.lock().unwrap() = None;
        }

        pub fn set_swap_outcome(&self, outcome: SwapOutcome) {
            *self.swap_outcome.lock().unwrap() = Some(outcome);
        }

        pub fn set_swap_credit(&self, token: Address, holder: Address, amount: U256) {
            *self.swap_credit.lock().unwrap() = Some((token, holder, amount));
        }

        pub fn fail_wrap(&self) {
            *self.wrap_fails.lock().unwrap() = true;
        }

        pub fn fail_unwrap(&self) {
            *self.unwrap_fails.lock().unwrap() = true;
        }

        pub fn allowance_reads(&self) -> u32 {
            *self.allowance_reads.lock().unwrap()
        }

        fn receipt(status: ReceiptStatus, tag: &str) -> ReceiptSummary {
            ReceiptSummary {
                tx_hash: format!("0x{}", tag.repeat(64 / tag.len().max(1)).chars().take(64).collect::<String>()),
                status,
                gas_used: 100_000,
                effective_gas_price: 1_000_000_000,
            }
        }
    }

    #[async_trait]
    impl Chain for MockChain {
        async fn native_balance(&self, addr: Address) -> EngineResult<U256> {
            Ok(*self.native_balances.lock().unwrap().get(&addr).unwrap_or(&U256::ZERO))
        }

        async fn erc20_balance(&self, token: Address, holder: Address) -> EngineResult<U256> {
            Ok(*self
                .erc20_balances
                .lock()
                .unwrap()
                .get(&(token, holder))
                .unwrap_or(&U256::ZERO))
        }

        async fn erc20_allowance(
            &self,
            _token: Address,
            _owner: Address,
            _spender: Address,
        ) -> EngineResult<U256> {
            *self.allowance_reads.lock().unwrap() += 1;
            let mut script = self.allowance_script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                Ok(script.first().copied().unwrap_or(U256::ZERO))
            }
        }

        async fn erc20_approve(
            &self,
            _signer: &PrivateKeySigner,
            token: Address,
            spender: Address,
            amount: U256,
        ) -> EngineResult<String> {
            self.approve_calls.lock().unwrap().push((token, spender, amount));
            Ok("0x".to_string() + &"a".repeat(64))
        }

        async fn get_amounts_out(
            &self,
            _router: Address,
            _amount_in: U256,
            _path: Vec<Address>,
        ) -> EngineResult<Vec<U256>> {
            match self.amounts_out.lock().unwrap().clone() {
                Some(amounts) => Ok(amounts),
                None => Err(EngineError::TransactionFailed(
                    "getAmountsOut: execution reverted".into(),
                )),
            }
        }

        async fn swap_exact_tokens_for_tokens(
            &self,
            _signer: &PrivateKeySigner,
            _router: Address,
            amount_in: U256,
            min_out: U256,
            path: Vec<Address>,
            _recipient: Address,
            deadline: U256,
            _timeout: Duration,
        ) -> EngineResult<ReceiptSummary> {
            self.swap_calls.lock().unwrap().push((amount_in, min_out, path, deadline));
            match self.swap_outcome.lock().unwrap().clone().unwrap_or(SwapOutcome::Success) {
                SwapOutcome::Success => {
                    if let Some((token, holder, amount)) = *self.swap_credit.lock().unwrap() {
                        let mut balances = self.erc20_balances.lock().unwrap();
                        let entry = balances.entry((token, holder)).or_insert(U256::ZERO);
                        *entry += amount;
                    }
                    Ok(Self::receipt(ReceiptStatus::Success, "5"))
                }
                SwapOutcome::RevertReason(reason) => Err(EngineError::TransactionFailed(reason)),
                SwapOutcome::Timeout => Err(EngineError::DeadlineExpired),
            }
        }

        async fn wrap_native(
            &self,
            _signer: &PrivateKeySigner,
            _wrapped: Address,
            amount: U256,
            _timeout: Duration,
        ) -> EngineResult<ReceiptSummary> {
            self.wrap_calls.lock().unwrap().push(amount);
            if *self.wrap_fails.lock().unwrap() {
                Ok(Self::receipt(ReceiptStatus::Reverted, "3"))
            } else {
                Ok(Self::receipt(ReceiptStatus::Success, "3"))
            }
        }

        async fn unwrap_native(
            &self,
            _signer: &PrivateKeySigner,
            wrapped: Address,
            amount: U256,
            _timeout: Duration,
        ) -> EngineResult<ReceiptSummary> {
            self.unwrap_calls.lock().unwrap().push(amount);
            if *self.unwrap_fails.lock().unwrap() {
                Err(EngineError::UnwrapFailed("withdraw reverted".into()))
            } else {
                // Withdrawn balance leaves the wrapped ledger.
                if let Some(holder_entry) = self
                    .erc20_balances
                    .lock()
                    .unwrap()
                    .iter_mut()
                    .find(|((token, _), _)| *token == wrapped)
                {
                    *holder_entry.1 = holder_entry.1.saturating_sub(amount);
                }
                Ok(Self::receipt(ReceiptStatus::Success, "7"))
            }
        }
    }
}
