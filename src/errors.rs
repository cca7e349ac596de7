//! Engine Error Kinds
//!
//! The closed set of failure kinds emitted by the engine. Collaborators
//! (chat surface, tool router) are responsible for turning kinds into
//! user-facing text; the engine emits kinds, never prose.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Every failure the engine can report, one variant per wire code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Shape, range, or symbol validation failure at the API boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No routable path between the two symbols (includes the USDT deny-list).
    #[error("pair unsupported: {0}")]
    PairUnsupported(String),

    /// Phase A balance check failed.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: String, need: String },

    /// Approval did not become visible within the poll window.
    #[error("allowance did not reach the required amount within the poll window")]
    InsufficientAllowance,

    /// Router reverted because minimum-received was not met.
    #[error("router rejected the swap: minimum output not met")]
    SlippageExceeded,

    /// Swap not included before the quote deadline.
    #[error("swap deadline reached without inclusion")]
    DeadlineExpired,

    /// Wrapped-native deposit failed.
    #[error("wrapped-native deposit failed: {0}")]
    WrapFailed(String),

    /// Wrapped-native withdraw failed. Non-fatal at the executor level.
    #[error("wrapped-native withdraw failed: {0}")]
    UnwrapFailed(String),

    /// Generic on-chain revert with no more specific mapping.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// RPC or price upstream unavailable after the per-step retry.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Order id not owned by caller, or absent.
    #[error("order not found")]
    NotFound,

    /// Attempt to mutate an order that already reached a terminal state.
    #[error("order is in a terminal state")]
    TerminalState,

    /// Per-owner active-order cap reached.
    #[error("active order quota reached")]
    QuotaExceeded,
}

impl EngineError {
    /// Stable snake_case code for collaborators.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::PairUnsupported(_) => "pair_unsupported",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::InsufficientAllowance => "insufficient_allowance",
            EngineError::SlippageExceeded => "slippage_exceeded",
            EngineError::DeadlineExpired => "deadline_expired",
            EngineError::WrapFailed(_) => "wrap_failed",
            EngineError::UnwrapFailed(_) => "unwrap_failed",
            EngineError::TransactionFailed(_) => "transaction_failed",
            EngineError::Upstream(_) => "upstream_error",
            EngineError::NotFound => "not_found",
            EngineError::TerminalState => "terminal_state",
            EngineError::QuotaExceeded => "quota_exceeded",
        }
    }

    /// Whether a step may retry this error once before reporting it.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Upstream(_))
    }
}
