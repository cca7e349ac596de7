//! Conditional DCA Order Engine Library
//!
//! Watches a reference market price, selects user-authored trigger orders
//! that have become eligible, and executes them atomically against an
//! on-chain V2 swap router, including wrapped-native handling, allowance
//! management, and slippage-bounded quoting.
//!
//! Author: AI-Generated
//! Created: 2026-02-03

pub mod config;
pub mod contracts;
pub mod errors;
pub mod gateway;
pub mod oracle;
pub mod orders;
pub mod registry;
pub mod scheduler;
pub mod swap;
pub mod types;
pub mod units;
pub mod vault;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use errors::{EngineError, EngineResult};
pub use gateway::{Chain, ChainGateway};
pub use oracle::PriceOracle;
pub use orders::{CreateOrderRequest, DcaService, OrderStore};
pub use registry::{Token, TokenRegistry};
pub use scheduler::{ExecutionScheduler, SchedulerConfig, SchedulerStatus};
pub use swap::{Quoter, SwapExecutor};
pub use types::{Order, OrderStatus, Quote, SwapResult, TriggerCondition};
pub use vault::{FileKeyVault, KeyVault};
