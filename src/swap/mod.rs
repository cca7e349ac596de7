//! Swap pipeline: quoting and phased execution against the V2 router.

pub mod executor;
pub mod quoter;

pub use executor::SwapExecutor;
pub use quoter::Quoter;
