//! Order persistence and the DCA service on top of it.

pub mod service;
pub mod store;

pub use service::{CreateOrderRequest, DcaService};
pub use store::OrderStore;
