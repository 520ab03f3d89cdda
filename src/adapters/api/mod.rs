//! Exchange REST Adapter
//!
//! HTTP transport for the exchange: request signing, rate limiting,
//! typed wire payloads, and the `Exchange` port implementation.

pub mod auth;
pub mod client;
pub mod exchange;
pub mod types;

pub use auth::BitmexAuth;
pub use client::{RestClient, RestClientConfig};
pub use exchange::BitmexExchange;
