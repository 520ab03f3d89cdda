//! Use Cases - Quoting Orchestration Layer
//!
//! Coordinates domain logic with the exchange port:
//! - `engine`: the per-cycle driver and shutdown path
//! - `order_manager`: ladder construction and order-set convergence
//! - `risk_controller`: leverage, trailing take-profit, signal entries

pub mod engine;
pub mod order_manager;
pub mod risk_controller;
