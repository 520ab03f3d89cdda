//! Configuration Module - TOML-based Bot Configuration
//!
//! Loads and validates configuration from `config.toml`. All quoting,
//! risk, and endpoint parameters are externalized here - nothing is
//! hardcoded in the domain layer. Credentials come from environment
//! variables, never from this file.

pub mod hot_reload;
pub mod loader;

use serde::Deserialize;

/// Top-level bot configuration.
///
/// Loaded from `config.toml` at startup and revalidated on every
/// hot-reload check. All fields are validated before the bot begins
/// operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Bot identity and loop behavior.
  pub bot: BotConfig,
  /// Exchange endpoint and instrument selection.
  pub exchange: ExchangeConfig,
  /// Ladder shape and convergence tolerances.
  pub quoting: QuotingConfig,
  /// Leverage, position limits, and take-profit parameters.
  pub risk: RiskConfig,
  /// Signal webhook and signal-entry behavior.
  pub signals: SignalConfig,
  /// Metrics and health endpoints.
  pub metrics: MetricsConfig,
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
  /// Human-readable bot name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Enable dry-run mode (no real orders).
  #[serde(default)]
  pub dry_run: bool,
  /// Balance reported in dry-run mode, in XBT.
  #[serde(default = "default_dry_run_balance")]
  pub dry_run_balance_xbt: f64,
  /// How often to re-check and replace orders (milliseconds).
  #[serde(default = "default_loop_interval")]
  pub loop_interval_ms: u64,
}

/// Exchange endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
  /// REST API base URL.
  pub base_url: String,
  /// Instrument to market-make.
  pub symbol: String,
  /// Prefix stamped on every client order id so this bot never
  /// cancels manually placed orders or another bot's orders.
  /// Max 13 characters.
  pub order_id_prefix: String,
  /// Send orders as post-only (participate-do-not-initiate).
  #[serde(default)]
  pub post_only: bool,
  /// Request timeout in milliseconds.
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Client-side REST request budget per minute.
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
  /// Contracts held, used in portfolio delta calculations.
  #[serde(default)]
  pub contracts: Vec<String>,
}

/// Ladder shape and convergence tolerances.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotingConfig {
  /// How many pairs of buy/sell orders to keep open.
  pub order_pairs: usize,
  /// Contracts submitted at the innermost level.
  pub order_start_size: i64,
  /// Additional contracts per level working outward.
  #[serde(default)]
  pub order_step_size: i64,
  /// Distance between successive orders as a fraction (0.005 = 0.5%).
  pub interval: f64,
  /// Minimum spread to maintain between asks and bids.
  pub min_spread: f64,
  /// Place orders just inside the existing spread and work outward,
  /// rather than starting in the middle and killing wide spreads.
  #[serde(default)]
  pub maintain_spreads: bool,
  /// How far an existing order's price may drift from its desired
  /// price before it is amended (0.01 = 1%). Keeps micro drift from
  /// burning the rate limit.
  pub relist_interval: f64,
  /// Draw order sizes uniformly instead of the start/step function.
  #[serde(default)]
  pub random_order_size: bool,
  /// Lower bound for random sizing.
  #[serde(default = "default_min_order_size")]
  pub min_order_size: i64,
  /// Upper bound for random sizing.
  #[serde(default = "default_max_order_size")]
  pub max_order_size: i64,
}

/// Risk management configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
  /// Target leverage for all new risk.
  pub leverage: f64,
  /// Unrealized ROE that arms the trailing take-profit.
  pub target_roe: f64,
  /// Enforce the min/max position limits.
  #[serde(default)]
  pub check_position_limits: bool,
  /// Short inventory bound, in contracts (negative).
  #[serde(default = "default_min_position")]
  pub min_position: i64,
  /// Long inventory bound, in contracts.
  #[serde(default = "default_max_position")]
  pub max_position: i64,
  /// Contracts seeded on a signalled entry.
  #[serde(default = "default_entry_qty")]
  pub position_start_entry_qty: i64,
}

/// Signal webhook configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
  /// Port the signal webhook listens on.
  #[serde(default = "default_webhook_port")]
  pub webhook_port: u16,
  /// Act on signals by seeding entries (off: signals are only logged).
  #[serde(default)]
  pub entry_enabled: bool,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_dry_run_balance() -> f64 {
  50.0
}

fn default_loop_interval() -> u64 {
  1_000
}

fn default_timeout_ms() -> u64 {
  7_000
}

fn default_requests_per_minute() -> u32 {
  60
}

fn default_min_order_size() -> i64 {
  1
}

fn default_max_order_size() -> i64 {
  100
}

fn default_min_position() -> i64 {
  -500
}

fn default_max_position() -> i64 {
  500
}

fn default_entry_qty() -> i64 {
  100
}

fn default_webhook_port() -> u16 {
  5000
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
