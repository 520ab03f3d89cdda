//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config: AppConfig = toml::from_str(&content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;

  info!(
    symbol = %config.exchange.symbol,
    order_pairs = config.quoting.order_pairs,
    leverage = config.risk.leverage,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive quoting intervals and sizes
/// - Coherent position limits and random sizing bounds
/// - Sensible leverage and take-profit values
/// - Non-empty endpoint and symbol definitions
fn validate_config(config: &AppConfig) -> Result<()> {
  // Exchange validation
  anyhow::ensure!(
    !config.exchange.base_url.is_empty(),
    "Exchange base URL must not be empty"
  );
  anyhow::ensure!(
    !config.exchange.symbol.is_empty(),
    "Symbol must not be empty"
  );
  anyhow::ensure!(
    !config.exchange.order_id_prefix.is_empty()
      && config.exchange.order_id_prefix.len() <= 13,
    "order_id_prefix must be 1-13 characters, got {:?}",
    config.exchange.order_id_prefix
  );
  anyhow::ensure!(
    config.exchange.requests_per_minute > 0,
    "requests_per_minute must be positive"
  );

  // Quoting validation
  anyhow::ensure!(
    config.quoting.order_pairs > 0,
    "order_pairs must be positive, got {}",
    config.quoting.order_pairs
  );
  anyhow::ensure!(
    config.quoting.interval > 0.0,
    "interval must be positive, got {}",
    config.quoting.interval
  );
  anyhow::ensure!(
    config.quoting.min_spread >= 0.0 && config.quoting.min_spread < 1.0,
    "min_spread must be in [0, 1), got {}",
    config.quoting.min_spread
  );
  anyhow::ensure!(
    config.quoting.relist_interval > 0.0,
    "relist_interval must be positive, got {}",
    config.quoting.relist_interval
  );
  anyhow::ensure!(
    config.quoting.order_start_size > 0,
    "order_start_size must be positive"
  );
  anyhow::ensure!(
    config.quoting.order_step_size >= 0,
    "order_step_size must not be negative"
  );
  if config.quoting.random_order_size {
    anyhow::ensure!(
      0 < config.quoting.min_order_size
        && config.quoting.min_order_size <= config.quoting.max_order_size,
      "random sizing requires 0 < min_order_size <= max_order_size, got {}..{}",
      config.quoting.min_order_size,
      config.quoting.max_order_size
    );
  }

  // Risk validation
  anyhow::ensure!(
    config.risk.leverage > 0.0 && config.risk.leverage <= 100.0,
    "leverage must be in (0, 100], got {}",
    config.risk.leverage
  );
  anyhow::ensure!(
    config.risk.target_roe > 0.0,
    "target_roe must be positive, got {}",
    config.risk.target_roe
  );
  if config.risk.check_position_limits {
    anyhow::ensure!(
      config.risk.min_position < config.risk.max_position,
      "position limits require min_position < max_position, got {}..{}",
      config.risk.min_position,
      config.risk.max_position
    );
  }
  anyhow::ensure!(
    config.risk.position_start_entry_qty > 0,
    "position_start_entry_qty must be positive"
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base_toml() -> String {
    r#"
      [bot]
      name = "ladder-bot"

      [exchange]
      base_url = "https://testnet.bitmex.com/api/v1"
      symbol = "XBTUSD"
      order_id_prefix = "ladder_"

      [quoting]
      order_pairs = 6
      order_start_size = 100
      order_step_size = 50
      interval = 0.005
      min_spread = 0.0015
      relist_interval = 0.01

      [risk]
      leverage = 25.0
      target_roe = 0.01

      [signals]

      [metrics]
    "#
    .to_string()
  }

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_valid_config_parses_with_defaults() {
    let config: AppConfig = toml::from_str(&base_toml()).unwrap();
    validate_config(&config).unwrap();
    assert_eq!(config.bot.loop_interval_ms, 1_000);
    assert!(!config.bot.dry_run);
    assert!(!config.signals.entry_enabled);
    assert_eq!(config.signals.webhook_port, 5_000);
    assert_eq!(config.risk.max_position, 500);
  }

  #[test]
  fn test_zero_order_pairs_rejected() {
    let toml = base_toml().replace("order_pairs = 6", "order_pairs = 0");
    let config: AppConfig = toml::from_str(&toml).unwrap();
    assert!(validate_config(&config).is_err());
  }

  #[test]
  fn test_inverted_position_limits_rejected() {
    let mut config: AppConfig = toml::from_str(&base_toml()).unwrap();
    config.risk.check_position_limits = true;
    config.risk.min_position = 500;
    config.risk.max_position = -500;
    assert!(validate_config(&config).is_err());
  }

  #[test]
  fn test_long_order_prefix_rejected() {
    let toml = base_toml().replace(
      "order_id_prefix = \"ladder_\"",
      "order_id_prefix = \"way_too_long_prefix\"",
    );
    let config: AppConfig = toml::from_str(&toml).unwrap();
    assert!(validate_config(&config).is_err());
  }
}
