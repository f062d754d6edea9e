//! Configuration management for Coinsensus
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub runner: RunnerConfig,
    pub aggregator: AggregatorConfig,
    pub polling: PollingConfig,
    pub forex: ForexConfig,
    pub reference: ReferenceConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Keep polling forever; `max_iterations` is ignored when set
    pub loop_forever: bool,
    /// Number of full polling sweeps before stopping
    pub max_iterations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Reject prices outside the standard-deviation band.
    /// When false every non-zero price is kept.
    pub bypass_outliers: bool,
    /// Band half-width in sigmas for outlier rejection
    pub outlier_stddev_distance_from_mean: f64,
    /// Warn when a price deviates from the reference by more than this
    pub reference_tolerance_pct: f64,
    /// How often the partial VWAP is recomputed
    pub aggregate_price_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Exchanges to poll (must have ticker adapters)
    pub trusted_exchanges: Vec<String>,
    /// Exchanges to skip even if listed as trusted
    pub exclude_exchanges: Vec<String>,
    /// Maximum concurrent exchange requests
    pub parallel_exchange_requests: usize,
    /// Base delay between requests to one exchange in milliseconds
    pub rate_limit_ms: u64,
    /// Divides the per-exchange rate-limit delay when feeling adventurous
    pub rate_limit_divider: f64,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForexConfig {
    /// Fetch live rates from openexchangerates.org; mocked rates are used
    /// when disabled or when the fetch fails
    pub live_enabled: bool,
    /// openexchangerates.org app id (usually from OXR_APP_ID)
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    /// Fetch reference prices for comparison
    pub enabled: bool,
    /// Reference snapshot refresh period
    pub refresh_interval_ms: u64,
    /// Upper bound on coins fetched from the reference source
    pub max_coins: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Print the full price table after each aggregation pass
    pub print_all_prices: bool,
    /// Log a one-line summary after each aggregation pass
    pub print_status: bool,
    /// Coins highlighted in the summary line
    pub coins_in_status_bar: Vec<String>,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Runner defaults
            .set_default("runner.loop_forever", true)?
            .set_default("runner.max_iterations", 10)?
            // Aggregator defaults
            .set_default("aggregator.bypass_outliers", true)?
            .set_default("aggregator.outlier_stddev_distance_from_mean", 3.0)?
            .set_default("aggregator.reference_tolerance_pct", 10.0)?
            .set_default("aggregator.aggregate_price_interval_ms", 5000)?
            // Polling defaults
            .set_default(
                "polling.trusted_exchanges",
                vec!["kucoin", "gateio", "okx", "poloniex"],
            )?
            .set_default("polling.exclude_exchanges", Vec::<String>::new())?
            .set_default("polling.parallel_exchange_requests", 8)?
            .set_default("polling.rate_limit_ms", 1000)?
            .set_default("polling.rate_limit_divider", 1.0)?
            .set_default("polling.request_timeout_secs", 30)?
            // Forex defaults
            .set_default("forex.live_enabled", false)?
            // Reference defaults
            .set_default("reference.enabled", true)?
            .set_default("reference.refresh_interval_ms", 100_000)?
            .set_default("reference.max_coins", 2000)?
            // Display defaults
            .set_default("display.print_all_prices", true)?
            .set_default("display.print_status", true)?
            .set_default("display.coins_in_status_bar", vec!["BTC", "ETH"])?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (COINSENSUS_*)
            .add_source(Environment::with_prefix("COINSENSUS").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // The OXR app id is a secret; prefer the environment over files.
        if app_config.forex.app_id.is_none() {
            app_config.forex.app_id = std::env::var("OXR_APP_ID").ok();
        }

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "exchanges={:?} interval_ms={} outliers={} sigma={} forex_live={}",
            self.polling.trusted_exchanges,
            self.aggregator.aggregate_price_interval_ms,
            self.aggregator.bypass_outliers,
            self.aggregator.outlier_stddev_distance_from_mean,
            self.forex.live_enabled,
        )
    }

    /// Trusted exchanges minus the excluded ones, order preserved.
    pub fn active_exchanges(&self) -> Vec<String> {
        self.polling
            .trusted_exchanges
            .iter()
            .filter(|e| !self.polling.exclude_exchanges.contains(e))
            .cloned()
            .collect()
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
