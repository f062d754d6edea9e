//! Coinsensus entry point
//!
//! Wires the collaborators together and runs the aggregation scheduler
//! until a stop signal arrives or the iteration limit is reached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coinsensus::config::AppConfig;
use coinsensus::scheduler::Scheduler;
use coinsensus::sources::{
    CoinGeckoClient, OxrForexSource, ReferencePriceSource, RestTickerProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    info!(config = %config.digest(), "starting coinsensus");

    let timeout = Duration::from_secs(config.polling.request_timeout_secs);

    let forex = Arc::new(OxrForexSource::new(
        config
            .forex
            .live_enabled
            .then(|| config.forex.app_id.clone())
            .flatten(),
        timeout,
    ));
    if config.forex.live_enabled {
        forex.refresh().await;
    } else {
        warn!("live forex rates disabled, mocked values will be used for conversions");
    }

    let reference: Option<Arc<dyn ReferencePriceSource>> = if config.reference.enabled {
        Some(Arc::new(CoinGeckoClient::new(
            config.reference.max_coins,
            timeout,
        )))
    } else {
        None
    };

    let enabled = Arc::new(AtomicBool::new(true));

    let rate_limit = Duration::from_millis(
        (config.polling.rate_limit_ms as f64 / config.polling.rate_limit_divider.max(0.1)) as u64,
    );
    let provider = Arc::new(RestTickerProvider::new(
        config.active_exchanges(),
        config.polling.parallel_exchange_requests,
        rate_limit,
        timeout,
        enabled.clone(),
    ));

    // Ctrl-C flips the cooperative stop flag; the sweep in progress winds
    // down and its partial data still closes the cycle.
    let stop_flag = enabled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop signal received, please wait...");
            stop_flag.store(false, Ordering::Relaxed);
        }
    });

    let mut scheduler = Scheduler::new(config, provider, forex, reference, enabled);
    scheduler.run().await?;

    info!("all done");
    Ok(())
}
