//! External collaborators: exchange tickers, forex rates, reference prices.
//!
//! The engine itself never does I/O. Everything it needs from the outside
//! world comes in through the three traits defined here, so tests can swap
//! in static implementations.

pub mod coingecko;
pub mod exchanges;
pub mod forex;

pub use coingecko::CoinGeckoClient;
pub use exchanges::RestTickerProvider;
pub use forex::{OxrForexSource, StaticForexRates};

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::types::{Asset, Observation, ReferencePrice};

/// Events streamed by an [`ObservationProvider`] during a polling sweep.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// One usable ticker was fetched.
    Ticker(Observation),
    /// One exchange finished its sweep (with the number of usable tickers).
    ExchangeDone { exchange: String, tickers: usize },
    /// A per-exchange failure. The sweep continues for other exchanges.
    Error { exchange: String, message: String },
}

/// Streams ticker observations from the outside world into the scheduler.
///
/// Implementations must skip tickers without a usable price and treat
/// omitted volumes as zero. A sweep stopped early (cooperative cancel)
/// simply stops sending; everything sent so far remains valid cycle input.
#[async_trait]
pub trait ObservationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one full polling sweep, sending events as they arrive.
    async fn poll(&self, tx: Sender<ProviderEvent>) -> Result<()>;
}

/// Forex conversion failure. Callers are expected to fall back to the
/// static rate table rather than drop the observation.
#[derive(Debug, Error)]
pub enum ForexError {
    #[error("no rate known for currency {0}")]
    UnknownCurrency(Asset),
    #[error("conversion target {0} is not supported")]
    UnsupportedTarget(Asset),
}

/// Converts fiat amounts between currencies.
pub trait ForexSource: Send + Sync {
    /// Convert `amount` of `from` into `to` (USD in practice).
    fn convert(&self, amount: f64, from: &Asset, to: &Asset) -> Result<f64, ForexError>;
}

/// Independent per-asset USD reference prices (e.g. a market aggregator).
#[async_trait]
pub trait ReferencePriceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch a fresh snapshot of asset → reference price.
    async fn fetch(&self) -> Result<BTreeMap<Asset, ReferencePrice>>;
}
