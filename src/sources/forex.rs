//! Forex rates: openexchangerates.org with a static offline fallback.
//!
//! The engine converts fiat quote legs to USD through [`ForexSource`].
//! When no app id is configured, or the live fetch fails, conversions
//! come from the mocked table below so aggregation keeps working offline
//! with deterministic results.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::sources::{ForexError, ForexSource};
use crate::types::Asset;

const OXR_LATEST_URL: &str = "https://openexchangerates.org/api/latest.json";

/// Mocked exchange rates in units per USD, sorted by code.
///
/// Used whenever live rates are unavailable. Deliberately coarse; they
/// exist to keep fiat-quoted pairs flowing, not to be accurate.
const MOCK_USD_RATES: &[(&str, f64)] = &[
    ("AED", 3.6725),
    ("AUD", 1.52),
    ("BRL", 5.57),
    ("CAD", 1.37),
    ("CHF", 0.88),
    ("CNY", 7.24),
    ("CZK", 23.2),
    ("DKK", 6.88),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("HKD", 7.80),
    ("HUF", 362.0),
    ("IDR", 16250.0),
    ("ILS", 3.72),
    ("INR", 83.5),
    ("JPY", 155.0),
    ("KRW", 1370.0),
    ("MXN", 18.4),
    ("NOK", 10.7),
    ("NZD", 1.65),
    ("PHP", 58.0),
    ("PLN", 3.95),
    ("RUB", 92.0),
    ("SAR", 3.75),
    ("SEK", 10.5),
    ("SGD", 1.34),
    ("THB", 36.0),
    ("TRY", 33.5),
    ("TWD", 32.4),
    ("UAH", 41.0),
    ("USD", 1.0),
    ("ZAR", 18.1),
];

/// Fixed rate table. Doubles as the offline fallback and as a simple
/// deterministic [`ForexSource`] for tests.
#[derive(Debug, Clone)]
pub struct StaticForexRates {
    /// code → units per USD
    rates: BTreeMap<String, f64>,
}

impl StaticForexRates {
    /// The built-in mocked table.
    pub fn mocked() -> Self {
        Self::with_rates(MOCK_USD_RATES.iter().copied())
    }

    pub fn with_rates<'a>(rates: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(code, rate)| (code.to_uppercase(), rate))
                .collect(),
        }
    }
}

impl ForexSource for StaticForexRates {
    fn convert(&self, amount: f64, from: &Asset, to: &Asset) -> Result<f64, ForexError> {
        if !to.is_usd() {
            return Err(ForexError::UnsupportedTarget(to.clone()));
        }
        if from.is_usd() {
            return Ok(amount);
        }
        let rate = self
            .rates
            .get(from.as_str())
            .ok_or_else(|| ForexError::UnknownCurrency(from.clone()))?;
        Ok(amount / rate)
    }
}

#[derive(Debug, Deserialize)]
struct OxrResponse {
    #[allow(dead_code)]
    base: String,
    rates: HashMap<String, f64>,
}

/// Live rates from openexchangerates.org with the mocked-table fallback.
pub struct OxrForexSource {
    client: reqwest::Client,
    app_id: Option<String>,
    /// Live rates in units per USD; `None` until a successful refresh.
    live: RwLock<Option<HashMap<String, f64>>>,
    fallback: StaticForexRates,
}

impl OxrForexSource {
    pub fn new(app_id: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            app_id,
            live: RwLock::new(None),
            fallback: StaticForexRates::mocked(),
        }
    }

    /// Fetch the latest rates. Failure leaves the fallback in effect and
    /// never propagates beyond a log line.
    pub async fn refresh(&self) {
        let Some(app_id) = self.app_id.as_deref() else {
            warn!("no OXR app id configured, mocked forex rates will be used");
            return;
        };

        match self.fetch_latest(app_id).await {
            Ok(rates) => {
                info!(
                    currencies = rates.len(),
                    "forex rates updated from openexchangerates.org"
                );
                *self.live.write().expect("forex rate lock poisoned") = Some(rates);
            }
            Err(err) => {
                error!(error = %err, "forex fetch failed (wrong app id?)");
                info!("falling back to mocked values for forex conversions");
            }
        }
    }

    async fn fetch_latest(&self, app_id: &str) -> Result<HashMap<String, f64>> {
        let url = format!("{OXR_LATEST_URL}?app_id={app_id}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach openexchangerates.org")?
            .error_for_status()
            .context("openexchangerates.org returned an error status")?;

        let body: OxrResponse = response
            .json()
            .await
            .context("Failed to parse openexchangerates.org response")?;
        Ok(body.rates)
    }
}

impl ForexSource for OxrForexSource {
    fn convert(&self, amount: f64, from: &Asset, to: &Asset) -> Result<f64, ForexError> {
        let live = self.live.read().expect("forex rate lock poisoned");
        if let Some(rates) = live.as_ref() {
            let from_rate = if from.is_usd() {
                Some(1.0)
            } else {
                rates.get(from.as_str()).copied()
            };
            let to_rate = if to.is_usd() {
                Some(1.0)
            } else {
                rates.get(to.as_str()).copied()
            };
            if let (Some(from_rate), Some(to_rate)) = (from_rate, to_rate) {
                return Ok(amount / from_rate * to_rate);
            }
            // A currency missing from the live table still gets a chance
            // through the mocked rates below.
        }
        self.fallback.convert(amount, from, to)
    }
}
