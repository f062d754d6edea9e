//! CoinGecko reference prices.
//!
//! Fetches the market list page by page and turns it into an asset →
//! reference-price snapshot the comparator checks consensus values
//! against. Completely independent from the aggregation path; a failed
//! refresh just leaves the previous snapshot in place.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::sources::ReferencePriceSource;
use crate::types::{Asset, ReferencePrice};

const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
const PAGE_SIZE: usize = 250;

#[derive(Debug, Deserialize)]
struct MarketEntry {
    symbol: String,
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    price_change_percentage_24h: Option<f64>,
}

pub struct CoinGeckoClient {
    client: reqwest::Client,
    base_url: String,
    /// Upper bound on coins fetched per refresh.
    max_coins: usize,
}

impl CoinGeckoClient {
    pub fn new(max_coins: usize, timeout: Duration) -> Self {
        Self::with_base_url(COINGECKO_API_URL, max_coins, timeout)
    }

    pub fn with_base_url(base_url: &str, max_coins: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_coins,
        }
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<MarketEntry>> {
        let url = format!(
            "{}/coins/markets?vs_currency=usd&per_page={}&page={}",
            self.base_url, PAGE_SIZE, page
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach CoinGecko")?
            .error_for_status()
            .context("CoinGecko returned an error status")?;

        response
            .json::<Vec<MarketEntry>>()
            .await
            .context("Failed to parse CoinGecko markets response")
    }

    /// Distinguish coins sharing a ticker symbol, keeping the canonical
    /// project on the bare symbol and starring the rest.
    fn disambiguate(symbol: &str, name: &str) -> String {
        match symbol {
            "BTG" if name != "Bitcoin Gold" => "BTG*".to_string(),
            "KEY" if name != "Selfkey" => "KEY*".to_string(),
            _ => symbol.to_string(),
        }
    }
}

#[async_trait]
impl ReferencePriceSource for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "CoinGecko"
    }

    async fn fetch(&self) -> Result<BTreeMap<Asset, ReferencePrice>> {
        let mut prices = BTreeMap::new();
        let pages = self.max_coins.div_ceil(PAGE_SIZE);

        for page in 1..=pages {
            let entries = match self.fetch_page(page).await {
                Ok(entries) => entries,
                Err(err) => {
                    // Keep whatever earlier pages produced.
                    warn!(page, error = %err, "CoinGecko page fetch failed");
                    if prices.is_empty() {
                        return Err(err);
                    }
                    break;
                }
            };
            let last_page = entries.len() < PAGE_SIZE;

            for entry in entries {
                let Some(price) = entry.current_price.filter(|p| *p > 0.0) else {
                    continue;
                };
                let symbol = Self::disambiguate(&entry.symbol.to_uppercase(), &entry.name);
                prices.insert(
                    Asset::new(symbol),
                    ReferencePrice {
                        price_usd: price,
                        change_pct_24h: entry.price_change_percentage_24h,
                        market_cap: entry.market_cap,
                    },
                );
            }

            if last_page {
                break;
            }
        }

        info!(coins = prices.len(), "reference prices updated");
        Ok(prices)
    }
}
