//! Exchange ticker polling over public REST APIs.
//!
//! Every supported exchange exposes a bulk "all tickers" endpoint, so one
//! sweep costs one request per exchange. Requests run bounded-parallel
//! with a polite delay, and each exchange's failure stays its own: the
//! sweep carries on and reports the error as an event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::sources::{ObservationProvider, ProviderEvent};
use crate::types::{Observation, Pair};

const KUCOIN_TICKERS_URL: &str = "https://api.kucoin.com/api/v1/market/allTickers";
const GATEIO_TICKERS_URL: &str = "https://api.gateio.ws/api/v4/spot/tickers";
const OKX_TICKERS_URL: &str = "https://www.okx.com/api/v5/market/tickers?instType=SPOT";
const POLONIEX_TICKERS_URL: &str = "https://api.poloniex.com/markets/ticker24h";

/// Exchanges this provider has adapters for.
pub const SUPPORTED_EXCHANGES: &[&str] = &["gateio", "kucoin", "okx", "poloniex"];

/// Polls the configured exchanges' ticker endpoints once per sweep.
pub struct RestTickerProvider {
    client: reqwest::Client,
    exchanges: Vec<String>,
    parallel_requests: usize,
    request_delay: Duration,
    enabled: Arc<AtomicBool>,
}

impl RestTickerProvider {
    pub fn new(
        exchanges: Vec<String>,
        parallel_requests: usize,
        request_delay: Duration,
        request_timeout: Duration,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        for exchange in &exchanges {
            if !SUPPORTED_EXCHANGES.contains(&exchange.as_str()) {
                warn!(exchange = %exchange, "no ticker adapter for exchange, it will be skipped");
            }
        }

        Self {
            client,
            exchanges,
            parallel_requests: parallel_requests.max(1),
            request_delay,
            enabled,
        }
    }

    async fn fetch_exchange(client: &reqwest::Client, exchange: &str) -> Result<Vec<Observation>> {
        let url = match exchange {
            "kucoin" => KUCOIN_TICKERS_URL,
            "gateio" => GATEIO_TICKERS_URL,
            "okx" => OKX_TICKERS_URL,
            "poloniex" => POLONIEX_TICKERS_URL,
            other => bail!("no ticker adapter for exchange {other}"),
        };

        let body = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {exchange}"))?
            .error_for_status()
            .with_context(|| format!("{exchange} returned an error status"))?
            .text()
            .await
            .with_context(|| format!("Failed to read {exchange} response"))?;

        let observations = match exchange {
            "kucoin" => parse_kucoin(&body)?,
            "gateio" => parse_gateio(&body)?,
            "okx" => parse_okx(&body)?,
            "poloniex" => parse_poloniex(&body)?,
            _ => unreachable!(),
        };
        Ok(observations)
    }
}

#[async_trait]
impl ObservationProvider for RestTickerProvider {
    fn name(&self) -> &'static str {
        "rest-tickers"
    }

    async fn poll(&self, tx: Sender<ProviderEvent>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.parallel_requests));
        let mut handles = Vec::with_capacity(self.exchanges.len());

        for exchange in self.exchanges.clone() {
            if !self.enabled.load(Ordering::Relaxed) {
                debug!("polling disabled, stopping sweep early");
                break;
            }

            let client = self.client.clone();
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let enabled = self.enabled.clone();
            let delay = self.request_delay;

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                tokio::time::sleep(delay).await;

                match Self::fetch_exchange(&client, &exchange).await {
                    Ok(observations) => {
                        let tickers = observations.len();
                        for observation in observations {
                            if !enabled.load(Ordering::Relaxed) {
                                return;
                            }
                            if tx.send(ProviderEvent::Ticker(observation)).await.is_err() {
                                return;
                            }
                        }
                        info!(exchange = %exchange, tickers, "exchange sweep done");
                        let _ = tx
                            .send(ProviderEvent::ExchangeDone { exchange, tickers })
                            .await;
                    }
                    Err(err) => {
                        warn!(exchange = %exchange, error = %err, "exchange sweep failed");
                        let _ = tx
                            .send(ProviderEvent::Error {
                                exchange,
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

/// "BTC-USDT" → ("BTC", "USDT"); anything else is not a spot pair.
fn split_symbol(symbol: &str, separator: char) -> Option<(&str, &str)> {
    let (base, quote) = symbol.split_once(separator)?;
    if base.is_empty() || quote.is_empty() || quote.contains(separator) {
        return None;
    }
    Some((base, quote))
}

/// Parse an exchange-reported decimal, tolerating missing fields.
fn parse_volume(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

/// A price that is absent, unparseable, zero or non-finite means the
/// ticker carries no usable observation.
fn parse_price(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|p| p.is_finite() && *p > 0.0)
}

fn observation(
    exchange: &str,
    base: &str,
    quote: &str,
    price: f64,
    base_volume: f64,
    quote_volume: f64,
) -> Observation {
    Observation {
        exchange: exchange.to_string(),
        pair: Pair::new(base, quote),
        last_price: price,
        base_volume,
        quote_volume,
    }
}

#[derive(Debug, Deserialize)]
struct KucoinResponse {
    data: KucoinData,
}

#[derive(Debug, Deserialize)]
struct KucoinData {
    ticker: Vec<KucoinTicker>,
}

#[derive(Debug, Deserialize)]
struct KucoinTicker {
    symbol: String,
    last: Option<String>,
    vol: Option<String>,
    #[serde(rename = "volValue")]
    vol_value: Option<String>,
}

fn parse_kucoin(body: &str) -> Result<Vec<Observation>> {
    let response: KucoinResponse =
        serde_json::from_str(body).context("Failed to parse KuCoin tickers")?;
    Ok(response
        .data
        .ticker
        .into_iter()
        .filter_map(|t| {
            let (base, quote) = split_symbol(&t.symbol, '-')?;
            let price = parse_price(t.last.as_deref())?;
            Some(observation(
                "kucoin",
                base,
                quote,
                price,
                parse_volume(t.vol.as_deref()),
                parse_volume(t.vol_value.as_deref()),
            ))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct GateioTicker {
    currency_pair: String,
    last: Option<String>,
    base_volume: Option<String>,
    quote_volume: Option<String>,
}

fn parse_gateio(body: &str) -> Result<Vec<Observation>> {
    let tickers: Vec<GateioTicker> =
        serde_json::from_str(body).context("Failed to parse Gate.io tickers")?;
    Ok(tickers
        .into_iter()
        .filter_map(|t| {
            let (base, quote) = split_symbol(&t.currency_pair, '_')?;
            let price = parse_price(t.last.as_deref())?;
            Some(observation(
                "gateio",
                base,
                quote,
                price,
                parse_volume(t.base_volume.as_deref()),
                parse_volume(t.quote_volume.as_deref()),
            ))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct OkxResponse {
    data: Vec<OkxTicker>,
}

#[derive(Debug, Deserialize)]
struct OkxTicker {
    #[serde(rename = "instId")]
    inst_id: String,
    last: Option<String>,
    #[serde(rename = "vol24h")]
    vol_24h: Option<String>,
    #[serde(rename = "volCcy24h")]
    vol_ccy_24h: Option<String>,
}

fn parse_okx(body: &str) -> Result<Vec<Observation>> {
    let response: OkxResponse =
        serde_json::from_str(body).context("Failed to parse OKX tickers")?;
    Ok(response
        .data
        .into_iter()
        .filter_map(|t| {
            let (base, quote) = split_symbol(&t.inst_id, '-')?;
            let price = parse_price(t.last.as_deref())?;
            Some(observation(
                "okx",
                base,
                quote,
                price,
                parse_volume(t.vol_24h.as_deref()),
                parse_volume(t.vol_ccy_24h.as_deref()),
            ))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct PoloniexTicker {
    symbol: String,
    close: Option<String>,
    /// Base-denominated 24h volume.
    quantity: Option<String>,
    /// Quote-denominated 24h volume.
    amount: Option<String>,
}

fn parse_poloniex(body: &str) -> Result<Vec<Observation>> {
    let tickers: Vec<PoloniexTicker> =
        serde_json::from_str(body).context("Failed to parse Poloniex tickers")?;
    Ok(tickers
        .into_iter()
        .filter_map(|t| {
            let (base, quote) = split_symbol(&t.symbol, '_')?;
            let price = parse_price(t.close.as_deref())?;
            Some(observation(
                "poloniex",
                base,
                quote,
                price,
                parse_volume(t.quantity.as_deref()),
                parse_volume(t.amount.as_deref()),
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_splitting() {
        assert_eq!(split_symbol("BTC-USDT", '-'), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("BTC_USDT", '_'), Some(("BTC", "USDT")));
        assert_eq!(split_symbol("BTCUSDT", '-'), None);
        assert_eq!(split_symbol("A-B-C", '-'), None);
        assert_eq!(split_symbol("-USDT", '-'), None);
    }

    #[test]
    fn unusable_prices_yield_no_observation() {
        assert_eq!(parse_price(None), None);
        assert_eq!(parse_price(Some("0")), None);
        assert_eq!(parse_price(Some("abc")), None);
        assert_eq!(parse_price(Some("50000.5")), Some(50000.5));
    }

    #[test]
    fn missing_volumes_become_zero() {
        assert_eq!(parse_volume(None), 0.0);
        assert_eq!(parse_volume(Some("-3")), 0.0);
        assert_eq!(parse_volume(Some("12.5")), 12.5);
    }

    #[test]
    fn kucoin_payload_parses() {
        let body = r#"{"data":{"ticker":[
            {"symbol":"BTC-USDT","last":"50000","vol":"10","volValue":"500000"},
            {"symbol":"DEAD-USDT","last":null,"vol":"1","volValue":"1"}
        ]}}"#;
        let observations = parse_kucoin(body).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].pair, Pair::new("BTC", "USDT"));
        assert_eq!(observations[0].last_price, 50000.0);
        assert_eq!(observations[0].base_volume, 10.0);
    }

    #[test]
    fn gateio_payload_parses() {
        let body = r#"[
            {"currency_pair":"ETH_BTC","last":"0.05","base_volume":"100","quote_volume":"5"}
        ]"#;
        let observations = parse_gateio(body).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].exchange, "gateio");
        assert_eq!(observations[0].pair, Pair::new("ETH", "BTC"));
        assert_eq!(observations[0].quote_volume, 5.0);
    }

    #[test]
    fn okx_payload_parses() {
        let body = r#"{"data":[
            {"instId":"BTC-USDT","last":"50010","vol24h":"5","volCcy24h":"250050"}
        ]}"#;
        let observations = parse_okx(body).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].last_price, 50010.0);
        assert_eq!(observations[0].quote_volume, 250050.0);
    }

    #[test]
    fn poloniex_payload_parses() {
        let body = r#"[
            {"symbol":"BTC_USDT","close":"49990","quantity":"2","amount":"99980"},
            {"symbol":"ZRO_USDT","close":"0","quantity":"1","amount":"0"}
        ]"#;
        let observations = parse_poloniex(body).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].base_volume, 2.0);
    }

    #[tokio::test]
    async fn disabled_provider_sends_nothing() {
        let enabled = Arc::new(AtomicBool::new(false));
        let provider = RestTickerProvider::new(
            vec!["kucoin".to_string()],
            4,
            Duration::from_millis(0),
            Duration::from_secs(1),
            enabled,
        );
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        provider.poll(tx).await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
