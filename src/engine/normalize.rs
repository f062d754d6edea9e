//! Currency normalization for raw ticker observations.
//!
//! Re-expresses an observation's price and quote volume in USD before it
//! enters the volume-weighted aggregation. Crypto quote legs are priced
//! through the consensus map built so far; fiat legs go through the forex
//! source, falling back to the static rate table when the live source
//! fails. Observations that cannot be normalized this cycle are dropped,
//! never retried.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::sources::{ForexSource, StaticForexRates};
use crate::types::{Asset, ConsensusPrice, Observation, Pair};

/// Why an observation was excluded from this cycle's aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("price is zero or not finite")]
    InvalidPrice,
    #[error("neither pair leg matches the aggregated asset")]
    UnrelatedPair,
    #[error("quote asset {0} has no USD price this cycle")]
    UnresolvedQuote(Asset),
}

/// An observation re-expressed with a USD price and USD quote volume,
/// base leg oriented to the asset under aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedObservation {
    pub exchange: String,
    /// The pair exactly as the exchange listed it, for diagnostics.
    pub source_pair: Pair,
    pub price_usd: f64,
    pub base_volume: f64,
    pub quote_volume_usd: f64,
}

/// Converts observations into USD terms for one aggregation cycle.
pub struct CurrencyNormalizer<'a> {
    forex: &'a dyn ForexSource,
    fallback: StaticForexRates,
}

impl<'a> CurrencyNormalizer<'a> {
    pub fn new(forex: &'a dyn ForexSource) -> Self {
        Self {
            forex,
            fallback: StaticForexRates::mocked(),
        }
    }

    /// Normalize `observation` for aggregation under `asset`.
    ///
    /// `consensus` carries the USD prices already known this cycle (plus
    /// last-known values from earlier cycles); an unpriced crypto quote
    /// leg means the observation is skipped for now.
    pub fn normalize(
        &self,
        asset: &Asset,
        observation: &Observation,
        consensus: &BTreeMap<Asset, ConsensusPrice>,
    ) -> Result<NormalizedObservation, DropReason> {
        let mut base = observation.pair.base.clone();
        let mut quote = observation.pair.quote.clone();
        let mut price = observation.last_price;
        let mut base_volume = observation.base_volume;
        let mut quote_volume = observation.quote_volume;

        if price == 0.0 || !price.is_finite() {
            warn!(
                exchange = %observation.exchange,
                pair = %observation.pair,
                price,
                "skipping ticker without a usable price"
            );
            return Err(DropReason::InvalidPrice);
        }

        // Orient the pair so the aggregated asset is the base leg. An
        // inverted listing swaps volumes and takes the reciprocal price.
        if &base != asset {
            if &quote == asset {
                std::mem::swap(&mut base, &mut quote);
                std::mem::swap(&mut base_volume, &mut quote_volume);
                price = 1.0 / price;
            } else {
                warn!(
                    exchange = %observation.exchange,
                    pair = %observation.pair,
                    asset = %asset,
                    "neither pair leg matches the aggregated asset"
                );
                return Err(DropReason::UnrelatedPair);
            }
        }

        if !quote.is_usd() {
            if let Some(rate) = consensus.get(&quote).map(|c| c.price_usd).filter(|p| *p > 0.0) {
                price *= rate;
                quote_volume *= rate;
            } else if quote.is_fiat() {
                let coeff = self.usd_coefficient(&quote)?;
                price *= coeff;
                quote_volume *= coeff;
            } else {
                debug!(
                    exchange = %observation.exchange,
                    pair = %observation.pair,
                    quote = %quote,
                    "quote asset not priced yet, skipping this cycle"
                );
                return Err(DropReason::UnresolvedQuote(quote));
            }
        }

        Ok(NormalizedObservation {
            exchange: observation.exchange.clone(),
            source_pair: observation.pair.clone(),
            price_usd: price,
            base_volume,
            quote_volume_usd: quote_volume,
        })
    }

    /// USD conversion coefficient for one unit of a fiat currency.
    ///
    /// A failing live source falls back to the mocked table; only a
    /// currency unknown to both is dropped.
    fn usd_coefficient(&self, fiat: &Asset) -> Result<f64, DropReason> {
        let usd = Asset::new("USD");
        match self.forex.convert(1.0, fiat, &usd) {
            Ok(coeff) => Ok(coeff),
            Err(err) => {
                warn!(
                    currency = %fiat,
                    error = %err,
                    "live forex conversion failed, using mocked rates"
                );
                self.fallback
                    .convert(1.0, fiat, &usd)
                    .map_err(|_| DropReason::UnresolvedQuote(fiat.clone()))
            }
        }
    }
}
