//! Two-pass volume-weighted consensus price computation.
//!
//! Pass one sums base and quote volumes over every contributing
//! observation; pass two weights each price by its share of those totals.
//! Totals are deliberately computed before outlier rejection while the
//! final average uses only surviving prices — the published volume metric
//! describes the whole observed market, the price only the trusted part.

use tracing::debug;

use crate::engine::normalize::NormalizedObservation;
use crate::engine::outliers::OutlierFilter;
use crate::types::{Asset, ConsensusPrice};

/// Per-asset accumulation over one cycle. Rebuilt every cycle.
#[derive(Debug, Clone)]
pub struct AssetAggregate {
    pub asset: Asset,
    pub total_base_volume: f64,
    pub total_quote_volume: f64,
    pub price_from_base_volume: f64,
    pub price_from_quote_volume: f64,
    /// Contributing observations in deterministic (exchange-sorted) order.
    pub observations: Vec<NormalizedObservation>,
    pub exchange_count: usize,
    pub observation_count: usize,
}

impl AssetAggregate {
    /// Fold normalized observations into the two-pass aggregate.
    pub fn build(asset: Asset, observations: Vec<NormalizedObservation>) -> Self {
        // Volume pass: totals over every observation, outliers included.
        let (total_base_volume, total_quote_volume) = observations
            .iter()
            .fold((0.0, 0.0), |(base, quote), o| {
                (base + o.base_volume, quote + o.quote_volume_usd)
            });

        // Price pass: weight each price by its share of the totals.
        // A zero total contributes no weight rather than dividing by zero.
        let (price_from_base_volume, price_from_quote_volume) =
            observations.iter().fold((0.0, 0.0), |(from_base, from_quote), o| {
                let base_part = if total_base_volume != 0.0 {
                    o.price_usd * (o.base_volume / total_base_volume)
                } else {
                    0.0
                };
                let quote_part = if total_quote_volume != 0.0 {
                    o.price_usd * (o.quote_volume_usd / total_quote_volume)
                } else {
                    0.0
                };
                (from_base + base_part, from_quote + quote_part)
            });

        let mut exchanges: Vec<&str> =
            observations.iter().map(|o| o.exchange.as_str()).collect();
        exchanges.sort_unstable();
        exchanges.dedup();
        let exchange_count = exchanges.len();
        let observation_count = observations.len();

        Self {
            asset,
            total_base_volume,
            total_quote_volume,
            price_from_base_volume,
            price_from_quote_volume,
            observations,
            exchange_count,
            observation_count,
        }
    }
}

/// Produces one consensus price per asset from its aggregate.
#[derive(Debug, Clone, Copy)]
pub struct VwapAggregator {
    filter: OutlierFilter,
}

impl VwapAggregator {
    pub fn new(filter: OutlierFilter) -> Self {
        Self { filter }
    }

    /// Base-volume-weighted average of the surviving prices.
    ///
    /// Returns `None` when no observation with non-zero volume survives
    /// the outlier filter; the caller leaves the previous consensus value
    /// untouched in that case. The published USD volume intentionally uses
    /// the pre-filter base-volume total.
    pub fn consensus(&self, aggregate: &AssetAggregate) -> Option<ConsensusPrice> {
        if aggregate.observations.is_empty() {
            return None;
        }

        let (mask, _statistics) = self.filter.filter(&aggregate.asset, &aggregate.observations);

        let (weighted_sum, volume_sum) = aggregate
            .observations
            .iter()
            .zip(&mask)
            .filter(|(_, kept)| **kept)
            .fold((0.0, 0.0), |(ws, vs), (o, _)| {
                (ws + o.price_usd * o.base_volume, vs + o.base_volume)
            });

        if volume_sum == 0.0 {
            debug!(
                asset = %aggregate.asset,
                observations = aggregate.observation_count,
                "no surviving volume, keeping previous consensus"
            );
            return None;
        }

        let price_usd = weighted_sum / volume_sum;
        if price_usd <= 0.0 {
            return None;
        }

        Some(ConsensusPrice {
            asset: aggregate.asset.clone(),
            price_usd,
            volume_usd: aggregate.total_base_volume * price_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;

    fn normalized(exchange: &str, price: f64, base_volume: f64) -> NormalizedObservation {
        NormalizedObservation {
            exchange: exchange.to_string(),
            source_pair: Pair::new("BTC", "USDT"),
            price_usd: price,
            base_volume,
            quote_volume_usd: price * base_volume,
        }
    }

    fn aggregator() -> VwapAggregator {
        VwapAggregator::new(OutlierFilter::new(true, 3.0))
    }

    #[test]
    fn two_exchange_consensus_matches_hand_calculation() {
        let aggregate = AssetAggregate::build(
            Asset::new("BTC"),
            vec![
                normalized("kucoin", 50000.0, 10.0),
                normalized("okx", 50010.0, 5.0),
            ],
        );
        let consensus = aggregator().consensus(&aggregate).unwrap();

        let expected = (50000.0 * 10.0 + 50010.0 * 5.0) / 15.0;
        assert!((consensus.price_usd - expected).abs() < 1e-9);
        assert!((consensus.price_usd - 50003.333333).abs() < 1e-3);
        assert!((consensus.volume_usd - 15.0 * consensus.price_usd).abs() < 1e-6);
    }

    #[test]
    fn totals_are_computed_before_filtering() {
        let mut observations = vec![normalized("a", 100.0, 1.0); 10];
        observations
            .iter_mut()
            .enumerate()
            .for_each(|(i, o)| o.exchange = format!("ex{i}"));
        observations.push(normalized("stray", 1000.0, 2.0));

        let aggregate = AssetAggregate::build(Asset::new("BTC"), observations);
        // Volume pass includes the soon-to-be-rejected observation.
        assert_eq!(aggregate.total_base_volume, 12.0);

        let consensus = aggregator().consensus(&aggregate).unwrap();
        // Price comes from the ten agreeing exchanges only...
        assert!((consensus.price_usd - 100.0).abs() < 1e-9);
        // ...but the volume metric still covers the full observed market.
        assert!((consensus.volume_usd - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn consensus_stays_inside_kept_price_range() {
        let aggregate = AssetAggregate::build(
            Asset::new("ETH"),
            vec![
                normalized("a", 2500.0, 3.0),
                normalized("b", 2510.0, 1.0),
                normalized("c", 2490.0, 7.0),
            ],
        );
        let consensus = aggregator().consensus(&aggregate).unwrap();
        assert!(consensus.price_usd >= 2490.0);
        assert!(consensus.price_usd <= 2510.0);
    }

    #[test]
    fn identical_input_is_bit_identical() {
        let observations = vec![
            normalized("a", 0.07123, 12345.678),
            normalized("b", 0.07119, 9876.543),
            normalized("c", 0.07131, 31415.926),
        ];
        let first = aggregator()
            .consensus(&AssetAggregate::build(Asset::new("DOGE"), observations.clone()))
            .unwrap();
        let second = aggregator()
            .consensus(&AssetAggregate::build(Asset::new("DOGE"), observations))
            .unwrap();
        assert_eq!(first.price_usd.to_bits(), second.price_usd.to_bits());
        assert_eq!(first.volume_usd.to_bits(), second.volume_usd.to_bits());
    }

    #[test]
    fn zero_volume_asset_publishes_nothing() {
        let aggregate = AssetAggregate::build(
            Asset::new("DUST"),
            vec![normalized("a", 0.001, 0.0), normalized("b", 0.0011, 0.0)],
        );
        assert_eq!(aggregate.total_base_volume, 0.0);
        // Zero totals also mean the price pass contributes no weight.
        assert_eq!(aggregate.price_from_base_volume, 0.0);
        assert!(aggregator().consensus(&aggregate).is_none());
    }

    #[test]
    fn empty_aggregate_publishes_nothing() {
        let aggregate = AssetAggregate::build(Asset::new("VOID"), Vec::new());
        assert!(aggregator().consensus(&aggregate).is_none());
    }

    #[test]
    fn weighted_price_pass_accumulates_both_volume_views() {
        let aggregate = AssetAggregate::build(
            Asset::new("BTC"),
            vec![
                normalized("a", 50000.0, 10.0),
                normalized("b", 50010.0, 5.0),
            ],
        );
        let expected_base = 50000.0 * (10.0 / 15.0) + 50010.0 * (5.0 / 15.0);
        assert!((aggregate.price_from_base_volume - expected_base).abs() < 1e-9);

        let total_quote = 50000.0 * 10.0 + 50010.0 * 5.0;
        let expected_quote = 50000.0 * (500000.0 / total_quote) + 50010.0 * (250050.0 / total_quote);
        assert!((aggregate.price_from_quote_volume - expected_quote).abs() < 1e-9);
    }

    #[test]
    fn exchange_and_observation_counts_cover_contributors() {
        let aggregate = AssetAggregate::build(
            Asset::new("BTC"),
            vec![
                normalized("a", 50000.0, 1.0),
                normalized("a", 50001.0, 1.0),
                normalized("b", 50002.0, 1.0),
            ],
        );
        assert_eq!(aggregate.exchange_count, 2);
        assert_eq!(aggregate.observation_count, 3);
    }
}
