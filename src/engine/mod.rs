//! Price aggregation engine.
//!
//! Pure, synchronous computation over the materialized observation store:
//! currency normalization, outlier rejection, two-pass volume weighting
//! and reference comparison. All I/O lives in `crate::sources`; the
//! scheduler hands the engine a fully populated store once per cycle.

pub mod normalize;
pub mod outliers;
pub mod reference;
pub mod state;
pub mod stats;
pub mod store;
pub mod vwap;

pub use normalize::{CurrencyNormalizer, DropReason, NormalizedObservation};
pub use outliers::{OutlierFilter, PriceStatistics};
pub use reference::ReferenceComparator;
pub use state::AggregationState;
pub use store::ObservationStore;
pub use vwap::{AssetAggregate, VwapAggregator};

use tracing::info;

use crate::config::AggregatorConfig;
use crate::sources::ForexSource;
use crate::types::Asset;

/// What one aggregation pass did, for logging and the status line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Assets with at least one recorded observation.
    pub assets_seen: usize,
    /// Assets that published a consensus price this pass.
    pub published: usize,
    /// Observations evaluated (per asset bucket).
    pub observations: usize,
    pub dropped_invalid: usize,
    pub dropped_unrelated: usize,
    pub dropped_unresolved: usize,
}

/// Run one aggregation pass over everything currently in the store.
///
/// Assets are processed in sorted order, so a quote asset that sorts
/// before its dependents (e.g. BTC before ETH) is priced within the same
/// pass; anything still unpriced is skipped this cycle, not retried.
/// Per-observation failures never abort the pass.
pub fn aggregate_cycle(
    state: &mut AggregationState,
    config: &AggregatorConfig,
    forex: &dyn ForexSource,
) -> CycleSummary {
    let normalizer = CurrencyNormalizer::new(forex);
    let aggregator = VwapAggregator::new(OutlierFilter::new(
        config.bypass_outliers,
        config.outlier_stddev_distance_from_mean,
    ));
    let comparator = ReferenceComparator::new(config.reference_tolerance_pct);

    let mut summary = CycleSummary::default();
    let assets: Vec<Asset> = state.store.assets().cloned().collect();
    summary.assets_seen = assets.len();

    for asset in assets {
        let mut normalized = Vec::new();

        if let Some(buckets) = state.store.exchanges(&asset) {
            for observations in buckets.values() {
                for observation in observations {
                    summary.observations += 1;
                    match normalizer.normalize(&asset, observation, &state.consensus) {
                        Ok(n) => {
                            comparator.check_observation(
                                &asset,
                                n.price_usd,
                                state.reference.get(&asset),
                                &n.exchange,
                                &n.source_pair,
                            );
                            normalized.push(n);
                        }
                        Err(DropReason::InvalidPrice) => summary.dropped_invalid += 1,
                        Err(DropReason::UnrelatedPair) => summary.dropped_unrelated += 1,
                        Err(DropReason::UnresolvedQuote(_)) => summary.dropped_unresolved += 1,
                    }
                }
            }
        }

        let aggregate = AssetAggregate::build(asset.clone(), normalized);
        if let Some(consensus) = aggregator.consensus(&aggregate) {
            comparator.check_consensus(&asset, consensus.price_usd, state.reference.get(&asset));
            state.consensus.insert(asset, consensus);
            summary.published += 1;
        }
    }

    info!(
        assets = summary.assets_seen,
        published = summary.published,
        observations = summary.observations,
        dropped = summary.dropped_invalid + summary.dropped_unrelated + summary.dropped_unresolved,
        "aggregation pass complete"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::StaticForexRates;
    use crate::types::{Observation, Pair};

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            bypass_outliers: true,
            outlier_stddev_distance_from_mean: 3.0,
            reference_tolerance_pct: 10.0,
            aggregate_price_interval_ms: 5000,
        }
    }

    fn ticker(exchange: &str, base: &str, quote: &str, price: f64, bv: f64) -> Observation {
        Observation {
            exchange: exchange.to_string(),
            pair: Pair::new(base, quote),
            last_price: price,
            base_volume: bv,
            quote_volume: price * bv,
        }
    }

    #[test]
    fn cross_quote_pricing_resolves_within_one_pass() {
        let mut state = AggregationState::new();
        state.begin_cycle();
        // BTC sorts before ETH, so ETH/BTC can be priced the same pass.
        state
            .store
            .record_ticker(&ticker("okx", "BTC", "USD", 50000.0, 10.0));
        state
            .store
            .record_ticker(&ticker("okx", "ETH", "BTC", 0.05, 100.0));

        let rates = StaticForexRates::mocked();
        let summary = aggregate_cycle(&mut state, &config(), &rates);

        assert_eq!(summary.published, 2);
        let eth = state.consensus_for(&Asset::new("ETH")).unwrap();
        assert!((eth.price_usd - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn bad_observations_do_not_abort_other_assets() {
        let mut state = AggregationState::new();
        state.begin_cycle();
        state
            .store
            .record_ticker(&ticker("okx", "BTC", "USD", 50000.0, 1.0));
        // Unpriced quote: dropped, but BTC still publishes.
        state
            .store
            .record_ticker(&ticker("okx", "XYZ", "ABC", 5.0, 1.0));

        let rates = StaticForexRates::mocked();
        let summary = aggregate_cycle(&mut state, &config(), &rates);

        assert_eq!(summary.published, 1);
        assert!(summary.dropped_unresolved > 0);
        assert!(state.consensus_for(&Asset::new("BTC")).is_some());
    }

    #[test]
    fn zero_volume_asset_keeps_previous_value() {
        let mut state = AggregationState::new();
        state.consensus.insert(
            Asset::new("BTC"),
            crate::types::ConsensusPrice {
                asset: Asset::new("BTC"),
                price_usd: 49000.0,
                volume_usd: 1000.0,
            },
        );
        state.begin_cycle();
        state
            .store
            .record_ticker(&ticker("okx", "BTC", "USD", 50000.0, 0.0));

        let rates = StaticForexRates::mocked();
        let summary = aggregate_cycle(&mut state, &config(), &rates);

        assert_eq!(summary.published, 0);
        // Previous consensus survives as the last-known-good value.
        assert_eq!(
            state.consensus_for(&Asset::new("BTC")).unwrap().price_usd,
            49000.0
        );
    }

    #[test]
    fn repeated_pass_over_same_store_is_bit_identical() {
        let mut state = AggregationState::new();
        state.begin_cycle();
        state
            .store
            .record_ticker(&ticker("kucoin", "BTC", "USD", 50000.0, 10.0));
        state
            .store
            .record_ticker(&ticker("okx", "BTC", "USD", 50010.0, 5.0));

        let rates = StaticForexRates::mocked();
        aggregate_cycle(&mut state, &config(), &rates);
        let first = state.consensus_for(&Asset::new("BTC")).unwrap().clone();
        aggregate_cycle(&mut state, &config(), &rates);
        let second = state.consensus_for(&Asset::new("BTC")).unwrap().clone();

        assert_eq!(first.price_usd.to_bits(), second.price_usd.to_bits());
        assert_eq!(first.volume_usd.to_bits(), second.volume_usd.to_bits());
    }
}
