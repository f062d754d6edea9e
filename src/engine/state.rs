//! Aggregation state owned by the scheduler.
//!
//! One instance per running aggregator: the per-cycle observation store,
//! the published consensus maps (current and previous cycle), the latest
//! reference snapshot and iteration bookkeeping. Passed by reference into
//! the engine; never a process-wide global.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::engine::store::ObservationStore;
use crate::types::{Asset, ConsensusPrice, ReferencePrice};

#[derive(Debug)]
pub struct AggregationState {
    /// Raw observations for the cycle in progress.
    pub store: ObservationStore,
    /// Published consensus values; entries persist until overwritten, so
    /// an asset with no surviving volume keeps its last-known value.
    pub consensus: BTreeMap<Asset, ConsensusPrice>,
    /// Previous cycle's consensus values, kept for trend display only.
    pub previous: BTreeMap<Asset, ConsensusPrice>,
    /// Latest reference price snapshot, refreshed independently.
    pub reference: BTreeMap<Asset, ReferencePrice>,
    pub iteration: u64,
    pub started_at: DateTime<Utc>,
    pub iteration_ended_at: Option<DateTime<Utc>>,
}

impl Default for AggregationState {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationState {
    pub fn new() -> Self {
        Self {
            store: ObservationStore::new(),
            consensus: BTreeMap::new(),
            previous: BTreeMap::new(),
            reference: BTreeMap::new(),
            iteration: 0,
            started_at: Utc::now(),
            iteration_ended_at: None,
        }
    }

    /// Reset for a new cycle: clear the store and snapshot the current
    /// consensus as the previous cycle's values.
    pub fn begin_cycle(&mut self) {
        self.store.clear();
        self.previous = self.consensus.clone();
        self.iteration += 1;
    }

    pub fn consensus_for(&self, asset: &Asset) -> Option<&ConsensusPrice> {
        self.consensus.get(asset)
    }

    pub fn reference_for(&self, asset: &Asset) -> Option<&ReferencePrice> {
        self.reference.get(asset)
    }

    /// Number of assets with a published consensus price.
    pub fn asset_count(&self) -> usize {
        self.consensus.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Observation, Pair};

    #[test]
    fn begin_cycle_clears_store_and_keeps_previous_consensus() {
        let mut state = AggregationState::new();
        state.store.record_ticker(&Observation {
            exchange: "okx".to_string(),
            pair: Pair::new("BTC", "USDT"),
            last_price: 50000.0,
            base_volume: 1.0,
            quote_volume: 50000.0,
        });
        state.consensus.insert(
            Asset::new("BTC"),
            ConsensusPrice {
                asset: Asset::new("BTC"),
                price_usd: 50000.0,
                volume_usd: 50000.0,
            },
        );

        state.begin_cycle();

        assert!(state.store.is_empty());
        assert_eq!(state.iteration, 1);
        // Consensus survives the reset; previous now mirrors it.
        assert!(state.consensus_for(&Asset::new("BTC")).is_some());
        assert_eq!(
            state.previous.get(&Asset::new("BTC")).unwrap().price_usd,
            50000.0
        );
    }
}
