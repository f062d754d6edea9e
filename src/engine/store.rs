//! Per-cycle observation store.
//!
//! Accumulates raw ticker observations bucketed by asset and exchange
//! between aggregation boundaries. The scheduler owns the store: the
//! polling side appends through it, the aggregation pass reads it, and
//! `clear` resets it at the start of the next cycle.

use std::collections::BTreeMap;

use crate::types::{Asset, Observation};

/// asset → exchange → observations, in sorted (deterministic) order.
///
/// BTreeMap keys give the aggregator a stable iteration order, which keeps
/// floating-point summation reproducible for identical input sets.
#[derive(Debug, Default)]
pub struct ObservationStore {
    buckets: BTreeMap<Asset, BTreeMap<String, Vec<Observation>>>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable bucket handle for (asset, exchange), created on first use.
    pub fn get_or_create(&mut self, asset: &Asset, exchange: &str) -> &mut Vec<Observation> {
        self.buckets
            .entry(asset.clone())
            .or_default()
            .entry(exchange.to_string())
            .or_default()
    }

    /// Record one observation under a single asset bucket.
    pub fn record(&mut self, asset: &Asset, observation: Observation) {
        let exchange = observation.exchange.clone();
        self.get_or_create(asset, &exchange).push(observation);
    }

    /// Record a ticker under every non-fiat leg of its pair.
    ///
    /// The fiat side of a pair never becomes an aggregation key. Returns
    /// the assets the observation was bucketed under.
    pub fn record_ticker(&mut self, observation: &Observation) -> Vec<Asset> {
        let legs = observation.pair.non_fiat_legs();
        for asset in &legs {
            self.record(asset, observation.clone());
        }
        legs
    }

    /// All assets with at least one observation, in sorted order.
    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.buckets.keys()
    }

    /// Exchange buckets for one asset, in sorted order.
    pub fn exchanges(&self, asset: &Asset) -> Option<&BTreeMap<String, Vec<Observation>>> {
        self.buckets.get(asset)
    }

    /// Number of exchanges that contributed observations for `asset`.
    pub fn exchange_count(&self, asset: &Asset) -> usize {
        self.buckets.get(asset).map_or(0, |b| b.len())
    }

    /// Number of observations recorded for `asset` across all exchanges.
    pub fn observation_count(&self, asset: &Asset) -> usize {
        self.buckets
            .get(asset)
            .map_or(0, |b| b.values().map(Vec::len).sum())
    }

    /// Total observations across all assets.
    pub fn total_observations(&self) -> usize {
        self.buckets
            .values()
            .flat_map(|b| b.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop all buckets. Called at the start of each cycle.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
