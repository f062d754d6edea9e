//! Reference price deviation checks.
//!
//! Compares engine prices against an independently sourced reference and
//! warns when they disagree by more than the configured tolerance. Purely
//! observational: the consensus value is never adjusted.

use tracing::warn;

use crate::engine::stats;
use crate::types::{Asset, Pair, ReferencePrice};

#[derive(Debug, Clone, Copy)]
pub struct ReferenceComparator {
    /// Maximum tolerated deviation in percent.
    tolerance_pct: f64,
}

impl Default for ReferenceComparator {
    fn default() -> Self {
        Self { tolerance_pct: 10.0 }
    }
}

impl ReferenceComparator {
    pub fn new(tolerance_pct: f64) -> Self {
        Self { tolerance_pct }
    }

    /// Check one per-exchange observation price against the reference.
    ///
    /// Returns the percentage difference when it exceeds the tolerance;
    /// `None` when in range or no usable reference exists.
    pub fn check_observation(
        &self,
        asset: &Asset,
        price_usd: f64,
        reference: Option<&ReferencePrice>,
        exchange: &str,
        pair: &Pair,
    ) -> Option<f64> {
        let deviation = self.deviation(price_usd, reference)?;
        warn!(
            asset = %asset,
            exchange,
            pair = %pair,
            price = price_usd,
            reference = reference.map(|r| r.price_usd),
            deviation_pct = format!("{:.1}", deviation),
            "observation price is far from the reference"
        );
        Some(deviation)
    }

    /// Check the published consensus price against the reference.
    pub fn check_consensus(
        &self,
        asset: &Asset,
        price_usd: f64,
        reference: Option<&ReferencePrice>,
    ) -> Option<f64> {
        let deviation = self.deviation(price_usd, reference)?;
        warn!(
            asset = %asset,
            price = price_usd,
            reference = reference.map(|r| r.price_usd),
            deviation_pct = format!("{:.1}", deviation),
            "consensus price is far from the reference"
        );
        Some(deviation)
    }

    fn deviation(&self, price_usd: f64, reference: Option<&ReferencePrice>) -> Option<f64> {
        let reference = reference?.price_usd;
        if reference <= 0.0 || price_usd <= 0.0 {
            return None;
        }
        if stats::within_percentage_of(price_usd, reference, self.tolerance_pct) {
            return None;
        }
        Some((reference - price_usd) / reference * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(price: f64) -> ReferencePrice {
        ReferencePrice {
            price_usd: price,
            change_pct_24h: None,
            market_cap: None,
        }
    }

    #[test]
    fn in_range_price_is_quiet() {
        let comparator = ReferenceComparator::default();
        let asset = Asset::new("BTC");
        assert_eq!(
            comparator.check_consensus(&asset, 50500.0, Some(&reference(50000.0))),
            None
        );
    }

    #[test]
    fn large_deviation_is_flagged() {
        let comparator = ReferenceComparator::default();
        let asset = Asset::new("BTC");
        let deviation = comparator
            .check_consensus(&asset, 40000.0, Some(&reference(50000.0)))
            .expect("20% off must be flagged");
        assert!((deviation - 20.0).abs() < 1e-9);
    }

    #[test]
    fn missing_or_zero_reference_is_a_no_op() {
        let comparator = ReferenceComparator::default();
        let asset = Asset::new("NEW");
        assert_eq!(comparator.check_consensus(&asset, 1.0, None), None);
        assert_eq!(
            comparator.check_consensus(&asset, 1.0, Some(&reference(0.0))),
            None
        );
    }

    #[test]
    fn custom_tolerance_is_respected() {
        let comparator = ReferenceComparator::new(1.0);
        let asset = Asset::new("ETH");
        let pair = Pair::new("ETH", "USDT");
        let flagged =
            comparator.check_observation(&asset, 2550.0, Some(&reference(2500.0)), "okx", &pair);
        assert!(flagged.is_some());
    }
}
