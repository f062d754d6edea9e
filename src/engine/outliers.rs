//! Standard-deviation outlier rejection.
//!
//! Operates on the full set of normalized prices collected for one asset
//! in one cycle. The mean/stdev band is computed over all candidates
//! (pre-filter), and each rejection is logged with enough context to
//! reproduce the decision.

use tracing::info;

use crate::engine::normalize::NormalizedObservation;
use crate::engine::stats;
use crate::types::Asset;

/// Mean and population standard deviation over the candidate prices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceStatistics {
    pub mean: f64,
    pub stdev: f64,
}

/// Keeps prices within `max_sigma` standard deviations of the mean.
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    /// When false, every non-zero price is kept unconditionally.
    enabled: bool,
    /// Band half-width in units of standard deviation.
    max_sigma: f64,
}

impl OutlierFilter {
    pub fn new(enabled: bool, max_sigma: f64) -> Self {
        Self { enabled, max_sigma }
    }

    /// Keep-mask over `observations`, plus the statistics the band used.
    ///
    /// All prices are identical ⇒ stdev is 0 and the inclusive band keeps
    /// every one of them; nothing is an outlier.
    pub fn filter(
        &self,
        asset: &Asset,
        observations: &[NormalizedObservation],
    ) -> (Vec<bool>, PriceStatistics) {
        let prices: Vec<f64> = observations.iter().map(|o| o.price_usd).collect();
        let statistics = PriceStatistics {
            mean: stats::mean(&prices),
            stdev: stats::std_deviation(&prices),
        };

        let mask = observations
            .iter()
            .map(|observation| {
                let price = observation.price_usd;
                if price == 0.0 {
                    return false;
                }
                if !self.enabled {
                    return true;
                }
                let keep = stats::within_n_std_deviations(
                    price,
                    statistics.mean,
                    statistics.stdev,
                    self.max_sigma,
                );
                if !keep {
                    let delta = self.max_sigma * statistics.stdev;
                    let sigma_distance = if statistics.stdev > 0.0 {
                        (price - statistics.mean).abs() / statistics.stdev
                    } else {
                        0.0
                    };
                    info!(
                        asset = %asset,
                        exchange = %observation.exchange,
                        pair = %observation.source_pair,
                        price,
                        sigma_distance = format!("{:.2}", sigma_distance),
                        lower = statistics.mean - delta,
                        upper = statistics.mean + delta,
                        "bypassing outlier price"
                    );
                }
                keep
            })
            .collect();

        (mask, statistics)
    }
}
