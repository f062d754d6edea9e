//! Cycle scheduling around the aggregation engine.
//!
//! The scheduler owns the [`AggregationState`] and is the single task that
//! touches it: polling results arrive over an mpsc channel and are appended
//! between select turns, the partial VWAP recomputes on a fixed interval,
//! and the cycle boundary (sweep complete) consumes whatever the store
//! holds — a cancelled sweep just means a smaller cycle. Stopping is
//! cooperative through a shared enabled flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::display;
use crate::engine::{self, AggregationState, CycleSummary};
use crate::sources::{ForexSource, ObservationProvider, ProviderEvent, ReferencePriceSource};
use crate::types::{Asset, Observation, ReferencePrice};

/// Callbacks fired as the cycle progresses. All optional.
#[derive(Default)]
pub struct CycleHooks {
    /// A ticker was recorded, with the assets it was bucketed under.
    pub on_ticker: Option<Box<dyn Fn(&[Asset], &Observation) + Send + Sync>>,
    /// The partial VWAP was recomputed.
    pub on_aggregate: Option<Box<dyn Fn(&AggregationState, &CycleSummary) + Send + Sync>>,
    /// A full polling sweep finished.
    pub on_iteration: Option<Box<dyn Fn(&AggregationState) + Send + Sync>>,
}

pub struct Scheduler {
    config: AppConfig,
    provider: Arc<dyn ObservationProvider>,
    forex: Arc<dyn ForexSource>,
    reference: Option<Arc<dyn ReferencePriceSource>>,
    hooks: CycleHooks,
    enabled: Arc<AtomicBool>,
    state: AggregationState,
}

impl Scheduler {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn ObservationProvider>,
        forex: Arc<dyn ForexSource>,
        reference: Option<Arc<dyn ReferencePriceSource>>,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            provider,
            forex,
            reference,
            hooks: CycleHooks::default(),
            enabled,
            state: AggregationState::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: CycleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Read-only view of the aggregation state between/after runs.
    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    /// Run polling sweeps until stopped or the iteration limit is hit.
    pub async fn run(&mut self) -> Result<()> {
        let mut reference_rx = self.spawn_reference_refresher();

        while self.enabled.load(Ordering::Relaxed) {
            if !self.config.runner.loop_forever
                && self.state.iteration >= self.config.runner.max_iterations
            {
                info!(
                    iterations = self.state.iteration,
                    "iteration limit reached, stopping"
                );
                break;
            }
            self.run_iteration(&mut reference_rx).await?;
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// One full sweep: reset, poll, aggregate on the interval, and close
    /// the cycle with a final aggregation over everything collected.
    async fn run_iteration(
        &mut self,
        reference_rx: &mut Option<mpsc::Receiver<ReferenceSnapshot>>,
    ) -> Result<()> {
        self.state.begin_cycle();
        let iteration = self.state.iteration;
        let iteration_started = Utc::now();
        info!(iteration, "starting iteration");

        let (tx, mut rx) = mpsc::channel::<ProviderEvent>(1024);
        let provider = self.provider.clone();
        let sweep = tokio::spawn(async move { provider.poll(tx).await });

        let mut interval = tokio::time::interval(Duration::from_millis(
            self.config.aggregator.aggregate_price_interval_ms.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the partial
        // VWAP waits a full period before its first run.
        interval.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(ProviderEvent::Ticker(observation)) => {
                        let assets = self.state.store.record_ticker(&observation);
                        if let Some(hook) = &self.hooks.on_ticker {
                            hook(&assets, &observation);
                        }
                    }
                    Some(ProviderEvent::ExchangeDone { exchange, tickers }) => {
                        info!(iteration, exchange = %exchange, tickers, "exchange finished");
                    }
                    Some(ProviderEvent::Error { exchange, message }) => {
                        warn!(iteration, exchange = %exchange, error = %message, "exchange failed");
                    }
                    // Sweep complete: the cycle boundary is reached.
                    None => break,
                },
                _ = interval.tick() => {
                    self.aggregate_and_report();
                }
                snapshot = recv_reference(reference_rx) => {
                    self.state.reference = snapshot;
                }
            }

            if !self.enabled.load(Ordering::Relaxed) {
                // Cooperative stop: whatever has been collected so far is
                // the complete input for this cycle.
                break;
            }
        }

        // Close the channel first so a provider still mid-send unwinds
        // instead of blocking the join below.
        drop(rx);
        match sweep.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(iteration, error = %err, "polling sweep ended with error"),
            Err(err) => error!(iteration, error = %err, "polling task panicked"),
        }

        self.aggregate_and_report();
        if let Some(hook) = &self.hooks.on_iteration {
            hook(&self.state);
        }

        self.state.iteration_ended_at = Some(Utc::now());
        let took = Utc::now() - iteration_started;
        info!(
            iteration,
            took_ms = took.num_milliseconds(),
            "iteration complete"
        );
        Ok(())
    }

    /// Run the engine over the current store and publish the results.
    fn aggregate_and_report(&mut self) {
        let summary = engine::aggregate_cycle(
            &mut self.state,
            &self.config.aggregator,
            self.forex.as_ref(),
        );

        if self.config.display.print_status {
            info!("{}", display::status_line(&self.state, &self.config.display));
        }
        if self.config.display.print_all_prices && !self.state.consensus.is_empty() {
            info!("\n{}", display::render_price_table(&self.state));
        }

        if let Some(hook) = &self.hooks.on_aggregate {
            hook(&self.state, &summary);
        }
    }

    /// Background refresh of the reference snapshot on its own interval.
    fn spawn_reference_refresher(&self) -> Option<mpsc::Receiver<ReferenceSnapshot>> {
        let source = self.reference.as_ref().filter(|_| self.config.reference.enabled)?.clone();
        let interval = Duration::from_millis(self.config.reference.refresh_interval_ms.max(1000));
        let enabled = self.enabled.clone();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            while enabled.load(Ordering::Relaxed) {
                match source.fetch().await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(source = source.name(), error = %err, "reference refresh failed");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Some(rx)
    }
}

type ReferenceSnapshot = std::collections::BTreeMap<Asset, ReferencePrice>;

/// Await the next reference snapshot, pending forever when refresh is off
/// (so the select arm simply never fires).
async fn recv_reference(rx: &mut Option<mpsc::Receiver<ReferenceSnapshot>>) -> ReferenceSnapshot {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(snapshot) => snapshot,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::StaticForexRates;
    use crate::types::Pair;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Replays a fixed observation list, then completes the sweep.
    struct ScriptedProvider {
        observations: Vec<Observation>,
    }

    #[async_trait]
    impl ObservationProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn poll(&self, tx: mpsc::Sender<ProviderEvent>) -> Result<()> {
            for observation in &self.observations {
                tx.send(ProviderEvent::Ticker(observation.clone())).await?;
            }
            Ok(())
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

    fn test_config() -> AppConfig {
        let mut config = AppConfig::load().expect("defaults must load");
        config.runner.loop_forever = false;
        config.runner.max_iterations = 1;
        config.reference.enabled = false;
        config.display.print_all_prices = false;
        config.display.print_status = false;
        config
    }

    #[tokio::test]
    async fn one_iteration_produces_consensus() {
        let provider = Arc::new(ScriptedProvider {
            observations: vec![
                ticker("kucoin", "BTC", "USD", 50000.0, 10.0),
                ticker("okx", "BTC", "USD", 50010.0, 5.0),
            ],
        });
        let forex: Arc<dyn ForexSource> = Arc::new(StaticForexRates::mocked());
        let enabled = Arc::new(AtomicBool::new(true));

        let mut scheduler =
            Scheduler::new(test_config(), provider, forex, None, enabled);
        scheduler.run().await.unwrap();

        let btc = scheduler
            .state()
            .consensus_for(&Asset::new("BTC"))
            .expect("consensus published");
        let expected = (50000.0 * 10.0 + 50010.0 * 5.0) / 15.0;
        assert!((btc.price_usd - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hooks_fire_during_the_cycle() {
        let provider = Arc::new(ScriptedProvider {
            observations: vec![ticker("okx", "ETH", "USD", 2500.0, 3.0)],
        });
        let forex: Arc<dyn ForexSource> = Arc::new(StaticForexRates::mocked());
        let enabled = Arc::new(AtomicBool::new(true));

        let tickers_seen = Arc::new(AtomicUsize::new(0));
        let aggregates_seen = Arc::new(AtomicUsize::new(0));
        let hook_tickers = tickers_seen.clone();
        let hook_aggregates = aggregates_seen.clone();

        let mut scheduler = Scheduler::new(test_config(), provider, forex, None, enabled)
            .with_hooks(CycleHooks {
                on_ticker: Some(Box::new(move |_, _| {
                    hook_tickers.fetch_add(1, Ordering::Relaxed);
                })),
                on_aggregate: Some(Box::new(move |_, _| {
                    hook_aggregates.fetch_add(1, Ordering::Relaxed);
                })),
                on_iteration: None,
            });
        scheduler.run().await.unwrap();

        assert_eq!(tickers_seen.load(Ordering::Relaxed), 1);
        assert!(aggregates_seen.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn disabled_flag_stops_the_run() {
        let provider = Arc::new(ScriptedProvider { observations: vec![] });
        let forex: Arc<dyn ForexSource> = Arc::new(StaticForexRates::mocked());
        let enabled = Arc::new(AtomicBool::new(false));

        let mut config = test_config();
        config.runner.loop_forever = true;
        let mut scheduler = Scheduler::new(config, provider, forex, None, enabled);
        scheduler.run().await.unwrap();

        assert_eq!(scheduler.state().iteration, 0);
    }
}
