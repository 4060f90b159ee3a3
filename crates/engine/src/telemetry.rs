use crate::error::EngineError;
use async_trait::async_trait;
use configuration::TelemetrySettings;
use events::{AlertLevel, Envelope, EnvelopeSink, Payload, ProfitDropPayload, TelemetryPayload};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{interval, MissedTickBehavior};

/// Where the producer gets each tick's profit delta from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<Decimal, EngineError>;
}

/// A bounded random walk, so dashboards see live-looking numbers without a PnL backend.
pub struct SyntheticMetrics {
    step: Decimal,
    rng: Mutex<StdRng>,
}

impl SyntheticMetrics {
    pub fn new(step: Decimal) -> Self {
        Self {
            step: step.abs(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(step: Decimal, seed: u64) -> Self {
        Self {
            step: step.abs(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl MetricsSource for SyntheticMetrics {
    async fn sample(&self) -> Result<Decimal, EngineError> {
        let permille = self
            .rng
            .lock()
            .map_err(|_| EngineError::Metrics("random source poisoned".to_string()))?
            .gen_range(-1000i64..=1000);
        Ok((self.step * Decimal::new(permille, 3)).round_dp(4))
    }
}

/// Rolling profit aggregate: cumulative PnL, session peak, drawdown and a
/// window of the most recent deltas.
#[derive(Debug, Clone)]
pub struct RollingPnl {
    capacity: usize,
    window: VecDeque<Decimal>,
    starting_equity: Decimal,
    cumulative: Decimal,
    peak: Decimal,
    samples: u64,
}

impl RollingPnl {
    pub fn new(capacity: usize, starting_equity: Decimal) -> Self {
        Self {
            capacity: capacity.max(1),
            window: VecDeque::with_capacity(capacity.max(1)),
            starting_equity,
            cumulative: Decimal::ZERO,
            peak: Decimal::ZERO,
            samples: 0,
        }
    }

    /// Folds in one delta and returns the cumulative PnL from before it.
    pub fn record(&mut self, delta: Decimal) -> Decimal {
        let previous = self.cumulative;
        self.cumulative += delta;
        if self.cumulative > self.peak {
            self.peak = self.cumulative;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(delta);
        self.samples += 1;
        previous
    }

    pub fn cumulative(&self) -> Decimal {
        self.cumulative
    }

    pub fn peak(&self) -> Decimal {
        self.peak
    }

    /// Fractional drop from the peak equity (0.1 = 10%).
    pub fn drawdown_pct(&self) -> Decimal {
        let peak_equity = self.starting_equity + self.peak;
        if peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak - self.cumulative) / peak_equity).round_dp(6)
    }

    pub fn snapshot(&self, delta: Decimal) -> TelemetryPayload {
        TelemetryPayload {
            cumulative_pnl: self.cumulative,
            pnl_delta: delta,
            peak_pnl: self.peak,
            drawdown_pct: self.drawdown_pct(),
            samples: self.samples,
            window: self.window.iter().copied().collect(),
        }
    }
}

/// Timer-driven producer of `TELEMETRY`, `PROFIT_DROP` and drawdown `ALERT` envelopes.
///
/// Runs independently of the chain head monitor and shares only the sink.
pub struct TelemetryProducer {
    config: TelemetrySettings,
    source: Arc<dyn MetricsSource>,
    sink: Arc<dyn EnvelopeSink>,
    pnl: RollingPnl,
    /// Latched while drawdown stays beyond the limit, so the alert fires once per breach.
    drawdown_alerted: bool,
}

impl TelemetryProducer {
    pub fn new(
        config: TelemetrySettings,
        source: Arc<dyn MetricsSource>,
        sink: Arc<dyn EnvelopeSink>,
    ) -> Self {
        let pnl = RollingPnl::new(config.window, config.starting_equity);
        Self {
            config,
            source,
            sink,
            pnl,
            drawdown_alerted: false,
        }
    }

    pub fn pnl(&self) -> &RollingPnl {
        &self.pnl
    }

    /// Runs forever. A failed tick is logged and the timer keeps going.
    pub async fn start(mut self) {
        tracing::info!(interval_secs = self.config.interval_secs, "Telemetry producer started.");
        let mut timer = interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // The first tick is immediate.
            timer.tick().await;
            if let Err(e) = self.tick().await {
                tracing::warn!(error = %e, "Telemetry tick skipped.");
            }
        }
    }

    /// Samples the source once and publishes whatever the new aggregate calls for.
    pub async fn tick(&mut self) -> Result<(), EngineError> {
        let delta = self.source.sample().await?;
        let previous = self.pnl.record(delta);

        self.sink
            .publish(Envelope::new(Payload::Telemetry(self.pnl.snapshot(delta))))
            .await;

        let threshold = self.config.profit_drop_threshold;
        if delta.is_sign_negative() && delta <= -threshold {
            tracing::info!(delta = %delta, threshold = %threshold, "Profit drop detected.");
            self.sink
                .publish(Envelope::new(Payload::ProfitDrop(ProfitDropPayload {
                    previous_pnl: previous,
                    current_pnl: self.pnl.cumulative(),
                    delta,
                    threshold,
                })))
                .await;
        }

        let drawdown = self.pnl.drawdown_pct();
        if drawdown >= self.config.max_drawdown_pct {
            if !self.drawdown_alerted {
                self.drawdown_alerted = true;
                tracing::warn!(drawdown = %drawdown, "Drawdown limit breached.");
                self.sink
                    .publish(Envelope::alert(
                        AlertLevel::Critical,
                        format!(
                            "Drawdown of {:.2}% breached the {:.2}% limit",
                            drawdown * Decimal::from(100),
                            self.config.max_drawdown_pct * Decimal::from(100)
                        ),
                    ))
                    .await;
            }
        } else {
            self.drawdown_alerted = false;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{EnvelopeType, RecordingSink};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    /// Replays a fixed script of samples, then reports zero.
    struct ScriptedMetrics {
        script: Mutex<VecDeque<Result<Decimal, String>>>,
    }

    impl ScriptedMetrics {
        fn new(script: Vec<Result<Decimal, String>>) -> Self {
            Self { script: Mutex::new(script.into()) }
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedMetrics {
        async fn sample(&self) -> Result<Decimal, EngineError> {
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(delta)) => Ok(delta),
                Some(Err(msg)) => Err(EngineError::Metrics(msg)),
                None => Ok(Decimal::ZERO),
            }
        }
    }

    fn settings() -> TelemetrySettings {
        TelemetrySettings {
            interval_secs: 5,
            window: 3,
            profit_drop_threshold: dec!(5),
            starting_equity: dec!(100),
            max_drawdown_pct: dec!(0.2),
            ..TelemetrySettings::default()
        }
    }

    fn producer(script: Vec<Result<Decimal, String>>) -> (TelemetryProducer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let producer = TelemetryProducer::new(
            settings(),
            Arc::new(ScriptedMetrics::new(script)),
            sink.clone(),
        );
        (producer, sink)
    }

    fn kinds(sink: &RecordingSink) -> Vec<EnvelopeType> {
        sink.envelopes().iter().map(Envelope::kind).collect()
    }

    #[test]
    fn rolling_window_keeps_most_recent() {
        let mut pnl = RollingPnl::new(3, dec!(100));
        for delta in [dec!(10), dec!(-4), dec!(2), dec!(-8)] {
            pnl.record(delta);
        }
        let snapshot = pnl.snapshot(dec!(-8));
        assert_eq!(snapshot.window, vec![dec!(-4), dec!(2), dec!(-8)]);
        assert_eq!(snapshot.cumulative_pnl, dec!(0));
        assert_eq!(snapshot.peak_pnl, dec!(10));
        assert_eq!(snapshot.samples, 4);
        // (10 - 0) / (100 + 10)
        assert_eq!(snapshot.drawdown_pct, dec!(0.090909));
    }

    #[tokio::test]
    async fn profit_drop_only_when_threshold_crossed() {
        let (mut producer, sink) = producer(vec![Ok(dec!(-4.99)), Ok(dec!(-5)), Ok(dec!(3))]);
        for _ in 0..3 {
            producer.tick().await.unwrap();
        }

        assert_eq!(
            kinds(&sink),
            vec![
                EnvelopeType::Telemetry,
                EnvelopeType::Telemetry,
                EnvelopeType::ProfitDrop,
                EnvelopeType::Telemetry,
            ]
        );
        match sink.envelopes()[2].payload() {
            Payload::ProfitDrop(p) => {
                assert_eq!(p.previous_pnl, dec!(-4.99));
                assert_eq!(p.current_pnl, dec!(-9.99));
                assert_eq!(p.delta, dec!(-5));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_sample_skips_the_tick() {
        let (mut producer, sink) = producer(vec![Err("backend down".into()), Ok(dec!(1))]);

        assert!(producer.tick().await.is_err());
        assert!(sink.envelopes().is_empty());

        producer.tick().await.unwrap();
        assert_eq!(kinds(&sink), vec![EnvelopeType::Telemetry]);
        assert_eq!(producer.pnl().cumulative(), dec!(1));
    }

    #[tokio::test]
    async fn drawdown_alert_fires_once_per_breach() {
        // Equity 100 -> 75 is a 25% drawdown, recovery to 90 re-arms, 70 breaches again.
        let script = vec![Ok(dec!(-25)), Ok(dec!(-1)), Ok(dec!(16)), Ok(dec!(-20))];
        let (mut producer, sink) = producer(script);
        for _ in 0..4 {
            producer.tick().await.unwrap();
        }

        let critical = sink
            .envelopes()
            .iter()
            .filter(|e| matches!(e.payload(), Payload::Alert(a) if a.level == AlertLevel::Critical))
            .count();
        assert_eq!(critical, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_keeps_running_after_failures() {
        let script = vec![Ok(dec!(1)), Err("flaky".into()), Ok(dec!(1))];
        let (producer, sink) = producer(script);
        let handle = tokio::spawn(producer.start());

        // Ticks at 0s, 5s, 10s, 15s. The second one fails.
        tokio::time::sleep(Duration::from_secs(16)).await;
        handle.abort();

        assert_eq!(
            kinds(&sink),
            vec![EnvelopeType::Telemetry, EnvelopeType::Telemetry, EnvelopeType::Telemetry]
        );
    }

    #[tokio::test]
    async fn synthetic_samples_stay_within_step() {
        let source = SyntheticMetrics::with_seed(dec!(3), 7);
        for _ in 0..200 {
            let delta = source.sample().await.unwrap();
            assert!(delta >= dec!(-3) && delta <= dec!(3), "delta {} out of range", delta);
        }
    }
}
