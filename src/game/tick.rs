//! Fixed-rate simulation schedule

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::info;

use crate::ws::protocol::EncodeError;

/// Highest rate that still leaves a whole-millisecond period
pub const MAX_TICK_RATE_HZ: u32 = 1000;

/// Counters shared with anything that reports on the loop
#[derive(Debug, Default)]
pub struct LoopStats {
    ticks: AtomicU64,
    running: AtomicBool,
}

impl LoopStats {
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("tick rate must be between 1 and 1000 Hz, got {0}")]
    InvalidTickRate(u32),
}

/// Failure inside a single tick; logged and the schedule carries on
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("failed to encode state update: {0}")]
    Encode(#[from] EncodeError),
}

/// Drives ticks at a fixed period while running
///
/// Missed ticks are skipped rather than fired in a burst. The loop does no
/// work itself, the owner awaits [`SimulationLoop::next_tick`] and runs the
/// tick body with the returned delta.
pub struct SimulationLoop {
    interval: Option<Interval>,
    last_tick: Instant,
    stats: Arc<LoopStats>,
}

impl SimulationLoop {
    pub fn new() -> Self {
        Self {
            interval: None,
            last_tick: Instant::now(),
            stats: Arc::new(LoopStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<LoopStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn tick_count(&self) -> u64 {
        self.stats.tick_count()
    }

    /// Returns Ok(false) if already running
    pub fn start(&mut self, tick_rate_hz: u32) -> Result<bool, LoopError> {
        if self.interval.is_some() {
            return Ok(false);
        }
        if tick_rate_hz == 0 || tick_rate_hz > MAX_TICK_RATE_HZ {
            return Err(LoopError::InvalidTickRate(tick_rate_hz));
        }

        let period = Duration::from_millis(1000 / u64::from(tick_rate_hz));
        let now = Instant::now();
        let mut interval = interval_at(now + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.interval = Some(interval);
        self.last_tick = now;
        self.stats.running.store(true, Ordering::Relaxed);

        info!(
            tick_rate_hz,
            period_ms = period.as_millis() as u64,
            "Simulation loop started"
        );
        Ok(true)
    }

    /// Returns false if it was not running
    pub fn stop(&mut self) -> bool {
        if self.interval.take().is_none() {
            return false;
        }
        self.stats.running.store(false, Ordering::Relaxed);
        info!(ticks = self.stats.tick_count(), "Simulation loop stopped");
        true
    }

    /// Wait for the next tick and return the time since the previous one
    ///
    /// Never resolves while stopped.
    pub async fn next_tick(&mut self) -> Duration {
        let Some(interval) = self.interval.as_mut() else {
            return std::future::pending().await;
        };

        let now = interval.tick().await;
        let delta = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        delta
    }
}

impl Default for SimulationLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep_until, timeout};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn zero_hz_is_rejected() {
        let mut sim = SimulationLoop::new();
        assert_eq!(sim.start(0), Err(LoopError::InvalidTickRate(0)));
        assert!(!sim.is_running());
        assert!(!sim.stats().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn twenty_hz_for_one_second() {
        let mut sim = SimulationLoop::new();
        assert_eq!(sim.start(20), Ok(true));
        assert_eq!(sim.start(20), Ok(false));

        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            tokio::select! {
                _ = sim.next_tick() => {}
                _ = sleep_until(deadline) => break,
            }
        }

        let ticks = sim.tick_count();
        assert!((19..=21).contains(&ticks), "got {} ticks", ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let mut sim = SimulationLoop::new();
        sim.start(10).unwrap();
        let started = Instant::now();

        let delta = sim.next_tick().await;
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(delta, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_the_count() {
        let mut sim = SimulationLoop::new();
        let stats = sim.stats();
        sim.start(20).unwrap();
        sim.next_tick().await;
        sim.next_tick().await;
        assert!(stats.is_running());

        assert!(sim.stop());
        assert!(!sim.stop());
        assert!(!stats.is_running());

        assert_err!(timeout(Duration::from_secs(2), sim.next_tick()).await);
        assert_eq!(stats.tick_count(), 2);

        assert_ok!(sim.start(20));
        assert!(stats.is_running());
    }
}
