//! The per-process game loop
//!
//! One fixed-rate tokio interval drives every session. The loop also
//! measures the tick rate it actually achieves, smoothed over windows of
//! wall-clock time, and publishes it for client clock calibration. Under
//! load the interval skips missed ticks rather than bursting, so the
//! published rate reflects what clients really receive.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::game::session::SessionRegistry;
use crate::util::time::{SIMULATION_TPS, TICK_DURATION};

/// Ticks per measurement window
const ESTIMATOR_WINDOW: u32 = 30;
/// Weight of each new window in the exponential average
const ESTIMATOR_ALPHA: f64 = 0.2;

/// Shared read handle to the smoothed true tick rate
#[derive(Clone)]
pub struct TickRateHandle(Arc<RwLock<f64>>);

impl TickRateHandle {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(f64::from(SIMULATION_TPS))))
    }

    pub fn get(&self) -> f64 {
        *self.0.read()
    }

    fn set(&self, rate: f64) {
        *self.0.write() = rate;
    }
}

impl Default for TickRateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Smooths the achieved tick rate over fixed-size windows
pub struct TickRateEstimator {
    handle: TickRateHandle,
    window_start: Instant,
    ticks_in_window: u32,
    smoothed: f64,
}

impl TickRateEstimator {
    pub fn new(handle: TickRateHandle) -> Self {
        Self {
            handle,
            window_start: Instant::now(),
            ticks_in_window: 0,
            smoothed: f64::from(SIMULATION_TPS),
        }
    }

    pub fn on_tick(&mut self) {
        self.ticks_in_window += 1;
        if self.ticks_in_window < ESTIMATOR_WINDOW {
            return;
        }
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.apply_measurement(f64::from(ESTIMATOR_WINDOW) / elapsed);
        }
        self.ticks_in_window = 0;
        self.window_start = Instant::now();
    }

    fn apply_measurement(&mut self, measured: f64) {
        self.smoothed = self.smoothed * (1.0 - ESTIMATOR_ALPHA) + measured * ESTIMATOR_ALPHA;
        self.handle.set(self.smoothed);
        debug!(measured, smoothed = self.smoothed, "Tick rate window closed");
    }
}

/// Run the fixed-rate loop forever, stepping every session each tick and
/// reaping sessions once their last player has left
pub async fn run_driver(registry: Arc<SessionRegistry>, tick_rate: TickRateHandle) {
    let mut interval = tokio::time::interval(TICK_DURATION);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut estimator = TickRateEstimator::new(tick_rate);
    info!(tps = SIMULATION_TPS, "Game loop started");

    loop {
        interval.tick().await;

        let mut finished = Vec::new();
        for session in registry.all() {
            let mut session = session.lock();
            session.step();
            if session.is_empty() {
                finished.push(session.id);
            }
        }
        for id in finished {
            registry.remove(id);
            info!(session_id = %id, "Session destroyed, no players remain");
        }

        estimator.on_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_starts_at_the_nominal_rate() {
        let handle = TickRateHandle::new();
        assert_eq!(handle.get(), f64::from(SIMULATION_TPS));
    }

    #[test]
    fn estimator_converges_toward_the_measured_rate() {
        let handle = TickRateHandle::new();
        let mut estimator = TickRateEstimator::new(handle.clone());

        let mut previous = handle.get();
        for _ in 0..40 {
            estimator.apply_measurement(20.0);
            let current = handle.get();
            assert!(current < previous, "smoothed rate must move toward 20");
            previous = current;
        }
        assert!((handle.get() - 20.0).abs() < 0.1);
    }

    #[test]
    fn estimator_smooths_out_a_single_outlier() {
        let handle = TickRateHandle::new();
        let mut estimator = TickRateEstimator::new(handle.clone());

        estimator.apply_measurement(5.0);
        // One bad window cannot drag the estimate anywhere near 5
        assert!(handle.get() > 20.0);
    }
}
