//! Tick timing constants and wall-clock helpers

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nominal simulation rate. The driver targets this; the true achieved
/// rate is measured separately and reported to clients.
pub const SIMULATION_TPS: u32 = 30;

/// Interval between ticks at the nominal rate
pub const TICK_DURATION: Duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);

/// Full turret state resync every five seconds of nominal ticks
pub const TURRET_RESYNC_TICKS: u64 = SIMULATION_TPS as u64 * 5;

/// Milliseconds since the unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
