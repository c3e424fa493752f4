//! Per-connection input rate limiting

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Sustained client messages allowed per second on one connection. Key
/// updates dominate and arrive at most once per input event, so this is
/// well above honest traffic.
const MESSAGES_PER_SECOND: u32 = 120;
const BURST: u32 = 60;

/// Token-bucket limiter guarding one WebSocket connection
pub struct ConnectionRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        let quota = Quota::per_second(NonZeroU32::new(MESSAGES_PER_SECOND).expect("nonzero quota"))
            .allow_burst(NonZeroU32::new(BURST).expect("nonzero burst"));
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// True if the message is within quota and should be processed
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
