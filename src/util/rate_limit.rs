//! Inbound packet rate limiting

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default inbound packets per second per connection
pub const PACKET_RATE_LIMIT: u32 = 60;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Per-connection packet limiter
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    packets: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(packets_per_second: u32) -> Self {
        Self {
            packets: create_limiter(packets_per_second),
        }
    }

    /// Check if a packet is allowed (returns true if allowed)
    pub fn check_packet(&self) -> bool {
        self.packets.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(PACKET_RATE_LIMIT)
    }
}
