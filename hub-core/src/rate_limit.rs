//! Per-connection message rate limiting. A fixed-window counter keeps this
//! simple; callers needing smoother backpressure can swap in a token bucket
//! later without changing the call site.

use std::time::{Duration, Instant};

/// Fixed-window message-rate limiter: at most `limit` messages per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(messages_per_second: u32) -> Self {
        Self {
            limit: messages_per_second,
            window: Duration::from_secs(1),
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Records one message; returns `false` if the connection should be
    /// closed for exceeding the cap.
    pub fn record(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit() {
        let mut rl = RateLimiter::new(3);
        assert!(rl.record());
        assert!(rl.record());
        assert!(rl.record());
        assert!(!rl.record());
    }
}
