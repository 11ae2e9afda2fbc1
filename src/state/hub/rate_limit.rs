use std::time::Instant;

/// Per-connection token bucket guarding inbound frames.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    /// `None` when either knob is zero, meaning no limit.
    pub fn new(rate_per_second: u32, burst: u32) -> Option<Self> {
        if rate_per_second == 0 || burst == 0 {
            return None;
        }
        Some(Self {
            capacity: burst as f64,
            tokens: burst as f64,
            refill_per_sec: rate_per_second as f64,
            last: Instant::now(),
        })
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
