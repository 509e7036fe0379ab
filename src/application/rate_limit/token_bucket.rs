use std::time::Duration;
use tokio::time::Instant;

/// Holds up to `capacity` tokens and regains one per `refill_interval`.
/// Refills lazily whenever it is touched; there is no timer behind it.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::new_at(capacity, refill_interval, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_interval: Duration, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            refill_interval,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        if self.tokens >= self.capacity {
            self.last_refill = now;
            return;
        }
        if self.refill_interval.is_zero() {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let missing = u128::from(self.capacity - self.tokens);
        let added = intervals.min(missing) as u32;
        self.tokens += added;
        if self.tokens >= self.capacity {
            self.last_refill = now;
        } else {
            self.last_refill += self.refill_interval * added;
        }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    pub fn available_at(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens
    }

    /// Zero when a token is available now.
    pub fn time_until_next_token(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens > 0 {
            return Duration::ZERO;
        }
        (self.last_refill + self.refill_interval).saturating_duration_since(now)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
