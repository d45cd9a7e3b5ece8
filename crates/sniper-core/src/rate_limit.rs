//! Token-bucket rate limiter for outbound provider calls and stream intake.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    capacity: u32,
    tokens: u32,
    interval: Duration,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        if elapsed >= self.interval {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
    }
}

/// Token bucket allowing `capacity` operations per `interval`.
///
/// `try_acquire` is the drop-on-excess path used by stream intake;
/// `acquire` suspends until a token is available.
pub struct TokenBucket {
    inner: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Bucket {
                capacity,
                tokens: capacity,
                interval,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.lock().unwrap();
        bucket.refill();
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Suspend until a token is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.inner.lock().unwrap();
                bucket.refill();
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                // Next refill is one interval after the last one.
                bucket
                    .interval
                    .saturating_sub(bucket.last_refill.elapsed())
                    .max(Duration::from_millis(5))
            };
            tokio::time::sleep(wait).await;
        }
    }
}
