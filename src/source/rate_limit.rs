use log::debug;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    refill_rate: f64,
}

impl TokenBucket {
    fn refill_tokens(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async token bucket shared by every request of a source.
///
/// A limiter with zero capacity or a non-positive refill rate never waits.
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let bucket = (capacity > 0 && refill_rate > 0.0).then(|| {
            Mutex::new(TokenBucket {
                capacity: capacity as f64,
                tokens: capacity as f64,
                last_refill: Instant::now(),
                refill_rate,
            })
        });
        RateLimiter { bucket }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                bucket.refill_tokens();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.refill_rate)
            };
            debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
