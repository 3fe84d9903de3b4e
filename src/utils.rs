use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Rate limiter for polite crawling.
///
/// Requests share one schedule: each waits for the slot left by the previous
/// one. With jitter enabled the spacing varies between 0.5 and 1.5 times the delay.
pub struct RateLimiter {
    delay: Duration,
    randomize: bool,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(delay: Duration, randomize: bool) -> Self {
        Self {
            delay,
            randomize,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_secs(delay_secs: f64, randomize: bool) -> Self {
        Self::new(Duration::from_secs_f64(delay_secs.max(0.0)), randomize)
    }

    pub async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            sleep_until(slot).await;
        }
        *next_slot = Some(Instant::now() + self.spacing());
    }

    fn spacing(&self) -> Duration {
        if self.randomize && !self.delay.is_zero() {
            let mut rng = rand::rng();
            self.delay.mul_f64(rng.random_range(0.5..1.5))
        } else {
            self.delay
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_secs(5.0, true)
    }
}
