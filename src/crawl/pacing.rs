use std::time::Duration;

use rand::Rng;
use tracing::info;

/// Randomized pause between jobs, uniform in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = millis(self.min);
        let hi = millis(self.max);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        info!(
            "Waiting for {:.2} seconds before processing the next job.",
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
