// src/clock.rs
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Source of "now" for age computations in the pipeline.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Runtime instant at which `deadline` is reached.
    fn instant_at(&self, deadline: DateTime<Utc>) -> Instant {
        let wait = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
        Instant::now() + wait
    }
}

/// Wall clock anchored to the tokio runtime clock.
///
/// Time advances with `tokio::time::Instant`, so a paused runtime also
/// pauses the ages the filter computes.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor_utc,
            anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_utc + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_paused_runtime() {
        let clock = TokioClock::new();
        let start = clock.now();
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at_past_deadline_is_now() {
        let clock = TokioClock::new();
        let past = clock.now() - chrono::Duration::seconds(5);
        assert_eq!(clock.instant_at(past), Instant::now());
    }
}
