use rand::Rng;
use std::time::Duration;

/// Exponential reconnect backoff, capped at a maximum interval.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    jitter: bool,
    current: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: 2,
            jitter: false,
            current: initial,
        }
    }

    /// Add up to 10% random jitter to every delay, spreading out simultaneous reconnects.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    /// Return the next delay and advance the backoff.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self
            .current
            .checked_mul(self.factor)
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter {
            let max_jitter_ms = (delay.as_millis() / 10) as u64;
            if max_jitter_ms > 0 {
                let jitter_ms = rand::rng().random_range(0..=max_jitter_ms);
                return delay + Duration::from_millis(jitter_ms);
            }
        }

        delay
    }

    /// Reset back to the initial delay, eg/ after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        let delays = (0..6).map(|_| backoff.next_delay()).collect::<Vec<_>>();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), Duration::from_millis(400));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(1))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1100));
        }
    }
}
