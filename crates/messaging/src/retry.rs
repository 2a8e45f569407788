use std::time::Duration;

/// Exponential backoff for publish retries.
///
/// Defaults: 3 attempts, 100ms initial backoff doubling up to 5s.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before retry number `retry` (1 for the second attempt).
    ///
    /// `initial_backoff * multiplier^(retry - 1)`, capped at `max_backoff`.
    #[must_use]
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_initial() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_for_retry(7), Duration::from_millis(5000));
        assert_eq!(policy.backoff_for_retry(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn custom_multiplier() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), Duration::from_secs(1))
            .with_multiplier(3.0);
        assert_eq!(policy.backoff_for_retry(3), Duration::from_millis(90));
    }
}
