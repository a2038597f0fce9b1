use std::time::Duration;

/// Reconnect backoff policy.
///
/// `delay = min(max, initial * multiplier^attempt)`, with the
/// attempt counter reset to zero every time a connection
/// reaches OPEN. When the retry budget is exhausted the client
/// transitions to CLOSED instead of sleeping again.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up.
    pub budget: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 1.5,
            budget: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn with_budget(budget: u32) -> Self {
        Self { budget, ..Self::default() }
    }

    /// Delay before reconnect attempt `attempt` (0-based), or
    /// `None` once the budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.budget {
            return None;
        }
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Some(self.max.min(Duration::from_secs_f64(scaled)))
    }

    /// [`delay`](Self::delay) plus up to 250ms of jitter, so a
    /// venue outage does not reconnect every client on the same
    /// tick.
    pub fn delay_jittered(&self, attempt: u32) -> Option<Duration> {
        self.delay(attempt)
            .map(|d| d + Duration::from_millis(rand::random_range(0..250)))
    }

    /// Upper bound on total time spent sleeping before the
    /// budget is exhausted.
    pub fn total_budget(&self) -> Duration {
        (0..self.budget).filter_map(|a| self.delay(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_geometrically_to_the_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(1), Some(Duration::from_secs_f64(1.5)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs_f64(2.25)));
        // 1.5^10 ≈ 57.7, still under the cap; 1.5^11 crosses it.
        assert!(policy.delay(9).unwrap() < policy.max);
        let wide = BackoffPolicy { budget: 20, ..BackoffPolicy::default() };
        assert_eq!(wide.delay(11), Some(Duration::from_secs(60)));
        assert_eq!(wide.delay(19), Some(Duration::from_secs(60)));
    }

    #[test]
    fn budget_boundary_is_exact() {
        let policy = BackoffPolicy::with_budget(10);
        assert!(policy.delay(9).is_some());
        assert_eq!(policy.delay(10), None);
        assert_eq!(policy.delay(11), None);

        let none = BackoffPolicy::with_budget(0);
        assert_eq!(none.delay(0), None);
    }

    #[test]
    fn total_budget_bounds_reconnect_time() {
        let policy = BackoffPolicy::default();
        // Σ 1.5^i for i in 0..10 ≈ 113.33s.
        let total = policy.total_budget();
        assert!(total > Duration::from_secs(113));
        assert!(total < Duration::from_secs(114));
    }

    #[test]
    fn jitter_stays_bounded() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let base = policy.delay(3).unwrap();
            let jittered = policy.delay_jittered(3).unwrap();
            assert!(jittered >= base);
            assert!(jittered < base + Duration::from_millis(250));
        }
    }
}
