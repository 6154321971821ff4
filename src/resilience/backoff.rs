//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Backoff parameters for a bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Multiplier applied per further retry.
    pub factor: f64,
    /// Extra random delay, as a fraction of the base delay.
    pub jitter: f64,
    /// Retries after the first attempt.
    pub retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 1.3,
            jitter: 0.1,
            retries: 15,
        }
    }
}

impl Backoff {
    /// Total attempts including the first one.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial, self.factor, self.jitter)
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 has no delay; attempt `n` waits `initial * factor^(n-1)` plus up
/// to `jitter` of that.
pub fn calculate_backoff(attempt: u32, initial: Duration, factor: f64, jitter: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let base = initial.as_secs_f64() * factor.max(1.0).powi(exponent);
    // Keep the delay finite and within what Duration can hold
    let base = base.min(3600.0);

    let jitter_secs = if jitter > 0.0 && base > 0.0 {
        rand::thread_rng().gen_range(0.0..base * jitter)
    } else {
        0.0
    };

    Duration::from_secs_f64(base + jitter_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let initial = Duration::from_millis(100);

        assert_eq!(calculate_backoff(0, initial, 2.0, 0.1), Duration::ZERO);

        let b1 = calculate_backoff(1, initial, 2.0, 0.1);
        assert!(b1 >= Duration::from_millis(100));
        assert!(b1 < Duration::from_millis(111));

        let b3 = calculate_backoff(3, Duration::from_secs(1), 2.0, 0.0);
        assert_eq!(b3, Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let huge = calculate_backoff(500, Duration::from_secs(1), 10.0, 0.0);
        assert_eq!(huge, Duration::from_secs(3600));
    }

    #[test]
    fn test_attempts_include_first_try() {
        let backoff = Backoff {
            retries: 2,
            ..Backoff::default()
        };
        assert_eq!(backoff.attempts(), 3);
    }
}
