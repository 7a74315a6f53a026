// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Backoff between automatic upload retries

use rand::random;
use std::time::Duration;
use tracekeep_core::BackoffOptions;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self::from(&BackoffOptions::default())
    }

    /// Exponential delay for the zero-based `attempt`, plus any delay the
    /// server asked for.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = (base * jitter_factor).max(0.0);
        let clamped = jittered.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped) + retry_after.unwrap_or(Duration::ZERO)
    }
}

impl From<&BackoffOptions> for RetryPolicy {
    fn from(options: &BackoffOptions) -> Self {
        Self {
            initial_delay: options.initial_delay(),
            max_delay: options.max_delay(),
            multiplier: options.multiplier,
            jitter: options.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_is_clamped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(125),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0, None), Duration::from_millis(125));
        assert_eq!(policy.delay_for_attempt(2, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(5, None), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_is_added() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential()
        };
        let delay = policy.delay_for_attempt(0, Some(Duration::from_secs(3)));
        assert_eq!(delay, Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        };
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0, None).as_millis();
            assert!((899..=1100).contains(&delay), "delay {}", delay);
        }
    }
}
