//! Retry backoff computation (§4.6): `nextAttemptAt` from a step's
//! `retryPolicy` and its current attempt count.

use crate::model::{Jitter, RetryPolicy, RetryStrategy};
use rand::Rng;

/// Compute the delay (ms) before attempt `attempt` (1-indexed: the retry
/// after the first failure is `attempt=2`), before jitter is applied.
fn base_delay_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    match policy.strategy {
        RetryStrategy::None => 0,
        RetryStrategy::Fixed => policy.initial_delay_ms,
        RetryStrategy::Exponential => {
            let exponent = attempt.saturating_sub(1);
            policy
                .initial_delay_ms
                .saturating_mul(2u64.saturating_pow(exponent))
        }
    }
    .min(policy.max_delay_ms.max(policy.initial_delay_ms))
}

/// Apply jitter to a base delay using an injected RNG so tests can assert
/// exact bounds without relying on global randomness.
pub fn delay_with_jitter(policy: &RetryPolicy, attempt: u32, rng: &mut impl Rng) -> u64 {
    let base = base_delay_ms(policy, attempt);
    match policy.jitter {
        Jitter::None => base,
        Jitter::Full => {
            if base == 0 {
                0
            } else {
                rng.gen_range(0..=base)
            }
        }
        Jitter::Equal => {
            let half = base / 2;
            if half == 0 {
                base
            } else {
                half + rng.gen_range(0..=half)
            }
        }
    }
}

/// `nextAttemptAt = now + delay_with_jitter(...)`, the value written onto
/// the run step when it is requeued for retry.
pub fn next_attempt_at(
    policy: &RetryPolicy,
    attempt: u32,
    now: chrono::DateTime<chrono::Utc>,
    rng: &mut impl Rng,
) -> chrono::DateTime<chrono::Utc> {
    now + chrono::Duration::milliseconds(delay_with_jitter(policy, attempt, rng) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetryStrategy;
    use rand::SeedableRng;

    #[test]
    fn fixed_strategy_ignores_attempt_number() {
        let policy = RetryPolicy {
            max_attempts: 5,
            strategy: RetryStrategy::Fixed,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter: Jitter::None,
        };
        assert_eq!(base_delay_ms(&policy, 2), 1_000);
        assert_eq!(base_delay_ms(&policy, 5), 1_000);
    }

    #[test]
    fn exponential_strategy_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            strategy: RetryStrategy::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: Jitter::None,
        };
        assert_eq!(base_delay_ms(&policy, 1), 100);
        assert_eq!(base_delay_ms(&policy, 2), 200);
        assert_eq!(base_delay_ms(&policy, 3), 400);
        assert_eq!(base_delay_ms(&policy, 10), 1_000);
    }

    #[test]
    fn full_jitter_stays_within_base_bound() {
        let policy = RetryPolicy {
            max_attempts: 5,
            strategy: RetryStrategy::Fixed,
            initial_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter: Jitter::Full,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let delay = delay_with_jitter(&policy, 1, &mut rng);
            assert!(delay <= 1_000);
        }
    }
}
