use std::time::Duration;

/// `backoff × counter ^ exponent`, or a flat `backoff` when no exponent is
/// configured (SPEC_FULL §4.7). `counter` is the 1-based retry attempt.
pub fn backoff_delay(backoff: f64, exponent: Option<f64>, counter: u32) -> Duration {
    let seconds = match exponent {
        Some(exp) => backoff * (counter as f64).powf(exp),
        None => backoff,
    };
    Duration::from_secs_f64(seconds.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_backoff_ignores_counter() {
        assert_eq!(backoff_delay(2.0, None, 1), Duration::from_secs_f64(2.0));
        assert_eq!(backoff_delay(2.0, None, 5), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn exponential_backoff_grows_with_counter() {
        assert_eq!(backoff_delay(1.0, Some(2.0), 3), Duration::from_secs_f64(9.0));
        assert_eq!(backoff_delay(0.5, Some(2.0), 4), Duration::from_secs_f64(8.0));
    }

    #[test]
    fn negative_result_clamps_to_zero() {
        assert_eq!(backoff_delay(-1.0, None, 1), Duration::from_secs(0));
    }
}
