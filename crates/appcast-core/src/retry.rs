//! Reconnection backoff schedule for the app-level connection.
//!
//! After `n` consecutive failures the engine waits `n³` seconds before the
//! next attempt: 0, 1, 8, 27, 64, … The counter resets to zero on any
//! successful connect. Once the projected delay crosses
//! [`BACKOFF_CEILING`] the fault is fatal — the server will have expired
//! the app long before the wait ends.

use std::time::Duration;

/// Delay ceiling: one hour.
pub const BACKOFF_CEILING: Duration = Duration::from_secs(60 * 60);

/// Delay before reconnect attempt number `consecutive_failures`.
///
/// Returns `None` when the projected delay exceeds [`BACKOFF_CEILING`],
/// meaning the caller must give up instead of retrying.
pub fn reconnect_delay(consecutive_failures: u32) -> Option<Duration> {
    let delay = Duration::from_secs(u64::from(consecutive_failures).pow(3));
    if delay > BACKOFF_CEILING {
        None
    } else {
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_schedule() {
        let expected = [0u64, 1, 8, 27, 64, 125, 216];
        for (n, secs) in expected.iter().enumerate() {
            assert_eq!(
                reconnect_delay(n as u32),
                Some(Duration::from_secs(*secs)),
                "attempt {n}"
            );
        }
    }

    #[test]
    fn ceiling_is_one_hour() {
        assert_eq!(BACKOFF_CEILING, Duration::from_secs(3600));
    }

    #[test]
    fn gives_up_past_the_ceiling() {
        // 15³ = 3375s still retries; 16³ = 4096s is past one hour.
        assert_eq!(reconnect_delay(15), Some(Duration::from_secs(3375)));
        assert_eq!(reconnect_delay(16), None);
        assert_eq!(reconnect_delay(100), None);
    }
}
