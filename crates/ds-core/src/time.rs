//! Time utilities for devshell

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Calculate elapsed time since a given millisecond timestamp.
///
/// Returns Duration::ZERO if the given time is in the future.
pub fn elapsed_since(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis() {
        let t1 = current_time_millis();
        let t2 = current_time_millis();
        assert!(t1 > 0);
        assert!(t2 >= t1);
    }

    #[test]
    fn test_elapsed_since_future_is_zero() {
        let future = current_time_millis() + 60_000;
        assert_eq!(elapsed_since(future), Duration::ZERO);
    }
}
