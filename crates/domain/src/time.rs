//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for `last_seen`, command submission and ack times.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Elapsed time between `since` and `now`, saturating at zero when `since`
/// lies in the future (clock adjustments).
#[must_use]
pub fn elapsed(since: Timestamp, now: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        assert!(ts >= before);
        assert!(ts <= Utc::now());
    }

    #[test]
    fn should_measure_elapsed_time() {
        let start = now();
        let later = start + chrono::Duration::seconds(3);
        assert_eq!(elapsed(start, later), Duration::from_secs(3));
    }

    #[test]
    fn should_saturate_elapsed_when_since_is_in_the_future() {
        let start = now();
        let earlier = start - chrono::Duration::seconds(3);
        assert_eq!(elapsed(start, earlier), Duration::ZERO);
    }
}
