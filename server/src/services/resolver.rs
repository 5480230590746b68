//! Flight status policies

use chrono::{DateTime, Utc};

use crate::models::StatusVerdict;

/// Decides the status every matching oracle reports for one request.
///
/// Implementations must be total and free of side effects: the relay calls
/// `resolve` once per request and sends the result under every selected
/// identity, so a policy that disagrees with itself splits the vote.
pub trait StatusPolicy: Send + Sync {
    fn resolve(&self, scheduled_timestamp: u64, now: DateTime<Utc>) -> StatusVerdict;
}

impl<F> StatusPolicy for F
where
    F: Fn(u64, DateTime<Utc>) -> StatusVerdict + Send + Sync,
{
    fn resolve(&self, scheduled_timestamp: u64, now: DateTime<Utc>) -> StatusVerdict {
        self(scheduled_timestamp, now)
    }
}

/// Blames the airline for any flight whose scheduled departure has passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepartureTimePolicy;

impl StatusPolicy for DepartureTimePolicy {
    fn resolve(&self, scheduled_timestamp: u64, now: DateTime<Utc>) -> StatusVerdict {
        // compare in milliseconds; i128 keeps every u64 timestamp in range
        let scheduled_ms = i128::from(scheduled_timestamp) * 1_000;
        if scheduled_ms < i128::from(now.timestamp_millis()) {
            StatusVerdict::LateAirline
        } else {
            StatusVerdict::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn past_departures_are_late_airline() {
        let now = at(1_700_000_000);
        assert_eq!(
            DepartureTimePolicy.resolve(1_699_999_999, now),
            StatusVerdict::LateAirline
        );
        assert_eq!(DepartureTimePolicy.resolve(0, now), StatusVerdict::LateAirline);
    }

    #[test]
    fn present_and_future_departures_are_unknown() {
        let now = at(1_700_000_000);
        assert_eq!(DepartureTimePolicy.resolve(1_700_000_000, now), StatusVerdict::Unknown);
        assert_eq!(DepartureTimePolicy.resolve(1_700_000_600, now), StatusVerdict::Unknown);
        assert_eq!(DepartureTimePolicy.resolve(u64::MAX, now), StatusVerdict::Unknown);
    }

    #[test]
    fn closures_can_stand_in_for_the_policy() {
        let policy = |_: u64, _: DateTime<Utc>| StatusVerdict::LateWeather;
        assert_eq!(policy.resolve(1, at(2)), StatusVerdict::LateWeather);
    }

    proptest! {
        #[test]
        fn resolve_is_total(scheduled in any::<u64>(), now_secs in 0i64..32_503_680_000) {
            let verdict = DepartureTimePolicy.resolve(scheduled, at(now_secs));
            prop_assert!(StatusVerdict::ALL.contains(&verdict));
            prop_assert_eq!(StatusVerdict::try_from(verdict.code()), Ok(verdict));
        }
    }
}
