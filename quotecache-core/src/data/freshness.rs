//! Freshness oracle: is a dataset fetched at `last_update` still good at `now`?
//!
//! The provider finalizes the previous trading day's bar shortly after
//! midnight. A fetch made on day D at or after that cutoff holds every bar
//! that will exist until the cutoff on D+1; a fetch made before the cutoff may
//! hold an unfinished bar and must not survive the next calendar day.
//!
//! | now vs last_update            | fresh?                                   |
//! |-------------------------------|------------------------------------------|
//! | same calendar date            | yes                                      |
//! | next calendar date            | iff last_update >= cutoff and now < cutoff |
//! | two or more days later        | no                                       |
//! | earlier date (clock skew)     | no                                       |
//!
//! Dates are compared in the policy's UTC offset.

use super::provider::DataError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};

/// Cutoff and reference offset for freshness decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    cutoff: NaiveTime,
    offset: FixedOffset,
}

impl FreshnessPolicy {
    pub fn new(cutoff: NaiveTime, offset: FixedOffset) -> Self {
        Self { cutoff, offset }
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of `t` in the policy's offset.
    pub fn local_date<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> NaiveDate {
        t.with_timezone(&self.offset).date_naive()
    }

    pub fn is_fresh<A: TimeZone, B: TimeZone>(
        &self,
        last_update: &DateTime<A>,
        now: &DateTime<B>,
    ) -> bool {
        let last = last_update.with_timezone(&self.offset);
        let now = now.with_timezone(&self.offset);
        let (last_date, now_date) = (last.date_naive(), now.date_naive());

        if now_date == last_date {
            return true;
        }
        if last_date.succ_opt() == Some(now_date) {
            return last.time() >= self.cutoff && now.time() < self.cutoff;
        }
        false
    }

    /// [`is_fresh`](Self::is_fresh) over RFC 3339 strings, as stored on disk.
    pub fn is_fresh_str(&self, last_update: &str, now: &str) -> Result<bool, DataError> {
        let last_update = parse_aware_timestamp(last_update)?;
        let now = parse_aware_timestamp(now)?;
        Ok(self.is_fresh(&last_update, &now))
    }

    /// First instant at which a record fetched at `last_update` is stale.
    pub fn expires_at(&self, last_update: &DateTime<Utc>) -> DateTime<Utc> {
        let last = last_update.with_timezone(&self.offset);
        let next_day = last.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
        let boundary = if last.time() >= self.cutoff {
            next_day.and_time(self.cutoff)
        } else {
            next_day.and_time(NaiveTime::MIN)
        };
        (boundary - self.offset).and_utc()
    }
}

impl Default for FreshnessPolicy {
    /// 00:30 UTC.
    fn default() -> Self {
        Self {
            cutoff: NaiveTime::from_hms_opt(0, 30, 0).unwrap_or(NaiveTime::MIN),
            offset: Utc.fix(),
        }
    }
}

/// Parse an RFC 3339 timestamp; anything without an explicit offset is rejected.
pub fn parse_aware_timestamp(value: &str) -> Result<DateTime<Utc>, DataError> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => {
            let reason = if value.parse::<NaiveDateTime>().is_ok() {
                "timestamp has no UTC offset".to_string()
            } else {
                e.to_string()
            };
            Err(DataError::InvalidTimestamp {
                value: value.to_string(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, m, 0).unwrap()
    }

    #[test]
    fn same_instant_is_fresh() {
        let policy = FreshnessPolicy::default();
        let t = at(14, 9, 15);
        assert!(policy.is_fresh(&t, &t));
    }

    #[test]
    fn twenty_five_hours_later_is_stale() {
        let policy = FreshnessPolicy::default();
        let t = at(14, 23, 30);
        assert!(!policy.is_fresh(&t, &(t + Duration::hours(25))));
    }

    #[test]
    fn fetch_before_cutoff_goes_stale_next_day() {
        let policy = FreshnessPolicy::default();
        assert!(!policy.is_fresh(&at(14, 0, 10), &at(15, 0, 10)));
    }

    #[test]
    fn fetch_after_cutoff_lasts_until_next_cutoff() {
        let policy = FreshnessPolicy::default();
        assert!(policy.is_fresh(&at(14, 0, 45), &at(15, 0, 10)));
        assert!(policy.is_fresh(&at(14, 0, 30), &at(15, 0, 29)));
        assert!(!policy.is_fresh(&at(14, 0, 45), &at(15, 0, 30)));
    }

    #[test]
    fn large_gaps_are_never_fresh() {
        let policy = FreshnessPolicy::default();
        assert!(!policy.is_fresh(&at(14, 23, 59), &at(16, 0, 0)));
        assert!(!policy.is_fresh(&at(1, 12, 0), &at(31, 0, 1)));
    }

    #[test]
    fn earlier_date_is_stale() {
        let policy = FreshnessPolicy::default();
        assert!(!policy.is_fresh(&at(15, 12, 0), &at(14, 12, 0)));
    }

    #[test]
    fn dates_compared_in_policy_offset() {
        // 23:00 UTC on the 14th is 01:00 on the 15th at UTC+2
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let policy = FreshnessPolicy::new(NaiveTime::from_hms_opt(0, 30, 0).unwrap(), plus_two);
        assert!(policy.is_fresh(&at(14, 23, 0), &at(15, 12, 0)));
        assert!(!FreshnessPolicy::default().is_fresh(&at(14, 23, 0), &at(15, 12, 0)));
    }

    #[test]
    fn mixed_timezones_compare_instants() {
        let policy = FreshnessPolicy::default();
        let new_york = FixedOffset::west_opt(4 * 3600).unwrap();
        let last = at(14, 10, 0).with_timezone(&new_york);
        assert!(policy.is_fresh(&last, &at(14, 22, 0)));
    }

    #[test]
    fn naive_timestamp_is_rejected() {
        let err = parse_aware_timestamp("2024-05-14T09:15:00").unwrap_err();
        match err {
            DataError::InvalidTimestamp { reason, .. } => {
                assert!(reason.contains("no UTC offset"), "{reason}")
            }
            other => panic!("unexpected error: {other}"),
        }
        let policy = FreshnessPolicy::default();
        assert!(policy
            .is_fresh_str("2024-05-14T09:15:00", "2024-05-14T10:00:00Z")
            .is_err());
    }

    #[test]
    fn aware_strings_roundtrip() {
        let policy = FreshnessPolicy::default();
        assert!(policy
            .is_fresh_str("2024-05-14T09:15:00+00:00", "2024-05-14T18:00:00Z")
            .unwrap());
        assert_eq!(
            parse_aware_timestamp("2024-05-14T11:15:00+02:00").unwrap(),
            at(14, 9, 15)
        );
    }

    #[test]
    fn expiry_follows_cutoff() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.expires_at(&at(14, 9, 0)), at(15, 0, 30));
        assert_eq!(policy.expires_at(&at(14, 0, 10)), at(15, 0, 0));
    }
}
