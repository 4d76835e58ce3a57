//! Date arithmetic around the single global rollover instant.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

pub const DEFAULT_ROLLOVER_HOUR_UTC: u32 = 12;

/// The daily boundary, in UTC, at which the next unit unlocks.
///
/// Independent of either partner's local time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RolloverSchedule {
    hour_utc: u32,
}

impl Default for RolloverSchedule {
    fn default() -> Self {
        Self {
            hour_utc: DEFAULT_ROLLOVER_HOUR_UTC,
        }
    }
}

impl RolloverSchedule {
    /// Hours outside 0..24 are clamped to 23.
    pub fn new(hour_utc: u32) -> Self {
        Self {
            hour_utc: hour_utc.min(23),
        }
    }

    pub fn hour_utc(&self) -> u32 {
        self.hour_utc
    }

    /// Date the next unit should unlock after a completion at `now`:
    /// today before the rollover hour, tomorrow from it onwards.
    pub fn next_scheduled_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.date_naive();
        if now.hour() < self.hour_utc {
            today
        } else {
            today.checked_add_days(Days::new(1)).unwrap_or(today)
        }
    }

    /// The instant `date` rolls over.
    pub fn instant(&self, date: NaiveDate) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&date.and_time(time))
    }

    pub fn is_due(&self, date: NaiveDate, now: DateTime<Utc>) -> bool {
        now >= self.instant(date)
    }
}

/// Date for a new assignment: `earliest`, unless an existing assignment
/// already occupies it or a later day, in which case the day after the
/// latest one. Keeps one unit per partnership per day.
pub fn next_assignment_date(earliest: NaiveDate, latest_existing: Option<NaiveDate>) -> NaiveDate {
    match latest_existing {
        Some(latest) if latest >= earliest => {
            latest.checked_add_days(Days::new(1)).unwrap_or(latest)
        }
        _ => earliest,
    }
}
