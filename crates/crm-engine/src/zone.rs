//! Time zone used for calendar decisions

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Utc};
use crm_automation::Schedule;

/// Time zone whose calendar days and hours drive schedules and birthdays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleZone {
    /// The host's local time zone
    #[default]
    Local,

    /// A fixed offset from UTC
    Fixed(FixedOffset),
}

impl ScheduleZone {
    /// Zone for an offset in minutes east of UTC; `None` if out of range
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::Fixed)
    }

    /// Calendar date of `now` in this zone
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => now.with_timezone(&Local).date_naive(),
            Self::Fixed(offset) => now.with_timezone(offset).date_naive(),
        }
    }

    /// Evaluate the schedule gate with `now` expressed in this zone
    pub fn should_fire(
        &self,
        schedule: &Schedule,
        last_executed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match self {
            Self::Local => schedule.should_fire_now(last_executed_at, &now.with_timezone(&Local)),
            Self::Fixed(offset) => {
                schedule.should_fire_now(last_executed_at, &now.with_timezone(offset))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_zone_today() {
        let zone = ScheduleZone::from_offset_minutes(-300).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        assert_eq!(zone.today(now), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(ScheduleZone::from_offset_minutes(24 * 60).is_none());
    }

    #[test]
    fn test_fixed_zone_gate() {
        let zone = ScheduleZone::from_offset_minutes(120).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 7, 30, 0).unwrap();
        assert!(zone.should_fire(&Schedule::daily(9), None, now));
        assert!(!ScheduleZone::Fixed(FixedOffset::east_opt(0).unwrap())
            .should_fire(&Schedule::daily(9), None, now));
    }
}
