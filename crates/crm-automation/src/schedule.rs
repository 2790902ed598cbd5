//! Recurrence schedules
//!
//! The schedule gate decides whether the poller should fire a rule now,
//! given when it last ran. Calendar days and hours are taken in the time
//! zone carried by `now`.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rule::{RuleError, RuleResult};

/// Recurrence definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "schedule_type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire on every poll
    #[default]
    Immediate,

    /// Fire at most once per hour
    Hourly,

    /// Fire once a day at `hour`
    Daily {
        #[serde(default = "default_hour")]
        hour: u32,
    },

    /// Fire once a week on `day` (0 = Sunday) at `hour`
    Weekly {
        #[serde(default = "default_weekday")]
        day: u32,
        #[serde(default = "default_hour")]
        hour: u32,
    },

    /// Fire once a month on `date` at `hour`
    Monthly {
        #[serde(default = "default_date")]
        date: u32,
        #[serde(default = "default_hour")]
        hour: u32,
    },
}

fn default_hour() -> u32 {
    9
}

fn default_weekday() -> u32 {
    1
}

fn default_date() -> u32 {
    1
}

impl Schedule {
    /// Create a daily schedule
    pub fn daily(hour: u32) -> Self {
        Self::Daily { hour }
    }

    /// Create a weekly schedule
    pub fn weekly(day: u32, hour: u32) -> Self {
        Self::Weekly { day, hour }
    }

    /// Create a monthly schedule
    pub fn monthly(date: u32, hour: u32) -> Self {
        Self::Monthly { date, hour }
    }

    /// Schedule type name as stored
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Hourly => "hourly",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
        }
    }

    /// Check configured fields are in range
    pub fn validate(&self) -> RuleResult<()> {
        let check_hour = |hour: u32| {
            if hour > 23 {
                Err(RuleError::Validation(format!(
                    "schedule hour must be 0-23, got {}",
                    hour
                )))
            } else {
                Ok(())
            }
        };

        match *self {
            Self::Immediate | Self::Hourly => Ok(()),
            Self::Daily { hour } => check_hour(hour),
            Self::Weekly { day, hour } => {
                if day > 6 {
                    return Err(RuleError::Validation(format!(
                        "weekly schedule day must be 0-6, got {}",
                        day
                    )));
                }
                check_hour(hour)
            }
            Self::Monthly { date, hour } => {
                if !(1..=31).contains(&date) {
                    return Err(RuleError::Validation(format!(
                        "monthly schedule date must be 1-31, got {}",
                        date
                    )));
                }
                check_hour(hour)
            }
        }
    }

    /// Decide whether a rule on this schedule fires at `now`
    pub fn should_fire_now<Tz: TimeZone>(
        &self,
        last_executed_at: Option<DateTime<Utc>>,
        now: &DateTime<Tz>,
    ) -> bool {
        let other_day = || match last_executed_at {
            None => true,
            Some(last) => last.with_timezone(&now.timezone()).date_naive() != now.date_naive(),
        };

        match *self {
            Self::Immediate => true,
            Self::Hourly => match last_executed_at {
                None => true,
                Some(last) => now.with_timezone(&Utc) - last >= Duration::hours(1),
            },
            Self::Daily { hour } => now.hour() == hour && other_day(),
            Self::Weekly { day, hour } => {
                now.weekday().num_days_from_sunday() == day && now.hour() == hour && other_day()
            }
            Self::Monthly { date, hour } => now.day() == date && now.hour() == hour && other_day(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let schedule: Schedule = serde_json::from_str(r#"{"schedule_type": "weekly"}"#).unwrap();
        assert_eq!(schedule, Schedule::weekly(1, 9));
        let schedule: Schedule = serde_json::from_str(r#"{"schedule_type": "monthly"}"#).unwrap();
        assert_eq!(schedule, Schedule::monthly(1, 9));
        assert!(serde_json::from_str::<Schedule>(r#"{"schedule_type": "yearly"}"#).is_err());
    }

    #[test]
    fn test_validate_ranges() {
        assert!(Schedule::daily(24).validate().is_err());
        assert!(Schedule::weekly(7, 9).validate().is_err());
        assert!(Schedule::monthly(0, 9).validate().is_err());
        assert!(Schedule::monthly(31, 23).validate().is_ok());
    }

    #[test]
    fn test_immediate_always_fires() {
        let now = at(2024, 1, 1, 3, 0);
        assert!(Schedule::Immediate.should_fire_now(Some(now), &now));
    }

    #[test]
    fn test_hourly() {
        let now = at(2024, 1, 1, 10, 0);
        assert!(Schedule::Hourly.should_fire_now(None, &now));
        assert!(!Schedule::Hourly.should_fire_now(Some(at(2024, 1, 1, 9, 30)), &now));
        assert!(Schedule::Hourly.should_fire_now(Some(at(2024, 1, 1, 9, 0)), &now));
    }

    #[test]
    fn test_daily_same_day_never_fires() {
        let schedule = Schedule::daily(9);
        let last = at(2024, 3, 5, 9, 2);
        for hour in 0..24 {
            assert!(!schedule.should_fire_now(Some(last), &at(2024, 3, 5, hour, 30)));
        }
    }

    #[test]
    fn test_daily_prior_day_matching_hour() {
        let schedule = Schedule::daily(9);
        let last = at(2024, 3, 4, 9, 2);
        assert!(schedule.should_fire_now(Some(last), &at(2024, 3, 5, 9, 5)));
        assert!(!schedule.should_fire_now(Some(last), &at(2024, 3, 5, 10, 5)));
    }

    #[test]
    fn test_daily_first_run_then_recorded() {
        let schedule = Schedule::daily(9);
        let now = at(2024, 3, 5, 9, 5);
        assert!(schedule.should_fire_now(None, &now));
        assert!(!schedule.should_fire_now(Some(now), &now));
    }

    #[test]
    fn test_daily_uses_zone_of_now() {
        let schedule = Schedule::daily(9);
        let offset = FixedOffset::east_opt(5 * 3600).unwrap();
        // 04:10 UTC is 09:10 at +05:00
        let now = at(2024, 3, 5, 4, 10).with_timezone(&offset);
        assert!(schedule.should_fire_now(None, &now));
        // 2024-03-04 20:00 UTC is already 2024-03-05 at +05:00
        assert!(!schedule.should_fire_now(Some(at(2024, 3, 4, 20, 0)), &now));
    }

    #[test]
    fn test_weekly() {
        let schedule = Schedule::weekly(1, 9);
        // 2024-03-04 is a Monday
        assert!(schedule.should_fire_now(None, &at(2024, 3, 4, 9, 0)));
        assert!(!schedule.should_fire_now(None, &at(2024, 3, 5, 9, 0)));
        assert!(!schedule.should_fire_now(Some(at(2024, 3, 4, 9, 0)), &at(2024, 3, 4, 9, 45)));
        assert!(schedule.should_fire_now(Some(at(2024, 2, 26, 9, 0)), &at(2024, 3, 4, 9, 1)));
    }

    #[test]
    fn test_monthly() {
        let schedule = Schedule::monthly(15, 8);
        assert!(schedule.should_fire_now(Some(at(2024, 2, 15, 8, 0)), &at(2024, 3, 15, 8, 0)));
        assert!(!schedule.should_fire_now(None, &at(2024, 3, 14, 8, 0)));
        assert!(!schedule.should_fire_now(None, &at(2024, 3, 15, 9, 0)));
    }
}
