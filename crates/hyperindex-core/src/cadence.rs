//! Run cadence
//!
//! A cadence answers one question: given the current time, when is the next
//! run due? Two shapes are supported, a fixed interval aligned to the Unix
//! epoch and a set of hours of the day (UTC). Operators pick between a slow
//! `standard` tier and a `fast` tier through configuration.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CadenceError;

const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Longest accepted interval, one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// Every `every_secs` seconds, on multiples of the interval since the epoch
    Interval { every_secs: u64 },

    /// At minute zero of each listed hour, every day
    DailyHours { hours: Vec<u32> },
}

impl Cadence {
    /// Four runs a day, at 00:00, 06:00, 12:00 and 18:00 UTC.
    pub fn standard() -> Self {
        Cadence::DailyHours {
            hours: vec![0, 6, 12, 18],
        }
    }

    /// Every five minutes.
    pub fn fast() -> Self {
        Cadence::Interval { every_secs: 300 }
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        match self {
            Cadence::Interval { every_secs } if *every_secs == 0 => Err(CadenceError::ZeroInterval),
            Cadence::Interval { every_secs } if *every_secs > MAX_INTERVAL_SECS => {
                Err(CadenceError::IntervalTooLong(*every_secs))
            }
            Cadence::Interval { .. } => Ok(()),
            Cadence::DailyHours { hours } => {
                if hours.is_empty() {
                    return Err(CadenceError::NoHours);
                }
                match hours.iter().find(|h| **h > 23) {
                    Some(h) => Err(CadenceError::InvalidHour(*h)),
                    None => Ok(()),
                }
            }
        }
    }

    /// First scheduled instant strictly after `t`.
    pub fn next_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Interval { every_secs } => {
                let every = interval_secs(*every_secs);
                let slot = t.timestamp().div_euclid(every) + 1;
                from_timestamp(slot * every)
                    .or_else(|| t.checked_add_signed(Duration::seconds(every)))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Cadence::DailyHours { hours } => {
                let hours = sorted_hours(hours);
                let today = t.date_naive();
                hours
                    .iter()
                    .filter_map(|h| at_hour(today, *h))
                    .find(|run| *run > t)
                    .or_else(|| {
                        let tomorrow = today.succ_opt()?;
                        at_hour(tomorrow, *hours.first()?)
                    })
                    .or_else(|| t.checked_add_signed(Duration::days(1)))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
        }
    }

    /// Latest scheduled instant at or before `t`.
    pub fn previous_at_or_before(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Interval { every_secs } => {
                let every = interval_secs(*every_secs);
                let slot = t.timestamp().div_euclid(every);
                from_timestamp(slot * every).unwrap_or(t)
            }
            Cadence::DailyHours { hours } => {
                let hours = sorted_hours(hours);
                let today = t.date_naive();
                hours
                    .iter()
                    .rev()
                    .filter_map(|h| at_hour(today, *h))
                    .find(|run| *run <= t)
                    .or_else(|| {
                        let yesterday = today.pred_opt()?;
                        at_hour(yesterday, *hours.last()?)
                    })
                    .or_else(|| t.checked_sub_signed(Duration::days(1)))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
        }
    }

    /// Longest gap between two consecutive runs.
    pub fn period(&self) -> Duration {
        match self {
            Cadence::Interval { every_secs } => Duration::seconds(interval_secs(*every_secs)),
            Cadence::DailyHours { hours } => {
                let hours = sorted_hours(hours);
                let (Some(first), Some(last)) = (hours.first(), hours.last()) else {
                    return Duration::days(1);
                };
                let wrap = i64::from(24 - last + first);
                let widest = hours
                    .windows(2)
                    .map(|w| i64::from(w[1] - w[0]))
                    .chain(std::iter::once(wrap))
                    .max()
                    .unwrap_or(24);
                Duration::hours(widest)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Cadence::Interval { every_secs } if every_secs % 3600 == 0 => {
                format!("every {}h", every_secs / 3600)
            }
            Cadence::Interval { every_secs } if every_secs % 60 == 0 => {
                format!("every {}m", every_secs / 60)
            }
            Cadence::Interval { every_secs } => format!("every {}s", every_secs),
            Cadence::DailyHours { hours } => {
                let hours: Vec<String> = sorted_hours(hours)
                    .iter()
                    .map(|h| format!("{:02}:00", h))
                    .collect();
                format!("daily at {} UTC", hours.join(", "))
            }
        }
    }
}

/// Named cadence presets selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Standard,
    Fast,
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" | "slow" | "default" => Ok(Tier::Standard),
            "fast" | "paid" => Ok(Tier::Fast),
            other => Err(format!("Unknown tier '{}'. Valid: standard, fast", other)),
        }
    }
}

/// The `[schedule]` configuration section shared by the generator and monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub tier: Tier,

    #[serde(default = "Cadence::standard")]
    pub standard: Cadence,

    #[serde(default = "Cadence::fast")]
    pub fast: Cadence,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tier: Tier::default(),
            standard: Cadence::standard(),
            fast: Cadence::fast(),
        }
    }
}

impl ScheduleConfig {
    /// Cadence of the selected tier.
    pub fn active(&self) -> &Cadence {
        match self.tier {
            Tier::Standard => &self.standard,
            Tier::Fast => &self.fast,
        }
    }
}

fn interval_secs(every_secs: u64) -> i64 {
    i64::try_from(every_secs.clamp(1, MAX_INTERVAL_SECS)).unwrap_or(SECONDS_PER_DAY)
}

fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn at_hour(date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn sorted_hours(hours: &[u32]) -> Vec<u32> {
    let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
    hours.sort_unstable();
    hours.dedup();
    hours
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 18, h, m, s).unwrap()
    }

    #[test]
    fn test_interval_next_and_previous() {
        let cadence = Cadence::fast();
        assert_eq!(cadence.next_after(at(12, 3, 10)), at(12, 5, 0));
        assert_eq!(cadence.next_after(at(12, 5, 0)), at(12, 10, 0));
        assert_eq!(cadence.previous_at_or_before(at(12, 3, 10)), at(12, 0, 0));
        assert_eq!(cadence.previous_at_or_before(at(12, 5, 0)), at(12, 5, 0));
    }

    #[test]
    fn test_daily_hours_next() {
        let cadence = Cadence::standard();
        assert_eq!(cadence.next_after(at(5, 59, 59)), at(6, 0, 0));
        assert_eq!(cadence.next_after(at(6, 0, 0)), at(12, 0, 0));
        assert_eq!(
            cadence.next_after(at(18, 30, 0)),
            Utc.with_ymd_and_hms(2026, 2, 19, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_hours_previous() {
        let cadence = Cadence::DailyHours { hours: vec![18, 6] };
        assert_eq!(cadence.previous_at_or_before(at(7, 0, 0)), at(6, 0, 0));
        assert_eq!(
            cadence.previous_at_or_before(at(5, 0, 0)),
            Utc.with_ymd_and_hms(2026, 2, 17, 18, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period() {
        assert_eq!(Cadence::standard().period(), Duration::hours(6));
        assert_eq!(Cadence::fast().period(), Duration::minutes(5));
        assert_eq!(
            Cadence::DailyHours { hours: vec![9] }.period(),
            Duration::hours(24)
        );
        assert_eq!(
            Cadence::DailyHours { hours: vec![1, 3, 20] }.period(),
            Duration::hours(17)
        );
    }

    #[test]
    fn test_validate() {
        assert!(Cadence::standard().validate().is_ok());
        assert_eq!(
            Cadence::Interval { every_secs: 0 }.validate(),
            Err(CadenceError::ZeroInterval)
        );
        assert_eq!(
            Cadence::DailyHours { hours: vec![] }.validate(),
            Err(CadenceError::NoHours)
        );
        assert_eq!(
            Cadence::DailyHours { hours: vec![3, 24] }.validate(),
            Err(CadenceError::InvalidHour(24))
        );
        assert_eq!(
            Cadence::Interval { every_secs: 10_000_000_000_000 }.validate(),
            Err(CadenceError::IntervalTooLong(10_000_000_000_000))
        );
        assert!(Cadence::Interval { every_secs: MAX_INTERVAL_SECS }.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_times_saturate() {
        let huge = Cadence::Interval { every_secs: 10_000_000_000_000 };
        let next = huge.next_after(at(12, 0, 0));
        assert!(next > at(12, 0, 0));
        assert!(next - at(12, 0, 0) <= Duration::days(366));

        let end = DateTime::<Utc>::MAX_UTC;
        assert_eq!(Cadence::fast().next_after(end), end);
        assert_eq!(Cadence::standard().next_after(end), end);
        let start = DateTime::<Utc>::MIN_UTC;
        assert!(Cadence::standard().previous_at_or_before(start) <= start);
    }

    #[test]
    fn test_schedule_config_selects_tier() {
        let mut schedule = ScheduleConfig::default();
        assert_eq!(schedule.active(), &Cadence::standard());
        schedule.tier = Tier::Fast;
        assert_eq!(schedule.active(), &Cadence::fast());
        assert_eq!("FAST".parse::<Tier>(), Ok(Tier::Fast));
        assert!("hourly".parse::<Tier>().is_err());
    }

    #[test]
    fn test_cadence_deserializes_from_tagged_table() {
        let cadence: Cadence =
            serde_json::from_str(r#"{"kind": "interval", "every_secs": 900}"#).unwrap();
        assert_eq!(cadence, Cadence::Interval { every_secs: 900 });
        assert_eq!(cadence.describe(), "every 15m");
        assert_eq!(Cadence::standard().describe(), "daily at 00:00, 06:00, 12:00, 18:00 UTC");
    }
}
