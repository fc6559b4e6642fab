//! Business-hours time arithmetic for SLA metrics.
//!
//! All calculations run in the configured timezone; inputs and outputs are
//! UTC. The working window is half-open: a timestamp exactly at the start
//! boundary is inside business hours, one exactly at the end boundary is not.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::{BusinessHoursSettings, ConfigError};

/// Upper bound on the deadline walk in `add_business_hours`. With at least
/// one business day per week this is never the limiting factor.
const MAX_DEADLINE_SCAN_DAYS: usize = 3_650;

/// Validated business-hours calculator.
///
/// Construction rejects malformed settings (unparsable times, unknown
/// timezone, empty day set, inverted window) so calculation itself has no
/// error path.
#[derive(Debug, Clone)]
pub struct BusinessHours {
    /// Indexed by `Weekday::num_days_from_monday()`.
    days: [bool; 7],
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
}

impl BusinessHours {
    pub fn new(settings: &BusinessHoursSettings) -> Result<Self, ConfigError> {
        let start = parse_time(&settings.start)?;
        let end = parse_time(&settings.end)?;
        if start >= end {
            return Err(ConfigError::EmptyBusinessWindow);
        }
        let tz: Tz = settings
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(settings.timezone.clone()))?;
        let mut days = [false; 7];
        for &d in &settings.days {
            if !(1..=7).contains(&d) {
                return Err(ConfigError::InvalidDay(d));
            }
            days[(d - 1) as usize] = true;
        }
        if !days.iter().any(|&b| b) {
            return Err(ConfigError::EmptyBusinessDays);
        }
        Ok(Self { days, start, end, tz })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn is_business_day(&self, weekday: Weekday) -> bool {
        self.days[weekday.num_days_from_monday() as usize]
    }

    /// The business window for a calendar day, in the configured timezone.
    /// `None` for non-business days or when a DST gap swallows the boundary.
    fn day_window(&self, day: chrono::NaiveDate) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
        if !self.is_business_day(day.weekday()) {
            return None;
        }
        let start = self.tz.from_local_datetime(&day.and_time(self.start)).earliest()?;
        let end = self.tz.from_local_datetime(&day.and_time(self.end)).earliest()?;
        Some((start, end))
    }

    /// Business hours elapsed between two timestamps, rounded to 2 decimals.
    ///
    /// Walks day by day from `start`'s calendar day to `end`'s, clipping each
    /// business window to the interval and accumulating whole minutes.
    /// `start >= end` yields 0.
    pub fn calculate(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        if start >= end {
            return 0.0;
        }

        let start_local = start.with_timezone(&self.tz);
        let end_local = end.with_timezone(&self.tz);

        let mut total_minutes = 0i64;
        let mut day = start_local.date_naive();
        let last_day = end_local.date_naive();

        while day <= last_day {
            if let Some((window_start, window_end)) = self.day_window(day) {
                let clip_start = std::cmp::max(window_start, start_local);
                let clip_end = std::cmp::min(window_end, end_local);
                if clip_end > clip_start {
                    total_minutes += clip_end.signed_duration_since(clip_start).num_minutes();
                }
            }
            day = match day.succ_opt() {
                Some(d) => d,
                None => break,
            };
        }

        round2(total_minutes as f64 / 60.0)
    }

    /// Whether `t` falls inside business hours. Half-open: true at the start
    /// boundary, false at the end boundary.
    pub fn is_business_hours(&self, t: DateTime<Utc>) -> bool {
        let local = t.with_timezone(&self.tz);
        if !self.is_business_day(local.weekday()) {
            return false;
        }
        let time = local.time();
        time >= self.start && time < self.end
    }

    /// The next moment the business-hours clock is running at or after `from`.
    ///
    /// `from` itself when already inside business hours; today's start
    /// boundary when today is a business day and `from` precedes it; else the
    /// next business day's start. The scan is capped at 7 days; with a
    /// non-empty day set (enforced at construction) it always hits.
    pub fn next_start(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_business_hours(from) {
            return from;
        }

        let local = from.with_timezone(&self.tz);
        for offset in 0..7i64 {
            let day = local.date_naive() + Duration::days(offset);
            let Some((window_start, _)) = self.day_window(day) else {
                continue;
            };
            if offset == 0 {
                if local < window_start {
                    return window_start.with_timezone(&Utc);
                }
                // Today's window already started; `from` is past the end.
                continue;
            }
            return window_start.with_timezone(&Utc);
        }

        log::warn!("No business day found within 7 days of {from}");
        from
    }

    /// The moment at which `hours` business hours have elapsed after `from`.
    /// Used to derive SLA due timestamps.
    pub fn add_business_hours(&self, from: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
        let mut remaining = (hours * 60.0).round() as i64;
        let mut cursor = self.next_start(from);
        if remaining <= 0 {
            return cursor;
        }

        for _ in 0..MAX_DEADLINE_SCAN_DAYS {
            let local = cursor.with_timezone(&self.tz);
            let Some((_, window_end)) = self.day_window(local.date_naive()) else {
                // DST gap on the boundary; skip to the next window.
                cursor = self.next_start(cursor + Duration::days(1));
                continue;
            };
            let available = window_end.signed_duration_since(local).num_minutes();
            if remaining <= available {
                return (local + Duration::minutes(remaining)).with_timezone(&Utc);
            }
            remaining -= available;
            cursor = self.next_start(window_end.with_timezone(&Utc));
        }

        log::warn!("Deadline walk exceeded {MAX_DEADLINE_SCAN_DAYS} days from {from}");
        cursor
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ConfigError::InvalidTime(s.to_string()))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_hours() -> BusinessHours {
        BusinessHours::new(&BusinessHoursSettings::default()).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    // 2026-02-02 is a Monday.

    #[test]
    fn test_start_after_end_is_zero() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 2, 12, 0), utc(2026, 2, 2, 12, 0)), 0.0);
        assert_eq!(bh.calculate(utc(2026, 2, 2, 14, 0), utc(2026, 2, 2, 12, 0)), 0.0);
    }

    #[test]
    fn test_full_business_day() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 2, 9, 0), utc(2026, 2, 2, 18, 0)), 9.0);
    }

    #[test]
    fn test_intra_day_overlap() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 2, 10, 0), utc(2026, 2, 2, 12, 30)), 2.5);
    }

    #[test]
    fn test_start_before_window_clips() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 2, 6, 0), utc(2026, 2, 2, 10, 0)), 1.0);
    }

    #[test]
    fn test_weekend_span() {
        // Fri 17:00 -> Mon 10:00: 1h Friday + 1h Monday, Sat/Sun contribute zero.
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 6, 17, 0), utc(2026, 2, 9, 10, 0)), 2.0);
    }

    #[test]
    fn test_weekend_only_is_zero() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 7, 10, 0), utc(2026, 2, 8, 17, 0)), 0.0);
    }

    #[test]
    fn test_rounding_two_decimals() {
        let bh = default_hours();
        assert_eq!(bh.calculate(utc(2026, 2, 2, 9, 0), utc(2026, 2, 2, 9, 20)), 0.33);
    }

    #[test]
    fn test_boundary_half_open() {
        let bh = default_hours();
        assert!(bh.is_business_hours(utc(2026, 2, 2, 9, 0)));
        assert!(bh.is_business_hours(utc(2026, 2, 2, 17, 59)));
        assert!(!bh.is_business_hours(utc(2026, 2, 2, 18, 0)));
        assert!(!bh.is_business_hours(utc(2026, 2, 2, 8, 59)));
        // Saturday noon
        assert!(!bh.is_business_hours(utc(2026, 2, 7, 12, 0)));
    }

    #[test]
    fn test_next_start_inside_hours_unchanged() {
        let bh = default_hours();
        let t = utc(2026, 2, 2, 10, 0);
        assert_eq!(bh.next_start(t), t);
    }

    #[test]
    fn test_next_start_before_todays_window() {
        let bh = default_hours();
        assert_eq!(bh.next_start(utc(2026, 2, 2, 7, 0)), utc(2026, 2, 2, 9, 0));
    }

    #[test]
    fn test_next_start_after_hours_and_weekend() {
        let bh = default_hours();
        // Friday evening and Saturday both land on Monday 09:00.
        assert_eq!(bh.next_start(utc(2026, 2, 6, 19, 0)), utc(2026, 2, 9, 9, 0));
        assert_eq!(bh.next_start(utc(2026, 2, 7, 12, 0)), utc(2026, 2, 9, 9, 0));
    }

    #[test]
    fn test_timezone_aware_calculation() {
        let settings = BusinessHoursSettings {
            timezone: "America/New_York".to_string(),
            ..Default::default()
        };
        let bh = BusinessHours::new(&settings).unwrap();
        // Mon 2026-02-02 14:00 UTC = 09:00 EST, 23:00 UTC = 18:00 EST.
        assert_eq!(bh.calculate(utc(2026, 2, 2, 14, 0), utc(2026, 2, 2, 23, 0)), 9.0);
        assert!(bh.is_business_hours(utc(2026, 2, 2, 14, 0)));
        assert!(!bh.is_business_hours(utc(2026, 2, 2, 13, 59)));
    }

    #[test]
    fn test_add_business_hours_across_weekend() {
        let bh = default_hours();
        // Fri 17:00 + 2h business = Mon 10:00.
        assert_eq!(
            bh.add_business_hours(utc(2026, 2, 6, 17, 0), 2.0),
            utc(2026, 2, 9, 10, 0)
        );
    }

    #[test]
    fn test_add_zero_hours_is_next_start() {
        let bh = default_hours();
        assert_eq!(
            bh.add_business_hours(utc(2026, 2, 7, 12, 0), 0.0),
            utc(2026, 2, 9, 9, 0)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut s = BusinessHoursSettings::default();
        s.start = "9 o'clock".to_string();
        assert!(BusinessHours::new(&s).is_err());

        let mut s = BusinessHoursSettings::default();
        s.days = vec![];
        assert!(matches!(
            BusinessHours::new(&s),
            Err(ConfigError::EmptyBusinessDays)
        ));

        let mut s = BusinessHoursSettings::default();
        s.days = vec![0, 8];
        assert!(BusinessHours::new(&s).is_err());

        let mut s = BusinessHoursSettings::default();
        s.start = "18:00".to_string();
        s.end = "09:00".to_string();
        assert!(matches!(
            BusinessHours::new(&s),
            Err(ConfigError::EmptyBusinessWindow)
        ));

        let mut s = BusinessHoursSettings::default();
        s.timezone = "Mars/Olympus".to_string();
        assert!(matches!(
            BusinessHours::new(&s),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
