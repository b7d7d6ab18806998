use std::fmt;

use chrono::{
    DateTime, Days, DurationRound, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat,
    TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::error::{HdrError, Result};

/// Half-open `[start, end)` span of absolute instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Option<String>,
    pub business_hours: Option<String>,
}

impl RollupWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(HdrError::Configuration(format!(
                "empty window {}..{}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(RollupWindow {
            start,
            end,
            timezone: None,
            business_hours: None,
        })
    }

    pub fn width(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for RollupWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

/// Result of resolving a window mode at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alignment {
    Ready(RollupWindow),
    /// The window has not closed yet (plus its safety offset).
    NotReady {
        window: RollupWindow,
        ready_at: DateTime<Utc>,
    },
}

/// A local time-of-day range in an IANA timezone, e.g. `09:00-17:00` in
/// `America/New_York`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    start: NaiveTime,
    end: NaiveTime,
    timezone: Tz,
    days_back: u32,
    offset: TimeDelta,
}

impl BusinessHours {
    pub fn parse(
        window_hours: &str,
        timezone: &str,
        days_back: u32,
        offset: TimeDelta,
    ) -> Result<Self> {
        let (start, end) = window_hours.split_once('-').ok_or_else(|| {
            HdrError::Configuration(format!(
                "window_hours must look like HH:MM-HH:MM, got {window_hours:?}"
            ))
        })?;
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| HdrError::Configuration(format!("unknown timezone {timezone:?}: {e}")))?;
        Ok(BusinessHours {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
            timezone,
            days_back,
            offset,
        })
    }

    /// `HH:MM-HH:MM`
    pub fn spec(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }

    fn window(&self, now: DateTime<Utc>) -> Result<RollupWindow> {
        let today = now.with_timezone(&self.timezone).date_naive();
        let date = today
            .checked_sub_days(Days::new(self.days_back.into()))
            .ok_or_else(|| {
                HdrError::Configuration(format!("days_back {} out of range", self.days_back))
            })?;

        let start = self.to_utc(date.and_time(self.start))?;
        let end_date = if self.end <= self.start {
            next_day(date)?
        } else {
            date
        };
        let end = self.to_utc(end_date.and_time(self.end))?;

        let mut window = RollupWindow::new(start, end)?;
        window.timezone = Some(self.timezone.name().to_string());
        window.business_hours = Some(self.spec());
        Ok(window)
    }

    /// Ambiguous local times take the earlier instant. Times inside a DST gap keep the
    /// offset in force before the transition, so 02:30 on a spring-forward night in
    /// New York reads as 03:30 EDT.
    fn to_utc(&self, local: NaiveDateTime) -> Result<DateTime<Utc>> {
        if let Some(t) = self.timezone.from_local_datetime(&local).earliest() {
            return Ok(t.with_timezone(&Utc));
        }
        for hours in 1..=48 {
            let Some(before) = local.checked_sub_signed(TimeDelta::hours(hours)) else {
                break;
            };
            let Some(t) = self.timezone.from_local_datetime(&before).earliest() else {
                continue;
            };
            let offset = TimeDelta::seconds(t.offset().fix().local_minus_utc().into());
            if let Some(utc) = local.checked_sub_signed(offset) {
                return Ok(utc.and_utc());
            }
            break;
        }
        Err(HdrError::Configuration(format!(
            "local time {local} does not exist in {}",
            self.timezone.name()
        )))
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(1))
        .ok_or_else(|| HdrError::Configuration(format!("no day after {date}")))
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| HdrError::Configuration(format!("invalid time of day {s:?}: {e}")))
}

/// Parse `30s`, `5m`, `1h`, `1d`; a bare integer is seconds.
pub fn parse_duration(s: &str) -> Result<TimeDelta> {
    let s = s.trim();
    let invalid = || HdrError::Configuration(format!("invalid duration {s:?}"));
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    let d = match unit {
        "s" => TimeDelta::try_seconds(n),
        "m" => TimeDelta::try_minutes(n),
        "h" => TimeDelta::try_hours(n),
        "d" => TimeDelta::try_days(n),
        _ => None,
    };
    d.ok_or_else(invalid)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowMode {
    /// `[now - width, now)`
    Trailing { width: TimeDelta },
    /// The last complete `width` boundary after backing off `ingest_delay`.
    Aligned {
        width: TimeDelta,
        ingest_delay: TimeDelta,
    },
    BusinessHours(BusinessHours),
}

impl WindowMode {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Alignment> {
        match self {
            WindowMode::Trailing { width } => {
                check_width(*width)?;
                Ok(Alignment::Ready(RollupWindow::new(shift_back(now, *width)?, now)?))
            }
            WindowMode::Aligned {
                width,
                ingest_delay,
            } => {
                check_width(*width)?;
                let boundary = shift_back(now, *ingest_delay)?
                    .duration_trunc(*width)
                    .map_err(|e| HdrError::Configuration(format!("cannot align to {width}: {e}")))?;
                Ok(Alignment::Ready(RollupWindow::new(
                    shift_back(boundary, *width)?,
                    boundary,
                )?))
            }
            WindowMode::BusinessHours(hours) => {
                let window = hours.window(now)?;
                let ready_at = window.end.checked_add_signed(hours.offset).ok_or_else(|| {
                    HdrError::Configuration(format!("offset {} out of range", hours.offset))
                })?;
                if now < ready_at {
                    Ok(Alignment::NotReady { window, ready_at })
                } else {
                    Ok(Alignment::Ready(window))
                }
            }
        }
    }
}

fn shift_back(t: DateTime<Utc>, by: TimeDelta) -> Result<DateTime<Utc>> {
    t.checked_sub_signed(by)
        .ok_or_else(|| HdrError::Configuration(format!("{t} - {by} is out of range")))
}

fn check_width(width: TimeDelta) -> Result<()> {
    if width <= TimeDelta::zero() {
        return Err(HdrError::Configuration(format!(
            "window width must be positive, got {width}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn ready(a: Alignment) -> RollupWindow {
        match a {
            Alignment::Ready(w) => w,
            other => panic!("expected ready window, got {other:?}"),
        }
    }

    fn new_york(hours: &str, days_back: u32) -> WindowMode {
        WindowMode::BusinessHours(
            BusinessHours::parse(hours, "America/New_York", days_back, TimeDelta::minutes(5))
                .unwrap(),
        )
    }

    #[test]
    fn trailing() {
        let now = utc("2025-10-16T12:07:30Z");
        let w = ready(
            WindowMode::Trailing {
                width: TimeDelta::minutes(5),
            }
            .resolve(now)
            .unwrap(),
        );
        assert_eq!(w.start, utc("2025-10-16T12:02:30Z"));
        assert_eq!(w.end, now);
        assert!(w.contains(w.start));
        assert!(!w.contains(w.end));
    }

    #[test]
    fn aligned_with_ingest_delay() {
        let now = utc("2025-10-16T12:07:30Z");
        let mode = |delay| WindowMode::Aligned {
            width: TimeDelta::minutes(5),
            ingest_delay: TimeDelta::seconds(delay),
        };
        let w = ready(mode(60).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-10-16T12:00:00Z"));
        assert_eq!(w.end, utc("2025-10-16T12:05:00Z"));

        let w = ready(mode(180).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-10-16T11:55:00Z"));
        assert_eq!(w.end, utc("2025-10-16T12:00:00Z"));

        let hourly = WindowMode::Aligned {
            width: TimeDelta::hours(1),
            ingest_delay: TimeDelta::zero(),
        };
        let w = ready(hourly.resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-10-16T11:00:00Z"));
        assert_eq!(w.end, utc("2025-10-16T12:00:00Z"));
    }

    #[test]
    fn non_positive_width_is_rejected() {
        let mode = WindowMode::Trailing {
            width: TimeDelta::zero(),
        };
        assert!(mode.resolve(Utc::now()).is_err());
    }

    #[test]
    fn business_hours_yesterday() {
        // 17:10 EDT on 2025-10-17
        let now = utc("2025-10-17T21:10:00Z");
        let w = ready(new_york("09:00-17:00", 1).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-10-16T13:00:00Z"));
        assert_eq!(w.end, utc("2025-10-16T21:00:00Z"));
        assert_eq!(w.timezone.as_deref(), Some("America/New_York"));
        assert_eq!(w.business_hours.as_deref(), Some("09:00-17:00"));
    }

    #[test]
    fn business_hours_readiness_guard() {
        let mode = new_york("09:00-17:00", 0);
        match mode.resolve(utc("2025-10-17T21:04:59Z")).unwrap() {
            Alignment::NotReady { window, ready_at } => {
                assert_eq!(window.end, utc("2025-10-17T21:00:00Z"));
                assert_eq!(ready_at, utc("2025-10-17T21:05:00Z"));
            }
            other => panic!("expected not ready, got {other:?}"),
        }
        let w = ready(mode.resolve(utc("2025-10-17T21:05:00Z")).unwrap());
        assert_eq!(w.start, utc("2025-10-17T13:00:00Z"));
    }

    #[test]
    fn business_hours_crossing_midnight() {
        let now = utc("2025-10-18T12:00:00Z");
        let w = ready(new_york("22:00-02:00", 1).resolve(now).unwrap());
        let tz: Tz = "America/New_York".parse().unwrap();
        let start_local = w.start.with_timezone(&tz);
        let end_local = w.end.with_timezone(&tz);
        assert_eq!(
            end_local.date_naive(),
            start_local.date_naive().checked_add_days(Days::new(1)).unwrap()
        );
        assert_eq!(w.start, utc("2025-10-18T02:00:00Z"));
        assert_eq!(w.end, utc("2025-10-18T06:00:00Z"));
    }

    #[test]
    fn business_hours_whole_day() {
        let now = utc("2025-10-18T12:00:00Z");
        let w = ready(new_york("00:00-00:00", 1).resolve(now).unwrap());
        assert_eq!(w.width(), TimeDelta::hours(24));
    }

    #[test]
    fn business_hours_dst_gap_keeps_standard_offset() {
        // 2025-03-09 02:00-03:00 does not exist in New York.
        let now = utc("2025-03-10T12:00:00Z");
        let w = ready(new_york("02:30-04:00", 1).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-03-09T07:30:00Z"));
        assert_eq!(w.end, utc("2025-03-09T08:00:00Z"));

        let w = ready(new_york("02:15-02:45", 1).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-03-09T07:15:00Z"));
        assert_eq!(w.end, utc("2025-03-09T07:45:00Z"));
    }

    #[test]
    fn business_hours_repeated_hour_takes_first() {
        // 2025-11-02 01:00-02:00 happens twice in New York; the first is EDT.
        let now = utc("2025-11-03T12:00:00Z");
        let w = ready(new_york("01:30-03:00", 1).resolve(now).unwrap());
        assert_eq!(w.start, utc("2025-11-02T05:30:00Z"));
        assert_eq!(w.end, utc("2025-11-02T08:00:00Z"));
    }

    #[test]
    fn bad_business_hours() {
        assert!(BusinessHours::parse("0900-1700", "UTC", 1, TimeDelta::zero()).is_err());
        assert!(BusinessHours::parse("09:00-25:00", "UTC", 1, TimeDelta::zero()).is_err());
        assert!(BusinessHours::parse("09:00-17:00", "Mars/Olympus", 1, TimeDelta::zero()).is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s").unwrap(), TimeDelta::seconds(30));
        assert_eq!(parse_duration("5m").unwrap(), TimeDelta::minutes(5));
        assert_eq!(parse_duration("1h").unwrap(), TimeDelta::hours(1));
        assert_eq!(parse_duration("1d").unwrap(), TimeDelta::days(1));
        assert_eq!(parse_duration("90").unwrap(), TimeDelta::seconds(90));
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("").is_err());
    }
}
