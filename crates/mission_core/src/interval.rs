//! Interval collaborator contract and a calendar-based implementation.
//!
//! # Responsibility
//! - Resolve a point in time to the enclosing window of a named recurring
//!   interval (`daily`, `weekly`, ...).
//! - Report "not currently in any window" as a distinguished, non-fatal
//!   condition.
//!
//! # Invariants
//! - Windows are start-inclusive and end-exclusive.
//! - A missing interval key resolves to the unbounded window only when
//!   defaults are allowed.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use std::collections::BTreeMap;

/// One resolved window. `None` bounds are open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }

    /// Label stored on completion records.
    pub fn label(&self) -> String {
        const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
        match (self.start, self.end) {
            (None, None) => "all time".to_string(),
            (Some(start), None) => format!("{} ~", start.format(FORMAT)),
            (None, Some(end)) => format!("~ {}", end.format(FORMAT)),
            (Some(start), Some(end)) => {
                format!("{} ~ {}", start.format(FORMAT), end.format(FORMAT))
            }
        }
    }
}

/// Interval resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    /// The time lies outside every window of the interval. Never fatal.
    #[error("time is not in any interval window")]
    NotInInterval,
    #[error("unknown interval `{0}`")]
    UnknownInterval(String),
}

pub type IntervalResult<T> = Result<T, IntervalError>;

/// External interval collaborator.
pub trait IntervalResolver: Send + Sync {
    fn get_interval(
        &self,
        interval: Option<&str>,
        at: DateTime<Utc>,
        allow_defaults: bool,
    ) -> IntervalResult<Window>;
}

/// Resolves `at`, mapping "not in interval" to `None`.
pub fn resolve_window(
    resolver: &dyn IntervalResolver,
    interval: Option<&str>,
    at: DateTime<Utc>,
) -> IntervalResult<Option<Window>> {
    match resolver.get_interval(interval, at, true) {
        Ok(window) => Ok(Some(window)),
        Err(IntervalError::NotInInterval) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Steps back `sections` windows from the one containing `at`.
///
/// Returns `None` when a window along the way is unbounded at the start or
/// when no window encloses the probe time.
pub fn resolve_window_back(
    resolver: &dyn IntervalResolver,
    interval: Option<&str>,
    at: DateTime<Utc>,
    sections: u32,
) -> IntervalResult<Option<Window>> {
    let Some(mut window) = resolve_window(resolver, interval, at)? else {
        return Ok(None);
    };
    for _ in 0..sections {
        let Some(start) = window.start else {
            return Ok(None);
        };
        match resolve_window(resolver, interval, start - Duration::milliseconds(1))? {
            Some(previous) => window = previous,
            None => return Ok(None),
        }
    }
    Ok(Some(window))
}

/// Calendar intervals in a fixed UTC offset plus named explicit schedules.
#[derive(Debug, Clone)]
pub struct CalendarIntervals {
    offset: FixedOffset,
    schedules: BTreeMap<String, Vec<Window>>,
}

impl Default for CalendarIntervals {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CalendarIntervals {
    /// Creates calendar intervals evaluated at `utc_offset_secs` east of UTC.
    /// Out-of-range offsets fall back to UTC.
    pub fn new(utc_offset_secs: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_secs).unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            schedules: BTreeMap::new(),
        }
    }

    /// Registers a named interval made of explicit windows.
    pub fn with_schedule(mut self, key: impl Into<String>, windows: Vec<Window>) -> Self {
        self.schedules.insert(key.into(), windows);
        self
    }

    fn local_midnight(&self, date: NaiveDate) -> IntervalResult<DateTime<Utc>> {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or(IntervalError::NotInInterval)?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|value| value.with_timezone(&Utc))
            .ok_or(IntervalError::NotInInterval)
    }

    fn calendar_window(&self, key: &str, at: DateTime<Utc>) -> IntervalResult<Option<Window>> {
        let local = at.with_timezone(&self.offset).date_naive();
        let (start, end) = match key {
            "daily" => (local, local.succ_opt()),
            "weekly" => {
                let start = local - Duration::days(i64::from(local.weekday().num_days_from_monday()));
                (start, Some(start + Duration::days(7)))
            }
            "monthly" => {
                let start = local.with_day(1).ok_or(IntervalError::NotInInterval)?;
                let end = if start.month() == 12 {
                    NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
                };
                (start, end)
            }
            _ => return Ok(None),
        };
        let end = end.ok_or(IntervalError::NotInInterval)?;
        Ok(Some(Window::new(
            self.local_midnight(start)?,
            self.local_midnight(end)?,
        )))
    }
}

impl IntervalResolver for CalendarIntervals {
    fn get_interval(
        &self,
        interval: Option<&str>,
        at: DateTime<Utc>,
        allow_defaults: bool,
    ) -> IntervalResult<Window> {
        let key = match interval.map(str::trim) {
            None | Some("") => {
                return if allow_defaults {
                    Ok(Window::unbounded())
                } else {
                    Err(IntervalError::NotInInterval)
                };
            }
            Some(key) => key,
        };

        if key == "always" {
            return Ok(Window::unbounded());
        }
        if let Some(window) = self.calendar_window(key, at)? {
            return Ok(window);
        }
        let windows = self
            .schedules
            .get(key)
            .ok_or_else(|| IntervalError::UnknownInterval(key.to_string()))?;
        windows
            .iter()
            .find(|window| window.contains(at))
            .copied()
            .ok_or(IntervalError::NotInInterval)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        resolve_window, resolve_window_back, CalendarIntervals, IntervalError, IntervalResolver,
        Window,
    };
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn daily_window_is_start_inclusive_end_exclusive() {
        let intervals = CalendarIntervals::default();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 15, 30, 0).unwrap();
        let window = intervals.get_interval(Some("daily"), at, true).unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap()));
        assert_eq!(window.end, Some(Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).unwrap()));
        assert!(window.contains(window.start.unwrap()));
        assert!(!window.contains(window.end.unwrap()));
    }

    #[test]
    fn weekly_and_monthly_windows_align_to_calendar() {
        let intervals = CalendarIntervals::default();
        // 2026-12-31 is a Thursday.
        let at = Utc.with_ymd_and_hms(2026, 12, 31, 8, 0, 0).unwrap();
        let week = intervals.get_interval(Some("weekly"), at, true).unwrap();
        assert_eq!(week.start, Some(Utc.with_ymd_and_hms(2026, 12, 28, 0, 0, 0).unwrap()));
        let month = intervals.get_interval(Some("monthly"), at, true).unwrap();
        assert_eq!(month.end, Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn offset_shifts_day_boundaries() {
        let intervals = CalendarIntervals::new(8 * 3600);
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 17, 0, 0).unwrap();
        let window = intervals.get_interval(Some("daily"), at, true).unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2026, 3, 4, 16, 0, 0).unwrap()));
    }

    #[test]
    fn missing_key_depends_on_allow_defaults() {
        let intervals = CalendarIntervals::default();
        let now = Utc::now();
        assert_eq!(intervals.get_interval(None, now, true), Ok(Window::unbounded()));
        assert_eq!(
            intervals.get_interval(None, now, false),
            Err(IntervalError::NotInInterval)
        );
    }

    #[test]
    fn schedule_outside_windows_is_not_in_interval() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let intervals = CalendarIntervals::default()
            .with_schedule("launch", vec![Window::new(start, start + Duration::days(1))]);
        let inside = resolve_window(&intervals, Some("launch"), start).unwrap();
        assert!(inside.is_some());
        let outside = resolve_window(&intervals, Some("launch"), start + Duration::days(2)).unwrap();
        assert!(outside.is_none());
        assert!(matches!(
            intervals.get_interval(Some("nope"), start, true),
            Err(IntervalError::UnknownInterval(_))
        ));
    }

    #[test]
    fn stepping_back_sections_walks_previous_windows() {
        let intervals = CalendarIntervals::default();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let window = resolve_window_back(&intervals, Some("daily"), at, 2)
            .unwrap()
            .unwrap();
        assert_eq!(window.start, Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()));

        let unbounded = resolve_window_back(&intervals, None, at, 1).unwrap();
        assert!(unbounded.is_none());
    }
}
