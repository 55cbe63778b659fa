//! Next-due arithmetic for the periodic scheduler.
//!
//! All functions are pure over a wall-clock `NaiveDateTime` so the runtime can
//! recompute the due time from scratch after every firing.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

/// Forward padding for `Minute` schedules, so a run that starts right at a
/// boundary does not immediately fire again.
pub const MINUTE_PADDING_SECS: i64 = 30;

/// Forward padding for `Hourly` schedules.
pub const HOURLY_PADDING_SECS: i64 = 3 * 60;

/// How a scheduler interprets its `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every `interval` seconds.
    Second,
    /// At wall-clock minutes that are a multiple of `interval`.
    Minute,
    /// At hours of the day that are a multiple of `interval`.
    Hourly,
    /// Once a day at hour `interval`.
    Daily,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Second => write!(f, "second"),
            ScheduleKind::Minute => write!(f, "minute"),
            ScheduleKind::Hourly => write!(f, "hourly"),
            ScheduleKind::Daily => write!(f, "daily"),
        }
    }
}

/// A schedule kind paired with its interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub kind: ScheduleKind,
    pub interval: u32,
}

impl Schedule {
    pub fn new(kind: ScheduleKind, interval: u32) -> Self {
        Self { kind, interval }
    }

    pub fn every_seconds(seconds: u32) -> Self {
        Self::new(ScheduleKind::Second, seconds)
    }

    pub fn every_minutes(minutes: u32) -> Self {
        Self::new(ScheduleKind::Minute, minutes)
    }

    pub fn every_hours(hours: u32) -> Self {
        Self::new(ScheduleKind::Hourly, hours)
    }

    pub fn daily_at(hour: u32) -> Self {
        Self::new(ScheduleKind::Daily, hour)
    }

    /// The next due time after `now`.
    pub fn next_due(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self.kind {
            ScheduleKind::Second => now + TimeDelta::seconds(i64::from(self.interval.max(1))),
            ScheduleKind::Minute => next_minute(now, self.interval.max(1)),
            ScheduleKind::Hourly => next_hour(now, self.interval.max(1)),
            ScheduleKind::Daily => next_daily(now, self.interval.min(23)),
        }
    }

    /// Delay from the local wall clock until the next due time.
    pub fn delay_from_now(&self) -> Duration {
        if self.kind == ScheduleKind::Second {
            // Independent of the wall clock so paused-time tests behave.
            return Duration::from_secs(u64::from(self.interval.max(1)));
        }
        let now = Local::now().naive_local();
        (self.next_due(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

fn next_minute(now: NaiveDateTime, interval: u32) -> NaiveDateTime {
    let padded = truncate_to_minute(now + TimeDelta::seconds(MINUTE_PADDING_SECS));
    let minute = padded.minute();
    padded + TimeDelta::minutes(i64::from(interval - minute % interval))
}

fn next_hour(now: NaiveDateTime, interval: u32) -> NaiveDateTime {
    let padded = truncate_to_hour(now + TimeDelta::seconds(HOURLY_PADDING_SECS));
    let hour = padded.hour();
    let mut next = padded + TimeDelta::hours(i64::from(interval - hour % interval));
    // Intervals that do not divide 24 restart from midnight the next day.
    if next.date() != padded.date() && next.hour() != 0 {
        next = next.date().and_time(NaiveTime::MIN);
    }
    next
}

fn next_daily(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date()
        .and_hms_opt(t.hour(), t.minute(), 0)
        .unwrap_or(t)
}

fn truncate_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), 0, 0).unwrap_or(t)
}
