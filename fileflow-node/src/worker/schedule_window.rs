//! Weekly processing window of a node.

use chrono::{Datelike, NaiveDateTime, Timelike};

/// Quarter hours in a week.
pub const SLOTS_PER_WEEK: usize = 7 * 24 * 4;

/// A node's weekly allow/deny bitstring, one character per quarter hour
/// starting Sunday 00:00. `'0'` denies; any other character allows.
///
/// An empty or malformed string allows processing at all times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow<'a> {
    bits: &'a [u8],
}

impl<'a> ScheduleWindow<'a> {
    pub fn new(schedule: &'a str) -> Self {
        Self {
            bits: schedule.as_bytes(),
        }
    }

    /// Index of the quarter hour containing `at`.
    pub fn slot_index(at: NaiveDateTime) -> usize {
        let day = at.weekday().num_days_from_sunday() as usize;
        day * 96 + at.hour() as usize * 4 + at.minute() as usize / 15
    }

    pub fn allows(&self, at: NaiveDateTime) -> bool {
        if self.bits.len() != SLOTS_PER_WEEK {
            return true;
        }
        self.bits[Self::slot_index(at)] != b'0'
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sunday(h: u32, m: u32) -> NaiveDateTime {
        // 2024-03-10 is a Sunday.
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn monday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_schedule_allows() {
        assert!(ScheduleWindow::new("").allows(sunday(3, 0)));
    }

    #[test]
    fn test_malformed_schedule_allows() {
        assert!(ScheduleWindow::new("0000").allows(sunday(0, 0)));
    }

    #[test]
    fn test_slot_index() {
        assert_eq!(ScheduleWindow::slot_index(sunday(0, 0)), 0);
        assert_eq!(ScheduleWindow::slot_index(sunday(0, 14)), 0);
        assert_eq!(ScheduleWindow::slot_index(sunday(1, 15)), 5);
        assert_eq!(ScheduleWindow::slot_index(monday(0, 0)), 96);
    }

    #[test]
    fn test_denied_slot() {
        let mut bits = vec![b'1'; SLOTS_PER_WEEK];
        bits[96 + 9 * 4] = b'0'; // Monday 09:00-09:15
        let schedule = String::from_utf8(bits).unwrap();
        let window = ScheduleWindow::new(&schedule);

        assert!(!window.allows(monday(9, 5)));
        assert!(window.allows(monday(9, 15)));
        assert!(window.allows(sunday(9, 5)));
    }
}
