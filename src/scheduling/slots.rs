use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::models::{AutoScheduleSettings, Task};

pub const SLOT_GRANULARITY_MINUTES: i64 = 30;
pub const DEFAULT_TASK_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

/// Time already taken on the calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub project_id: Option<String>,
}

impl BusyInterval {
    /// Overlap test with the interval widened by `buffer` on both sides.
    pub fn blocks(&self, slot: &TimeSlot, buffer: Duration) -> bool {
        slot.start < self.end + buffer && self.start - buffer < slot.end
    }
}

pub fn task_length(task: &Task) -> Duration {
    let minutes = task
        .duration
        .map(i64::from)
        .filter(|m| *m > 0)
        .unwrap_or(DEFAULT_TASK_MINUTES);
    Duration::minutes(minutes)
}

/// Enumerates free slots for a task within the working hours of the
/// scheduling horizon.
pub struct SlotFinder<'a> {
    settings: &'a AutoScheduleSettings,
    now: DateTime<Utc>,
}

impl<'a> SlotFinder<'a> {
    pub fn new(settings: &'a AutoScheduleSettings, now: DateTime<Utc>) -> Self {
        Self { settings, now }
    }

    pub fn free_slots(&self, task: &Task, busy: &[BusyInterval]) -> Vec<TimeSlot> {
        let length = task_length(task);
        let step = Duration::minutes(SLOT_GRANULARITY_MINUTES);
        let buffer = Duration::minutes(i64::from(self.settings.buffer_minutes));
        let earliest = [Some(self.now), task.start_date, task.postponed_until]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.now);

        let mut slots = Vec::new();
        for (day_start, day_end) in self.work_windows() {
            let mut start = day_start;
            while start + length <= day_end {
                let slot = TimeSlot::new(start, start + length);
                if start >= earliest && !busy.iter().any(|b| b.blocks(&slot, buffer)) {
                    slots.push(slot);
                }
                start += step;
            }
        }
        slots
    }

    /// Working-hour windows in UTC for each work day of the horizon.
    pub fn work_windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let offset = self.settings.offset();
        let today = self.now.with_timezone(&offset).date_naive();

        (0..i64::from(self.settings.horizon_days))
            .filter_map(|days| today.checked_add_signed(Duration::days(days)))
            .filter(|date| {
                self.settings
                    .work_days
                    .contains(&date.weekday().number_from_monday())
            })
            .filter_map(|date| {
                let start = local_hour(date, self.settings.work_hour_start)?;
                let end = local_hour(date, self.settings.work_hour_end)?;
                let start = offset.from_local_datetime(&start).single()?;
                let end = offset.from_local_datetime(&end).single()?;
                Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
            })
            .collect()
    }
}

/// `hour` may be 24, meaning midnight of the following day.
fn local_hour(date: NaiveDate, hour: u32) -> Option<NaiveDateTime> {
    if hour >= 24 {
        date.succ_opt()?.and_hms_opt(0, 0, 0)
    } else {
        date.and_hms_opt(hour, 0, 0)
    }
}
