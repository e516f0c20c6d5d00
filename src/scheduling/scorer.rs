use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;

use super::slots::{BusyInterval, SLOT_GRANULARITY_MINUTES, TimeSlot};
use crate::models::{AutoScheduleSettings, EnergyLevel, Priority, Task};

const DEADLINE_WEIGHT: f64 = 3.0;
const PRIORITY_WEIGHT: f64 = 1.8;
const ENERGY_WEIGHT: f64 = 1.5;
const TIME_PREFERENCE_WEIGHT: f64 = 1.2;
const EARLINESS_WEIGHT: f64 = 1.0;
const PROJECT_WEIGHT: f64 = 0.5;

/// Score of a neutral factor: no information either way.
const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreFactors {
    pub deadline_proximity: f64,
    pub priority: f64,
    pub energy_match: f64,
    pub time_preference: f64,
    pub earliness: f64,
    pub project_proximity: f64,
}

impl ScoreFactors {
    /// Weighted mean in `[0, 1]`.
    pub fn total(&self) -> f64 {
        let weighted = [
            (self.deadline_proximity, DEADLINE_WEIGHT),
            (self.priority, PRIORITY_WEIGHT),
            (self.energy_match, ENERGY_WEIGHT),
            (self.time_preference, TIME_PREFERENCE_WEIGHT),
            (self.earliness, EARLINESS_WEIGHT),
            (self.project_proximity, PROJECT_WEIGHT),
        ];
        let weight_sum: f64 = weighted.iter().map(|(_, w)| w).sum();
        weighted.iter().map(|(f, w)| f * w).sum::<f64>() / weight_sum
    }
}

pub struct SlotScorer<'a> {
    settings: &'a AutoScheduleSettings,
    now: DateTime<Utc>,
}

impl<'a> SlotScorer<'a> {
    pub fn new(settings: &'a AutoScheduleSettings, now: DateTime<Utc>) -> Self {
        Self { settings, now }
    }

    pub fn score(&self, task: &Task, slot: &TimeSlot, busy: &[BusyInterval]) -> ScoreFactors {
        ScoreFactors {
            deadline_proximity: self.deadline_proximity(task.due_date, slot),
            priority: priority_factor(task.priority),
            energy_match: self.energy_match(task.energy_level, slot),
            time_preference: self.time_preference(task, slot),
            earliness: self.earliness(slot),
            project_proximity: self.project_proximity(task, slot, busy),
        }
    }

    fn deadline_proximity(&self, due: Option<DateTime<Utc>>, slot: &TimeSlot) -> f64 {
        let Some(due) = due else {
            return NEUTRAL;
        };
        let wait = minutes(slot.start - self.now).max(0.0);
        if due <= self.now {
            // Already overdue: every day of delay halves the score.
            return 1.0 / (1.0 + wait / (24.0 * 60.0));
        }
        if slot.end > due {
            return 0.0;
        }
        let window = minutes(due - self.now);
        (1.0 - wait / window).clamp(0.0, 1.0)
    }

    fn energy_match(&self, wanted: Option<EnergyLevel>, slot: &TimeSlot) -> f64 {
        let Some(wanted) = wanted else {
            return NEUTRAL;
        };
        let hour = slot.start.with_timezone(&self.settings.offset()).hour();
        match self.settings.energy_at(hour) {
            None => NEUTRAL,
            Some(level) => match energy_rank(level).abs_diff(energy_rank(wanted)) {
                0 => 1.0,
                1 => 0.5,
                _ => 0.0,
            },
        }
    }

    fn time_preference(&self, task: &Task, slot: &TimeSlot) -> f64 {
        let Some(preference) = task.preferred_time else {
            return NEUTRAL;
        };
        let hour = slot.start.with_timezone(&self.settings.offset()).hour();
        let (from, to) = preference.hours();
        if (from..to).contains(&hour) { 1.0 } else { 0.0 }
    }

    fn earliness(&self, slot: &TimeSlot) -> f64 {
        let horizon = f64::from(self.settings.horizon_days) * 24.0 * 60.0;
        let wait = minutes(slot.start - self.now).max(0.0);
        (1.0 - wait / horizon).clamp(0.0, 1.0)
    }

    fn project_proximity(&self, task: &Task, slot: &TimeSlot, busy: &[BusyInterval]) -> f64 {
        let Some(project_id) = task.project_id.as_deref() else {
            return NEUTRAL;
        };
        if !self.settings.group_by_project {
            return NEUTRAL;
        }
        let reach = Duration::minutes(
            SLOT_GRANULARITY_MINUTES + i64::from(self.settings.buffer_minutes),
        );
        let adjacent = busy.iter().any(|b| {
            b.project_id.as_deref() == Some(project_id)
                && slot.start <= b.end + reach
                && b.start <= slot.end + reach
        });
        if adjacent { 1.0 } else { 0.0 }
    }
}

pub fn priority_factor(priority: Option<Priority>) -> f64 {
    match priority {
        Some(Priority::High) => 1.0,
        Some(Priority::Medium) => 0.75,
        Some(Priority::Low) => 0.5,
        Some(Priority::None) | None => 0.25,
    }
}

fn energy_rank(level: EnergyLevel) -> u8 {
    match level {
        EnergyLevel::Low => 0,
        EnergyLevel::Medium => 1,
        EnergyLevel::High => 2,
    }
}

fn minutes(d: Duration) -> f64 {
    d.num_seconds() as f64 / 60.0
}
