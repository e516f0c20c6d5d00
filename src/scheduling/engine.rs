use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::scorer::SlotScorer;
use super::slots::{BusyInterval, SlotFinder, TimeSlot};
use crate::models::{AutoScheduleSettings, CalendarEvent, Priority, Task};

/// Outcome for one auto-scheduled task. `slot` is `None` when nothing fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub task_id: String,
    pub slot: Option<TimeSlot>,
    pub score: Option<f64>,
}

/// Tasks the planner is free to move.
pub fn is_candidate(task: &Task) -> bool {
    task.is_auto_scheduled && !task.schedule_locked && task.status.is_open()
}

/// Places every candidate task on the calendar, highest priority first.
///
/// Pure: the caller persists the returned placements.
pub fn plan(
    tasks: &[Task],
    events: &[CalendarEvent],
    settings: &AutoScheduleSettings,
    now: DateTime<Utc>,
) -> Vec<Placement> {
    let mut busy = fixed_busy_time(tasks, events);

    let mut candidates: Vec<&Task> = tasks.iter().filter(|t| is_candidate(t)).collect();
    candidates.sort_by(|a, b| scheduling_order(a, b));

    let finder = SlotFinder::new(settings, now);
    let scorer = SlotScorer::new(settings, now);

    let mut placements = Vec::with_capacity(candidates.len());
    for task in candidates {
        let best = finder
            .free_slots(task, &busy)
            .into_iter()
            .map(|slot| {
                let score = scorer.score(task, &slot, &busy).total();
                (slot, score)
            })
            // Strictly greater keeps the earliest slot on ties.
            .fold(None::<(TimeSlot, f64)>, |best, (slot, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((slot, score)),
            });

        match best {
            Some((slot, score)) => {
                busy.push(BusyInterval {
                    start: slot.start,
                    end: slot.end,
                    project_id: task.project_id.clone(),
                });
                placements.push(Placement {
                    task_id: task.id.clone(),
                    slot: Some(slot),
                    score: Some(score),
                });
            }
            None => placements.push(Placement {
                task_id: task.id.clone(),
                slot: None,
                score: None,
            }),
        }
    }
    placements
}

/// Busy time the planner must route around: timed events and the
/// schedules of open tasks it is not allowed to move.
fn fixed_busy_time(tasks: &[Task], events: &[CalendarEvent]) -> Vec<BusyInterval> {
    let from_events = events.iter().filter(|e| !e.is_all_day).map(|e| BusyInterval {
        start: e.starts_at,
        end: e.ends_at,
        project_id: None,
    });
    let from_tasks = tasks
        .iter()
        .filter(|t| t.status.is_open() && !is_candidate(t))
        .filter_map(|t| match (t.scheduled_start, t.scheduled_end) {
            (Some(start), Some(end)) if start < end => Some(BusyInterval {
                start,
                end,
                project_id: t.project_id.clone(),
            }),
            _ => None,
        });
    from_events.chain(from_tasks).collect()
}

fn scheduling_order(a: &Task, b: &Task) -> Ordering {
    Priority::rank(a.priority)
        .cmp(&Priority::rank(b.priority))
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.created_at.cmp(&b.created_at))
}
