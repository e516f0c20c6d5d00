use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use super::EnergyLevel;

/// Working-time model the auto-scheduler plans against.
///
/// Hours are local hours of day (`0..=24`) in the fixed offset
/// `utc_offset_minutes`; `work_days` holds ISO weekday numbers
/// (1 = Monday, 7 = Sunday).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AutoScheduleSettings {
    pub work_days: Json<Vec<u32>>,
    pub work_hour_start: u32,
    pub work_hour_end: u32,
    pub buffer_minutes: u32,
    pub high_energy_start: Option<u32>,
    pub high_energy_end: Option<u32>,
    pub medium_energy_start: Option<u32>,
    pub medium_energy_end: Option<u32>,
    pub low_energy_start: Option<u32>,
    pub low_energy_end: Option<u32>,
    pub group_by_project: bool,
    pub utc_offset_minutes: i32,
    pub horizon_days: u32,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Default for AutoScheduleSettings {
    fn default() -> Self {
        Self {
            work_days: Json(vec![1, 2, 3, 4, 5]),
            work_hour_start: 9,
            work_hour_end: 17,
            buffer_minutes: 15,
            high_energy_start: Some(9),
            high_energy_end: Some(12),
            medium_energy_start: Some(13),
            medium_energy_end: Some(15),
            low_energy_start: Some(15),
            low_energy_end: Some(17),
            group_by_project: false,
            utc_offset_minutes: 0,
            horizon_days: 7,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl AutoScheduleSettings {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Energy window containing the given local hour, if any.
    pub fn energy_at(&self, hour: u32) -> Option<EnergyLevel> {
        let windows = [
            (EnergyLevel::High, self.high_energy_start, self.high_energy_end),
            (EnergyLevel::Medium, self.medium_energy_start, self.medium_energy_end),
            (EnergyLevel::Low, self.low_energy_start, self.low_energy_end),
        ];
        windows.into_iter().find_map(|(level, start, end)| match (start, end) {
            (Some(s), Some(e)) if s <= hour && hour < e => Some(level),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.work_hour_start >= self.work_hour_end || self.work_hour_end > 24 {
            return Err("work hours must satisfy start < end <= 24".to_string());
        }
        if self.work_days.is_empty() || self.work_days.iter().any(|d| !(1..=7).contains(d)) {
            return Err("work_days must be a non-empty list of 1..=7".to_string());
        }
        if self.buffer_minutes > 240 {
            return Err("buffer_minutes must be at most 240".to_string());
        }
        if !(1..=60).contains(&self.horizon_days) {
            return Err("horizon_days must be within 1..=60".to_string());
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err("utc_offset_minutes must be within +/-840".to_string());
        }
        let windows = [
            ("high", self.high_energy_start, self.high_energy_end),
            ("medium", self.medium_energy_start, self.medium_energy_end),
            ("low", self.low_energy_start, self.low_energy_end),
        ];
        for (name, start, end) in windows {
            match (start, end) {
                (Some(s), Some(e)) if s >= e || e > 24 => {
                    return Err(format!("{name} energy window must satisfy start < end <= 24"));
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(format!("{name} energy window needs both start and end"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
