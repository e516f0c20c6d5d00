//! Recurrence rules for repeating tasks.
//!
//! Supports the RRULE subset that task recurrence needs: `FREQ`,
//! `INTERVAL`, `BYDAY` (weekly rules), `UNTIL` and `COUNT`.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};

use crate::error::AppError;

/// Largest accepted `INTERVAL`.
pub const MAX_INTERVAL: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub by_day: Vec<Weekday>,
    pub until: Option<DateTime<Utc>>,
    /// Parsed for completeness; roll-forward does not track occurrence counts.
    pub count: Option<u32>,
}

impl FromStr for RecurrenceRule {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw.trim();
        let body = body.strip_prefix("RRULE:").unwrap_or(body);
        if body.is_empty() {
            return Err(invalid("empty rule"));
        }

        let mut frequency = None;
        let mut interval = 1;
        let mut by_day = Vec::new();
        let mut until = None;
        let mut count = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(&format!("malformed part '{}'", part)))?;
            match key.to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => return Err(invalid(&format!("unsupported FREQ '{}'", other))),
                    })
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| (1..=MAX_INTERVAL).contains(n))
                        .ok_or_else(|| invalid(&format!("INTERVAL must be between 1 and {}", MAX_INTERVAL)))?;
                }
                "BYDAY" => {
                    for day in value.split(',') {
                        by_day.push(parse_weekday(day)?);
                    }
                }
                "UNTIL" => until = Some(parse_until(value)?),
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| invalid("COUNT must be an integer"))?,
                    )
                }
                // Other RRULE parts (WKST, BYMONTH, ...) are tolerated and ignored.
                _ => {}
            }
        }

        let frequency = frequency.ok_or_else(|| invalid("FREQ is required"))?;
        if !by_day.is_empty() && frequency != Frequency::Weekly {
            return Err(invalid("BYDAY is only supported for WEEKLY rules"));
        }
        by_day.sort_by_key(|d| d.num_days_from_monday());
        by_day.dedup();

        Ok(Self {
            frequency,
            interval,
            by_day,
            until,
            count,
        })
    }
}

impl RecurrenceRule {
    /// The next occurrence strictly after `reference`, keeping its time of day.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = match self.frequency {
            Frequency::Daily => reference.checked_add_signed(Duration::try_days(i64::from(self.interval))?)?,
            Frequency::Weekly if self.by_day.is_empty() => {
                reference.checked_add_signed(Duration::try_weeks(i64::from(self.interval))?)?
            }
            Frequency::Weekly => self.next_weekly_by_day(reference)?,
            Frequency::Monthly => add_months(reference, self.interval)?,
            Frequency::Yearly => add_months(reference, self.interval.checked_mul(12)?)?,
        };

        match self.until {
            Some(until) if next > until => None,
            _ => Some(next),
        }
    }

    fn next_weekly_by_day(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = i64::from(reference.weekday().num_days_from_monday());
        let days = || self.by_day.iter().map(|d| i64::from(d.num_days_from_monday()));

        // A later listed day in the current week, else the first one `interval` weeks on.
        let offset = match days().filter(|d| *d > today).min() {
            Some(day) => day - today,
            None => 7 * i64::from(self.interval) - today + days().min()?,
        };
        reference.checked_add_signed(Duration::try_days(offset)?)
    }
}

/// Checks a rule string without keeping the parsed form.
pub fn validate(raw: &str) -> Result<(), AppError> {
    raw.parse::<RecurrenceRule>().map(|_| ())
}

fn add_months(reference: DateTime<Utc>, months: u32) -> Option<DateTime<Utc>> {
    let date = reference.date_naive();
    let total = i64::from(date.year()) * 12 + i64::from(date.month0()) + i64::from(months);
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
    let day = date.day().min(days_in_month(year, month)?);
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_time(reference.time());
    Some(Utc.from_utc_datetime(&naive))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from((next - first).num_days()).ok()
}

fn parse_weekday(raw: &str) -> Result<Weekday, AppError> {
    // Ordinal prefixes such as "1MO" only make sense for monthly rules.
    match raw.trim().to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(invalid(&format!("unknown BYDAY value '{}'", other))),
    }
}

fn parse_until(raw: &str) -> Result<DateTime<Utc>, AppError> {
    let value = raw.trim().trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| invalid(&format!("UNTIL '{}' is not a valid date", raw)))
}

fn invalid(reason: &str) -> AppError {
    AppError::BadRequest(format!("invalid recurrence rule: {}", reason))
}
