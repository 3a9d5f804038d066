//! Trigger definitions for persisted jobs.
//!
//! A job row stores a schedule type (`daily`, `weekly`, `monthly`, `custom`)
//! and a JSON object with that type's parameters. [`ScheduleConfig`] is the
//! validated form of that pair. Wall-clock fields are interpreted in a fixed
//! UTC offset chosen by configuration.

use chrono::{DateTime, Datelike, Days, FixedOffset, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::str::FromStr;

const DEFAULT_HOUR: u32 = 9;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unknown schedule type '{0}' (expected daily, weekly, monthly or custom)")]
    UnknownType(String),
    #[error("Invalid {schedule_type} schedule configuration: {reason}")]
    InvalidConfig {
        schedule_type: String,
        reason: String,
    },
    #[error("Hour {0} is out of range (0-23)")]
    HourOutOfRange(u32),
    #[error("Minute {0} is out of range (0-59)")]
    MinuteOutOfRange(u32),
    #[error("Day of month {0} is out of range (1-31)")]
    DayOfMonthOutOfRange(u32),
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

/// Stored by name. Also read from an index 0-6 counted from Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "DayOfWeekRepr")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DayOfWeekRepr {
    Index(u64),
    Name(String),
}

impl TryFrom<DayOfWeekRepr> for DayOfWeek {
    type Error = String;

    fn try_from(repr: DayOfWeekRepr) -> Result<Self, Self::Error> {
        match repr {
            DayOfWeekRepr::Index(index) => usize::try_from(index)
                .ok()
                .and_then(|i| DayOfWeek::ALL.get(i).copied())
                .ok_or_else(|| format!("day of week {} is out of range (0-6, monday = 0)", index)),
            DayOfWeekRepr::Name(name) => DayOfWeek::ALL
                .into_iter()
                .find(|day| day.name().eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| format!("unknown day of week '{}'", name)),
        }
    }
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }

    pub fn weekday(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }
}

fn default_hour() -> u32 {
    DEFAULT_HOUR
}

fn default_day_of_week() -> DayOfWeek {
    DayOfWeek::Monday
}

fn default_day_of_month() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ScheduleConfig {
    Daily {
        #[serde(default = "default_hour")]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Weekly {
        #[serde(default = "default_day_of_week")]
        day_of_week: DayOfWeek,
        #[serde(default = "default_hour")]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Monthly {
        #[serde(default = "default_day_of_month")]
        day_of_month: u32,
        #[serde(default = "default_hour")]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Custom { cron: String },
}

impl ScheduleConfig {
    pub const TYPES: [&'static str; 4] = ["daily", "weekly", "monthly", "custom"];

    /// Builds and validates a schedule from its persisted type and parameters.
    pub fn from_parts(schedule_type: &str, config: &JsonValue) -> Result<Self, ScheduleError> {
        if !Self::TYPES.contains(&schedule_type) {
            return Err(ScheduleError::UnknownType(schedule_type.to_string()));
        }

        let mut object = match config {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => Map::new(),
            other => {
                return Err(ScheduleError::InvalidConfig {
                    schedule_type: schedule_type.to_string(),
                    reason: format!("expected an object, got {}", other),
                })
            }
        };
        object.remove("type");
        object.insert(
            "type".to_string(),
            JsonValue::String(schedule_type.to_string()),
        );

        let schedule: ScheduleConfig = serde_json::from_value(JsonValue::Object(object))
            .map_err(|e| ScheduleError::InvalidConfig {
                schedule_type: schedule_type.to_string(),
                reason: e.to_string(),
            })?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn schedule_type(&self) -> &'static str {
        match self {
            ScheduleConfig::Daily { .. } => "daily",
            ScheduleConfig::Weekly { .. } => "weekly",
            ScheduleConfig::Monthly { .. } => "monthly",
            ScheduleConfig::Custom { .. } => "custom",
        }
    }

    /// The parameters object as persisted next to the schedule type.
    pub fn config_value(&self) -> JsonValue {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let JsonValue::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            ScheduleConfig::Daily { hour, minute } | ScheduleConfig::Weekly { hour, minute, .. } => {
                validate_time(*hour, *minute)
            }
            ScheduleConfig::Monthly {
                day_of_month,
                hour,
                minute,
            } => {
                if !(1..=31).contains(day_of_month) {
                    return Err(ScheduleError::DayOfMonthOutOfRange(*day_of_month));
                }
                validate_time(*hour, *minute)
            }
            ScheduleConfig::Custom { cron } => parse_cron(cron).map(|_| ()),
        }
    }

    /// First fire time strictly after `after`.
    ///
    /// Monthly schedules whose day does not exist in a month fire on that
    /// month's last day.
    pub fn next_fire_after(
        &self,
        after: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&offset);
        let today = local.date_naive();

        match self {
            ScheduleConfig::Daily { hour, minute } => (0..=1)
                .filter_map(|days| today.checked_add_days(Days::new(days)))
                .filter_map(|date| at_local(date, *hour, *minute, offset))
                .find(|candidate| *candidate > after),
            ScheduleConfig::Weekly {
                day_of_week,
                hour,
                minute,
            } => {
                let target = day_of_week.weekday().num_days_from_monday();
                let current = today.weekday().num_days_from_monday();
                let days_ahead = (target + 7 - current) % 7;
                [days_ahead, days_ahead + 7]
                    .into_iter()
                    .filter_map(|days| today.checked_add_days(Days::new(days as u64)))
                    .filter_map(|date| at_local(date, *hour, *minute, offset))
                    .find(|candidate| *candidate > after)
            }
            ScheduleConfig::Monthly {
                day_of_month,
                hour,
                minute,
            } => {
                let first_of_month = today.with_day(1)?;
                (0..=1)
                    .filter_map(|months| first_of_month.checked_add_months(Months::new(months)))
                    .filter_map(|month_start| {
                        let day = (*day_of_month).min(days_in_month(month_start)?);
                        at_local(month_start.with_day(day)?, *hour, *minute, offset)
                    })
                    .find(|candidate| *candidate > after)
            }
            ScheduleConfig::Custom { cron } => {
                let schedule = parse_cron(cron).ok()?;
                schedule
                    .after(&local)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

fn validate_time(hour: u32, minute: u32) -> Result<(), ScheduleError> {
    if hour > 23 {
        return Err(ScheduleError::HourOutOfRange(hour));
    }
    if minute > 59 {
        return Err(ScheduleError::MinuteOutOfRange(minute));
    }
    Ok(())
}

fn at_local(date: NaiveDate, hour: u32, minute: u32, offset: FixedOffset) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0)?
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn days_in_month(month_start: NaiveDate) -> Option<u32> {
    let next = month_start.checked_add_months(Months::new(1))?;
    Some(next.signed_duration_since(month_start).num_days() as u32)
}

const CRONTAB_WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrites a crontab day-of-week field (0 or 7 = Sunday) into names, which
/// the `cron` crate reads unambiguously.
fn crontab_weekdays(field: &str) -> Result<String, String> {
    let items = field
        .split(',')
        .map(crontab_weekday_item)
        .collect::<Result<Vec<_>, String>>()?;
    Ok(items.join(","))
}

fn crontab_weekday_item(item: &str) -> Result<String, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };
    let bounds: Vec<&str> = range.split('-').collect();
    let numbers: Option<Vec<usize>> = bounds.iter().map(|part| part.parse().ok()).collect();
    if let Some(n) = numbers.iter().flatten().find(|n| **n > 7) {
        return Err(format!("day of week {} is out of range (0-7)", n));
    }

    // A range ending on 7 wraps past SAT, so list its days instead
    if let Some([start, 7]) = numbers.as_deref() {
        let step = match step {
            Some(step) => step
                .parse::<usize>()
                .ok()
                .filter(|step| *step > 0)
                .ok_or_else(|| format!("invalid day of week step '{}'", step))?,
            None => 1,
        };
        let mut days: Vec<&str> = Vec::new();
        for n in (*start..=7).step_by(step) {
            let day = CRONTAB_WEEKDAYS[n % 7];
            if !days.contains(&day) {
                days.push(day);
            }
        }
        return Ok(days.join(","));
    }

    let range = bounds
        .iter()
        .map(|part| match part.parse::<usize>() {
            Ok(n) => CRONTAB_WEEKDAYS[n % 7].to_string(),
            Err(_) => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join("-");
    Ok(match step {
        Some(step) => format!("{}/{}", range, step),
        None => range,
    })
}

/// Accepts five-field crontab expressions as well as the six and seven
/// field forms (leading seconds, optional trailing year).
fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => {
            let weekdays = crontab_weekdays(fields[4]).map_err(invalid)?;
            format!("0 {} {} {} {} {}", fields[0], fields[1], fields[2], fields[3], weekdays)
        }
        6 | 7 => fields.join(" "),
        n => return Err(invalid(format!("expected 5, 6 or 7 fields, got {}", n))),
    };

    cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}
