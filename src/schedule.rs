use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::error::InvalidScheduleError;

// --- Cron Expressions ---

/// Bounds and name for one position of a cron expression.
struct FieldSpec {
  name: &'static str,
  min: u32,
  max: u32,
}

const MINUTE_FIELD: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR_FIELD: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_FIELD: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH_FIELD: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const WEEKDAY_FIELD: FieldSpec = FieldSpec { name: "weekday", min: 0, max: 7 };

/// How far `next_after` searches before declaring the expression
/// unsatisfiable. Four years covers every leap-day schedule.
const SEARCH_HORIZON_DAYS: i64 = 4 * 366 + 1;

/// A parsed standard 5-field cron expression (minute, hour, day-of-month,
/// month, weekday), interpreted in UTC.
///
/// Accepted per field: `*`, `*/N`, a single integer, a comma list of
/// integers, or an inclusive `A-B` range. Weekday admits 0..=7 with both 0
/// and 7 denoting Sunday (7 is normalized to 0 at parse time). Anything
/// else is rejected with [`InvalidScheduleError`].
///
/// Each field is stored as a bit set of admitted values, so evaluation is a
/// handful of mask tests per candidate minute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
  text: String,
  minute: u64,
  hour: u64,
  day_of_month: u64,
  month: u64,
  weekday: u64,
  // The classic cron rule: when both day fields are restricted a date
  // matches if either admits it; a lone `*` never restricts.
  dom_restricted: bool,
  weekday_restricted: bool,
}

impl CronExpr {
  /// Parses a 5-field cron expression, validating field count, token shape,
  /// and per-field bounds.
  pub fn parse(expression: &str) -> Result<Self, InvalidScheduleError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
      return Err(InvalidScheduleError::FieldCount { found: fields.len() });
    }

    let minute = parse_field(fields[0], &MINUTE_FIELD)?;
    let hour = parse_field(fields[1], &HOUR_FIELD)?;
    let day_of_month = parse_field(fields[2], &DAY_FIELD)?;
    let month = parse_field(fields[3], &MONTH_FIELD)?;
    let mut weekday = parse_field(fields[4], &WEEKDAY_FIELD)?;

    // Fold 7 (Sunday) onto 0 so evaluation only deals with 0..=6.
    if bit(weekday, 7) {
      weekday = (weekday & !(1 << 7)) | 1;
    }

    Ok(CronExpr {
      text: fields.join(" "),
      minute,
      hour,
      day_of_month,
      month,
      weekday,
      dom_restricted: fields[2] != "*",
      weekday_restricted: fields[4] != "*",
    })
  }

  /// Returns the first admitted instant strictly after `after`, at whole
  /// minute resolution.
  ///
  /// Fails with [`InvalidScheduleError::Unsatisfiable`] when no instant
  /// within the search horizon matches (for example day 31 of February).
  pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidScheduleError> {
    let mut candidate = truncate_to_minute(after) + ChronoDuration::minutes(1);
    let horizon = after + ChronoDuration::days(SEARCH_HORIZON_DAYS);

    while candidate <= horizon {
      if !self.date_admits(candidate) {
        candidate = next_midnight(candidate);
        continue;
      }
      if !bit(self.hour, candidate.hour()) {
        candidate = next_hour(candidate);
        continue;
      }
      if !bit(self.minute, candidate.minute()) {
        candidate += ChronoDuration::minutes(1);
        continue;
      }
      return Ok(candidate);
    }

    Err(InvalidScheduleError::Unsatisfiable {
      expression: self.text.clone(),
    })
  }

  fn date_admits(&self, t: DateTime<Utc>) -> bool {
    if !bit(self.month, t.month()) {
      return false;
    }
    let dom_ok = bit(self.day_of_month, t.day());
    let dow_ok = bit(self.weekday, t.weekday().num_days_from_sunday());
    match (self.dom_restricted, self.weekday_restricted) {
      (true, true) => dom_ok || dow_ok,
      (true, false) => dom_ok,
      (false, true) => dow_ok,
      (false, false) => true,
    }
  }

  /// Human-readable rendering of the expression for diagnostics, covering
  /// the common shapes ("every 15 minutes", "daily at 02:30", "at 08:00 on
  /// Monday through Friday") and falling back to the raw expression.
  pub fn describe(&self) -> String {
    let minutes = set_values(self.minute, MINUTE_FIELD.min, MINUTE_FIELD.max);
    let hours = set_values(self.hour, HOUR_FIELD.min, HOUR_FIELD.max);
    let every_hour = is_full(self.hour, HOUR_FIELD.min, HOUR_FIELD.max);
    let every_month = is_full(self.month, MONTH_FIELD.min, MONTH_FIELD.max);
    let dom_free = !self.dom_restricted;
    let dow_free = !self.weekday_restricted;

    if every_hour && every_month && dom_free && dow_free {
      if let Some(step) = uniform_step(&minutes, MINUTE_FIELD.min, MINUTE_FIELD.max) {
        return if step == 1 {
          "every minute".to_string()
        } else {
          format!("every {step} minutes")
        };
      }
      if minutes.len() == 1 {
        return format!("hourly at minute {}", minutes[0]);
      }
    }

    if minutes.len() == 1 && hours.len() == 1 && every_month {
      let at = format!("{:02}:{:02}", hours[0], minutes[0]);
      match (dom_free, dow_free) {
        (true, true) => return format!("daily at {at}"),
        (true, false) => return format!("at {at} on {}", weekday_phrase(self.weekday)),
        (false, true) => {
          let days = set_values(self.day_of_month, DAY_FIELD.min, DAY_FIELD.max);
          if days.len() == 1 {
            return format!("at {at} on day {} of each month", days[0]);
          }
        }
        _ => {}
      }
    }

    format!("cron '{}'", self.text)
  }

  /// The normalized source expression.
  pub fn expression(&self) -> &str {
    &self.text
  }
}

impl fmt::Display for CronExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

impl FromStr for CronExpr {
  type Err = InvalidScheduleError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    CronExpr::parse(s)
  }
}

// Wire representation is the source string, not the field masks.

impl Serialize for CronExpr {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.text)
  }
}

impl<'de> Deserialize<'de> for CronExpr {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let text = String::deserialize(deserializer)?;
    CronExpr::parse(&text).map_err(DeError::custom)
  }
}

// --- Cron Field Parsing Helpers ---

fn parse_field(token: &str, spec: &FieldSpec) -> Result<u64, InvalidScheduleError> {
  if token == "*" {
    return Ok(full_mask(spec.min, spec.max));
  }

  if let Some(step_text) = token.strip_prefix("*/") {
    let step: u32 = step_text.parse().map_err(|_| InvalidScheduleError::Token {
      field: spec.name,
      token: token.to_string(),
    })?;
    if step == 0 {
      return Err(InvalidScheduleError::ZeroStep { field: spec.name });
    }
    let mut mask = 0u64;
    let mut value = spec.min;
    while value <= spec.max {
      mask |= 1 << value;
      value += step;
    }
    return Ok(mask);
  }

  if token.contains(',') {
    let mut mask = 0u64;
    for part in token.split(',') {
      mask |= 1 << parse_value(part, spec)?;
    }
    return Ok(mask);
  }

  if let Some((start_text, end_text)) = token.split_once('-') {
    let start = parse_value(start_text, spec)?;
    let end = parse_value(end_text, spec)?;
    if start > end {
      return Err(InvalidScheduleError::DescendingRange {
        field: spec.name,
        start,
        end,
      });
    }
    let mut mask = 0u64;
    for value in start..=end {
      mask |= 1 << value;
    }
    return Ok(mask);
  }

  Ok(1u64 << parse_value(token, spec)?)
}

fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, InvalidScheduleError> {
  let value: u32 = text.parse().map_err(|_| InvalidScheduleError::Token {
    field: spec.name,
    token: text.to_string(),
  })?;
  if value < spec.min || value > spec.max {
    return Err(InvalidScheduleError::OutOfRange {
      field: spec.name,
      value,
      min: spec.min,
      max: spec.max,
    });
  }
  Ok(value)
}

fn full_mask(min: u32, max: u32) -> u64 {
  let mut mask = 0u64;
  for value in min..=max {
    mask |= 1 << value;
  }
  mask
}

fn bit(mask: u64, value: u32) -> bool {
  value < 64 && (mask >> value) & 1 == 1
}

fn is_full(mask: u64, min: u32, max: u32) -> bool {
  mask == full_mask(min, max)
}

fn set_values(mask: u64, min: u32, max: u32) -> Vec<u32> {
  (min..=max).filter(|v| bit(mask, *v)).collect()
}

/// Detects whether `values` is exactly `min, min+step, ...` covering the
/// whole field, as produced by `*` or `*/N`.
fn uniform_step(values: &[u32], min: u32, max: u32) -> Option<u32> {
  if values.len() < 2 || values[0] != min {
    return None;
  }
  let step = values[1] - values[0];
  if !values.windows(2).all(|pair| pair[1] - pair[0] == step) {
    return None;
  }
  match values.last() {
    Some(last) if last + step > max => Some(step),
    _ => None,
  }
}

const WEEKDAY_NAMES: [&str; 7] = [
  "Sunday",
  "Monday",
  "Tuesday",
  "Wednesday",
  "Thursday",
  "Friday",
  "Saturday",
];

fn weekday_phrase(mask: u64) -> String {
  let days = set_values(mask, 0, 6);
  match days.as_slice() {
    [] => "no weekday".to_string(),
    [only] => WEEKDAY_NAMES[*only as usize].to_string(),
    [first, .., last] if days.windows(2).all(|pair| pair[1] == pair[0] + 1) => format!(
      "{} through {}",
      WEEKDAY_NAMES[*first as usize], WEEKDAY_NAMES[*last as usize]
    ),
    _ => days
      .iter()
      .map(|d| WEEKDAY_NAMES[*d as usize])
      .collect::<Vec<_>>()
      .join(", "),
  }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
  t.with_second(0)
    .and_then(|x| x.with_nanosecond(0))
    .unwrap_or(t)
}

fn next_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
  let next_day = t.date_naive() + ChronoDuration::days(1);
  DateTime::<Utc>::from_naive_utc_and_offset(next_day.and_time(NaiveTime::MIN), Utc)
}

fn next_hour(t: DateTime<Utc>) -> DateTime<Utc> {
  t.with_minute(0).unwrap_or(t) + ChronoDuration::hours(1)
}

// --- Fixed Intervals ---

/// A fixed repeat interval expressed in days, hours, minutes, and seconds.
///
/// Constructed through [`IntervalSpec::new`], which rejects totals that are
/// zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
  pub days: i64,
  pub hours: i64,
  pub minutes: i64,
  pub seconds: i64,
}

impl IntervalSpec {
  pub fn new(days: i64, hours: i64, minutes: i64, seconds: i64) -> Result<Self, InvalidScheduleError> {
    let spec = IntervalSpec {
      days,
      hours,
      minutes,
      seconds,
    };
    let total = spec.total_seconds();
    if total <= 0 {
      return Err(InvalidScheduleError::NonPositiveInterval {
        total_seconds: total,
      });
    }
    Ok(spec)
  }

  /// The interval collapsed to whole seconds.
  pub fn total_seconds(&self) -> i64 {
    self
      .days
      .saturating_mul(86_400)
      .saturating_add(self.hours.saturating_mul(3_600))
      .saturating_add(self.minutes.saturating_mul(60))
      .saturating_add(self.seconds)
  }

  fn describe(&self) -> String {
    let singles = [
      (self.days, "day", "days"),
      (self.hours, "hour", "hours"),
      (self.minutes, "minute", "minutes"),
      (self.seconds, "second", "seconds"),
    ];
    let nonzero: Vec<_> = singles.iter().filter(|(n, _, _)| *n != 0).collect();
    if let [(n, one, many)] = nonzero.as_slice() {
      return if *n == 1 {
        format!("every {one}")
      } else {
        format!("every {n} {many}")
      };
    }
    let parts: Vec<String> = [
      (self.days, "d"),
      (self.hours, "h"),
      (self.minutes, "m"),
      (self.seconds, "s"),
    ]
    .iter()
    .filter(|(n, _)| *n != 0)
    .map(|(n, unit)| format!("{n}{unit}"))
    .collect();
    format!("every {}", parts.join(" "))
  }
}

// --- Schedule ---

/// The two ways a job definition can be scheduled.
///
/// Exactly one mode is active per job; the sum type makes the
/// "cron xor interval" rule structural rather than a validation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
  /// Fire at the instants admitted by a 5-field cron expression (UTC).
  Cron(CronExpr),
  /// Fire repeatedly at a fixed offset from the prior planned fire time.
  Interval(IntervalSpec),
}

impl Schedule {
  /// Builds a cron schedule, validating the expression.
  pub fn cron(expression: &str) -> Result<Self, InvalidScheduleError> {
    Ok(Schedule::Cron(CronExpr::parse(expression)?))
  }

  /// Builds a fixed-interval schedule, validating the total is positive.
  pub fn interval(
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
  ) -> Result<Self, InvalidScheduleError> {
    Ok(Schedule::Interval(IntervalSpec::new(
      days, hours, minutes, seconds,
    )?))
  }

  /// Resolves the loose wire shape (an optional cron expression plus four
  /// optional interval components) into a schedule.
  ///
  /// A non-blank cron expression wins when both forms are present; with
  /// neither present the result is [`InvalidScheduleError::Missing`].
  pub fn resolve(
    cron_expression: Option<&str>,
    interval_days: Option<i64>,
    interval_hours: Option<i64>,
    interval_minutes: Option<i64>,
    interval_seconds: Option<i64>,
  ) -> Result<Self, InvalidScheduleError> {
    let cron = cron_expression.map(str::trim).filter(|s| !s.is_empty());
    if let Some(expression) = cron {
      return Self::cron(expression);
    }
    if interval_days.is_none()
      && interval_hours.is_none()
      && interval_minutes.is_none()
      && interval_seconds.is_none()
    {
      return Err(InvalidScheduleError::Missing);
    }
    Self::interval(
      interval_days.unwrap_or(0),
      interval_hours.unwrap_or(0),
      interval_minutes.unwrap_or(0),
      interval_seconds.unwrap_or(0),
    )
  }

  /// Computes the next fire time strictly after `after`.
  ///
  /// For intervals this is exactly `after + total_seconds`; the caller
  /// passes the prior planned fire time (not "now") so fires stay on the
  /// original grid.
  pub fn next_fire_time(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, InvalidScheduleError> {
    match self {
      Schedule::Cron(expr) => expr.next_after(after),
      Schedule::Interval(spec) => {
        let step = ChronoDuration::seconds(spec.total_seconds());
        Ok(after.checked_add_signed(step).unwrap_or_else(|| {
          warn!(interval_seconds = spec.total_seconds(), "Interval addition overflowed.");
          DateTime::<Utc>::MAX_UTC
        }))
      }
    }
  }

  /// Human-readable schedule summary for diagnostics and the task-function
  /// listing.
  pub fn describe(&self) -> String {
    match self {
      Schedule::Cron(expr) => expr.describe(),
      Schedule::Interval(spec) => spec.describe(),
    }
  }

  /// The cron expression text, when this is a cron schedule.
  pub fn cron_expression(&self) -> Option<&str> {
    match self {
      Schedule::Cron(expr) => Some(expr.expression()),
      Schedule::Interval(_) => None,
    }
  }

  /// The interval components, when this is an interval schedule.
  pub fn interval_spec(&self) -> Option<&IntervalSpec> {
    match self {
      Schedule::Cron(_) => None,
      Schedule::Interval(spec) => Some(spec),
    }
  }
}
