#[cfg(feature = "cron_schedule")]
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
#[cfg(feature = "cron_schedule")]
use cron::Schedule as CronSchedule;
use tracing::warn;

const MINUTE_MS: u64 = 60_000;
const DAY_MS: u64 = 24 * 60 * MINUTE_MS;
/// How far ahead a cron field scan looks before giving up.
const CRON_SCAN_LIMIT_MINUTES: i64 = 30 * 24 * 60;

/// Represents the different ways a task can be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Schedule {
  /// Run once, `delay_ms` after registration.
  Once(u64),
  /// Run every `period_ms`, measured from the previous run.
  Interval(u64),
  /// Run every day at `hour:minute` UTC.
  Daily { hour: u8, minute: u8 },
  /// Run at minutes matching every set field of the `CronSpec` (UTC).
  Cron(CronSpec),
  /// Run based on a standard CRON expression (UTC), evaluated by the `cron`
  /// crate. Requires the `cron_schedule` feature.
  #[cfg(feature = "cron_schedule")]
  Expression(String),
}

/// Field-based cron specification. `None` fields match any value.
///
/// `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CronSpec {
  pub minute: Option<u8>,
  pub hour: Option<u8>,
  pub day_of_month: Option<u8>,
  pub month: Option<u8>,
  pub day_of_week: Option<u8>,
}

impl CronSpec {
  /// Matches the given minute of every hour.
  pub fn hourly_at(minute: u8) -> Self {
    Self {
      minute: Some(minute),
      ..Self::default()
    }
  }

  /// Matches `hour:minute` on the given weekday (Sunday = 0).
  pub fn weekly_at(day_of_week: u8, hour: u8, minute: u8) -> Self {
    Self {
      minute: Some(minute),
      hour: Some(hour),
      day_of_week: Some(day_of_week),
      ..Self::default()
    }
  }

  /// True if every set field equals the corresponding component of `time`.
  pub fn matches(&self, time: &DateTime<Utc>) -> bool {
    field_matches(self.minute, time.minute())
      && field_matches(self.hour, time.hour())
      && field_matches(self.day_of_month, time.day())
      && field_matches(self.month, time.month())
      && field_matches(self.day_of_week, time.weekday().num_days_from_sunday())
  }
}

fn field_matches(field: Option<u8>, actual: u32) -> bool {
  field.map_or(true, |expected| u32::from(expected) == actual)
}

impl Schedule {
  /// Runs once after `delay`.
  pub fn once_after(delay: StdDuration) -> Self {
    Schedule::Once(duration_to_millis(delay))
  }

  /// Runs every `period`.
  pub fn every(period: StdDuration) -> Self {
    Schedule::Interval(duration_to_millis(period))
  }

  /// Runs daily at `hour:minute` UTC.
  pub fn daily(hour: u8, minute: u8) -> Self {
    Schedule::Daily { hour, minute }
  }

  /// Calculates the next run time strictly derived from `from`.
  ///
  /// Never fails: degenerate schedules (unsatisfiable cron fields, invalid
  /// daily times, unparsable expressions) fall back to a short fixed delay and
  /// log a warning.
  pub fn next_run_time(&self, from: DateTime<Utc>) -> DateTime<Utc> {
    match self {
      Schedule::Once(delay_ms) => add_millis(from, *delay_ms),
      Schedule::Interval(period_ms) => add_millis(from, *period_ms),
      Schedule::Daily { hour, minute } => next_daily(*hour, *minute, from),
      Schedule::Cron(spec) => next_cron_match(spec, from),
      #[cfg(feature = "cron_schedule")]
      Schedule::Expression(expression) => match CronSchedule::from_str(expression) {
        Ok(cron_schedule) => cron_schedule.after(&from).next().unwrap_or_else(|| {
          warn!(%expression, "Cron expression has no future occurrence; retrying in 60s.");
          add_millis(from, MINUTE_MS)
        }),
        Err(e) => {
          warn!("Failed to parse cron expression '{}': {}", expression, e);
          add_millis(from, MINUTE_MS)
        }
      },
    }
  }

  /// True for schedules that fire a single time.
  pub fn is_one_shot(&self) -> bool {
    matches!(self, Schedule::Once(_))
  }
}

fn duration_to_millis(duration: StdDuration) -> u64 {
  duration.as_millis().try_into().unwrap_or(u64::MAX)
}

/// Adds milliseconds, saturating at the largest representable time.
fn add_millis(from: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
  let millis = i64::try_from(millis).unwrap_or(i64::MAX);
  from
    .checked_add_signed(ChronoDuration::milliseconds(millis))
    .unwrap_or_else(|| {
      warn!(millis, "Schedule offset overflowed; clamping to the maximum time.");
      DateTime::<Utc>::MAX_UTC
    })
}

fn next_daily(hour: u8, minute: u8, from: DateTime<Utc>) -> DateTime<Utc> {
  let Some(target) = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0) else {
    warn!(hour, minute, "Invalid daily schedule time; retrying in 24h.");
    return add_millis(from, DAY_MS);
  };
  let today = DateTime::<Utc>::from_naive_utc_and_offset(from.date_naive().and_time(target), Utc);
  if from < today {
    today
  } else {
    today + ChronoDuration::days(1)
  }
}

fn next_cron_match(spec: &CronSpec, from: DateTime<Utc>) -> DateTime<Utc> {
  // Candidates sit on whole minutes, starting with the minute after `from`.
  let base = from
    .with_second(0)
    .and_then(|t| t.with_nanosecond(0))
    .unwrap_or(from);

  for step in 1..=CRON_SCAN_LIMIT_MINUTES {
    let candidate = base + ChronoDuration::minutes(step);
    if spec.matches(&candidate) {
      return candidate;
    }
  }

  warn!(?spec, "No cron match within 30 days; retrying in 60s.");
  add_millis(from, MINUTE_MS)
}
