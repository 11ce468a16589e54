// file: tests/schedule_types.rs
//! Tests for Once, Interval, Daily and Cron scheduling.

mod common;

use crate::common::{build_scheduler, counting_callback, setup_tracing, wait_until};
use chrono::{Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;
use logkeeper::{CronSpec, Schedule};

#[test]
fn test_once_runs_exactly_once() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));

  scheduler.add_custom_task("one-shot", Schedule::once_after(StdDuration::from_millis(50)), counting_callback(counter.clone()));
  scheduler.start().unwrap();

  assert!(wait_until(StdDuration::from_secs(2), || counter.load(Ordering::SeqCst) == 1));
  std::thread::sleep(StdDuration::from_millis(200));
  scheduler.stop().unwrap();

  assert_eq!(counter.load(Ordering::SeqCst), 1, "Once schedule must not repeat");
  assert!(!scheduler.task("one-shot").unwrap().enabled);
}

#[test]
fn test_interval_next_run_advances_by_period() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));

  scheduler.add_custom_task("periodic", Schedule::every(StdDuration::from_secs(30)), counting_callback(counter.clone()));
  scheduler.run_now(0).unwrap();

  let details = scheduler.task("periodic").unwrap();
  let last_run = details.last_run.unwrap();
  assert_eq!(details.next_run - last_run, ChronoDuration::seconds(30));
}

#[test]
fn test_daily_next_run_is_within_a_day() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  scheduler.add_custom_task("nightly", Schedule::daily(3, 15), |_task| Ok(()));

  let next_run = scheduler.task("nightly").unwrap().next_run;
  let now = Utc::now();
  assert!(next_run > now);
  assert!(next_run - now <= ChronoDuration::hours(24));
  assert_eq!((next_run.hour(), next_run.minute(), next_run.second()), (3, 15, 0));
}

#[test]
fn test_cron_fields_next_run_matches() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let spec = CronSpec::weekly_at(0, 4, 30); // Sundays 04:30
  scheduler.add_custom_task("weekly", Schedule::Cron(spec), |_task| Ok(()));

  let next_run = scheduler.task("weekly").unwrap().next_run;
  assert!(spec.matches(&next_run));
  assert_eq!(next_run.weekday(), chrono::Weekday::Sun);
  assert!(next_run - Utc::now() <= ChronoDuration::days(7));
}

#[cfg(feature = "cron_schedule")]
#[test]
fn test_cron_expression_schedule() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  let counter = Arc::new(AtomicUsize::new(0));

  // Every second (includes seconds field).
  scheduler.add_custom_task(
    "cron-expr",
    Schedule::Expression("* * * * * * *".to_string()),
    counting_callback(counter.clone()),
  );
  scheduler.start().unwrap();

  let reached = wait_until(StdDuration::from_secs(4), || counter.load(Ordering::SeqCst) >= 2);
  scheduler.stop().unwrap();
  assert!(reached, "Cron expression task should fire every second");
}

#[cfg(feature = "cron_schedule")]
#[test]
fn test_invalid_cron_expression_falls_back() {
  setup_tracing();
  let scheduler = build_scheduler(None);
  scheduler.add_custom_task("broken", Schedule::Expression("not a cron".to_string()), |_task| Ok(()));

  let until_next = scheduler.task("broken").unwrap().next_run - Utc::now();
  assert!(until_next > ChronoDuration::seconds(55) && until_next <= ChronoDuration::seconds(60));
}
