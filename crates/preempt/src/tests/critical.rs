use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ManualClock;
use crate::critical::{CriticalTask, RuntimeStats};

fn advancing(clock: &Arc<ManualClock>, by: Duration) -> impl Fn() + Send + Sync + 'static {
    let clock = Arc::clone(clock);
    move || clock.advance(by)
}

#[test]
fn invocation_within_budget_records_runtime() {
    let clock = Arc::new(ManualClock::new());
    let body = advancing(&clock, Duration::from_millis(3));
    let task = CriticalTask::with_clock(Duration::from_millis(10), Arc::clone(&clock), body);

    assert_eq!(task.measure(), Ok(Duration::from_millis(3)));
    assert_eq!(task.runtime(), Duration::from_millis(3));
    assert!(task.runtime() <= task.budget());
}

#[test]
fn invocation_exactly_at_budget_is_not_an_overrun() {
    let clock = Arc::new(ManualClock::new());
    let body = advancing(&clock, Duration::from_millis(10));
    let task = CriticalTask::with_clock(Duration::from_millis(10), Arc::clone(&clock), body);

    assert!(task.measure().is_ok());
}

#[test]
fn overrun_is_reported_with_budget_and_measurement() {
    let clock = Arc::new(ManualClock::new());
    let body = advancing(&clock, Duration::from_millis(3));
    let task = CriticalTask::with_clock(Duration::from_millis(1), Arc::clone(&clock), body);

    let err = task.measure().unwrap_err();
    assert_eq!(err.budget, Duration::from_millis(1));
    assert_eq!(err.measured, Duration::from_millis(3));
    assert_eq!(err.overrun(), Duration::from_millis(2));
    assert!(err.to_string().contains("deadline exceeded"));

    assert_eq!(task.runtime(), Duration::ZERO);
    assert!(task.runtime() <= task.budget());
    assert_eq!(task.stats(), RuntimeStats::default());
}

#[test]
fn overrun_keeps_the_last_in_budget_measurement() {
    let clock = Arc::new(ManualClock::new());
    let step = Arc::new(AtomicU64::new(1));
    let body = {
        let clock = Arc::clone(&clock);
        let step = Arc::clone(&step);
        move || clock.advance(Duration::from_millis(step.load(Ordering::SeqCst)))
    };
    let task = CriticalTask::with_clock(Duration::from_millis(2), Arc::clone(&clock), body);

    task.measure().unwrap();
    let before = task.stats();
    step.store(5, Ordering::SeqCst);
    assert!(task.measure().is_err());

    assert_eq!(task.runtime(), Duration::from_millis(1));
    assert_eq!(task.stats(), before);
}

#[test]
fn runtime_is_overwritten_and_stats_accumulate() {
    let clock = Arc::new(ManualClock::new());
    let step = Arc::new(AtomicU64::new(2));
    let body = {
        let clock = Arc::clone(&clock);
        let step = Arc::clone(&step);
        move || {
            let ms = step.load(Ordering::SeqCst);
            clock.advance(Duration::from_millis(ms));
        }
    };
    let task = CriticalTask::with_clock(Duration::from_millis(10), Arc::clone(&clock), body);

    task.measure().unwrap();
    clock.advance(Duration::from_millis(5));
    step.store(4, Ordering::SeqCst);
    task.measure().unwrap();

    assert_eq!(task.runtime(), Duration::from_millis(4));

    let stats = task.stats();
    assert_eq!(stats.invocations, 2);
    assert_eq!(stats.run_min, Some(Duration::from_millis(2)));
    assert_eq!(stats.run_max, Some(Duration::from_millis(4)));
    assert_eq!(stats.idle_min, Some(Duration::ZERO));
    assert_eq!(stats.idle_max, Some(Duration::from_millis(5)));
}

#[test]
fn fresh_task_reports_zero_runtime() {
    let clock = Arc::new(ManualClock::new());
    let task = CriticalTask::with_clock(Duration::from_millis(1), clock, || {});
    assert_eq!(task.runtime(), Duration::ZERO);
    assert_eq!(task.stats().invocations, 0);
    assert!(!task.joinable());
}
