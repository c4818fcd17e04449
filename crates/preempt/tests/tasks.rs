//! Mono and poly task spawning.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use preempt::{MonoTask, PolyTask, Task};

#[test]
fn mono_task_runs_bodies_one_after_another() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut task = MonoTask::new();

    for round in 0..5 {
        let order = Arc::clone(&order);
        task.spawn(move || order.lock().unwrap().push(round));
        assert!(task.joinable());
    }
    task.join().unwrap();

    assert!(!task.joinable());
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn mono_task_finishes_previous_body_before_starting_the_next() {
    let first_done = Arc::new(AtomicBool::new(false));
    let seen_by_second = Arc::new(AtomicBool::new(false));
    let mut task = MonoTask::new();

    let done = Arc::clone(&first_done);
    task.spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        done.store(true, Ordering::SeqCst);
    });
    let done = Arc::clone(&first_done);
    let seen = Arc::clone(&seen_by_second);
    task.spawn(move || seen.store(done.load(Ordering::SeqCst), Ordering::SeqCst));
    task.join().unwrap();

    assert!(seen_by_second.load(Ordering::SeqCst));
}

#[test]
fn mono_task_never_runs_two_bodies_at_once() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut task = MonoTask::new();

    for _ in 0..5 {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        task.spawn(move || {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            live.fetch_sub(1, Ordering::SeqCst);
        });
    }
    task.join().unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[test]
fn mono_task_join_on_empty_slot_is_ok() {
    let mut task = MonoTask::new();
    assert!(task.join().is_ok());
}

#[test]
fn mono_task_survives_a_panicking_body() {
    let mut task = MonoTask::new();
    task.spawn(|| panic!("first body fails"));
    task.spawn(|| {});
    assert!(task.join().is_ok());
}

#[test]
fn poly_task_joins_every_member() {
    let runs = Arc::new(AtomicUsize::new(0));
    let poly = PolyTask::new();

    for _ in 0..9 {
        let runs = Arc::clone(&runs);
        let handle = poly.spawn(move || {
            runs.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.id().is_some());
    }
    assert_eq!(poly.len(), 9);

    poly.join().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 9);
    assert!(!poly.joinable());
    assert!(poly.is_empty());
}

#[test]
fn poly_task_accepts_concurrent_spawns() {
    const SPAWNERS: usize = 8;
    const PER_SPAWNER: usize = 16;

    let runs = Arc::new(AtomicUsize::new(0));
    let poly = Arc::new(PolyTask::new());

    let spawners: Vec<_> = (0..SPAWNERS)
        .map(|_| {
            let poly = Arc::clone(&poly);
            let runs = Arc::clone(&runs);
            std::thread::spawn(move || {
                for _ in 0..PER_SPAWNER {
                    let runs = Arc::clone(&runs);
                    drop(poly.spawn(move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            })
        })
        .collect();
    for spawner in spawners {
        spawner.join().unwrap();
    }

    assert_eq!(poly.len(), SPAWNERS * PER_SPAWNER);
    poly.join().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), SPAWNERS * PER_SPAWNER);
}

#[test]
fn tasks_share_the_task_interface() {
    fn finish(task: &mut dyn Task) {
        task.join().unwrap();
        assert!(!task.joinable());
    }

    let mut mono = MonoTask::new();
    mono.spawn(|| {});
    finish(&mut mono);

    let mut poly = PolyTask::new();
    drop(poly.spawn(|| {}));
    finish(&mut poly);
}
