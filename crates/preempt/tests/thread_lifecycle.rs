//! Ownership and lifecycle of thread handles.

use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use preempt::{
    JoinError, PolicyKind, SchedulingError, SchedulingPolicy, ThreadConfig, ThreadHandle,
};

const CHILD_ENV: &str = "PREEMPT_SCHEDULING_CHILD";

/// Priority above every platform maximum; the OS rejects it with EINVAL.
const OUT_OF_RANGE: i32 = 10_000;

/// Thread that blocks until the returned sender is dropped or used.
fn parked() -> (ThreadHandle, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel::<()>();
    let handle = ThreadHandle::spawn(move || {
        let _ = rx.recv();
    });
    (handle, tx)
}

fn assert_rejected_change(handle: &mut ThreadHandle, priority: i32) {
    let err = handle
        .try_set_scheduling(PolicyKind::Fifo, priority)
        .unwrap_err();
    assert!(matches!(err, SchedulingError::Os { .. }), "{err}");
    assert_eq!(handle.policy(), SchedulingPolicy::Normal);
    assert_eq!(handle.current_scheduling(), Some(SchedulingPolicy::Normal));
    assert!(handle
        .last_error()
        .unwrap()
        .contains("pthread_setschedparam"));
}

#[test]
fn every_spawned_body_runs_exactly_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut handles: Vec<ThreadHandle> = (0..8)
        .map(|_| {
            let runs = Arc::clone(&runs);
            ThreadHandle::spawn(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in &mut handles {
        handle.join().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 8);
    assert!(handles.iter().all(|h| !h.joinable()));
}

#[test]
fn moved_handle_keeps_the_thread() {
    let handle = ThreadHandle::spawn(|| std::thread::sleep(Duration::from_millis(5)));
    let id = handle.id();

    let mut moved = handle;
    assert_eq!(moved.id(), id);
    assert!(moved.joinable());
    moved.join().unwrap();
}

#[test]
fn second_join_is_rejected() {
    let mut handle = ThreadHandle::spawn(|| {});
    assert_eq!(handle.join(), Ok(()));
    assert_eq!(handle.join(), Err(JoinError::NotJoinable));
}

#[test]
fn exited_thread_accepts_a_scheduling_change() {
    let mut handle = ThreadHandle::spawn(|| {});
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(handle.try_set_scheduling(PolicyKind::Normal, 0), Ok(()));
    handle.join().unwrap();
}

#[test]
fn invalid_priority_never_reaches_the_os() {
    for policy in [SchedulingPolicy::Fifo(0), SchedulingPolicy::RoundRobin(-3)] {
        let handle = ThreadHandle::start(policy, || {});
        assert!(!handle.joinable());
        assert!(handle.last_error().is_some());
    }
}

#[test]
fn pinned_thread_runs_on_its_cpu() {
    let config = ThreadConfig::default().with_cpu(0).with_name("pinned");
    let mut handle = ThreadHandle::start(config, || {
        // SAFETY: sched_getcpu has no preconditions.
        let cpu = unsafe { libc::sched_getcpu() };
        assert_eq!(cpu, 0);
    });
    if !handle.joinable() {
        eprintln!("skipped: {:?}", handle.last_error());
        return;
    }
    handle.join().unwrap();
}

#[test]
fn realtime_start_without_privileges_reports_last_error() {
    if preempt::system::can_create_realtime_threads() {
        eprintln!("skipped: process may create real-time threads");
        return;
    }
    let handle = ThreadHandle::start(SchedulingPolicy::fifo(1), || {});
    assert!(!handle.joinable());
    assert!(handle.last_error().unwrap().contains("failed"));
}

#[test]
fn out_of_range_priority_change_keeps_the_old_policy() {
    let (mut handle, release) = parked();
    assert_rejected_change(&mut handle, OUT_OF_RANGE);
    release.send(()).unwrap();
    handle.join().unwrap();
}

#[test]
fn unprivileged_realtime_change_keeps_the_old_policy() {
    if preempt::system::can_create_realtime_threads() {
        eprintln!("skipped: process may use real-time policies");
        return;
    }
    let (mut handle, release) = parked();
    assert_rejected_change(&mut handle, 1);
    release.send(()).unwrap();
    handle.join().unwrap();
}

#[test]
#[ignore = "terminates the process; driven by failed_change_scheduling_terminates_the_process"]
fn change_scheduling_child() {
    if std::env::var_os(CHILD_ENV).is_none() {
        return;
    }
    let (mut handle, release) = parked();
    handle.change_scheduling(PolicyKind::Fifo, OUT_OF_RANGE);
    release.send(()).unwrap();
    let _ = handle.join();
    println!("failed scheduling change survived");
}

#[test]
fn failed_change_scheduling_terminates_the_process() {
    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args(["change_scheduling_child", "--exact", "--ignored", "--nocapture"])
        .env(CHILD_ENV, "1")
        .env_remove(preempt::fail::DEBUGGER_ENV)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("pthread_setschedparam"), "stderr: {stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("survived"));
}
