use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use preempt::{JoinError, PolicyKind, SchedulingPolicy, ThreadHandle, Verifier};

use crate::{join_in_order, run_decrement, CommonArgs};

#[derive(Parser, Debug)]
struct Harness {
    #[command(flatten)]
    common: CommonArgs,
}

#[test]
fn common_args_default_to_cpu_zero_with_realtime() {
    let harness = Harness::try_parse_from(["selftest"]).unwrap();
    assert_eq!(harness.common.cpu, 0);
    assert!(!harness.common.no_realtime);
    assert_eq!(harness.common.cpu_latency, None);
}

#[test]
fn common_args_parse_overrides() {
    let harness =
        Harness::try_parse_from(["selftest", "--cpu", "2", "--no-realtime", "--cpu-latency", "0"])
            .unwrap();
    assert_eq!(harness.common.cpu, 2);
    assert!(harness.common.no_realtime);
    assert_eq!(harness.common.cpu_latency, Some(0));
    assert!(harness.common.session().is_none());
}

#[test]
fn pinned_config_carries_policy_and_cpu() {
    let harness = Harness::try_parse_from(["selftest", "--cpu", "1"]).unwrap();
    let config = harness.common.pinned(SchedulingPolicy::fifo(5));
    assert_eq!(config.policy, SchedulingPolicy::fifo(5));
    assert_eq!(config.cpu, Some(1));
}

#[test]
fn decrement_run_rejects_invalid_priority() {
    let harness = Harness::try_parse_from(["selftest", "--no-realtime"]).unwrap();
    let verifier = Arc::new(Verifier::new());
    let err = run_decrement(&harness.common, PolicyKind::Fifo, &[0], 0, &verifier).unwrap_err();
    assert!(err.to_string().contains("invalid priority"));
    assert!(verifier.passed());
}

#[test]
fn failed_join_still_joins_the_remaining_threads() {
    let finished = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&finished);
    let handles = vec![
        ThreadHandle::spawn(|| panic!("first thread fails")),
        ThreadHandle::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            done.store(true, Ordering::SeqCst);
        }),
    ];

    let err = join_in_order(handles).unwrap_err();
    assert_eq!(err.downcast_ref::<JoinError>(), Some(&JoinError::Panicked));
    assert!(err.to_string().contains("joining thread 0"));
    assert!(finished.load(Ordering::SeqCst));
}
