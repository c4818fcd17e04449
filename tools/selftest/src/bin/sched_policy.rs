//! Threads under each policy, and a live change from `SCHED_OTHER` to
//! `SCHED_FIFO`.

use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use preempt::{PolicyKind, SchedulingPolicy, ThreadHandle, Verifier};
use preempt_selftest::{finish, init_logging, join_all, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "sched-policy", version, about = "Start threads under every scheduling policy")]
struct Opts {
    #[command(flatten)]
    common: CommonArgs,
}

fn start_parked(
    opts: &Opts,
    policy: SchedulingPolicy,
) -> Result<(ThreadHandle, mpsc::Sender<()>)> {
    let (tx, rx) = mpsc::channel::<()>();
    let handle = ThreadHandle::start(opts.common.pinned(policy), move || {
        let _ = rx.recv();
    });
    if !handle.joinable() {
        bail!("{policy}: {}", handle.last_error().unwrap_or("not started"));
    }
    Ok((handle, tx))
}

fn release_all(threads: Vec<(ThreadHandle, mpsc::Sender<()>)>) {
    let handles = threads.into_iter().map(|(handle, release)| {
        let _ = release.send(());
        handle
    });
    join_all(handles);
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging();
    let session = opts.common.session();
    let verifier = Arc::new(Verifier::new());

    let policies = [
        SchedulingPolicy::Normal,
        SchedulingPolicy::fifo(1),
        SchedulingPolicy::round_robin(1),
    ];
    let mut threads = Vec::new();
    for policy in policies {
        match start_parked(&opts, policy) {
            Ok((handle, release)) => {
                if let Some(live) = handle.current_scheduling() {
                    preempt::verify!(verifier, live == policy);
                }
                threads.push((handle, release));
            }
            Err(err) => {
                release_all(threads);
                return Err(err);
            }
        }
    }

    let (normal, _) = &mut threads[0];
    let changed = normal.try_set_scheduling(PolicyKind::Fifo, 1);
    if let Err(err) = &changed {
        log::error!("{err}");
    }
    preempt::verify!(verifier, changed.is_ok());
    preempt::verify!(verifier, normal.policy() == SchedulingPolicy::fifo(1));
    if let Some(live) = normal.current_scheduling() {
        preempt::verify!(verifier, live == SchedulingPolicy::fifo(1));
    }

    release_all(threads);

    drop(session);
    Ok(finish("sched-policy", &verifier))
}
