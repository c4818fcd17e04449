//! Mono and poly task spawning, optionally followed by a policy change of
//! every spawned thread.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use preempt::{MonoTask, PolicyKind, PolyTask, Verifier};
use preempt_selftest::{finish, init_logging, CommonArgs};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Policy {
    Fifo,
    Rr,
}

impl From<Policy> for PolicyKind {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Fifo => PolicyKind::Fifo,
            Policy::Rr => PolicyKind::RoundRobin,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "task-spawn", version, about = "Spawn threads through mono and poly tasks")]
struct Opts {
    /// Move every spawned thread to this real-time policy
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Priority used together with --policy
    #[arg(short, long, default_value_t = 1)]
    priority: i32,

    #[arg(long, default_value_t = 10)]
    rounds: usize,

    #[command(flatten)]
    common: CommonArgs,
}

/// Body that checks the argument it was handed, shared with the spawner.
fn check_arg(
    verifier: &Arc<Verifier>,
    wanted: i32,
    arg: &Arc<i32>,
) -> impl FnOnce() + Send + 'static {
    let verifier = Arc::clone(verifier);
    let arg = Arc::clone(arg);
    move || {
        preempt::verify!(verifier, *arg == wanted);
    }
}

fn round(opts: &Opts, verifier: &Arc<Verifier>) -> Result<()> {
    let mut mono = MonoTask::new();
    let poly = PolyTask::new();
    let change = opts.policy.map(|p| (PolicyKind::from(p), opts.priority));
    let args = [Arc::new(1), Arc::new(2), Arc::new(3)];

    for (wanted, arg) in (1..).zip(&args) {
        let handle = mono.spawn(check_arg(verifier, wanted, arg));
        if let Some((kind, priority)) = change {
            handle.change_scheduling(kind, priority);
        }
    }
    for _ in 0..3 {
        for (wanted, arg) in (1..).zip(&args) {
            let mut handle = poly.spawn(check_arg(verifier, wanted, arg));
            if let Some((kind, priority)) = change {
                handle.change_scheduling(kind, priority);
            }
        }
    }
    preempt::verify!(verifier, poly.len() == 9);

    let mono_joined = mono.join();
    let poly_joined = poly.join();
    mono_joined?;
    poly_joined?;
    Ok(())
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging();
    let session = opts.common.session();
    let verifier = Arc::new(Verifier::new());

    for i in 0..opts.rounds {
        round(&opts, &verifier)?;
        log::debug!("round {i} done");
    }

    drop(session);
    Ok(finish("task-spawn", &verifier))
}
