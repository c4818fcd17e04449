//! Equal-priority `SCHED_FIFO` threads run in creation order.
//!
//! Each thread expects the shared counter at a certain value before
//! decrementing it, so the counter ends at -1 only if every thread ran in the
//! order `pthread_create()` was called.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use preempt::{PolicyKind, Verifier};
use preempt_selftest::{finish, init_logging, run_decrement, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "fifo-order", version, about = "Check FIFO order of equal-priority threads")]
struct Opts {
    /// Number of threads per run
    #[arg(short = 'n', long, default_value_t = 10)]
    threads: usize,

    /// SCHED_FIFO priority shared by all threads
    #[arg(short, long, default_value_t = 10)]
    priority: i32,

    /// How many times to repeat the run
    #[arg(short, long, default_value_t = 1)]
    runs: usize,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging();

    let session = opts.common.session();
    let verifier = Arc::new(Verifier::new());
    let table = vec![opts.priority; opts.threads];
    let start = opts.threads as i32 - 1;

    for run in 0..opts.runs {
        let last = run_decrement(&opts.common, PolicyKind::Fifo, &table, start, &verifier)?;
        log::debug!("run {run}: counter ended at {last}");
        if !preempt::verify!(verifier, last == -1) {
            break;
        }
    }

    drop(session);
    Ok(finish("fifo-order", &verifier))
}
