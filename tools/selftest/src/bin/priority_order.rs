//! Real-time threads started with non-increasing priorities run in creation
//! order, both under `SCHED_FIFO` and `SCHED_RR`.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use preempt::{PolicyKind, Verifier};
use preempt_selftest::{finish, init_logging, run_decrement, CommonArgs};

const FIFO_TABLES: &[&[i32]] = &[
    &[1, 1, 1],
    &[10, 10, 10],
    &[30, 20, 10],
    &[30, 29, 28, 20, 19, 18],
];

const RR_TABLES: &[&[i32]] = &[&[30, 20, 10], &[30, 29, 28, 27, 26, 25]];

#[derive(Parser, Debug)]
#[command(name = "priority-order", version, about = "Check order of prioritised threads")]
struct Opts {
    #[command(flatten)]
    common: CommonArgs,
}

fn run(opts: &Opts, kind: PolicyKind, table: &[i32], verifier: &Arc<Verifier>) -> Result<()> {
    preempt::verify!(
        verifier,
        table.windows(2).all(|pair| pair[1] <= pair[0])
    );
    let n = table.len() as i32;
    let last = run_decrement(&opts.common, kind, table, n, verifier)?;
    log::info!("{kind} {table:?}: counter ended at {last}");
    preempt::verify!(verifier, last == 0);
    Ok(())
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging();

    let session = opts.common.session();
    let verifier = Arc::new(Verifier::new());

    let runs = FIFO_TABLES
        .iter()
        .map(|table| (PolicyKind::Fifo, *table))
        .chain(RR_TABLES.iter().map(|table| (PolicyKind::RoundRobin, *table)));
    for (kind, table) in runs {
        run(&opts, kind, table, &verifier)?;
        if !verifier.passed() {
            break;
        }
    }

    drop(session);
    Ok(finish("priority-order", &verifier))
}
