//! Execution time of critical tasks.
//!
//! Two tasks with a 10 ms budget each sleep three times for 1 ms. Context
//! switches may happen between the sleeps, which the budget leaves room for.
//! With `--overrun` a task with a 1 ms budget sleeps for 3 ms and the process
//! must be terminated.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use preempt::{CriticalTask, SchedulingPolicy};
use preempt_selftest::{init_logging, CommonArgs};

#[derive(Parser, Debug)]
#[command(name = "critical-deadline", version, about = "Measure critical task runtimes")]
struct Opts {
    /// Run a task that exceeds its budget; the process must not survive it
    #[arg(long)]
    overrun: bool,

    /// Run the tasks under SCHED_OTHER instead of SCHED_FIFO
    #[arg(long)]
    normal: bool,

    #[command(flatten)]
    common: CommonArgs,
}

fn sleep_3ms() {
    std::thread::sleep(Duration::from_millis(1));
    std::thread::sleep(Duration::from_micros(1000));
    std::thread::sleep(Duration::from_nanos(1_000_000));
}

fn start(opts: &Opts, task: &mut CriticalTask, priority: i32) {
    let policy = if opts.normal {
        SchedulingPolicy::Normal
    } else {
        SchedulingPolicy::fifo(priority)
    };
    task.start_with(opts.common.pinned(policy));
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging();
    let session = opts.common.session();

    if opts.overrun {
        let mut task = CriticalTask::new(Duration::from_millis(1), sleep_3ms);
        start(&opts, &mut task, 32);
        task.join()?;
        log::error!("overrun of {:?} not detected", task.runtime());
        drop(session);
        return Ok(ExitCode::FAILURE);
    }

    let budget = Duration::from_millis(10);
    let mut t1 = CriticalTask::new(budget, sleep_3ms);
    let mut t2 = CriticalTask::new(budget, sleep_3ms);

    start(&opts, &mut t1, 32);
    start(&opts, &mut t2, 31);

    t1.join()?;
    println!("t1: {:?} of {:?}", t1.runtime(), t1.budget());
    t2.join()?;
    println!("t2: {:?} of {:?}", t2.runtime(), t2.budget());

    drop(session);
    Ok(ExitCode::SUCCESS)
}
