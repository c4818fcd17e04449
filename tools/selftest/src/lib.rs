//! Shared plumbing for the self-test drivers.
//!
//! Every driver follows the same shape: parse [`CommonArgs`], set up logging,
//! open a [`RealtimeSession`] (unless `--no-realtime`), run its checks against
//! a [`Verifier`] and exit with [`Verifier::exit_code`].

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use preempt::{
    PolicyKind, RealtimeConfig, RealtimeSession, SchedulingPolicy, ThreadConfig, ThreadHandle,
    Verifier,
};

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// CPU every test thread is pinned to
    #[arg(long, default_value_t = 0)]
    pub cpu: usize,

    /// Skip page locking and resource limit changes
    #[arg(long = "no-realtime")]
    pub no_realtime: bool,

    /// Request this maximum CPU wake-up latency (microseconds)
    #[arg(long = "cpu-latency", value_name = "US")]
    pub cpu_latency: Option<u32>,
}

impl CommonArgs {
    /// Opens the real-time session for the duration of the test.
    pub fn session(&self) -> Option<RealtimeSession> {
        if self.no_realtime {
            log::info!("real-time context disabled");
            return None;
        }
        let mut builder = RealtimeConfig::builder();
        if let Some(us) = self.cpu_latency {
            builder = builder.cpu_latency(us);
        }
        let session = RealtimeSession::begin(&builder.build());
        if !session.pages_locked() {
            log::warn!("pages not locked, scheduling order may suffer from page faults");
        }
        Some(session)
    }

    pub fn pinned(&self, policy: SchedulingPolicy) -> ThreadConfig {
        ThreadConfig::new(policy).with_cpu(self.cpu)
    }
}

/// Logs at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();
}

/// Starts one thread per entry of `priorities` under `kind`, pinned to
/// `args.cpu`. Thread `i` checks that the shared counter equals
/// `start - i` and decrements it. Returns the final counter value.
pub fn run_decrement(
    args: &CommonArgs,
    kind: PolicyKind,
    priorities: &[i32],
    start: i32,
    verifier: &Arc<Verifier>,
) -> Result<i32> {
    let counter = Arc::new(AtomicI32::new(start));
    let mut handles = Vec::with_capacity(priorities.len());

    for (i, &priority) in priorities.iter().enumerate() {
        let policy = SchedulingPolicy::new(kind, priority)?;
        let expected = start - i as i32;
        let counter = Arc::clone(&counter);
        let verifier = Arc::clone(verifier);

        let handle = ThreadHandle::start(args.pinned(policy), move || {
            preempt::verify!(verifier, counter.load(Ordering::SeqCst) == expected);
            counter.fetch_sub(1, Ordering::SeqCst);
        });
        if !handle.joinable() {
            let reason = handle.last_error().unwrap_or("thread not started").to_owned();
            join_all(handles);
            bail!("{policy}: {reason}");
        }
        handles.push(handle);
    }

    join_in_order(handles).with_context(|| format!("joining {kind} threads"))?;
    Ok(counter.load(Ordering::SeqCst))
}

/// Joins `handles` in order. On the first failure the rest are still joined
/// before the error is returned.
pub fn join_in_order(handles: Vec<ThreadHandle>) -> Result<()> {
    let mut handles = handles.into_iter().enumerate();
    while let Some((i, mut handle)) = handles.next() {
        if let Err(err) = handle.join() {
            join_all(handles.map(|(_, handle)| handle));
            return Err(anyhow::Error::new(err).context(format!("joining thread {i}")));
        }
    }
    Ok(())
}

/// Joins every handle, logging failures instead of stopping at them.
pub fn join_all(handles: impl IntoIterator<Item = ThreadHandle>) {
    for mut handle in handles {
        if let Err(err) = handle.join() {
            log::warn!("{err}");
        }
    }
}

/// Logs the verdict and converts it into a process exit code.
pub fn finish(name: &str, verifier: &Verifier) -> std::process::ExitCode {
    if verifier.passed() {
        log::info!("{name}: passed");
        std::process::ExitCode::SUCCESS
    } else {
        log::error!("{name}: {} verification(s) failed", verifier.failures());
        std::process::ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests;
