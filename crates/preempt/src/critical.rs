//! Critical tasks: mono tasks with a logical time budget.
//!
//! Each invocation of the body runs on a dedicated (normally `SCHED_FIFO`)
//! thread and is timed with a monotonic clock:
//!
//! ```text
//!  Idle --start()--> Running --body returns, measured <= budget--> Idle
//!                       |
//!                       +--measured > budget--> process terminated
//! ```
//!
//! The check happens after the body returns. Nothing here can stop a body
//! that never returns; that needs an external watchdog able to signal or kill
//! the worker thread.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{DeadlineExceeded, JoinError, ThreadCreationError};
use crate::policy::{PolicyKind, SchedulingPolicy};
use crate::task::{MonoTask, Task};
use crate::thread::ThreadConfig;

type Body = dyn Fn() + Send + Sync + 'static;

/// Run and idle times across the invocations of a [`CriticalTask`].
///
/// Idle time is measured from the end of one invocation (or construction) to
/// the start of the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub invocations: u64,
    pub run_min: Option<Duration>,
    pub run_max: Option<Duration>,
    pub idle_min: Option<Duration>,
    pub idle_max: Option<Duration>,
}

impl RuntimeStats {
    fn record(&mut self, run: Duration, idle: Duration) {
        self.invocations += 1;
        self.run_min = Some(self.run_min.map_or(run, |min| min.min(run)));
        self.run_max = Some(self.run_max.map_or(run, |max| max.max(run)));
        self.idle_min = Some(self.idle_min.map_or(idle, |min| min.min(idle)));
        self.idle_max = Some(self.idle_max.map_or(idle, |max| max.max(idle)));
    }
}

struct MeterState {
    stats: RuntimeStats,
    last_stop: Instant,
}

/// Measurements shared between the task and its worker thread.
struct Meter {
    last_ns: AtomicU64,
    state: Mutex<MeterState>,
}

impl Meter {
    fn new(created: Instant) -> Self {
        Self {
            last_ns: AtomicU64::new(0),
            state: Mutex::new(MeterState {
                stats: RuntimeStats::default(),
                last_stop: created,
            }),
        }
    }

    fn record(&self, start: Instant, stop: Instant, run: Duration) {
        self.last_ns
            .store(u64::try_from(run.as_nanos()).unwrap_or(u64::MAX), Ordering::SeqCst);

        let mut state = self.state.lock();
        let idle = start.saturating_duration_since(state.last_stop);
        state.stats.record(run, idle);
        state.last_stop = stop;
    }

    fn last(&self) -> Duration {
        Duration::from_nanos(self.last_ns.load(Ordering::SeqCst))
    }
}

/// Times one call of `body` and checks it against `budget`. Only
/// invocations within budget reach the meter, so the recorded runtime never
/// exceeds the budget.
fn invoke<C: Clock>(
    clock: &C,
    budget: Duration,
    meter: &Meter,
    body: &Body,
) -> Result<Duration, DeadlineExceeded> {
    let start = clock.now();
    body();
    let stop = clock.now();
    let measured = stop.saturating_duration_since(start);
    if measured > budget {
        return Err(DeadlineExceeded { budget, measured });
    }
    meter.record(start, stop, measured);
    Ok(measured)
}

/// A body executed on a real-time thread under a fixed time budget.
///
/// ```no_run
/// use std::time::Duration;
/// use preempt::CriticalTask;
///
/// let mut task = CriticalTask::new(Duration::from_millis(10), || {
///     std::thread::sleep(Duration::from_millis(3));
/// });
/// task.start(32);
/// task.join().unwrap();
/// assert!(task.runtime() <= Duration::from_millis(10));
/// ```
pub struct CriticalTask<C: Clock = MonotonicClock> {
    task: MonoTask,
    budget: Duration,
    body: Arc<Body>,
    clock: Arc<C>,
    meter: Arc<Meter>,
}

impl CriticalTask<MonotonicClock> {
    /// Task timed with the OS monotonic clock. Nothing runs until
    /// [`start`](Self::start).
    pub fn new<F>(budget: Duration, body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_clock(budget, Arc::new(MonotonicClock), body)
    }
}

impl<C: Clock> CriticalTask<C> {
    /// Task timed with `clock`. Idle time is measured from this call.
    pub fn with_clock<F>(budget: Duration, clock: Arc<C>, body: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let meter = Arc::new(Meter::new(clock.now()));
        Self {
            task: MonoTask::new(),
            budget,
            body: Arc::new(body),
            clock,
            meter,
        }
    }

    /// Runs one invocation under `SCHED_FIFO` at `priority`.
    ///
    /// Terminates the process if the thread cannot be started or put under
    /// the policy, and later if the invocation overruns the budget.
    pub fn start(&mut self, priority: i32) {
        match SchedulingPolicy::new(PolicyKind::Fifo, priority) {
            Ok(policy) => self.start_with(policy),
            Err(err) => crate::fail::fail(&format!("CriticalTask: {err}")),
        }
    }

    /// Like [`start`](Self::start) with an arbitrary thread configuration.
    pub fn start_with(&mut self, config: impl Into<ThreadConfig>) {
        let config = config.into();
        let policy = config.policy;
        let entry = self.entry();
        match self.task.try_spawn_with(config, entry) {
            Ok(handle) => {
                handle.change_scheduling(policy.kind(), policy.priority());
            }
            Err(err) => crate::fail::fail(&format!("CriticalTask: {err}")),
        }
    }

    /// Non-fatal variant of [`start`](Self::start): a thread that cannot be
    /// created under `SCHED_FIFO` is reported instead. The budget check of the
    /// invocation itself stays fatal.
    pub fn try_start(&mut self, priority: i32) -> Result<(), ThreadCreationError> {
        let policy = SchedulingPolicy::new(PolicyKind::Fifo, priority)?;
        self.try_start_with(policy)
    }

    /// Non-fatal variant of [`start_with`](Self::start_with). The thread
    /// keeps the policy it was created with.
    pub fn try_start_with(
        &mut self,
        config: impl Into<ThreadConfig>,
    ) -> Result<(), ThreadCreationError> {
        let entry = self.entry();
        self.task.try_spawn_with(config, entry).map(|_| ())
    }

    /// Runs one invocation on the calling thread and returns an overrun as an
    /// error instead of terminating. An overrun leaves
    /// [`runtime`](Self::runtime) and [`stats`](Self::stats) untouched.
    pub fn measure(&self) -> Result<Duration, DeadlineExceeded> {
        invoke(&*self.clock, self.budget, &self.meter, &*self.body)
    }

    /// Waits for the running invocation, if any.
    pub fn join(&mut self) -> Result<(), JoinError> {
        self.task.join()
    }

    /// True while an invocation thread is unjoined.
    pub fn joinable(&self) -> bool {
        self.task.joinable()
    }

    /// Upper bound on the duration of one invocation.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Duration of the most recent completed invocation.
    pub fn runtime(&self) -> Duration {
        self.meter.last()
    }

    /// Run and idle times of the invocations within budget so far.
    pub fn stats(&self) -> RuntimeStats {
        self.meter.state.lock().stats
    }

    fn entry(&self) -> impl FnOnce() + Send + 'static {
        let clock = Arc::clone(&self.clock);
        let meter = Arc::clone(&self.meter);
        let body = Arc::clone(&self.body);
        let budget = self.budget;
        move || {
            if let Err(err) = invoke(&*clock, budget, &meter, &*body) {
                crate::fail!("CriticalTask: {err} (overrun {:?})", err.overrun());
            }
        }
    }
}

impl<C: Clock> Task for CriticalTask<C> {
    fn join(&mut self) -> Result<(), JoinError> {
        CriticalTask::join(self)
    }

    fn joinable(&self) -> bool {
        CriticalTask::joinable(self)
    }
}

impl<C: Clock> fmt::Debug for CriticalTask<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalTask")
            .field("budget", &self.budget)
            .field("runtime", &self.runtime())
            .field("task", &self.task)
            .finish()
    }
}
