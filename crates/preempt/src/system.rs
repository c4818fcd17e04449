//! Platform queries.

use std::fs;

use crate::policy::{PolicyKind, SchedulingPolicy};
use crate::thread::ThreadHandle;

/// `(min, max)` priority the platform accepts for `kind`.
///
/// `Normal` is always `(0, 0)`.
pub fn priority_range(kind: PolicyKind) -> (i32, i32) {
    if !kind.is_realtime() {
        return (0, 0);
    }
    // SAFETY: both calls only inspect their argument.
    unsafe {
        (
            libc::sched_get_priority_min(kind.as_raw()),
            libc::sched_get_priority_max(kind.as_raw()),
        )
    }
}

/// Highest real-time priority the user may request (`ulimit -r`).
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn realtime_priority_limit() -> Option<u64> {
    use nix::sys::resource::{getrlimit, Resource};

    getrlimit(Resource::RLIMIT_RTPRIO)
        .ok()
        .map(|(soft, _hard)| soft as u64)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn realtime_priority_limit() -> Option<u64> {
    None
}

/// Kernel thread id of the caller.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> i64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> i64 {
    0
}

/// True on the thread whose id equals the process id.
pub fn is_main_thread() -> bool {
    current_thread_id() == i64::from(std::process::id())
}

pub fn number_of_processors() -> usize {
    ThreadHandle::hardware_concurrency()
}

/// True if the kernel carries the PREEMPT_RT patches.
pub fn have_preempt_rt() -> bool {
    if let Ok(flag) = fs::read_to_string("/sys/kernel/realtime") {
        return flag.trim() == "1";
    }
    fs::read_to_string("/proc/version")
        .map(|version| version.contains("PREEMPT_RT"))
        .unwrap_or(false)
}

/// True if real-time throttling is enabled.
///
/// Since 2.6.25 the kernel reserves 5% of each second for non-real-time tasks
/// by default (`sched_rt_runtime_us` = 950000 of `sched_rt_period_us` =
/// 1000000). A runtime of `-1` disables throttling.
pub fn have_realtime_throttling() -> bool {
    match fs::read_to_string("/proc/sys/kernel/sched_rt_runtime_us") {
        Ok(runtime) => runtime.trim().parse::<i64>().map_or(true, |us| us != -1),
        Err(_) => cfg!(target_os = "linux"),
    }
}

pub fn have_realtime_kernel() -> bool {
    have_preempt_rt() && !have_realtime_throttling()
}

/// Probes whether the caller may create `SCHED_FIFO` threads by starting and
/// joining one at the lowest priority.
pub fn can_create_realtime_threads() -> bool {
    let (min, _) = priority_range(PolicyKind::Fifo);
    let Ok(policy) = SchedulingPolicy::new(PolicyKind::Fifo, min.max(1)) else {
        return false;
    };
    match ThreadHandle::try_start(policy, || {}) {
        Ok(mut probe) => probe.join().is_ok(),
        Err(err) => {
            log::debug!("real-time threads unavailable: {err}");
            false
        }
    }
}
