//! # preempt
//!
//! Deterministic, priority-controlled thread execution for latency-sensitive
//! work on POSIX systems. Threads are created under an explicit scheduling
//! policy (`SCHED_OTHER`, `SCHED_FIFO` or `SCHED_RR`), owned by exactly one
//! handle, and joined explicitly.
//!
//! ## Module Overview
//! - [`policy`]   – Scheduling policy value type and priority validation.
//! - [`thread`]   – [`ThreadHandle`], the owner of one OS thread.
//! - [`task`]     – [`MonoTask`] (one replaceable thread) and [`PolyTask`]
//!   (a growing set of threads).
//! - [`critical`] – [`CriticalTask`], a mono task whose body is measured
//!   against a fixed budget.
//! - [`process`]  – Process-wide page locking and resource limits that must
//!   precede real-time threads.
//! - [`system`]   – Platform queries (priority ranges, kernel flavour).
//! - [`clock`], [`fail`], [`verify`] – Monotonic clock, fatal abort and the
//!   verification context used by the self-tests.
//!
//! ## Limitations
//! Overrun detection in [`CriticalTask`] is retrospective. The platform offers
//! no way to interrupt a running body, so a system needing hard enforcement
//! must add a supervising watchdog thread able to signal or kill the worker.

pub mod clock;
pub mod critical;
pub mod error;
pub mod fail;
pub mod policy;
pub mod process;
pub mod system;
pub mod task;
pub mod thread;
pub mod verify;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use critical::{CriticalTask, RuntimeStats};
pub use error::{
    ConfigError, DeadlineExceeded, JoinError, ProcessError, SchedulingError, ThreadCreationError,
};
pub use fail::fail;
pub use policy::{PolicyKind, SchedulingPolicy};
pub use process::{CpuLatencyRequest, ProcessRealtimeContext, RealtimeConfig, RealtimeSession};
pub use task::{MonoTask, PolyTask, Task};
pub use thread::{NativeId, ThreadConfig, ThreadHandle};
pub use verify::Verifier;

#[cfg(test)]
mod tests;
