//! Error types shared by threads, tasks and the process context.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::policy::PolicyKind;

/// Rejected before any OS call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid priority {priority} for {policy} (must be > 0)")]
    InvalidPriority { policy: PolicyKind, priority: i32 },
}

/// The OS refused to set up the attributes of a thread or to create it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThreadCreationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{step} failed: '{message}'")]
    Os { step: &'static str, message: String },
}

/// Joining a thread handle failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("thread handle is not joinable")]
    NotJoinable,
    #[error("pthread_join() failed: '{message}'")]
    Os { message: String },
    #[error("thread body panicked")]
    Panicked,
}

/// A live policy change failed. The thread keeps its previous policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("FAILED: pthread_setschedparam(): '{message}'")]
    Os { message: String },
}

/// A critical task body ran past its budget.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("deadline exceeded: budget {budget:?}, measured {measured:?}")]
pub struct DeadlineExceeded {
    pub budget: Duration,
    pub measured: Duration,
}

impl DeadlineExceeded {
    pub fn overrun(&self) -> Duration {
        self.measured.saturating_sub(self.budget)
    }
}

/// Process-wide resource limit or page locking call failed.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{step} failed: {source}")]
    Os {
        step: &'static str,
        #[source]
        source: nix::errno::Errno,
    },
    #[error("{step} failed: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Message text for an error number returned by a pthread call.
pub(crate) fn os_message(errnum: i32) -> String {
    io::Error::from_raw_os_error(errnum).to_string()
}
