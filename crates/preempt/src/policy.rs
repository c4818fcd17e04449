//! Scheduling policy value type.
//!
//! A [`SchedulingPolicy`] is either `Normal` (the time-shared default, where
//! priority carries no meaning) or one of the two fixed-priority real-time
//! policies. Real-time policies require a priority greater than zero; a policy
//! value that exists has already passed that check.

use core::fmt;

use crate::error::ConfigError;

/// Policy tag without a priority, as passed to live scheduling changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    /// `SCHED_OTHER`
    Normal,
    /// `SCHED_FIFO`
    Fifo,
    /// `SCHED_RR`
    RoundRobin,
}

impl PolicyKind {
    /// True for `Fifo` and `RoundRobin`.
    pub fn is_realtime(self) -> bool {
        !matches!(self, Self::Normal)
    }

    /// The `SCHED_*` constant for this policy.
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Self::Normal => libc::SCHED_OTHER,
            Self::Fifo => libc::SCHED_FIFO,
            Self::RoundRobin => libc::SCHED_RR,
        }
    }

    /// Maps a `SCHED_*` constant back to a policy tag. Policies this crate
    /// does not manage (batch, idle, deadline) yield `None`.
    pub fn from_raw(raw: libc::c_int) -> Option<Self> {
        match raw {
            libc::SCHED_OTHER => Some(Self::Normal),
            libc::SCHED_FIFO => Some(Self::Fifo),
            libc::SCHED_RR => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("SCHED_OTHER"),
            Self::Fifo => f.write_str("SCHED_FIFO"),
            Self::RoundRobin => f.write_str("SCHED_RR"),
        }
    }
}

/// A validated scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulingPolicy {
    /// `SCHED_OTHER`, time-shared. Priority has no meaning.
    #[default]
    Normal,
    /// `SCHED_FIFO` at the given priority (> 0). Runs until it blocks or
    /// yields.
    Fifo(i32),
    /// `SCHED_RR` at the given priority (> 0). Time-sliced among equals.
    RoundRobin(i32),
}

impl SchedulingPolicy {
    /// Checks a policy/priority pair without constructing a policy.
    ///
    /// Real-time policies reject priorities `<= 0`. `Normal` accepts any value.
    pub fn validate(kind: PolicyKind, priority: i32) -> Result<(), ConfigError> {
        if kind.is_realtime() && priority <= 0 {
            return Err(ConfigError::InvalidPriority {
                policy: kind,
                priority,
            });
        }
        Ok(())
    }

    /// Builds a policy from a tag and priority. `Normal` drops the priority.
    pub fn new(kind: PolicyKind, priority: i32) -> Result<Self, ConfigError> {
        Self::validate(kind, priority)?;
        Ok(match kind {
            PolicyKind::Normal => Self::Normal,
            PolicyKind::Fifo => Self::Fifo(priority),
            PolicyKind::RoundRobin => Self::RoundRobin(priority),
        })
    }

    /// `SCHED_FIFO` at `priority`.
    ///
    /// # Panics
    ///
    /// Panics if `priority <= 0`. Use [`SchedulingPolicy::new`] to handle the
    /// error instead.
    pub fn fifo(priority: i32) -> Self {
        assert!(priority > 0, "SCHED_FIFO priority {priority} must be > 0");
        Self::Fifo(priority)
    }

    /// `SCHED_RR` at `priority`.
    ///
    /// # Panics
    ///
    /// Panics if `priority <= 0`.
    pub fn round_robin(priority: i32) -> Self {
        assert!(priority > 0, "SCHED_RR priority {priority} must be > 0");
        Self::RoundRobin(priority)
    }

    /// Policy tag without the priority.
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Normal => PolicyKind::Normal,
            Self::Fifo(_) => PolicyKind::Fifo,
            Self::RoundRobin(_) => PolicyKind::RoundRobin,
        }
    }

    /// Priority as applied to the OS. Always 0 for `Normal`.
    pub fn priority(&self) -> i32 {
        match *self {
            Self::Normal => 0,
            Self::Fifo(p) | Self::RoundRobin(p) => p,
        }
    }

    /// True for `Fifo` and `RoundRobin`.
    pub fn is_realtime(&self) -> bool {
        self.kind().is_realtime()
    }

    /// Re-checks the invariant for values built through the enum variants
    /// directly rather than through the constructors.
    pub(crate) fn checked(self) -> Result<Self, ConfigError> {
        Self::validate(self.kind(), self.priority())?;
        Ok(self)
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "{}", PolicyKind::Normal),
            Self::Fifo(p) | Self::RoundRobin(p) => write!(f, "{}({p})", self.kind()),
        }
    }
}
