//! Verification context for self-test drivers.
//!
//! A [`Verifier`] counts failed checks instead of toggling process-wide
//! state. It is `Sync`, so one instance can be shared (by reference or `Arc`)
//! with every thread a test starts.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Verifier {
    failures: AtomicUsize,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one check and returns `ok`.
    ///
    /// A failed check prints `Verification failed! <expr> at <file>(<line>)`
    /// to stderr.
    pub fn check(&self, ok: bool, expr: &str, file: &str, line: u32) -> bool {
        if !ok {
            eprintln!("Verification failed! {expr} at {file}({line})");
            log::debug!("verification failed: {expr} at {file}:{line}");
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// True if no check has failed so far.
    pub fn passed(&self) -> bool {
        self.failures() == 0
    }

    /// `EXIT_SUCCESS` if all checks passed, `EXIT_FAILURE` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            libc::EXIT_SUCCESS
        } else {
            libc::EXIT_FAILURE
        }
    }
}

/// Checks an expression against a [`Verifier`] and evaluates to its value.
///
/// ```
/// let verifier = preempt::Verifier::new();
/// let n = 3;
/// if preempt::verify!(verifier, n == 3) {
///     // n is 3
/// }
/// assert!(verifier.passed());
/// ```
#[macro_export]
macro_rules! verify {
    ($verifier:expr, $cond:expr) => {
        $verifier.check($cond, stringify!($cond), file!(), line!())
    };
}
