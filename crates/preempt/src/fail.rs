//! Fatal abort.
//!
//! Used where continuing is unsafe: a deadline overrun, a real-time thread
//! that could not be put under its policy, or a joinable handle dropped in a
//! debug build. The process exits with `EXIT_FAILURE` without unwinding.
//!
//! ```text
//! $ RUNNING_UNDER_DEBUGGER=1 gdb --args <executable> arg1 arg2
//! ```
//!
//! stops in the debugger right before the exit.

use std::io::Write;

/// Environment variable that enables the breakpoint before an abort.
pub const DEBUGGER_ENV: &str = "RUNNING_UNDER_DEBUGGER";

/// True if [`DEBUGGER_ENV`] is set to a non-empty value.
pub fn running_under_debugger() -> bool {
    std::env::var_os(DEBUGGER_ENV).is_some_and(|value| !value.is_empty())
}

/// Raises `SIGTRAP`.
pub fn breakpoint() {
    // SAFETY: raise() has no memory safety preconditions.
    unsafe {
        libc::raise(libc::SIGTRAP);
    }
}

/// Prints `message`, flushes stdout and stderr, then exits with
/// `EXIT_FAILURE`.
pub fn fail(message: &str) -> ! {
    log::error!("{message}");
    let _ = std::io::stdout().flush();
    {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{message}");
        let _ = stderr.flush();
    }
    if running_under_debugger() {
        breakpoint();
    }
    std::process::exit(libc::EXIT_FAILURE)
}

/// [`fail`] with the call site prepended as `FAIL: <file>(<line>): `.
#[macro_export]
macro_rules! fail {
    ($($arg:tt)+) => {
        $crate::fail::fail(&format!(
            "FAIL: {}({}): {}",
            file!(),
            line!(),
            format_args!($($arg)+)
        ))
    };
}
