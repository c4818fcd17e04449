//! Process-wide real-time context.
//!
//! The memory manager is the one thing known to disturb real-time scheduling:
//! globals and statics are loaded on page faults, and real-time threads are
//! then not always started in creation order. Locking all current and future
//! pages before the first `SCHED_FIFO`/`SCHED_RR` thread is created removes
//! those faults.
//!
//! All operations here are best-effort. A process that cannot lock its pages
//! still runs correctly, only with worse jitter, so failures are reported and
//! never escalated to a fatal abort.
//!
//! [`ProcessRealtimeContext::begin`] and [`ProcessRealtimeContext::end`] are
//! not reference counted: independent subsystems pairing their own calls will
//! unlock pages for each other.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::mman::{mlockall, munlockall, MlockAllFlags};
use nix::sys::resource::{setrlimit, Resource};

use crate::error::ProcessError;

/// Kernel PM QoS interface for CPU wake-up latency.
pub const CPU_DMA_LATENCY: &str = "/dev/cpu_dma_latency";

static PAGES_LOCKED: AtomicBool = AtomicBool::new(false);

/// Process-wide page locking that must precede real-time threads.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRealtimeContext;

impl ProcessRealtimeContext {
    /// Raises the locked-memory limit to unbounded, then locks all current
    /// and future pages. Returns `true` if both steps succeeded. Calling it
    /// again before [`end`](Self::end) is harmless.
    pub fn begin() -> bool {
        let unlimited = report(unlimit_lock_pages());
        let locked = report(lock_all_pages());
        if locked {
            PAGES_LOCKED.store(true, Ordering::SeqCst);
        }
        unlimited && locked
    }

    /// Unlocks all pages.
    pub fn end() -> bool {
        let unlocked = report(unlock_all_pages());
        if unlocked {
            PAGES_LOCKED.store(false, Ordering::SeqCst);
        }
        unlocked
    }

    /// True between a successful page lock and the next successful unlock.
    pub fn pages_locked() -> bool {
        PAGES_LOCKED.load(Ordering::SeqCst)
    }
}

fn report(result: Result<(), ProcessError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            log::warn!("{err}");
            false
        }
    }
}

/// Sets `RLIMIT_MEMLOCK` to infinity so the whole address space may be
/// locked.
pub fn unlimit_lock_pages() -> Result<(), ProcessError> {
    setrlimit(
        Resource::RLIMIT_MEMLOCK,
        libc::RLIM_INFINITY,
        libc::RLIM_INFINITY,
    )
    .map_err(|source| ProcessError::Os {
        step: "setrlimit(RLIMIT_MEMLOCK)",
        source,
    })
}

/// Locks every page mapped into the process, now and in the future.
///
/// Covers code, data, stack, shared libraries, shared memory and
/// memory-mapped files. Pages stay resident until [`unlock_all_pages`].
pub fn lock_all_pages() -> Result<(), ProcessError> {
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE).map_err(|source| {
        ProcessError::Os {
            step: "mlockall(MCL_CURRENT | MCL_FUTURE)",
            source,
        }
    })?;
    log::debug!("all pages locked");
    Ok(())
}

/// Unlocks every page locked by [`lock_all_pages`].
pub fn unlock_all_pages() -> Result<(), ProcessError> {
    munlockall().map_err(|source| ProcessError::Os {
        step: "munlockall()",
        source,
    })?;
    log::debug!("all pages unlocked");
    Ok(())
}

/// Stops the process from writing core files.
pub fn disable_core_file() -> Result<(), ProcessError> {
    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(|source| ProcessError::Os {
        step: "setrlimit(RLIMIT_CORE)",
        source,
    })
}

/// Id of the calling process.
pub fn process_id() -> u32 {
    std::process::id()
}

/// Id of the parent process.
pub fn parent_process_id() -> u32 {
    std::os::unix::process::parent_id()
}

/// Open request for a maximum CPU wake-up latency.
///
/// The kernel honours the request while the descriptor stays open; dropping
/// the value (or calling [`reset`](Self::reset)) withdraws it.
#[derive(Debug)]
pub struct CpuLatencyRequest {
    file: File,
    microseconds: u32,
}

impl CpuLatencyRequest {
    /// Requests a wake-up latency of at most `microseconds` through
    /// [`CPU_DMA_LATENCY`]. `0` keeps the CPUs out of deep idle states.
    pub fn request(microseconds: u32) -> Result<Self, ProcessError> {
        Self::request_at(CPU_DMA_LATENCY, microseconds)
    }

    /// Same as [`request`](Self::request) against another device file.
    pub fn request_at(path: impl AsRef<Path>, microseconds: u32) -> Result<Self, ProcessError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ProcessError::Io {
                step: "open CPU latency device",
                source,
            })?;
        file.write_all(&microseconds.to_ne_bytes())
            .map_err(|source| ProcessError::Io {
                step: "write CPU latency request",
                source,
            })?;
        log::debug!("requested CPU latency {microseconds}us via {}", path.display());
        Ok(Self { file, microseconds })
    }

    /// The latency that was requested.
    pub fn microseconds(&self) -> u32 {
        self.microseconds
    }

    /// Withdraws the request by closing the device.
    pub fn reset(self) {
        drop(self.file);
        log::debug!("CPU latency request withdrawn");
    }
}

/// What a [`RealtimeSession`] sets up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub unlimit_memlock: bool,
    pub lock_pages: bool,
    pub disable_core_file: bool,
    /// Maximum CPU wake-up latency in microseconds.
    pub cpu_latency: Option<u32>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            unlimit_memlock: true,
            lock_pages: true,
            disable_core_file: false,
            cpu_latency: None,
        }
    }
}

impl RealtimeConfig {
    /// Builder starting from the defaults.
    pub fn builder() -> RealtimeConfigBuilder {
        RealtimeConfigBuilder::default()
    }
}

/// Builder for [`RealtimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RealtimeConfigBuilder {
    config: RealtimeConfig,
}

impl RealtimeConfigBuilder {
    /// Raise `RLIMIT_MEMLOCK` to infinity.
    pub fn unlimit_memlock(mut self, yes: bool) -> Self {
        self.config.unlimit_memlock = yes;
        self
    }

    /// Lock current and future pages.
    pub fn lock_pages(mut self, yes: bool) -> Self {
        self.config.lock_pages = yes;
        self
    }

    /// Set `RLIMIT_CORE` to zero.
    pub fn disable_core_file(mut self, yes: bool) -> Self {
        self.config.disable_core_file = yes;
        self
    }

    /// Hold a CPU wake-up latency request for the session.
    pub fn cpu_latency(mut self, microseconds: u32) -> Self {
        self.config.cpu_latency = Some(microseconds);
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> RealtimeConfig {
        self.config
    }
}

/// Scope that applies a [`RealtimeConfig`] and undoes it on drop.
#[derive(Debug)]
pub struct RealtimeSession {
    pages_locked: bool,
    latency: Option<CpuLatencyRequest>,
}

impl RealtimeSession {
    /// Applies `config`. Every step is best-effort; failures are logged and
    /// reflected in [`pages_locked`](Self::pages_locked) and
    /// [`cpu_latency`](Self::cpu_latency).
    pub fn begin(config: &RealtimeConfig) -> Self {
        if config.unlimit_memlock {
            report(unlimit_lock_pages());
        }
        let pages_locked = config.lock_pages && report(lock_all_pages());
        if pages_locked {
            PAGES_LOCKED.store(true, Ordering::SeqCst);
        }
        if config.disable_core_file {
            report(disable_core_file());
        }
        let latency = config
            .cpu_latency
            .and_then(|us| match CpuLatencyRequest::request(us) {
                Ok(request) => Some(request),
                Err(err) => {
                    log::warn!("{err}");
                    None
                }
            });
        Self {
            pages_locked,
            latency,
        }
    }

    /// True if this session locked the pages.
    pub fn pages_locked(&self) -> bool {
        self.pages_locked
    }

    /// The latency request held by this session, if it was granted.
    pub fn cpu_latency(&self) -> Option<&CpuLatencyRequest> {
        self.latency.as_ref()
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Some(latency) = self.latency.take() {
            latency.reset();
        }
        if self.pages_locked {
            ProcessRealtimeContext::end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_config_defaults_lock_pages() {
        let config = RealtimeConfig::default();
        assert!(config.unlimit_memlock);
        assert!(config.lock_pages);
        assert!(!config.disable_core_file);
        assert_eq!(config.cpu_latency, None);
    }

    #[test]
    fn realtime_config_builder() {
        let config = RealtimeConfig::builder()
            .lock_pages(false)
            .unlimit_memlock(false)
            .disable_core_file(true)
            .cpu_latency(0)
            .build();

        assert!(!config.lock_pages);
        assert!(!config.unlimit_memlock);
        assert!(config.disable_core_file);
        assert_eq!(config.cpu_latency, Some(0));
    }

    #[test]
    fn cpu_latency_request_writes_native_u32() {
        let path = std::env::temp_dir().join(format!("preempt-latency-{}", process_id()));
        std::fs::write(&path, b"").unwrap();

        let request = CpuLatencyRequest::request_at(&path, 42).unwrap();
        assert_eq!(request.microseconds(), 42);
        request.reset();

        let written = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written, 42u32.to_ne_bytes());
    }

    #[test]
    fn cpu_latency_request_reports_missing_device() {
        let err = CpuLatencyRequest::request_at("/nonexistent/cpu_dma_latency", 0).unwrap_err();
        assert!(err.to_string().contains("open CPU latency device"));
    }

    #[test]
    fn empty_session_changes_nothing() {
        let config = RealtimeConfig::builder()
            .unlimit_memlock(false)
            .lock_pages(false)
            .build();
        let session = RealtimeSession::begin(&config);
        assert!(!session.pages_locked());
        assert!(session.cpu_latency().is_none());
    }
}
