//! Thread handle with an explicit POSIX scheduling policy.
//!
//! A [`ThreadHandle`] owns exactly one OS thread. The thread is created with
//! joinable-at-creation semantics and explicit (non-inherited) scheduling, so
//! a real-time policy is in force from the first instruction the thread runs.
//!
//! ```text
//!  unstarted --start()--> joinable --join()--> unstarted
//!      ^                      |
//!      +------detach()--------+
//! ```
//!
//! A failed start leaves the handle unstarted with [`ThreadHandle::last_error`]
//! naming the failing step. A failed join leaves it joinable.

use core::fmt;
use std::ffi::c_void;
use std::mem::{self, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::error::{os_message, JoinError, SchedulingError, ThreadCreationError};
use crate::policy::{PolicyKind, SchedulingPolicy};

type Body = Box<dyn FnOnce() + Send + 'static>;

/// Address returned by the entry trampoline when the body panicked.
static PANIC_MARKER: u8 = 0;

fn panic_marker() -> *mut c_void {
    ptr::addr_of!(PANIC_MARKER) as *mut c_void
}

/// Opaque OS identity of a thread. Unique while the thread is alive; may be
/// reused once it has been joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(libc::pthread_t);

impl NativeId {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        // SAFETY: pthread_self() is always safe to call.
        Self(unsafe { libc::pthread_self() })
    }

    /// The underlying `pthread_t`.
    pub fn as_raw(&self) -> libc::pthread_t {
        self.0
    }
}

/// Creation parameters for a thread.
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
    pub policy: SchedulingPolicy,
    pub stack_size: Option<usize>,
    /// CPU the thread is pinned to from creation.
    pub cpu: Option<usize>,
    pub name: Option<String>,
}

impl ThreadConfig {
    /// Configuration with `policy` and platform defaults for the rest.
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Stack size in bytes, raised to `PTHREAD_STACK_MIN` if smaller.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Pins the thread to `cpu`. Only honoured on Linux.
    pub fn with_cpu(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Thread name, truncated to 15 bytes by the kernel limit.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl From<SchedulingPolicy> for ThreadConfig {
    fn from(policy: SchedulingPolicy) -> Self {
        Self::new(policy)
    }
}

/// Owner of one OS thread.
#[derive(Default)]
pub struct ThreadHandle {
    native: Option<libc::pthread_t>,
    policy: SchedulingPolicy,
    last_error: Option<String>,
}

// SAFETY: the handle only carries the pthread_t identity. Every pthread call
// made through it is valid from any thread.
unsafe impl Send for ThreadHandle {}

impl ThreadHandle {
    /// Starts `f` under the Normal policy.
    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::start(ThreadConfig::default(), f)
    }

    /// Starts `f` under `config`.
    ///
    /// Never fails outright: if any step fails the returned handle is not
    /// joinable and [`last_error`](Self::last_error) describes the step and
    /// the OS error. No thread is left running in that case.
    pub fn start<F>(config: impl Into<ThreadConfig>, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let config = config.into();
        let policy = config.policy;
        match Self::try_start(config, f) {
            Ok(handle) => handle,
            Err(err) => {
                log::debug!("thread start under {policy} failed: {err}");
                Self {
                    native: None,
                    policy: SchedulingPolicy::Normal,
                    last_error: Some(err.to_string()),
                }
            }
        }
    }

    /// Starts `f` under `config`, returning the failure as an error.
    pub fn try_start<F>(config: impl Into<ThreadConfig>, f: F) -> Result<Self, ThreadCreationError>
    where
        F: FnOnce() + Send + 'static,
    {
        let config = config.into();
        let policy = config.policy.checked()?;

        let mut attr = Attributes::new()?;
        attr.configure(&config, policy)?;

        let body: Box<Body> = Box::new(Box::new(f));
        let arg = Box::into_raw(body) as *mut c_void;
        let mut native = MaybeUninit::<libc::pthread_t>::uninit();
        // SAFETY: attr is initialised, `arg` is a leaked Box<Body> that the
        // trampoline takes back exactly once.
        let errnum =
            unsafe { libc::pthread_create(native.as_mut_ptr(), attr.as_ptr(), trampoline, arg) };
        if errnum != 0 {
            // SAFETY: the thread was not created, so the body is still ours.
            drop(unsafe { Box::from_raw(arg as *mut Body) });
            return Err(ThreadCreationError::Os {
                step: "pthread_create()",
                message: os_message(errnum),
            });
        }
        // SAFETY: pthread_create() succeeded and wrote the id.
        let native = unsafe { native.assume_init() };

        if let Some(name) = config.name.as_deref() {
            set_name(native, name);
        }

        log::debug!("started thread {native:?} under {policy}");
        Ok(Self {
            native: Some(native),
            policy,
            last_error: None,
        })
    }

    /// True while the handle owns a thread that has not been joined or
    /// detached. A thread that finished but was not joined is still joinable.
    pub fn joinable(&self) -> bool {
        self.native.is_some()
    }

    /// Identity of the owned thread, `None` when unstarted.
    pub fn id(&self) -> Option<NativeId> {
        self.native.map(NativeId)
    }

    /// Policy requested at start or by the last successful change. `Normal`
    /// for a handle whose start failed.
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Description of the most recent failed operation on this handle.
    /// Cleared by a successful join.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Blocks until the owned thread finishes.
    ///
    /// Joining an unstarted, joined or detached handle is rejected with
    /// [`JoinError::NotJoinable`]. If the OS join call fails the handle stays
    /// joinable. A body that panicked is reaped and reported as
    /// [`JoinError::Panicked`].
    pub fn join(&mut self) -> Result<(), JoinError> {
        let Some(native) = self.native else {
            self.last_error = Some(JoinError::NotJoinable.to_string());
            return Err(JoinError::NotJoinable);
        };

        let mut ret: *mut c_void = ptr::null_mut();
        // SAFETY: `native` is a joinable thread owned by this handle.
        let errnum = unsafe { libc::pthread_join(native, &mut ret) };
        if errnum != 0 {
            let err = JoinError::Os {
                message: os_message(errnum),
            };
            self.last_error = Some(err.to_string());
            return Err(err);
        }

        self.native = None;
        log::debug!("joined thread {native:?}");
        if ret == panic_marker() {
            self.last_error = Some(JoinError::Panicked.to_string());
            return Err(JoinError::Panicked);
        }
        self.last_error = None;
        Ok(())
    }

    /// Lets the thread run on unowned. The handle becomes unstarted.
    pub fn detach(&mut self) {
        if let Some(native) = self.native.take() {
            // SAFETY: `native` is joinable and owned by this handle.
            let errnum = unsafe { libc::pthread_detach(native) };
            if errnum != 0 {
                log::warn!("pthread_detach() failed: '{}'", os_message(errnum));
            }
        }
    }

    /// Hands the owned thread over to a new handle, leaving `self` unstarted.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Best-effort read of the live policy and priority.
    pub fn current_scheduling(&self) -> Option<SchedulingPolicy> {
        let native = self.native?;
        let (raw, priority) = read_scheduling(native)?;
        let kind = PolicyKind::from_raw(raw)?;
        SchedulingPolicy::new(kind, priority).ok()
    }

    /// Changes the policy and priority of the running thread.
    ///
    /// A thread that already exited (or a handle that owns none) is left as
    /// it is and reported as success. Invalid arguments and missing
    /// privileges are reported as [`SchedulingError::Os`]; the thread keeps
    /// its previous policy.
    pub fn try_set_scheduling(
        &mut self,
        kind: PolicyKind,
        priority: i32,
    ) -> Result<(), SchedulingError> {
        let policy = match SchedulingPolicy::new(kind, priority) {
            Ok(policy) => policy,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };
        let Some(native) = self.native else {
            return Ok(());
        };

        if let Some((raw, current)) = read_scheduling(native) {
            log::trace!("thread {native:?}: policy {raw} priority {current} -> {policy}");
        }

        // SAFETY: sched_param is plain data.
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        param.sched_priority = policy.priority();
        // SAFETY: `native` is owned by this handle and not yet joined.
        let errnum = unsafe { libc::pthread_setschedparam(native, kind.as_raw(), &param) };
        match errnum {
            0 => {
                self.policy = policy;
                Ok(())
            }
            // Exited but not joined yet: nothing left to reschedule.
            libc::ESRCH => Ok(()),
            errnum => {
                let err = SchedulingError::Os {
                    message: os_message(errnum),
                };
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Like [`try_set_scheduling`](Self::try_set_scheduling) but a failure
    /// terminates the process: a real-time thread under the wrong policy is
    /// not safe to keep running.
    pub fn change_scheduling(&mut self, kind: PolicyKind, priority: i32) -> &mut Self {
        if let Err(err) = self.try_set_scheduling(kind, priority) {
            crate::fail::fail(&err.to_string());
        }
        self
    }

    /// Number of threads the hardware can run concurrently. A hint only.
    pub fn hardware_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        let Some(native) = self.native else {
            return;
        };
        if cfg!(debug_assertions) && !std::thread::panicking() {
            crate::fail::fail(&format!(
                "Verification failed! thread {native:?} dropped while still joinable"
            ));
        }
        log::warn!("thread {native:?} dropped while still joinable, detaching");
        self.detach();
    }
}

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.native)
            .field("policy", &self.policy)
            .field("joinable", &self.joinable())
            .field("last_error", &self.last_error)
            .finish()
    }
}

extern "C" fn trampoline(arg: *mut c_void) -> *mut c_void {
    // SAFETY: `arg` is the Box<Body> leaked by try_start(), handed to exactly
    // one thread.
    let body = unsafe { Box::from_raw(arg as *mut Body) };
    match panic::catch_unwind(AssertUnwindSafe(move || (*body)())) {
        Ok(()) => ptr::null_mut(),
        Err(_) => {
            log::error!("thread body panicked");
            panic_marker()
        }
    }
}

/// Initialised `pthread_attr_t`, destroyed on drop.
struct Attributes {
    attr: Box<libc::pthread_attr_t>,
}

impl Attributes {
    fn new() -> Result<Self, ThreadCreationError> {
        // SAFETY: pthread_attr_t is plain data; pthread_attr_init() fills it.
        let mut attr: Box<libc::pthread_attr_t> = Box::new(unsafe { mem::zeroed() });
        // SAFETY: `attr` points to writable storage that stays put.
        check("pthread_attr_init()", unsafe {
            libc::pthread_attr_init(&mut *attr)
        })?;
        Ok(Self { attr })
    }

    fn as_ptr(&self) -> *const libc::pthread_attr_t {
        &*self.attr
    }

    fn configure(
        &mut self,
        config: &ThreadConfig,
        policy: SchedulingPolicy,
    ) -> Result<(), ThreadCreationError> {
        let attr: *mut libc::pthread_attr_t = &mut *self.attr;

        // SAFETY (all calls below): `attr` was initialised in new().
        check("pthread_attr_setdetachstate(PTHREAD_CREATE_JOINABLE)", unsafe {
            libc::pthread_attr_setdetachstate(attr, libc::PTHREAD_CREATE_JOINABLE)
        })?;
        check("pthread_attr_setinheritsched(PTHREAD_EXPLICIT_SCHED)", unsafe {
            libc::pthread_attr_setinheritsched(attr, libc::PTHREAD_EXPLICIT_SCHED)
        })?;
        check("pthread_attr_setschedpolicy()", unsafe {
            libc::pthread_attr_setschedpolicy(attr, policy.kind().as_raw())
        })?;

        // SAFETY: sched_param is plain data.
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        param.sched_priority = policy.priority();
        check("pthread_attr_setschedparam()", unsafe {
            libc::pthread_attr_setschedparam(attr, &param)
        })?;

        if let Some(size) = config.stack_size {
            let size = size.max(libc::PTHREAD_STACK_MIN);
            check("pthread_attr_setstacksize()", unsafe {
                libc::pthread_attr_setstacksize(attr, size)
            })?;
        }

        if let Some(cpu) = config.cpu {
            set_affinity(attr, cpu)?;
        }
        Ok(())
    }
}

impl Drop for Attributes {
    fn drop(&mut self) {
        // SAFETY: initialised in new(), destroyed once.
        unsafe {
            libc::pthread_attr_destroy(&mut *self.attr);
        }
    }
}

fn check(step: &'static str, errnum: libc::c_int) -> Result<(), ThreadCreationError> {
    if errnum == 0 {
        Ok(())
    } else {
        Err(ThreadCreationError::Os {
            step,
            message: os_message(errnum),
        })
    }
}

#[cfg(target_os = "linux")]
fn set_affinity(attr: *mut libc::pthread_attr_t, cpu: usize) -> Result<(), ThreadCreationError> {
    const STEP: &str = "pthread_attr_setaffinity_np()";

    // CPU_SET indexes a fixed-size mask.
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(ThreadCreationError::Os {
            step: STEP,
            message: os_message(libc::EINVAL),
        });
    }
    // SAFETY: cpu_set_t is plain data manipulated through the libc macros.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
    }
    // SAFETY: `attr` is initialised and `set` outlives the call.
    check(STEP, unsafe {
        libc::pthread_attr_setaffinity_np(attr, mem::size_of::<libc::cpu_set_t>(), &set)
    })
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_attr: *mut libc::pthread_attr_t, cpu: usize) -> Result<(), ThreadCreationError> {
    log::warn!("CPU affinity not supported on this platform, ignoring cpu {cpu}");
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_name(native: libc::pthread_t, name: &str) {
    use std::ffi::CString;

    /// Longest name the kernel accepts, without the terminating NUL.
    const MAX_NAME_LEN: usize = 15;

    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let Ok(cname) = CString::new(&name[..end]) else {
        log::warn!("thread name {name:?} contains a NUL byte");
        return;
    };
    // SAFETY: `native` is alive (not joined yet) and `cname` is NUL terminated.
    let errnum = unsafe { libc::pthread_setname_np(native, cname.as_ptr()) };
    if errnum != 0 {
        log::warn!("pthread_setname_np() failed: '{}'", os_message(errnum));
    }
}

#[cfg(not(target_os = "linux"))]
fn set_name(_native: libc::pthread_t, name: &str) {
    log::debug!("thread names not supported on this platform, ignoring {name:?}");
}

/// `(policy, priority)` of a live thread.
pub(crate) fn read_scheduling(native: libc::pthread_t) -> Option<(libc::c_int, i32)> {
    let mut policy: libc::c_int = 0;
    // SAFETY: sched_param is plain data.
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    // SAFETY: out-pointers are valid; an exited thread yields ESRCH.
    let errnum = unsafe { libc::pthread_getschedparam(native, &mut policy, &mut param) };
    (errnum == 0).then_some((policy, param.sched_priority))
}
