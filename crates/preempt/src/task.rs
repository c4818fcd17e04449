//! Tasks: objects that distribute work to member threads.
//!
//! - [`MonoTask`] holds a single thread slot. Spawning joins the previous
//!   thread first, so at most one thread is ever owned.
//! - [`PolyTask`] holds a growing sequence of threads and may be spawned into
//!   from several threads at once.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{JoinError, ThreadCreationError};
use crate::thread::{ThreadConfig, ThreadHandle};

/// Common interface of everything that owns member threads.
pub trait Task {
    /// Joins the member thread(s).
    fn join(&mut self) -> Result<(), JoinError>;

    /// True if any member thread is still joinable.
    fn joinable(&self) -> bool;
}

/// Distributes work to a single thread.
///
/// Spawn and join are meant to be called from one thread only; the type
/// offers `&mut self` methods to make that explicit.
#[derive(Debug, Default)]
pub struct MonoTask {
    thread: ThreadHandle,
}

impl MonoTask {
    /// Empty task with an unstarted slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the current thread, then starts `f` under the Normal policy.
    pub fn spawn<F>(&mut self, f: F) -> &mut ThreadHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with(ThreadConfig::default(), f)
    }

    /// Joins the current thread, then starts `f` under `config`.
    ///
    /// The returned handle can be used to chain a scheduling change. If the
    /// previous thread cannot be joined the process is terminated, since
    /// replacing it would leave two threads behind one slot.
    pub fn spawn_with<F>(&mut self, config: impl Into<ThreadConfig>, f: F) -> &mut ThreadHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.retire();
        self.thread = ThreadHandle::start(config, f);
        &mut self.thread
    }

    /// Like [`spawn_with`](Self::spawn_with) but reports a failed start as an
    /// error. The slot is left unstarted in that case.
    pub fn try_spawn_with<F>(
        &mut self,
        config: impl Into<ThreadConfig>,
        f: F,
    ) -> Result<&mut ThreadHandle, ThreadCreationError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.retire();
        self.thread = ThreadHandle::try_start(config, f)?;
        Ok(&mut self.thread)
    }

    /// Joins the member thread if it is joinable.
    pub fn join(&mut self) -> Result<(), JoinError> {
        self.join_current()
    }

    /// True while the slot holds an unjoined thread.
    pub fn joinable(&self) -> bool {
        self.thread.joinable()
    }

    /// The handle in the slot.
    pub fn thread(&self) -> &ThreadHandle {
        &self.thread
    }

    /// Mutable access to the handle in the slot, for scheduling changes.
    pub fn thread_mut(&mut self) -> &mut ThreadHandle {
        &mut self.thread
    }

    /// Joins the previous thread before its slot is reused. A body that
    /// panicked has still been reaped, so only OS join failures are fatal.
    fn retire(&mut self) {
        match self.join_current() {
            Ok(()) | Err(JoinError::Panicked) => {}
            Err(err) => {
                crate::fail::fail(&format!("MonoTask: previous thread not joined: {err}"))
            }
        }
    }

    fn join_current(&mut self) -> Result<(), JoinError> {
        if self.thread.joinable() {
            self.thread.join()
        } else {
            Ok(())
        }
    }
}

impl Task for MonoTask {
    fn join(&mut self) -> Result<(), JoinError> {
        MonoTask::join(self)
    }

    fn joinable(&self) -> bool {
        MonoTask::joinable(self)
    }
}

/// Distributes work to many threads.
///
/// [`spawn`](Self::spawn) takes `&self` and may be called concurrently; only
/// the append is guarded. [`join`](Self::join) must not race with spawns.
#[derive(Debug, Default)]
pub struct PolyTask {
    threads: Mutex<Vec<ThreadHandle>>,
}

impl PolyTask {
    /// Empty task without members.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a thread running `f` under the Normal policy.
    pub fn spawn<F>(&self, f: F) -> MappedMutexGuard<'_, ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with(ThreadConfig::default(), f)
    }

    /// Appends a thread running `f` under `config` and returns the new
    /// handle.
    ///
    /// The returned guard keeps the sequence locked; drop it before spawning
    /// again from the same thread.
    pub fn spawn_with<F>(
        &self,
        config: impl Into<ThreadConfig>,
        f: F,
    ) -> MappedMutexGuard<'_, ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = ThreadHandle::start(config, f);
        let mut threads = self.threads.lock();
        let index = threads.len();
        threads.push(handle);
        MutexGuard::map(threads, move |threads| &mut threads[index])
    }

    /// Joins every member, one after another in spawn order.
    ///
    /// Members that never started are dropped silently. Members whose join
    /// fails at the OS level stay in the sequence; the first error is
    /// returned after all members were tried.
    pub fn join(&self) -> Result<(), JoinError> {
        let members = std::mem::take(&mut *self.threads.lock());
        let mut first_error = None;
        let mut kept = Vec::new();

        for mut thread in members {
            if !thread.joinable() {
                continue;
            }
            match thread.join() {
                Ok(()) => {}
                Err(err) => {
                    if thread.joinable() {
                        kept.push(thread);
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        if !kept.is_empty() {
            self.threads.lock().extend(kept);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// True if any member is joinable.
    pub fn joinable(&self) -> bool {
        self.threads.lock().iter().any(ThreadHandle::joinable)
    }

    /// Number of members since the last join.
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    /// True if there are no members since the last join.
    pub fn is_empty(&self) -> bool {
        self.threads.lock().is_empty()
    }
}

impl Task for PolyTask {
    fn join(&mut self) -> Result<(), JoinError> {
        PolyTask::join(self)
    }

    fn joinable(&self) -> bool {
        PolyTask::joinable(self)
    }
}
