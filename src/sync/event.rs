use crate::util::loom::sync::{Condvar, Mutex};

/// A binary rendezvous primitive: a mutex/condvar pair exposed as
/// `wait`/`post`/`broadcast`.
///
/// `post` wakes at most one waiter; `broadcast` wakes all of them. As with
/// any condition variable, spurious wakeups are possible — callers must
/// always re-check whatever condition they were waiting on after `wait`
/// returns, rather than assuming the wakeup implies the condition holds.
pub(crate) struct Event {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Event {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the current thread until a concurrent `post` or `broadcast`.
    pub(crate) fn wait(&self) {
        let guard = crate::util::lock(&self.mutex);
        let _guard = self
            .condvar
            .wait(guard)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
    }

    /// Wakes exactly one waiter, if any are currently blocked in `wait`.
    pub(crate) fn post(&self) {
        // Matching C's `pthread_cond_signal`, which requires no lock be
        // held. `loom`'s `Condvar` mirrors the std API and is fine with
        // this too.
        self.condvar.notify_one();
    }

    /// Wakes every waiter currently blocked in `wait`.
    pub(crate) fn broadcast(&self) {
        self.condvar.notify_all();
    }
}
