use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of sessions currently pending or running.
#[derive(Debug, Default)]
pub struct SessionCounter {
    active: AtomicUsize,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the count after the increment.
    pub fn increment(&self) -> usize {
        self.active.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Increments only while the count is below `ceiling`.
    pub fn try_increment(&self, ceiling: usize) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < ceiling).then_some(count + 1)
            })
            .is_ok()
    }

    /// Returns the count after the decrement.
    ///
    /// # Panics
    ///
    /// Panics when called without a matching increment.
    pub fn decrement(&self) -> usize {
        match self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            }) {
            Ok(previous) => previous - 1,
            Err(_) => panic!("session counter decremented below zero"),
        }
    }

    /// Claims a session slot if fewer than `ceiling` sessions are active.
    pub fn admit(self: &Arc<Self>, ceiling: usize) -> Option<SessionPermit> {
        self.try_increment(ceiling).then(|| SessionPermit {
            counter: Arc::clone(self),
        })
    }

    /// Claims a session slot regardless of the ceiling.
    pub fn open(self: &Arc<Self>) -> SessionPermit {
        self.increment();
        SessionPermit {
            counter: Arc::clone(self),
        }
    }
}

/// One counted session. Dropping the permit ends the session's count.
#[derive(Debug)]
pub struct SessionPermit {
    counter: Arc<SessionCounter>,
}

impl SessionPermit {
    /// Ends the session's count and returns how many sessions remain.
    pub fn release(self) -> usize {
        let counter = Arc::clone(&self.counter);
        drop(self);
        counter.active_count()
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}
