//! Deferred task scheduling.
//!
//! Promises never run continuations inline: they hand them to the
//! [`Scheduler`] they were created with. Any FIFO "run this later" capability
//! works. [`MicrotaskQueue`] is one driven by hand, which makes the order of
//! every continuation observable and deterministic.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::{lock, Error, Promise};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after the current synchronous work, in submission order.
pub trait Schedule: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Cloneable handle to a [`Schedule`] implementation.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<dyn Schedule>,
}

impl Scheduler {
    pub fn new<S: Schedule + 'static>(schedule: S) -> Self {
        Self {
            inner: Arc::new(schedule),
        }
    }

    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.schedule(Box::new(task))
    }

    pub(crate) fn schedule_boxed(&self, task: Task) {
        self.inner.schedule(task)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// A FIFO task queue that only runs when told to.
///
/// # Examples
///
/// ```
/// use promise_then::MicrotaskQueue;
/// use std::sync::{Arc, Mutex};
///
/// let queue = MicrotaskQueue::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// for i in 0..3 {
///     let seen = seen.clone();
///     queue.scheduler().schedule(move || seen.lock().unwrap().push(i));
/// }
/// assert!(seen.lock().unwrap().is_empty());
/// assert_eq!(queue.run_until_idle(), 3);
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
/// ```
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler that pushes onto this queue.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Runs the oldest queued task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        // The lock is released before the task runs; tasks schedule more tasks.
        let task = lock(&self.tasks).pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs tasks, including ones scheduled along the way, until the queue is
    /// empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        trace!(ran, "microtask queue idle");
        ran
    }

    /// Runs tasks until `promise` settles and returns its outcome.
    ///
    /// Fails with [`Error::Stalled`] if the queue empties first, which means
    /// something outside the queue still has to settle the promise.
    pub fn run_until_settled<T, E>(&self, promise: &Promise<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        loop {
            if let Ok(settled) = promise.settled() {
                return Ok(settled.into_result());
            }
            if !self.run_next() {
                return Err(Error::Stalled);
            }
        }
    }
}

impl Schedule for MicrotaskQueue {
    fn schedule(&self, task: Task) {
        lock(&self.tasks).push_back(task);
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrotaskQueue")
            .field("queued", &self.len())
            .finish()
    }
}
