//! Single-assignment promises with `then` chaining.
//!
//! A [`Promise`] settles at most once, either fulfilled with a value or
//! rejected with a reason. Continuations attached with [`Promise::then`] run
//! as deferred tasks on an injected [`Scheduler`], after the code that
//! settled the promise has returned, in the order they were attached.
//!
//! ```
//! use promise_then::{MicrotaskQueue, Promise, Step};
//!
//! let queue = MicrotaskQueue::new();
//! let scheduler = queue.scheduler();
//!
//! let promise = Promise::<i32, String>::resolved(&scheduler, 1)
//!     .map(|v| v + 1)
//!     .and_then(|v| Step::<i32, _>::Reject(format!("got {v}")))
//!     .catch(|reason| Step::<_, String>::Value(reason.len() as i32));
//!
//! assert_eq!(queue.run_until_settled(&promise).unwrap(), Ok(5));
//! ```
//!
//! [`all`], [`all_settled`], [`race`] and [`any`] combine many promises into one.

use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod channel;
pub mod combinator;
pub mod promise;
pub mod scheduler;
pub mod settle;

pub use combinator::{all, all_settled, any, race};
pub use promise::{Promise, Resolver};
pub use scheduler::{MicrotaskQueue, Schedule, Scheduler, Task};
pub use settle::{Settled, Status, Step};

/// Message carried by every [`AggregateError`].
pub const AGGREGATE_MESSAGE: &str = "All promises were rejected";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("promise is still pending")]
    Pending,
    #[error("microtask queue ran dry with the promise still pending")]
    Stalled,
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(String),
    #[error("scheduler thread panicked")]
    WorkerPanicked,
}

/// Rejection reason of [`any`] when no input fulfilled.
///
/// `reasons` holds every input's rejection reason in input order. It is empty
/// when `any` was given no promises at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("All promises were rejected")]
pub struct AggregateError<E: Debug> {
    reasons: Vec<E>,
}

impl<E: Debug> AggregateError<E> {
    pub fn new(reasons: Vec<E>) -> Self {
        Self { reasons }
    }

    pub fn message(&self) -> &'static str {
        AGGREGATE_MESSAGE
    }

    pub fn reasons(&self) -> &[E] {
        &self.reasons
    }

    pub fn into_reasons(self) -> Vec<E> {
        self.reasons
    }
}

/// Nothing runs user code while holding one of our locks, so a poisoned lock
/// still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
