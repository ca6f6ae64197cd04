//! Promises that settle from a whole collection of promises.
//!
//! The combinators watch their inputs through synchronous settlement hooks
//! rather than `then`, so an input settling is seen on the spot, in the order
//! the inputs actually settle.

use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::settle::{Settled, Step};
use crate::{lock, AggregateError, Promise, Scheduler};

/// Result slots filled in input order, whatever order the inputs settle in.
struct Tally<V> {
    slots: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Tally<V> {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
        }
    }

    /// Stores the value for `index`; returns every value once the last
    /// slot is filled.
    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        if self.slots[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(self.slots.iter_mut().filter_map(Option::take).collect())
    }
}

/// Fulfills with every input's value, in input order, once all of them have
/// fulfilled. Rejects with the first rejection reason seen.
///
/// An empty input fulfills straight away with an empty `Vec`.
///
/// # Examples
///
/// ```
/// use promise_then::{all, MicrotaskQueue, Promise};
///
/// let queue = MicrotaskQueue::new();
/// let s = queue.scheduler();
/// let both = all(&s, vec![Promise::<_, ()>::resolved(&s, 1), Promise::resolved(&s, 2)]);
/// assert_eq!(queue.run_until_settled(&both).unwrap(), Ok(vec![1, 2]));
/// ```
pub fn all<T, E, I>(scheduler: &Scheduler, promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (output, resolver) = Promise::pending(scheduler);
    debug!(inputs = promises.len(), "all");
    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return output;
    }

    let tally = Arc::new(Mutex::new(Tally::new(promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let tally = tally.clone();
        let resolver = resolver.clone();
        promise.observe(move |settled| match settled {
            Settled::Fulfilled { value } => {
                let values = lock(&tally).fill(index, value);
                if let Some(values) = values {
                    resolver.resolve(values);
                }
            }
            Settled::Rejected { reason } => resolver.reject(reason),
        });
    }
    output
}

/// Fulfills with one [`Settled`] record per input, in input order, once every
/// input has settled either way. Never rejects.
pub fn all_settled<T, E, I>(scheduler: &Scheduler, promises: I) -> Promise<Vec<Settled<T, E>>, Infallible>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let (output, resolver) = Promise::pending(scheduler);
    debug!(inputs = promises.len(), "all_settled");
    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return output;
    }

    let tally = Arc::new(Mutex::new(Tally::new(promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let tally = tally.clone();
        let resolver = resolver.clone();
        promise.observe(move |settled| {
            let records = lock(&tally).fill(index, settled);
            if let Some(records) = records {
                resolver.resolve(records);
            }
        });
    }
    output
}

/// Settles the same way as whichever input settles first.
///
/// With no inputs nothing can ever settle it, so it stays pending.
pub fn race<T, E, I>(scheduler: &Scheduler, promises: I) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let (output, resolver) = Promise::pending(scheduler);
    let mut inputs = 0;
    for promise in promises {
        inputs += 1;
        let resolver = resolver.clone();
        promise.observe(move |settled| match settled {
            Settled::Fulfilled { value } => resolver.resolve(value),
            Settled::Rejected { reason } => resolver.reject(reason),
        });
    }
    debug!(inputs, "race");
    output
}

/// Fulfills with the value of the first input, in input order, that
/// fulfilled. If none did, rejects with an [`AggregateError`] holding every
/// reason in input order.
///
/// Decided only once every input has settled. An empty input rejects with an
/// empty aggregate.
///
/// # Examples
///
/// ```
/// use promise_then::{any, MicrotaskQueue, Promise};
///
/// let queue = MicrotaskQueue::new();
/// let s = queue.scheduler();
/// let none = any(&s, vec![Promise::<i32, _>::rejected(&s, "a"), Promise::rejected(&s, "b")]);
/// let err = queue.run_until_settled(&none).unwrap().unwrap_err();
/// assert_eq!(err.reasons(), &["a", "b"]);
/// ```
pub fn any<T, E, I>(scheduler: &Scheduler, promises: I) -> Promise<T, AggregateError<E>>
where
    T: Clone + Send + 'static,
    E: Clone + Debug + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    all_settled(scheduler, promises).then(
        |records| {
            let mut reasons = Vec::with_capacity(records.len());
            for record in records {
                match record {
                    Settled::Fulfilled { value } => return Step::Value(value),
                    Settled::Rejected { reason } => reasons.push(reason),
                }
            }
            Step::Reject(AggregateError::new(reasons))
        },
        |never: Infallible| match never {},
    )
}
