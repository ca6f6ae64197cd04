use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use tracing::trace;

use crate::settle::{Settled, Status, Step};
use crate::{lock, Error, Scheduler};

/// A value that becomes available later, or a reason it never will.
///
/// A promise starts pending and settles at most once, fulfilled with a `T` or
/// rejected with an `E`. Cloning a `Promise` clones the handle; every clone
/// observes the same settlement.
///
/// # Examples
///
/// ```
/// use promise_then::{MicrotaskQueue, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let queue = MicrotaskQueue::new();
/// let (promise, resolver) = Promise::<String, ()>::pending(&queue.scheduler());
/// let doubled = promise.map(|s| s.repeat(2));
///
/// thread::spawn(move || resolver.resolve("Hi".into()))
///     .join()
///     .expect("The producer thread has panicked.");
///
/// queue.run_until_idle();
/// assert_eq!(block_on(doubled), Ok("HiHi".to_string()));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    scheduler: Scheduler,
}

/// Write side of a [`Promise`]: the `resolve` and `reject` entry points.
///
/// Only the first call to either entry point, across every clone, has any
/// effect.
pub struct Resolver<T, E> {
    promise: Promise<T, E>,
}

enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

type Listener<T, E> = Box<dyn FnOnce(Settled<T, E>) + Send + 'static>;

struct Inner<T, E> {
    state: State<T, E>,
    /// Continuations from `then`, dispatched through the scheduler.
    waiters: Vec<Box<dyn Waiter<T, E>>>,
    /// Combinator hooks, called synchronously at settlement.
    listeners: Vec<Listener<T, E>>,
    wakers: Vec<Waker>,
}

trait Waiter<T, E>: Send {
    fn dispatch(self: Box<Self>, outcome: Result<T, E>);

    /// Gives up the resolver of the next promise in the chain so it can be
    /// dropped without recursing into it.
    fn unlink(self: Box<Self>) -> Box<dyn Unlink>;
}

/// Something that may own the rest of a promise chain.
trait Unlink {
    fn unlink(self: Box<Self>, rest: &mut Vec<Box<dyn Unlink>>);
}

/// A `then` registration: both handlers plus the resolver of the promise
/// `then` returned.
struct Reaction<F, R, U, E2> {
    on_fulfill: F,
    on_reject: R,
    next: Resolver<U, E2>,
}

impl<T, E, U, E2, F, R> Waiter<T, E> for Reaction<F, R, U, E2>
where
    F: FnOnce(T) -> Step<U, E2> + Send,
    R: FnOnce(E) -> Step<U, E2> + Send,
    U: Clone + Send + 'static,
    E2: Clone + Send + 'static,
{
    fn dispatch(self: Box<Self>, outcome: Result<T, E>) {
        let step = match outcome {
            Ok(value) => (self.on_fulfill)(value),
            Err(reason) => (self.on_reject)(reason),
        };
        self.next.settle(step);
    }

    fn unlink(self: Box<Self>) -> Box<dyn Unlink> {
        let Reaction { next, .. } = *self;
        Box::new(next)
    }
}

impl<T, E> Unlink for Resolver<T, E> {
    fn unlink(self: Box<Self>, rest: &mut Vec<Box<dyn Unlink>>) {
        let Resolver { promise: Promise { inner, .. } } = *self;
        // Only the last handle owns the waiters; any other just drops a count.
        if let Ok(inner) = Arc::try_unwrap(inner) {
            let mut inner = inner.into_inner().unwrap_or_else(PoisonError::into_inner);
            rest.extend(mem::take(&mut inner.waiters).into_iter().map(|w| w.unlink()));
        }
    }
}

/// Dropping a long pending chain would otherwise recurse once per link.
impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let mut rest: Vec<Box<dyn Unlink>> = mem::take(&mut self.waiters)
            .into_iter()
            .map(|w| w.unlink())
            .collect();
        while let Some(next) = rest.pop() {
            next.unlink(&mut rest);
        }
    }
}

impl<T: Clone, E: Clone> State<T, E> {
    fn outcome(&self) -> Option<Result<T, E>> {
        match self {
            State::Pending => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

impl<T, E> State<T, E> {
    fn status(&self) -> Status {
        match self {
            State::Pending => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a promise and runs `producer` on it straight away.
    ///
    /// The producer may keep the resolver and settle the promise at any later
    /// point, from any thread.
    pub fn new<P>(scheduler: &Scheduler, producer: P) -> Self
    where
        P: FnOnce(Resolver<T, E>),
    {
        let (promise, resolver) = Self::pending(scheduler);
        producer(resolver);
        promise
    }

    /// A pending promise together with its resolver.
    pub fn pending(scheduler: &Scheduler) -> (Self, Resolver<T, E>) {
        let promise = Promise {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                waiters: Vec::new(),
                listeners: Vec::new(),
                wakers: Vec::new(),
            })),
            scheduler: scheduler.clone(),
        };
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    pub fn resolved(scheduler: &Scheduler, value: T) -> Self {
        Self::new(scheduler, |resolver| resolver.resolve(value))
    }

    pub fn rejected(scheduler: &Scheduler, reason: E) -> Self {
        Self::new(scheduler, |resolver| resolver.reject(reason))
    }

    /// Attaches both continuations and returns the promise they settle.
    ///
    /// Exactly one of the handlers runs, as a deferred task, once this
    /// promise settles (or right away, deferred, if it already has). What the
    /// handler returns settles the new promise; see [`Step`].
    pub fn then<U, E2, F, R>(&self, on_fulfill: F, on_reject: R) -> Promise<U, E2>
    where
        U: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(T) -> Step<U, E2> + Send + 'static,
        R: FnOnce(E) -> Step<U, E2> + Send + 'static,
    {
        let (next, resolver) = Promise::pending(&self.scheduler);
        self.enqueue(Box::new(Reaction {
            on_fulfill,
            on_reject,
            next: resolver,
        }));
        next
    }

    /// `then` without a rejection handler: a rejection passes through
    /// unchanged.
    pub fn and_then<U, F>(&self, on_fulfill: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Step<U, E> + Send + 'static,
    {
        self.then(on_fulfill, Step::Reject)
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Step::Value(f(value)))
    }

    /// `then` without a fulfillment handler. A handler returning
    /// [`Step::Value`] recovers the chain.
    pub fn catch<E2, R>(&self, on_reject: R) -> Promise<T, E2>
    where
        E2: Clone + Send + 'static,
        R: FnOnce(E) -> Step<T, E2> + Send + 'static,
    {
        self.then(Step::Value, on_reject)
    }

    pub fn status(&self) -> Status {
        self.lock().state.status()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Snapshot of the outcome, or [`Error::Pending`].
    pub fn settled(&self) -> Result<Settled<T, E>, Error> {
        self.lock()
            .state
            .outcome()
            .map(Settled::from)
            .ok_or(Error::Pending)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registers a hook that runs synchronously, on the settling thread, when
    /// this promise settles, or immediately if it already has.
    pub(crate) fn observe<L>(&self, listener: L)
    where
        L: FnOnce(Settled<T, E>) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.lock();
            match inner.state.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(outcome.into());
    }

    fn enqueue(&self, waiter: Box<dyn Waiter<T, E>>) {
        let outcome = {
            let mut inner = self.lock();
            match inner.state.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.waiters.push(waiter);
                    return;
                }
            }
        };
        self.scheduler
            .schedule_boxed(Box::new(move || waiter.dispatch(outcome)));
    }

    fn settle_with(&self, outcome: Result<T, E>) {
        let (waiters, listeners, wakers) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                trace!(status = %inner.state.status(), "promise already settled, ignoring");
                return;
            }
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            (
                mem::take(&mut inner.waiters),
                mem::take(&mut inner.listeners),
                mem::take(&mut inner.wakers),
            )
        };
        trace!(
            fulfilled = outcome.is_ok(),
            waiters = waiters.len(),
            listeners = listeners.len(),
            "promise settled"
        );

        for listener in listeners {
            listener(outcome.clone().into());
        }
        for waker in wakers {
            waker.wake();
        }
        for waiter in waiters {
            let outcome = outcome.clone();
            self.scheduler
                .schedule_boxed(Box::new(move || waiter.dispatch(outcome)));
        }
    }
}

impl<T, E> Promise<T, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        lock(&self.inner)
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn resolve(&self, value: T) {
        self.promise.settle_with(Ok(value));
    }

    pub fn reject(&self, reason: E) {
        self.promise.settle_with(Err(reason));
    }

    /// Settles from a handler result. An adopted promise drives this one
    /// as soon as it settles, whichever scheduler it was created on.
    pub fn settle(&self, step: Step<T, E>) {
        match step {
            Step::Value(value) => self.resolve(value),
            Step::Reject(reason) => self.reject(reason),
            Step::Adopt(promise) => {
                let next = self.clone();
                promise.observe(move |settled| match settled {
                    Settled::Fulfilled { value } => next.resolve(value),
                    Settled::Rejected { reason } => next.reject(reason),
                });
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        !self.promise.is_pending()
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = lock(&self.inner);
        match inner.state.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        let mut s = f.debug_struct("Promise");
        match &inner.state {
            State::Pending => s.field("status", &Status::Pending),
            State::Fulfilled(value) => s.field("status", &Status::Fulfilled).field("value", value),
            State::Rejected(reason) => s.field("status", &Status::Rejected).field("reason", reason),
        };
        s.field("waiters", &inner.waiters.len()).finish()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("status", &lock(&self.promise.inner).state.status())
            .finish()
    }
}

/// `Promise: <pending>`, `Promise: <fulfilled>: value` or
/// `Promise: <rejected>: reason`.
impl<T: fmt::Display, E: fmt::Display> fmt::Display for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &lock(&self.inner).state {
            State::Pending => write!(f, "Promise: <pending>"),
            State::Fulfilled(value) => write!(f, "Promise: <fulfilled>: {}", value),
            State::Rejected(reason) => write!(f, "Promise: <rejected>: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MicrotaskQueue;
    use std::thread;

    fn queue() -> (MicrotaskQueue, Scheduler) {
        let queue = MicrotaskQueue::new();
        let scheduler = queue.scheduler();
        (queue, scheduler)
    }

    #[test]
    fn test_only_first_settlement_counts() {
        let (_queue, scheduler) = queue();
        let promise = Promise::<i32, &str>::new(&scheduler, |resolver| {
            resolver.resolve(1);
            resolver.reject("late");
            resolver.resolve(2);
        });
        assert_eq!(promise.settled(), Ok(Settled::Fulfilled { value: 1 }));
    }

    #[test]
    fn test_unsettled_producer_leaves_promise_pending() {
        let (queue, scheduler) = queue();
        let promise = Promise::<i32, ()>::new(&scheduler, |_resolver| {});
        assert!(promise.is_pending());
        assert_eq!(promise.settled(), Err(Error::Pending));
        assert_eq!(queue.run_until_settled(&promise), Err(Error::Stalled));
    }

    #[test]
    fn test_handlers_are_deferred() {
        let (queue, scheduler) = queue();
        let (promise, resolver) = Promise::<i32, ()>::pending(&scheduler);
        let next = promise.map(|v| v * 10);
        resolver.resolve(4);
        assert_eq!(promise.status(), Status::Fulfilled);
        assert!(next.is_pending());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_until_settled(&next), Ok(Ok(40)));
    }

    #[test]
    fn test_then_on_settled_promise_is_deferred() {
        let (queue, scheduler) = queue();
        let promise = Promise::<i32, ()>::resolved(&scheduler, 1);
        let next = promise.map(|v| v + 1);
        assert!(next.is_pending());
        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(next.settled(), Ok(Settled::Fulfilled { value: 2 }));
    }

    #[test]
    fn test_rejection_handler_recovers() {
        let (queue, scheduler) = queue();
        let promise = Promise::<String, String>::rejected(&scheduler, "x".into())
            .catch(|reason| Step::<_, ()>::Value(reason + "!"));
        assert_eq!(queue.run_until_settled(&promise), Ok(Ok("x!".to_string())));
    }

    #[test]
    fn test_rejection_passes_through_fulfill_only_links() {
        let (queue, scheduler) = queue();
        let promise = Promise::<i32, &str>::rejected(&scheduler, "boom")
            .map(|v| v + 1)
            .map(|v| v * 2);
        assert_eq!(queue.run_until_settled(&promise), Ok(Err("boom")));
    }

    #[test]
    fn test_value_passes_through_catch() {
        let (queue, scheduler) = queue();
        let promise = Promise::<i32, &str>::resolved(&scheduler, 7)
            .catch(|_| Step::<_, &str>::Value(0));
        assert_eq!(queue.run_until_settled(&promise), Ok(Ok(7)));
    }

    #[test]
    fn test_adopted_promise_drives_outcome() {
        let (queue, scheduler) = queue();
        let (inner, inner_resolver) = Promise::<&str, &str>::pending(&scheduler);
        let outer = Promise::<i32, &str>::resolved(&scheduler, 1).and_then({
            let inner = inner.clone();
            move |_| Step::Adopt(inner)
        });
        queue.run_until_idle();
        assert!(outer.is_pending());

        inner_resolver.reject("nested");
        assert_eq!(queue.run_until_settled(&outer), Ok(Err("nested")));
    }

    #[test]
    fn test_catch_adopts_promise_that_fulfills() {
        let (queue, scheduler) = queue();
        let (fallback, fallback_resolver) = Promise::<i32, &str>::pending(&scheduler);
        let recovered = Promise::<i32, &str>::rejected(&scheduler, "first")
            .catch(move |_| Step::from(fallback));
        queue.run_until_idle();
        assert!(recovered.is_pending());

        fallback_resolver.resolve(8);
        assert_eq!(queue.run_until_settled(&recovered), Ok(Ok(8)));
    }

    #[test]
    fn test_catch_adopts_promise_that_rejects() {
        let (queue, scheduler) = queue();
        let (fallback, fallback_resolver) = Promise::<i32, &str>::pending(&scheduler);
        let recovered = Promise::<i32, &str>::rejected(&scheduler, "first")
            .catch(move |_| Step::from(fallback));
        queue.run_until_idle();
        assert!(recovered.is_pending());

        fallback_resolver.reject("second");
        assert_eq!(queue.run_until_settled(&recovered), Ok(Err("second")));
    }

    #[test]
    fn test_adopting_promise_from_another_scheduler() {
        let (queue_a, scheduler_a) = queue();
        let (queue_b, scheduler_b) = queue();
        let foreign = Promise::<i32, ()>::resolved(&scheduler_b, 5);
        let outer = Promise::<i32, ()>::resolved(&scheduler_a, 0).and_then(move |_| Step::Adopt(foreign));
        assert_eq!(queue_a.run_until_settled(&outer), Ok(Ok(5)));
        assert!(queue_b.is_empty());
    }

    #[test]
    fn test_dropping_deep_pending_chain() {
        let task = thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let (queue, scheduler) = queue();
                let (head, resolver) = Promise::<u32, ()>::pending(&scheduler);
                let mut tail = head.clone();
                for _ in 0..50_000 {
                    tail = tail.map(|v| v + 1);
                }
                assert!(tail.is_pending());
                drop(head);
                drop(tail);
                drop(resolver);
                assert!(queue.is_empty());
            })
            .unwrap();
        task.join().expect("dropping the chain has panicked");
    }

    #[test]
    fn test_resolver_reports_settlement() {
        let (queue, scheduler) = queue();
        let (promise, resolver) = Promise::<i32, ()>::pending(&scheduler);
        assert!(!resolver.is_settled());
        promise.scheduler().schedule({
            let resolver = resolver.clone();
            move || resolver.resolve(1)
        });
        assert_eq!(queue.len(), 1);
        assert!(!resolver.is_settled());
        queue.run_until_idle();
        assert!(resolver.is_settled());
        assert_eq!(promise.settled(), Ok(Settled::Fulfilled { value: 1 }));
    }

    #[test]
    fn test_handler_rejection_from_rejected_source() {
        let (queue, scheduler) = queue();
        let promise = Promise::<i32, i32>::rejected(&scheduler, 1)
            .catch(|code| Step::<i32, String>::Reject(format!("code {code}")));
        assert_eq!(queue.run_until_settled(&promise), Ok(Err("code 1".to_string())));
    }

    #[test]
    fn test_waiters_dispatch_in_registration_order() {
        let (queue, scheduler) = queue();
        let (promise, resolver) = Promise::<i32, ()>::pending(&scheduler);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let seen = seen.clone();
            promise.map(move |v| seen.lock().unwrap().push((i, v)));
        }
        resolver.resolve(9);
        assert_eq!(queue.run_until_idle(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 9), (1, 9), (2, 9), (3, 9)]);
    }

    #[test]
    fn test_listeners_fire_synchronously() {
        let (queue, scheduler) = queue();
        let (promise, resolver) = Promise::<i32, &str>::pending(&scheduler);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            promise.observe(move |settled| seen.lock().unwrap().push(settled));
        }
        resolver.reject("e");
        assert_eq!(*seen.lock().unwrap(), vec![Settled::Rejected { reason: "e" }]);

        let seen_late = seen.clone();
        promise.observe(move |settled| seen_late.lock().unwrap().push(settled));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_display() {
        let (_queue, scheduler) = queue();
        let (promise, resolver) = Promise::<i32, String>::pending(&scheduler);
        assert_eq!(promise.to_string(), "Promise: <pending>");
        resolver.resolve(3);
        assert_eq!(promise.to_string(), "Promise: <fulfilled>: 3");
        let rejected = Promise::<i32, String>::rejected(&scheduler, "nope".into());
        assert_eq!(rejected.to_string(), "Promise: <rejected>: nope");
    }
}
