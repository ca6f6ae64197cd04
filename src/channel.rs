//! A channel scheduler uses a multi-producer, single-consumer channel as its
//! backend. Every clone of the [`Scheduler`] feeds the same worker thread,
//! which runs tasks one at a time in the order they were sent.
//!
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    mpsc::{channel, Receiver, Sender},
    Mutex,
};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::{lock, Error, Schedule, Scheduler, Task};

/// Spawns a worker thread and returns a [`Scheduler`] that feeds it.
///
/// Tasks still run one at a time and in submission order, but the worker does
/// not wait for the submitting thread. A `then` attached to a promise that
/// has already settled may therefore run its handler on the worker before
/// `then` has returned to the caller. Use a [`MicrotaskQueue`] where handlers
/// must only run once the current synchronous work is done.
///
/// [`MicrotaskQueue`]: crate::MicrotaskQueue
///
/// # Examples
///
/// ```
/// use promise_then::{channel, Promise};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (scheduler, _worker) = channel::Builder::new().name("promises").spawn().unwrap();
/// let (promise, resolver) = Promise::<u32, ()>::pending(&scheduler);
/// let answer = promise.map(|v| v + 1);
///
/// let task = thread::spawn(move || resolver.resolve(41));
/// assert_eq!(block_on(answer), Ok(42));
/// task.join().expect("The task thread has panicked.");
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn spawn(self) -> Result<(Scheduler, Worker), Error> {
        let (tx, rx) = channel();
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || run(rx))
            .map_err(|err| Error::Spawn(err.to_string()))?;
        let scheduler = Scheduler::new(ChannelSchedule {
            sender: Mutex::new(tx),
        });
        Ok((scheduler, Worker { handle }))
    }
}

/// The worker thread behind a channel scheduler.
#[derive(Debug)]
pub struct Worker {
    handle: JoinHandle<()>,
}

impl Worker {
    /// Waits for the worker to exit, which happens once every clone of its
    /// scheduler, including the ones held by promises, has been dropped.
    pub fn join(self) -> Result<(), Error> {
        self.handle.join().map_err(|_| Error::WorkerPanicked)
    }
}

struct ChannelSchedule {
    sender: Mutex<Sender<Task>>,
}

impl Schedule for ChannelSchedule {
    fn schedule(&self, task: Task) {
        if lock(&self.sender).send(task).is_err() {
            error!("channel scheduler worker is gone, dropping task");
        }
    }
}

fn run(receiver: Receiver<Task>) {
    debug!("channel scheduler started");
    for task in receiver {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("scheduled task panicked");
        }
    }
    debug!("channel scheduler stopped");
}
