//! What a handler hands back to the chain, and how a settled promise is
//! reported to the combinators.

use std::fmt;

use crate::Promise;

/// Return value of a `then` handler.
///
/// The promise returned by `then` settles from this value: `Value` fulfills
/// it, `Reject` rejects it, and `Adopt` makes it follow another promise until
/// that one settles.
pub enum Step<U, E> {
    Value(U),
    Adopt(Promise<U, E>),
    Reject(E),
}

impl<U, E> From<Promise<U, E>> for Step<U, E> {
    fn from(promise: Promise<U, E>) -> Self {
        Step::Adopt(promise)
    }
}

impl<U, E> From<Result<U, E>> for Step<U, E> {
    fn from(result: Result<U, E>) -> Self {
        match result {
            Ok(value) => Step::Value(value),
            Err(reason) => Step::Reject(reason),
        }
    }
}

impl<U: fmt::Debug, E: fmt::Debug> fmt::Debug for Step<U, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Step::Adopt(_) => f.write_str("Adopt(..)"),
            Step::Reject(reason) => f.debug_tuple("Reject").field(reason).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        })
    }
}

/// Outcome record of a settled promise, as produced by [`all_settled`](crate::all_settled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    Fulfilled { value: T },
    Rejected { reason: E },
}

impl<T, E> Settled<T, E> {
    pub fn status(&self) -> Status {
        match self {
            Settled::Fulfilled { .. } => Status::Fulfilled,
            Settled::Rejected { .. } => Status::Rejected,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settled::Fulfilled { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settled::Rejected { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settled::Fulfilled { value } => Ok(value),
            Settled::Rejected { reason } => Err(reason),
        }
    }
}

impl<T, E> From<Result<T, E>> for Settled<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Settled::Fulfilled { value },
            Err(reason) => Settled::Rejected { reason },
        }
    }
}
