//! Transaction views, outcomes and futures.

use crate::clock::Micros;
use crate::error::{BoxError, CoreError};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Why a read-write body stopped early.
///
/// Any `std::error::Error` converts into [`Abort::Fail`], so `?` works inside
/// transaction bodies.
pub enum Abort<T> {
    /// Undo the transaction, optionally handing a value to the caller.
    Rollback(Option<T>),
    /// Undo the transaction and fail it with a domain error.
    Fail(BoxError),
}

impl<T> Abort<T> {
    /// Rolls back without a value.
    #[must_use]
    pub fn rollback() -> Self {
        Self::Rollback(None)
    }

    /// Rolls back, handing `value` to the caller.
    #[must_use]
    pub fn rollback_with(value: T) -> Self {
        Self::Rollback(Some(value))
    }

    /// Fails with an arbitrary error.
    pub fn fail(error: impl Into<BoxError>) -> Self {
        Self::Fail(error.into())
    }
}

impl<T, E> From<E> for Abort<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Fail(Box::new(error))
    }
}

impl<T> fmt::Debug for Abort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rollback(value) => f
                .debug_tuple("Rollback")
                .field(&value.as_ref().map(|_| ".."))
                .finish(),
            Self::Fail(error) => f.debug_tuple("Fail").field(error).finish(),
        }
    }
}

/// Final state of a transaction.
#[derive(Debug)]
pub enum TransactionOutcome<T> {
    /// The body returned normally; its mutations, if any, are in the log.
    Committed(T),
    /// The body asked for a rollback; nothing was logged.
    RolledBack(Option<T>),
    /// The body failed, panicked, or the transaction could not run.
    Failed(CoreError),
}

impl<T> TransactionOutcome<T> {
    /// Returns true for [`TransactionOutcome::Committed`].
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Returns true for [`TransactionOutcome::RolledBack`].
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::RolledBack(_))
    }

    /// Returns true for [`TransactionOutcome::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the committed value.
    #[must_use]
    pub fn committed(self) -> Option<T> {
        match self {
            Self::Committed(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the error of a failed transaction.
    #[must_use]
    pub fn error(&self) -> Option<&CoreError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Maps committed and rolled-back values.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransactionOutcome<U> {
        match self {
            Self::Committed(value) => TransactionOutcome::Committed(f(value)),
            Self::RolledBack(value) => TransactionOutcome::RolledBack(value.map(f)),
            Self::Failed(error) => TransactionOutcome::Failed(error),
        }
    }

    /// Converts into a result, treating a rollback as `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed transaction.
    pub fn into_result(self) -> Result<Option<T>, CoreError> {
        match self {
            Self::Committed(value) => Ok(Some(value)),
            Self::RolledBack(_) => Ok(None),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Pending result of a submitted transaction.
///
/// Either block with [`wait`](TransactionFuture::wait) or `.await` it.
#[must_use = "a transaction future does nothing unless waited on or awaited"]
pub struct TransactionFuture<T> {
    rx: oneshot::Receiver<TransactionOutcome<T>>,
}

impl<T> TransactionFuture<T> {
    pub(crate) fn new(rx: oneshot::Receiver<TransactionOutcome<T>>) -> Self {
        Self { rx }
    }

    pub(crate) fn ready(outcome: TransactionOutcome<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Blocks until the transaction finishes.
    ///
    /// Must not be called from inside an async runtime; `.await` instead.
    pub fn wait(self) -> TransactionOutcome<T> {
        self.rx.blocking_recv().unwrap_or_else(|_| dropped())
    }
}

fn dropped<T>() -> TransactionOutcome<T> {
    TransactionOutcome::Failed(CoreError::ShutDown)
}

impl<T> Future for TransactionFuture<T> {
    type Output = TransactionOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| dropped()))
    }
}

impl<T> fmt::Debug for TransactionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFuture").finish_non_exhaustive()
    }
}

/// Mutable view of the containers inside a read-write transaction.
pub struct ReadWrite<'a, S> {
    schema: &'a mut S,
    begin_us: Micros,
    fields: &'a mut BTreeMap<String, String>,
}

impl<'a, S> ReadWrite<'a, S> {
    pub(crate) fn new(
        schema: &'a mut S,
        begin_us: Micros,
        fields: &'a mut BTreeMap<String, String>,
    ) -> Self {
        Self {
            schema,
            begin_us,
            fields,
        }
    }

    /// Timestamp sampled when the commit lock was acquired.
    #[must_use]
    pub fn begin_us(&self) -> Micros {
        self.begin_us
    }

    /// Sets a meta field persisted with the transaction.
    pub fn set_meta_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Removes a meta field.
    pub fn erase_meta_field(&mut self, key: &str) {
        self.fields.remove(key);
    }

    /// Returns a meta field set earlier in this transaction.
    #[must_use]
    pub fn meta_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl<S> Deref for ReadWrite<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.schema
    }
}

impl<S> DerefMut for ReadWrite<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.schema
    }
}

/// Shared view of the containers inside a read-only transaction.
pub struct ReadOnly<'a, S> {
    schema: &'a S,
}

impl<'a, S> ReadOnly<'a, S> {
    pub(crate) fn new(schema: &'a S) -> Self {
        Self { schema }
    }
}

impl<S> Deref for ReadOnly<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.schema
    }
}
