use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::protocol::BodyError;

/// A suspending computation that has not started yet.
///
/// Nothing runs until the starter is either awaited (inline, as part of the computation awaiting
/// it) or handed to [`Engine::start`](crate::engine::Engine::start). Awaiting inline delivers the
/// child's result or error to the parent unchanged.
#[must_use = "a starter does nothing until it is awaited or started"]
pub struct Starter<'a, T> {
    future: BoxFuture<'a, Result<T, BodyError>>,
}

impl<'a, T> Starter<'a, T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, BodyError>> + Send + 'a,
    {
        Self { future: future.boxed() }
    }

    /// A starter that fails with `error` as soon as it runs.
    pub fn failed(error: BodyError) -> Self
    where
        T: Send + 'a,
    {
        Self::new(async move { Err(error) })
    }

    /// Transforms the successful result once the computation finishes.
    pub fn map<U, F>(self, f: F) -> Starter<'a, U>
    where
        T: 'a,
        U: 'a,
        F: FnOnce(T) -> U + Send + 'a,
    {
        Starter { future: self.future.map(move |result| result.map(f)).boxed() }
    }
}

impl<'a, T> IntoFuture for Starter<'a, T> {
    type Output = Result<T, BodyError>;
    type IntoFuture = BoxFuture<'a, Result<T, BodyError>>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl<T> fmt::Debug for Starter<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Starter").finish_non_exhaustive()
    }
}
