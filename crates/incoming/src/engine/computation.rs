use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::context::ComputationContext;
use crate::engine::wait::WaitCondition;
use crate::protocol::BodyError;

static NEXT_COMPUTATION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a started computation, used in log fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ComputationId(u64);

impl ComputationId {
    pub(crate) fn next() -> Self {
        Self(NEXT_COMPUTATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "comp-{}", self.0)
    }
}

/// Where a started computation currently is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComputationState {
    /// Scheduled or being polled
    Running,
    /// Parked until the wait condition, if any, is satisfied
    ///
    /// `None` means the computation waits on something other than I/O readiness, such as a
    /// separately started child computation.
    Suspended(Option<WaitCondition>),
    Completed,
    Failed,
    Cancelled,
}

impl ComputationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn wait_condition(&self) -> Option<WaitCondition> {
        match self {
            Self::Suspended(wait) => *wait,
            _ => None,
        }
    }
}

/// How a computation ended.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Failed(BodyError),
    /// The computation was cancelled before it finished; this is not a failure
    Cancelled,
}

impl<T> Outcome<T> {
    pub(crate) fn from_result(result: Result<T, BodyError>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(e) if e.is_cancelled() => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The terminal state matching this outcome.
    pub fn state(&self) -> ComputationState {
        match self {
            Self::Completed(_) => ComputationState::Completed,
            Self::Failed(_) => ComputationState::Failed,
            Self::Cancelled => ComputationState::Cancelled,
        }
    }

    /// Collapses the outcome into a result, cancellation becoming [`BodyError::Cancelled`].
    pub fn into_result(self) -> Result<T, BodyError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(e) => Err(e),
            Self::Cancelled => Err(BodyError::Cancelled),
        }
    }
}

/// Handle to a started computation.
///
/// Awaiting the handle yields the computation's [`Outcome`]. Dropping the handle before the
/// computation finished cancels it, unless the handle was [`detach`](Computation::detach)ed.
#[must_use = "dropping a computation handle cancels the computation"]
pub struct Computation<T> {
    context: Arc<ComputationContext>,
    join: JoinHandle<Outcome<T>>,
    detached: bool,
}

impl<T> Computation<T> {
    pub(crate) fn new(context: Arc<ComputationContext>, join: JoinHandle<Outcome<T>>) -> Self {
        Self { context, join, detached: false }
    }

    pub fn id(&self) -> ComputationId {
        self.context.id()
    }

    pub fn state(&self) -> ComputationState {
        self.context.state()
    }

    /// Requests cancellation.
    ///
    /// The computation's future is dropped the next time its task runs, releasing everything it
    /// holds; awaiting the handle then yields [`Outcome::Cancelled`]. Cancelling a finished
    /// computation has no effect.
    pub fn cancel(&self) {
        if !self.context.state().is_terminal() {
            debug!(computation = %self.id(), "cancelling computation");
        }
        self.context.token().cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Lets the computation run to completion with nobody awaiting it.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl<T> Future for Computation<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.join).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(e) if e.is_panic() => {
                self.context.set_state(ComputationState::Failed);
                std::panic::resume_unwind(e.into_panic())
            }
            // the runtime shut down under the computation
            Err(_) => Poll::Ready(Outcome::Cancelled),
        }
    }
}

impl<T> Drop for Computation<T> {
    fn drop(&mut self) {
        if !self.detached && !self.join.is_finished() {
            self.context.token().cancel();
        }
    }
}

impl<T> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation").field("id", &self.id()).field("state", &self.state()).finish_non_exhaustive()
    }
}
