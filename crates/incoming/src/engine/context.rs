use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::engine::computation::{ComputationId, ComputationState};
use crate::engine::wait::WaitCondition;

tokio::task_local! {
    static CURRENT: Arc<ComputationContext>;
}

/// Bookkeeping shared between a running computation and its handle.
#[derive(Debug)]
pub(crate) struct ComputationContext {
    id: ComputationId,
    token: CancellationToken,
    state: Mutex<ComputationState>,
    wait: Mutex<Option<WaitCondition>>,
}

impl ComputationContext {
    pub(crate) fn new(id: ComputationId, token: CancellationToken) -> Self {
        Self { id, token, state: Mutex::new(ComputationState::Running), wait: Mutex::new(None) }
    }

    pub(crate) fn id(&self) -> ComputationId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn state(&self) -> ComputationState {
        *lock(&self.state)
    }

    /// Terminal states stick; a late poll result never overwrites them.
    pub(crate) fn set_state(&self, state: ComputationState) {
        let mut current = lock(&self.state);
        if !current.is_terminal() {
            *current = state;
        }
    }

    fn record_wait(&self, condition: WaitCondition) {
        *lock(&self.wait) = Some(condition);
    }

    fn take_wait(&self) -> Option<WaitCondition> {
        lock(&self.wait).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records what the computation being polled on this task is about to park on.
///
/// Outside of a computation this does nothing.
pub(crate) fn note_wait(condition: WaitCondition) {
    let _ = CURRENT.try_with(|context| context.record_wait(condition));
}

/// The cancellation token of the computation being polled on this task, if any.
pub(crate) fn current_token() -> Option<CancellationToken> {
    CURRENT.try_with(|context| context.token.clone()).ok()
}

pin_project! {
    /// Polls a computation's future inside its context and mirrors each poll into the state.
    pub(crate) struct Tracked<F> {
        #[pin]
        future: F,
        context: Arc<ComputationContext>,
    }
}

impl<F> Tracked<F> {
    pub(crate) fn new(future: F, context: Arc<ComputationContext>) -> Self {
        Self { future, context }
    }
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let context = this.context;

        context.take_wait();
        context.set_state(ComputationState::Running);

        let future = this.future;
        let polled = CURRENT.sync_scope(Arc::clone(context), || future.poll(cx));

        if polled.is_pending() {
            let wait = context.take_wait();
            trace!(computation = %context.id(), wait = ?wait, "computation suspended");
            context.set_state(ComputationState::Suspended(wait));
        }
        polled
    }
}
