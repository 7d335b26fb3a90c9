use std::sync::Arc;

use tokio::runtime::{Handle, TryCurrentError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::computation::{Computation, ComputationId, Outcome};
use crate::engine::context::{ComputationContext, Tracked, current_token};
use crate::engine::starter::Starter;

/// Starts suspending computations as tasks on a tokio runtime.
///
/// Each computation is one task, so it never runs on two threads at once, while a multi-thread
/// runtime runs independent computations in parallel. A suspended computation holds no worker
/// thread; it is resumed by the readiness of whatever it recorded as its wait condition.
#[derive(Debug, Clone)]
pub struct Engine {
    handle: Handle,
}

impl Engine {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// An engine on the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime, see [`Engine::try_current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Starts `starter` and returns the handle to the running computation.
    ///
    /// A computation started while another one is being polled becomes its child: cancelling the
    /// parent cancels the child too.
    pub fn start<T: Send + 'static>(&self, starter: Starter<'static, T>) -> Computation<T> {
        let token = current_token().map_or_else(CancellationToken::new, |parent| parent.child_token());
        let context = Arc::new(ComputationContext::new(ComputationId::next(), token.clone()));
        debug!(computation = %context.id(), "computation started");

        let tracked = Tracked::new(starter.into_future(), Arc::clone(&context));
        let task_context = Arc::clone(&context);

        let join = self.handle.spawn(async move {
            // the computation's future is gone once this block ends, whatever the outcome
            let outcome = {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Outcome::Cancelled,
                    result = tracked => Outcome::from_result(result),
                }
            };

            let state = outcome.state();
            debug!(computation = %task_context.id(), ?state, "computation finished");
            task_context.set_state(state);
            outcome
        });

        Computation::new(context, join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ComputationState;
    use crate::protocol::BodyError;
    use std::time::Duration;
    use futures::FutureExt;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn completes() {
        let computation = Engine::current().start(Starter::new(async { Ok("done") }));
        let outcome = computation.await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.into_result().unwrap(), "done");
    }

    #[tokio::test]
    async fn fails() {
        let computation: Computation<()> = Engine::current().start(Starter::failed(BodyError::framing("bad")));
        let id = computation.id();
        match computation.await {
            Outcome::Failed(e) => assert!(e.is_framing()),
            other => panic!("unexpected outcome {other:?} for {id}"),
        }
    }

    #[tokio::test]
    async fn suspended_without_io_then_cancelled() {
        let (_tx, rx) = oneshot::channel::<()>();
        let computation = Engine::current().start(Starter::new(async move {
            let _ = rx.await;
            Ok(())
        }));

        tokio::time::timeout(Duration::from_secs(5), async {
            while computation.state() != ComputationState::Suspended(None) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        computation.cancel();
        let outcome = computation.await;
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn state_after_completion() {
        let (tx, rx) = oneshot::channel::<u32>();
        let computation =
            Engine::current().start(Starter::new(async move { rx.await.map_err(|_| BodyError::Cancelled) }));
        tx.send(7).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !computation.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(computation.state(), ComputationState::Completed);
        assert_eq!(computation.await.into_result().unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let engine = Engine::current();
        let (child_tx, child_rx) = oneshot::channel();

        let child_engine = engine.clone();
        let parent = engine.start(Starter::new(async move {
            let child = child_engine.start(Starter::new(async {
                std::future::pending::<()>().await;
                Ok(())
            }));
            let _ = child_tx.send(child);
            std::future::pending::<()>().await;
            Ok(())
        }));

        let child = child_rx.await.unwrap();
        parent.cancel();
        assert!(parent.await.is_cancelled());
        assert!(child.await.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_handle_cancels() {
        let (tx, rx) = oneshot::channel::<()>();
        let computation = Engine::current().start(Starter::new(async move {
            // holds the sender until the future is dropped
            let _tx = tx;
            std::future::pending::<()>().await;
            Ok(())
        }));
        drop(computation);

        assert!(tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().is_err());
    }

    #[tokio::test]
    async fn detached_runs_to_completion() {
        let (tx, rx) = oneshot::channel();
        Engine::current()
            .start(Starter::new(async move {
                tokio::task::yield_now().await;
                let _ = tx.send(5);
                Ok(())
            }))
            .detach();

        assert_eq!(tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap(), 5);
    }

    fn explode() -> Result<(), BodyError> {
        panic!("boom")
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn panic_is_resumed() {
        let computation = Engine::current().start(Starter::new(async { explode() }));
        let _ = computation.await;
    }

    #[tokio::test]
    async fn panicked_computation_reports_failed() {
        let mut computation = Engine::current().start(Starter::new(async { explode() }));

        let resumed = std::panic::AssertUnwindSafe(&mut computation).catch_unwind().await;

        assert!(resumed.is_err());
        assert_eq!(computation.state(), ComputationState::Failed);
    }
}
