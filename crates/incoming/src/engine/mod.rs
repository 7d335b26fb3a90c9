//! Suspending computations on top of tokio.
//!
//! Asynchronous body decodes are described by a [`Starter`]: an un-started computation that can
//! either be awaited inline by another computation or handed to an [`Engine`], which runs it as a
//! task and returns a [`Computation`] handle.
//!
//! While a computation is polled, its context is installed as a task-local. Whenever the
//! connection or the sink it is blocked on reports not-ready, the resource and direction are
//! recorded as a [`WaitCondition`], and the handle's [`ComputationState`] reports
//! `Suspended(Some(condition))` until the task is woken again.
//!
//! # Example
//!
//! ```
//! use micro_http_incoming::engine::{Engine, Outcome, Starter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let computation = Engine::current().start(Starter::new(async { Ok(1 + 1) }));
//! assert!(matches!(computation.await, Outcome::Completed(2)));
//! # }
//! ```

mod computation;
mod context;
mod runtime;
mod starter;
mod wait;

pub use computation::{Computation, ComputationId, ComputationState, Outcome};
pub use runtime::Engine;
pub use starter::Starter;
pub use wait::{Direction, ResourceId, WaitCondition};

pub(crate) use context::note_wait;
