//! Worker runtime: claim, lock, run, settle.
//!
//! One [`WorkerRuntime`] per process per domain. The claim loop is a single
//! task; each claimed entry is settled by a spawned task whose agent
//! invocation runs behind the [`Dispatcher`]'s per-agent permit bound.
//! Every entry walks the explicit [`lifecycle::TaskPhase`] state machine:
//!
//! ```text
//! Claimed → Locked → Running → {Acked | Retried | DeadLettered}
//! ```
//!
//! with the idempotency-lock short-circuit `Claimed → Acked` for duplicate
//! deliveries.

pub mod dispatcher;
pub mod lifecycle;
pub mod runtime;

pub use dispatcher::Dispatcher;
pub use lifecycle::{IllegalTransition, TaskEvent, TaskLifecycle, TaskPhase};
pub use runtime::{shutdown_channel, ShutdownHandle, WorkerConfig, WorkerError, WorkerRuntime};
