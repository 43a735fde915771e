//! Per-message lifecycle state machine.
//!
//! # Design
//!
//! Every claimed stream entry is tracked through an explicit state machine.
//! Events are applied via [`TaskLifecycle::apply`], which enforces that only
//! legal transitions occur; an [`IllegalTransition`] indicates a runtime bug
//! and callers MUST treat it as a halt/alert signal, not a recoverable
//! error.
//!
//! # State diagram
//!
//! ```text
//!              Lock                Start           Succeed
//!  Claimed ───────────► Locked ──────────► Running ────────► Acked (term.)
//!     │                   │                  │
//!     │ AlreadyLocked     │ DeadLetter       │ Retry
//!     ▼                   ▼                  ▼
//!  Acked (term.)   DeadLettered (term.)   Retried (term.)
//!                                            │ DeadLetter
//!                                            ▼  (from Running)
//!                                         DeadLettered (term.)
//! ```
//!
//! `AlreadyLocked` is the at-most-once short-circuit: the idempotency lock
//! is still held from a previous delivery, so the entry is acknowledged
//! without executing the agent.

// ---------------------------------------------------------------------------
// TaskPhase
// ---------------------------------------------------------------------------

/// All phases a claimed entry can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    /// Read from the consumer group; nothing decided yet.
    Claimed,
    /// Idempotency lock acquired; this delivery owns the side effects.
    Locked,
    /// Dispatched to the agent.
    Running,
    /// Settled: result published (or duplicate skipped) and entry acked.
    /// **Terminal.**
    Acked,
    /// Settled: re-published with `attempt + 1` and original acked.
    /// **Terminal** for this delivery.
    Retried,
    /// Settled: moved to the DLQ (and error result published). **Terminal.**
    DeadLettered,
}

impl TaskPhase {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::Retried | Self::DeadLettered)
    }
}

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// Events that drive transitions in a [`TaskLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// Idempotency lock acquired.
    Lock,
    /// Idempotency lock already held by a previous delivery.
    AlreadyLocked,
    /// Agent dispatch started.
    Start,
    /// Result published and entry acknowledged.
    Succeed,
    /// Transient failure; entry re-published for another attempt.
    Retry,
    /// Terminal failure; entry dead-lettered.
    DeadLetter,
}

// ---------------------------------------------------------------------------
// IllegalTransition
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied in the current phase.
///
/// **Callers MUST treat this as a halt/alert condition** — it means the
/// runtime settled an entry twice or skipped a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: TaskPhase,
    pub event: TaskEvent,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal task transition: {:?} + {:?}", self.from, self.event)
    }
}

impl std::error::Error for IllegalTransition {}

// ---------------------------------------------------------------------------
// TaskLifecycle
// ---------------------------------------------------------------------------

/// Lifecycle tracker for one claimed entry.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    pub msg_id: String,
    pub phase: TaskPhase,
}

impl TaskLifecycle {
    pub fn claimed(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            phase: TaskPhase::Claimed,
        }
    }

    /// Apply an event; only legal transitions are accepted.
    pub fn apply(&mut self, event: TaskEvent) -> Result<(), IllegalTransition> {
        use TaskEvent::*;
        use TaskPhase::*;

        let next = match (self.phase, event) {
            (Claimed, Lock) => Locked,
            // Duplicate delivery: ack without executing.
            (Claimed, AlreadyLocked) => Acked,
            (Locked, Start) => Running,
            // Undecodable or unroutable before dispatch.
            (Locked, DeadLetter) => DeadLettered,
            (Running, Succeed) => Acked,
            (Running, Retry) => Retried,
            (Running, DeadLetter) => DeadLettered,
            (from, event) => return Err(IllegalTransition { from, event }),
        };
        self.phase = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_to_acked() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::Lock).unwrap();
        lc.apply(TaskEvent::Start).unwrap();
        lc.apply(TaskEvent::Succeed).unwrap();
        assert_eq!(lc.phase, TaskPhase::Acked);
        assert!(lc.phase.is_terminal());
    }

    #[test]
    fn duplicate_delivery_short_circuits_to_acked() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::AlreadyLocked).unwrap();
        assert_eq!(lc.phase, TaskPhase::Acked);
    }

    #[test]
    fn transient_failure_ends_in_retried() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::Lock).unwrap();
        lc.apply(TaskEvent::Start).unwrap();
        lc.apply(TaskEvent::Retry).unwrap();
        assert_eq!(lc.phase, TaskPhase::Retried);
    }

    #[test]
    fn terminal_failure_ends_in_dead_lettered() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::Lock).unwrap();
        lc.apply(TaskEvent::Start).unwrap();
        lc.apply(TaskEvent::DeadLetter).unwrap();
        assert_eq!(lc.phase, TaskPhase::DeadLettered);
    }

    #[test]
    fn undecodable_entry_dead_letters_from_locked() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::Lock).unwrap();
        lc.apply(TaskEvent::DeadLetter).unwrap();
        assert_eq!(lc.phase, TaskPhase::DeadLettered);
    }

    #[test]
    fn settling_twice_is_illegal() {
        let mut lc = TaskLifecycle::claimed("1-0");
        lc.apply(TaskEvent::Lock).unwrap();
        lc.apply(TaskEvent::Start).unwrap();
        lc.apply(TaskEvent::Succeed).unwrap();

        let err = lc.apply(TaskEvent::Retry).unwrap_err();
        assert_eq!(err.from, TaskPhase::Acked);
        // Phase must not change after the error.
        assert_eq!(lc.phase, TaskPhase::Acked);
    }

    #[test]
    fn running_requires_lock_first() {
        let mut lc = TaskLifecycle::claimed("1-0");
        let err = lc.apply(TaskEvent::Start).unwrap_err();
        assert_eq!(err.from, TaskPhase::Claimed);
        assert_eq!(err.event, TaskEvent::Start);
    }
}
