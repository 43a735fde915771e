//! Agent trait and the immutable flow registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use weft_envelope::{Envelope, Task};

// ---------------------------------------------------------------------------
// TaskAgent
// ---------------------------------------------------------------------------

/// Infrastructure failure surfaced to the worker runtime.
///
/// In-domain failures (permission, validation, empty results) must come back
/// as `Ok` error **envelopes** and are terminal; an `AgentFailure` is for
/// infrastructure trouble only, and `transient` decides whether the runtime
/// may retry the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub message: String,
    pub transient: bool,
}

impl AgentFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} agent failure: {}",
            if self.transient { "transient" } else { "terminal" },
            self.message
        )
    }
}

impl std::error::Error for AgentFailure {}

/// A domain agent: consumes one task, returns one envelope.
///
/// In-domain failures come back as `Ok` error envelopes, never as `Err`;
/// `Err(AgentFailure)` is reserved for infrastructure trouble the runtime's
/// retry policy should see. Anything that escapes `handle` by panicking is
/// treated as a programmer error.
///
/// Implementations must be object-safe and `Send + Sync` so one instance
/// can serve concurrent dispatches.
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Agent name for dispatch concurrency limits and monitor events.
    fn name(&self) -> &'static str;

    /// Stream domain this agent's flows ride on (e.g. `"rag"`, `"persist"`).
    fn domain(&self) -> &'static str;

    async fn handle(&self, task: &Task) -> Result<Envelope, AgentFailure>;
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A flow name was registered twice; registration is startup-only and
    /// last-wins would hide wiring bugs.
    DuplicateFlow(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateFlow(flow) => {
                write!(f, "flow '{flow}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ---------------------------------------------------------------------------
// RegistryBuilder / AgentRegistry
// ---------------------------------------------------------------------------

/// Startup-time registration. Consumed by [`RegistryBuilder::build`].
#[derive(Default)]
pub struct RegistryBuilder {
    map: HashMap<String, Arc<dyn TaskAgent>>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("flows", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        flow: impl Into<String>,
        agent: Arc<dyn TaskAgent>,
    ) -> Result<Self, RegistryError> {
        let flow = flow.into();
        if self.map.contains_key(&flow) {
            return Err(RegistryError::DuplicateFlow(flow));
        }
        self.map.insert(flow, agent);
        Ok(self)
    }

    pub fn build(self) -> AgentRegistry {
        AgentRegistry {
            map: Arc::new(self.map),
        }
    }
}

/// Immutable flow → agent map. Cheap to clone.
#[derive(Clone)]
pub struct AgentRegistry {
    map: Arc<HashMap<String, Arc<dyn TaskAgent>>>,
}

impl AgentRegistry {
    pub fn resolve(&self, flow: &str) -> Option<Arc<dyn TaskAgent>> {
        self.map.get(flow).cloned()
    }

    /// Registered flow names, sorted.
    pub fn flows(&self) -> Vec<String> {
        let mut flows: Vec<String> = self.map.keys().cloned().collect();
        flows.sort();
        flows
    }

    /// Distinct stream domains across all registered agents.
    pub fn domains(&self) -> BTreeSet<&'static str> {
        self.map.values().map(|a| a.domain()).collect()
    }

    pub fn domain_of(&self, flow: &str) -> Option<&'static str> {
        self.map.get(flow).map(|a| a.domain())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
