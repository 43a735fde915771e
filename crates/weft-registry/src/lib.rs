//! Flow registry and task ingress.
//!
//! Flows are bound to agents by explicit registration at startup — there is
//! no discovery, no attribute scanning, and after [`RegistryBuilder::build`]
//! the map is immutable. Agents implement [`TaskAgent`] and never see the
//! registry; only the worker runtime and the ingress resolve through it,
//! which keeps the dependency graph acyclic.

pub mod ingress;
pub mod registry;

pub use ingress::{Ingress, IngressError};
pub use registry::{AgentFailure, AgentRegistry, RegistryBuilder, RegistryError, TaskAgent};
