//! Provisioning of agents on HPC clusters.
//!
//! A request to "run N agents on resource R" is turned into a batch job of the resource's
//! scheduler (Slurm, PBS), submitted through a [`RemoteChannel`](actuator::remote::RemoteChannel)
//! and tracked until the agents are cancelled or reported terminal.
//!
//! The term `job` in this crate always refers to a scheduler job, which may host several agents.
pub mod actuator;
pub mod broker;
pub mod common;
pub mod config;
pub mod schema;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::ActuatorError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = std::collections::HashMap<K, V>;
pub type Set<T> = std::collections::HashSet<T>;

/// Identifier of a single agent. Agents are identified by a random UUID assigned by the caller.
pub type AgentId = uuid::Uuid;

pub const ACTUATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
