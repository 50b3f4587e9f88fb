//! Configuration file of the actuator.
//!
//! ```toml
//! [broker]
//! uri = "amqps://broker.example.com:5671/%2f"
//! routing_key = "experiment-7"
//!
//! [[resource]]
//! name = "cluster"
//! dialect = "slurm"
//! work_dir = "/scratch/agents"
//! agent_command = ["/opt/agent/bin/agent"]
//! channel = { type = "ssh", host = "login.cluster.example.com" }
//! requirements = [
//!     { name = "ntasks", scale = true, value = 1 },
//!     { name = "mem", scale = true, value = 2000000 },
//!     { name = "time", value = 3600 },
//! ]
//! extra = ["--partition=short"]
//! ```
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::Set;
use crate::actuator::dialect::{DialectKind, ResourceRequirement, create_dialect};
use crate::actuator::remote::ChannelConfig;
use crate::broker::{BrokerConnection, BrokerConnectionBuilder};
use crate::common::error::configuration_error;
use crate::common::utils::time::get_duration_from_env;
use crate::schema::SchemaVersion;

/// Overrides the command timeout of all resources (in milliseconds).
pub const COMMAND_TIMEOUT_ENV: &str = "ACTUATOR_COMMAND_TIMEOUT_MS";

fn default_max_batch_size() -> usize {
    16
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value: String = Deserialize::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}

/// A single cluster (or partition) on which agents can be started.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    pub name: String,
    pub dialect: DialectKind,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Directory on the submission host where batch scripts and job outputs are stored.
    pub work_dir: PathBuf,
    /// Program (and its arguments) that starts a single agent.
    pub agent_command: Vec<String>,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(
        default = "default_command_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub command_timeout: Duration,
    #[serde(default)]
    pub requirements: Vec<ResourceRequirement>,
    /// Arguments passed verbatim to the scheduler after all rendered requirements.
    #[serde(default)]
    pub extra: Vec<String>,
}

impl ResourceConfig {
    fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return configuration_error("Resource name cannot be empty".to_string());
        }
        if self.max_batch_size == 0 {
            return configuration_error(format!(
                "Resource `{}`: max_batch_size has to be positive",
                self.name
            ));
        }
        if self.agent_command.is_empty() {
            return configuration_error(format!(
                "Resource `{}`: agent_command cannot be empty",
                self.name
            ));
        }
        create_dialect(self.dialect).validate_requirements(&self.requirements)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    pub directory: PathBuf,
    pub required: SchemaVersion,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    broker: BrokerConnectionBuilder,
    #[serde(default)]
    resource: Vec<ResourceConfig>,
    schema: Option<SchemaConfig>,
}

/// Validated configuration.
pub struct Config {
    broker: Arc<BrokerConnection>,
    resources: Vec<ResourceConfig>,
    schema: Option<SchemaConfig>,
}

impl Config {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> crate::Result<Self> {
        let ConfigFile {
            mut broker,
            mut resource,
            schema,
        } = toml::from_str(content)?;

        let broker = Arc::new(broker.build()?);

        let mut names = Set::new();
        for resource in &mut resource {
            resource.validate()?;
            if !names.insert(resource.name.clone()) {
                return configuration_error(format!("Duplicate resource `{}`", resource.name));
            }
            if let Some(timeout) = get_duration_from_env(COMMAND_TIMEOUT_ENV) {
                resource.command_timeout = timeout;
            }
        }
        Ok(Self {
            broker,
            resources: resource,
            schema,
        })
    }

    pub fn broker(&self) -> &Arc<BrokerConnection> {
        &self.broker
    }

    pub fn resources(&self) -> &[ResourceConfig] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> crate::Result<&ResourceConfig> {
        match self.resources.iter().find(|r| r.name == name) {
            Some(resource) => Ok(resource),
            None => configuration_error(format!("Resource `{name}` is not configured")),
        }
    }

    pub fn schema(&self) -> Option<&SchemaConfig> {
        self.schema.as_ref()
    }
}
