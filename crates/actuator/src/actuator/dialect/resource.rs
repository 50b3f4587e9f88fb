use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Map;
use crate::common::error::format_error;
use crate::common::utils::time::format_hms_duration;

/// A single resource request of a job configuration, e.g. `{name = "mem", scale = true, value = 2000000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequirement {
    pub name: String,
    /// If true, `value` is requested per agent and has to be multiplied by the batch size.
    #[serde(default)]
    pub scale: bool,
    pub value: Value,
}

impl ResourceRequirement {
    pub fn new<S: Into<String>, V: Into<Value>>(name: S, scale: bool, value: V) -> Self {
        Self {
            name: name.into(),
            scale,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Plain amount (nodes, CPUs, GPUs, ...).
    Count,
    /// Amount of memory, given in bytes and emitted in kilobytes.
    Memory,
    /// Time limit, given in seconds and emitted as `HH:MM:SS`.
    Duration,
}

/// Describes how a single named resource of a dialect is parsed, validated, scaled and formatted.
#[derive(Debug, Clone)]
pub struct BatchResource {
    name: &'static str,
    kind: ResourceKind,
    scales_with_batch_size: bool,
    unit_suffix: &'static str,
    parse: fn(&Value) -> crate::Result<u64>,
    validate: fn(u64) -> bool,
}

impl BatchResource {
    pub fn count(name: &'static str) -> Self {
        Self {
            name,
            kind: ResourceKind::Count,
            scales_with_batch_size: true,
            unit_suffix: "",
            parse: parse_amount,
            validate: is_positive,
        }
    }

    pub fn memory(name: &'static str, unit_suffix: &'static str) -> Self {
        Self {
            name,
            kind: ResourceKind::Memory,
            scales_with_batch_size: true,
            unit_suffix,
            parse: parse_amount,
            validate: is_at_least_kilobyte,
        }
    }

    pub fn duration(name: &'static str) -> Self {
        Self {
            name,
            kind: ResourceKind::Duration,
            scales_with_batch_size: false,
            unit_suffix: "",
            parse: parse_amount,
            validate: is_positive,
        }
    }

    /// Resource whose value is never multiplied by the batch size.
    pub fn fixed(mut self) -> Self {
        self.scales_with_batch_size = false;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn scales_with_batch_size(&self) -> bool {
        self.scales_with_batch_size
    }

    pub fn unit_suffix(&self) -> &'static str {
        self.unit_suffix
    }

    /// Parses and validates a raw document value.
    pub fn parse(&self, value: &Value) -> crate::Result<u64> {
        let amount = (self.parse)(value)?;
        if !(self.validate)(amount) {
            return format_error(format!(
                "Invalid value {amount} of resource `{}`",
                self.name
            ));
        }
        Ok(amount)
    }

    /// Computes the amount that should be requested for a whole batch.
    pub fn batch_amount(&self, batch_size: u64, scale: bool, amount: u64) -> crate::Result<u64> {
        let scale = scale && self.scales_with_batch_size;
        let multiplier = if scale { batch_size } else { 1 };
        let overflow = || {
            format_error(format!(
                "Resource `{}` overflows for a batch of {batch_size} agents",
                self.name
            ))
        };
        let Some(total) = amount.checked_mul(multiplier) else {
            return overflow();
        };
        match self.kind {
            ResourceKind::Memory => Ok(total / 1000),
            ResourceKind::Count | ResourceKind::Duration => Ok(total),
        }
    }

    pub fn format(&self, amount: u64) -> String {
        match self.kind {
            ResourceKind::Duration => format_hms_duration(&Duration::from_secs(amount)),
            ResourceKind::Count | ResourceKind::Memory => format!("{amount}{}", self.unit_suffix),
        }
    }
}

fn is_positive(amount: u64) -> bool {
    amount > 0
}

/// Memory is emitted in kilobytes, and schedulers read a zero limit as "all memory".
fn is_at_least_kilobyte(amount: u64) -> bool {
    amount >= 1000
}

/// Accepts non-negative integers, floats without a fractional part and strings containing an
/// integer.
fn parse_amount(value: &Value) -> crate::Result<u64> {
    match value {
        Value::Number(number) => {
            if let Some(amount) = number.as_u64() {
                Ok(amount)
            } else if let Some(amount) = number.as_f64().filter(|v| {
                v.fract() == 0.0 && *v >= 0.0 && *v <= u64::MAX as f64
            }) {
                Ok(amount as u64)
            } else {
                format_error(format!("Expected a non-negative integer, found {number}"))
            }
        }
        Value::String(string) => match string.trim().parse::<u64>() {
            Ok(amount) => Ok(amount),
            Err(_) => format_error(format!(
                "Expected a non-negative integer, found {string:?}"
            )),
        },
        value => format_error(format!("Expected a number, found {value}")),
    }
}

/// Immutable mapping from a resource name to its definition.
#[derive(Debug, Default)]
pub struct ResourceTable {
    resources: Map<&'static str, BatchResource>,
}

impl ResourceTable {
    pub fn new(resources: Vec<BatchResource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.name, r)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&BatchResource> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A requirement resolved for a concrete batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResource {
    pub name: String,
    pub value: String,
}

/// Text of a raw value of a resource that is unknown to the dialect.
fn raw_value(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        value => value.to_string(),
    }
}

/// Resolves `requirements` for a batch of `batch_size` agents, keeping their order.
///
/// Resources that are not present in `table` are passed through verbatim, without any
/// scaling or unit conversion.
pub fn render_resources(
    table: &ResourceTable,
    batch_size: u64,
    requirements: &[ResourceRequirement],
) -> crate::Result<Vec<RenderedResource>> {
    if batch_size == 0 {
        return format_error("Batch size has to be positive".to_string());
    }
    requirements
        .iter()
        .map(|requirement| {
            let value = match table.get(&requirement.name) {
                Some(resource) => {
                    let amount = resource.parse(&requirement.value)?;
                    let amount = resource.batch_amount(batch_size, requirement.scale, amount)?;
                    resource.format(amount)
                }
                None => {
                    log::debug!(
                        "Resource `{}` is not known, passing it through",
                        requirement.name
                    );
                    raw_value(&requirement.value)
                }
            };
            Ok(RenderedResource {
                name: requirement.name.clone(),
                value,
            })
        })
        .collect()
}

/// Checks all known resources of `requirements` without rendering them.
pub fn validate_requirements(
    table: &ResourceTable,
    requirements: &[ResourceRequirement],
) -> crate::Result<()> {
    for requirement in requirements {
        if let Some(resource) = table.get(&requirement.name) {
            resource.parse(&requirement.value)?;
        }
    }
    Ok(())
}

/// Finds the time limit (in seconds) among `requirements`. It is never scaled.
pub fn find_walltime(
    table: &ResourceTable,
    name: &str,
    requirements: &[ResourceRequirement],
) -> crate::Result<Option<u64>> {
    let Some(requirement) = requirements.iter().find(|r| r.name == name) else {
        return Ok(None);
    };
    let seconds = match table.get(name) {
        Some(resource) => resource.parse(&requirement.value)?,
        None => parse_amount(&requirement.value)?,
    };
    Ok(Some(seconds))
}
