//! Translation of generic resource requirements into the submission syntax of a concrete
//! scheduler.
//!
//! The engine in [`resource`] is shared by all dialects, a dialect only supplies its table of
//! known resources and a bit of formatting.
mod resource;
pub mod pbs;
pub mod slurm;

use std::fmt::{Display, Formatter, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::utils::shell::shell_escape;
pub use resource::{
    BatchResource, RenderedResource, ResourceKind, ResourceRequirement, ResourceTable,
    render_resources,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Pbs,
    Slurm,
}

impl Display for DialectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DialectKind::Pbs => f.write_str("PBS"),
            DialectKind::Slurm => f.write_str("SLURM"),
        }
    }
}

pub fn create_dialect(kind: DialectKind) -> Arc<dyn Dialect> {
    match kind {
        DialectKind::Pbs => Arc::new(pbs::PbsDialect::new()),
        DialectKind::Slurm => Arc::new(slurm::SlurmDialect::new()),
    }
}

/// Per-batch parameters of a submission script header.
#[derive(Debug, Clone)]
pub struct BatchHeader<'a> {
    pub job_name: &'a str,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub batch_size: u64,
    pub requirements: &'a [ResourceRequirement],
    pub extra_args: &'a [String],
}

/// Scheduler-specific submission syntax.
///
/// Implementations are stateless and can be shared by any number of actuators.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    /// Resources known to this dialect.
    fn resources(&self) -> &ResourceTable;

    /// Command that submits a batch script and prints the job id.
    fn submit_command(&self) -> &'static str;

    /// Command that cancels any number of jobs given as its arguments.
    fn cancel_command(&self) -> &'static str;

    /// Prefix of a directive line in a batch script (e.g. `#SBATCH`).
    fn directive_prefix(&self) -> &'static str;

    /// Name of the requirement that holds the time limit of a job.
    fn walltime_resource(&self) -> &'static str {
        "time"
    }

    /// Formats a resolved resource as command line arguments.
    fn format_argument(&self, resource: &RenderedResource) -> Vec<String>;

    /// Formats a resolved resource as the content of a single directive line.
    fn format_directive(&self, resource: &RenderedResource) -> String;

    /// Directives that redirect the standard output/error streams of the job and name it.
    fn job_directives(&self, job_name: &str, stdout: &str, stderr: &str) -> Vec<String>;

    /// Wraps a command so that it is executed once for every agent of the batch.
    fn launch_command(&self, batch_size: u64, command: &str) -> String;

    /// Environment variable holding the position of the current process within the batch.
    fn rank_variable(&self) -> &'static str;

    /// Whether variables exported by the batch script reach the processes started by
    /// [`launch_command`](Self::launch_command).
    fn launch_inherits_environment(&self) -> bool {
        true
    }

    /// Renders the arguments for the submit command of a batch with `batch_size` agents.
    fn render_arguments(
        &self,
        batch_size: u64,
        requirements: &[ResourceRequirement],
    ) -> crate::Result<Vec<String>> {
        Ok(render_resources(self.resources(), batch_size, requirements)?
            .iter()
            .flat_map(|resource| self.format_argument(resource))
            .collect())
    }

    /// Time limit of the job in seconds, if requested.
    fn walltime(&self, requirements: &[ResourceRequirement]) -> crate::Result<Option<u64>> {
        resource::find_walltime(self.resources(), self.walltime_resource(), requirements)
    }

    /// Checks values of all known resources, so that a misconfiguration is found before anything
    /// is submitted.
    fn validate_requirements(&self, requirements: &[ResourceRequirement]) -> crate::Result<()> {
        resource::validate_requirements(self.resources(), requirements)
    }

    /// Writes the header of a batch script: shebang, job name, output redirection, one
    /// directive per requirement and one per extra argument.
    fn apply_batched_submission_arguments(
        &self,
        script: &mut String,
        header: &BatchHeader,
    ) -> crate::Result<()> {
        let resources = render_resources(self.resources(), header.batch_size, header.requirements)?;
        let prefix = self.directive_prefix();

        script.push_str("#!/bin/bash\n");
        let stdout = shell_escape(header.stdout);
        let stderr = shell_escape(header.stderr);
        for directive in self.job_directives(header.job_name, &stdout, &stderr) {
            writeln!(script, "{prefix} {directive}").unwrap();
        }
        for resource in &resources {
            writeln!(script, "{prefix} {}", self.format_directive(resource)).unwrap();
        }
        for arg in header.extra_args {
            writeln!(script, "{prefix} {arg}").unwrap();
        }
        Ok(())
    }
}
