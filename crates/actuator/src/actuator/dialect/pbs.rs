use crate::actuator::dialect::{
    BatchResource, Dialect, DialectKind, RenderedResource, ResourceTable,
};

pub struct PbsDialect {
    resources: ResourceTable,
}

impl PbsDialect {
    pub fn new() -> Self {
        Self {
            resources: ResourceTable::new(vec![
                BatchResource::count("select"),
                BatchResource::count("nodes"),
                BatchResource::count("ncpus").fixed(),
                BatchResource::count("ngpus").fixed(),
                BatchResource::memory("mem", "kb"),
                BatchResource::duration("walltime"),
            ]),
        }
    }
}

impl Default for PbsDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PbsDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Pbs
    }

    fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    fn submit_command(&self) -> &'static str {
        "qsub"
    }

    fn cancel_command(&self) -> &'static str {
        "qdel"
    }

    fn directive_prefix(&self) -> &'static str {
        "#PBS"
    }

    fn walltime_resource(&self) -> &'static str {
        "walltime"
    }

    fn format_argument(&self, resource: &RenderedResource) -> Vec<String> {
        vec![
            "-l".to_string(),
            format!("{}={}", resource.name, resource.value),
        ]
    }

    fn format_directive(&self, resource: &RenderedResource) -> String {
        format!("-l {}={}", resource.name, resource.value)
    }

    fn job_directives(&self, job_name: &str, stdout: &str, stderr: &str) -> Vec<String> {
        vec![
            format!("-N {job_name}"),
            format!("-o {stdout}"),
            format!("-e {stderr}"),
        ]
    }

    fn launch_command(&self, batch_size: u64, command: &str) -> String {
        if batch_size > 1 {
            format!("pbsdsh -- {command}")
        } else {
            command.to_string()
        }
    }

    fn rank_variable(&self) -> &'static str {
        "PBS_VNODENUM"
    }

    fn launch_inherits_environment(&self) -> bool {
        false
    }
}
