use crate::actuator::dialect::{
    BatchResource, Dialect, DialectKind, RenderedResource, ResourceTable,
};

pub struct SlurmDialect {
    resources: ResourceTable,
}

impl SlurmDialect {
    pub fn new() -> Self {
        Self {
            resources: ResourceTable::new(vec![
                BatchResource::count("nodes"),
                BatchResource::count("ntasks"),
                BatchResource::count("ntasks-per-node").fixed(),
                BatchResource::count("cpus-per-task").fixed(),
                BatchResource::count("gpus"),
                BatchResource::count("gpus-per-node").fixed(),
                BatchResource::memory("mem", "K"),
                BatchResource::memory("mem-per-cpu", "K").fixed(),
                BatchResource::duration("time"),
            ]),
        }
    }
}

impl Default for SlurmDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SlurmDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Slurm
    }

    fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    fn submit_command(&self) -> &'static str {
        "sbatch"
    }

    fn cancel_command(&self) -> &'static str {
        "scancel"
    }

    fn directive_prefix(&self) -> &'static str {
        "#SBATCH"
    }

    fn format_argument(&self, resource: &RenderedResource) -> Vec<String> {
        vec![format!("--{}", resource.name), resource.value.clone()]
    }

    fn format_directive(&self, resource: &RenderedResource) -> String {
        format!("--{}={}", resource.name, resource.value)
    }

    fn job_directives(&self, job_name: &str, stdout: &str, stderr: &str) -> Vec<String> {
        vec![
            format!("--job-name={job_name}"),
            format!("--output={stdout}"),
            format!("--error={stderr}"),
        ]
    }

    fn launch_command(&self, batch_size: u64, command: &str) -> String {
        // `--overlap` lets the agents themselves start further steps inside the allocation.
        if batch_size > 1 {
            format!("srun --overlap --ntasks={batch_size} {command}")
        } else {
            command.to_string()
        }
    }

    fn rank_variable(&self) -> &'static str {
        "SLURM_PROCID"
    }
}

#[cfg(test)]
mod tests {
    use super::SlurmDialect;
    use crate::actuator::dialect::{BatchHeader, Dialect, ResourceRequirement};

    #[test]
    fn render_memory() {
        let dialect = SlurmDialect::new();
        let args = dialect
            .render_arguments(4, &[ResourceRequirement::new("mem", true, 2_000_000)])
            .unwrap();
        assert_eq!(args, vec!["--mem", "8000K"]);
    }

    #[test]
    fn render_nodes_unscaled() {
        let dialect = SlurmDialect::new();
        for batch_size in [1, 4, 64] {
            let args = dialect
                .render_arguments(batch_size, &[ResourceRequirement::new("nodes", false, 3)])
                .unwrap();
            assert_eq!(args, vec!["--nodes", "3"]);
        }
    }

    #[test]
    fn render_unknown_resource() {
        let dialect = SlurmDialect::new();
        let args = dialect
            .render_arguments(8, &[ResourceRequirement::new("partition", true, "gpu")])
            .unwrap();
        assert_eq!(args, vec!["--partition", "gpu"]);
        let args = dialect
            .render_arguments(8, &[ResourceRequirement::new("exclusive-cores", true, 5)])
            .unwrap();
        assert_eq!(args, vec!["--exclusive-cores", "5"]);
    }

    #[test]
    fn render_mixed_in_order() {
        let dialect = SlurmDialect::new();
        let args = dialect
            .render_arguments(
                2,
                &[
                    ResourceRequirement::new("ntasks", true, 1),
                    ResourceRequirement::new("cpus-per-task", true, 4),
                    ResourceRequirement::new("time", false, 5400),
                    ResourceRequirement::new("account", false, "proj-01"),
                ],
            )
            .unwrap();
        assert_eq!(
            args,
            vec![
                "--ntasks",
                "2",
                "--cpus-per-task",
                "4",
                "--time",
                "01:30:00",
                "--account",
                "proj-01"
            ]
        );
    }

    #[test]
    fn walltime() {
        let dialect = SlurmDialect::new();
        let requirements = [
            ResourceRequirement::new("nodes", true, 1),
            ResourceRequirement::new("time", false, 600),
            ResourceRequirement::new("mem", true, 1000),
        ];
        assert_eq!(dialect.walltime(&requirements).unwrap(), Some(600));
        assert_eq!(dialect.walltime(&requirements[..1]).unwrap(), None);
    }

    #[test]
    fn launch_single_agent() {
        let dialect = SlurmDialect::new();
        assert_eq!(dialect.launch_command(1, "agent"), "agent");
        assert_eq!(
            dialect.launch_command(3, "agent"),
            "srun --overlap --ntasks=3 agent"
        );
    }

    #[test]
    fn header() {
        let dialect = SlurmDialect::new();
        let mut script = String::new();
        dialect
            .apply_batched_submission_arguments(
                &mut script,
                &BatchHeader {
                    job_name: "cluster-001",
                    stdout: "/scratch/my runs/001/stdout",
                    stderr: "/scratch/my runs/001/stderr",
                    batch_size: 2,
                    requirements: &[
                        ResourceRequirement::new("ntasks", true, 1),
                        ResourceRequirement::new("mem", true, 4_000_000),
                        ResourceRequirement::new("time", false, 3600),
                    ],
                    extra_args: &["--partition=short".to_string()],
                },
            )
            .unwrap();
        insta::assert_snapshot!(script.trim_end(), @r###"
        #!/bin/bash
        #SBATCH --job-name=cluster-001
        #SBATCH --output='/scratch/my runs/001/stdout'
        #SBATCH --error='/scratch/my runs/001/stderr'
        #SBATCH --ntasks=2
        #SBATCH --mem=8000K
        #SBATCH --time=01:00:00
        #SBATCH --partition=short
        "###);
    }
}
