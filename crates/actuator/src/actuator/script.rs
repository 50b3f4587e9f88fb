use std::fmt::Write;

use crate::AgentId;
use crate::actuator::dialect::{BatchHeader, Dialect};
use crate::broker::BrokerConnection;
use crate::common::utils::shell::{shell_escape, shell_join};

pub const AGENT_IDS_VARIABLE: &str = "ACTUATOR_AGENT_IDS";

/// Builds a complete batch script that starts one agent for every id in `agent_ids`.
///
/// Each agent receives the broker connection through environment variables and finds its own
/// id by its rank within the job.
pub fn build_submit_script(
    dialect: &dyn Dialect,
    header: &BatchHeader,
    broker: &BrokerConnection,
    agent_command: &[String],
    agent_ids: &[AgentId],
) -> crate::Result<String> {
    let mut script = String::new();
    dialect.apply_batched_submission_arguments(&mut script, header)?;

    let ids = agent_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let mut exports: Vec<String> = broker
        .environment()
        .into_iter()
        .map(|(key, value)| format!("export {key}={}", shell_escape(&value)))
        .collect();
    exports.push(format!("export {AGENT_IDS_VARIABLE}={}", shell_escape(&ids)));

    script.push('\n');
    for export in &exports {
        writeln!(script, "{export}").unwrap();
    }
    script.push('\n');

    let agent = shell_join(agent_command);
    let command = match agent_ids {
        [id] => format!("{agent} --agent-id {id}"),
        _ => {
            let mut inner = String::new();
            if !dialect.launch_inherits_environment() {
                for export in &exports {
                    write!(inner, "{export}; ").unwrap();
                }
            }
            write!(
                inner,
                "set -- ${AGENT_IDS_VARIABLE}; shift \"${}\"; exec {agent} --agent-id \"$1\"",
                dialect.rank_variable()
            )
            .unwrap();
            format!("bash -c {}", shell_escape(&inner))
        }
    };
    writeln!(
        script,
        "{}",
        dialect.launch_command(agent_ids.len() as u64, &command)
    )
    .unwrap();
    Ok(script)
}
