use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use futures::future::BoxFuture;
use log::LevelFilter;
use parking_lot::Mutex;

use crate::actuator::Actuator;
use crate::actuator::dialect::{DialectKind, ResourceRequirement, create_dialect};
use crate::actuator::remote::{ChannelConfig, CommandOutput, RemoteChannel};
use crate::broker::BrokerConnection;
use crate::common::error::ActuatorError;
use crate::config::ResourceConfig;
use crate::{AgentId, Map};

pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter(None, LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// What the scripted channel should answer to the next command.
pub enum Reply {
    Output(CommandOutput),
    TransportError(String),
    /// Never finishes, the caller has to time out or drop the future.
    Hang,
}

impl Reply {
    pub fn stdout(stdout: &str) -> Self {
        Reply::Output(CommandOutput::success(stdout))
    }

    pub fn exit(status: i32, stderr: &str) -> Self {
        Reply::Output(CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
}

/// Remote channel that answers commands from a prepared list of replies and records everything
/// that was executed. Without a prepared reply, commands succeed with an empty output.
#[derive(Default)]
pub struct ScriptedChannel {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    files: Mutex<Map<PathBuf, String>>,
}

impl ScriptedChannel {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, program: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.program == program)
            .cloned()
            .collect()
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().get(path).cloned()
    }
}

impl RemoteChannel for ScriptedChannel {
    fn run_command<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, crate::Result<CommandOutput>> {
        self.calls.lock().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
        });
        let reply = self.replies.lock().pop_front();
        Box::pin(async move {
            match reply {
                None => Ok(CommandOutput::default()),
                Some(Reply::Output(output)) => Ok(output),
                Some(Reply::TransportError(error)) => Err(ActuatorError::Transport(error)),
                Some(Reply::Hang) => futures::future::pending().await,
            }
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: &'a str,
    ) -> BoxFuture<'a, crate::Result<()>> {
        self.files
            .lock()
            .insert(path.to_path_buf(), contents.to_string());
        Box::pin(async move { Ok(()) })
    }
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct TestResource {
    #[builder(default = "DialectKind::Slurm")]
    dialect: DialectKind,
    #[builder(default = "16")]
    max_batch_size: usize,
    #[builder(default = "Duration::from_secs(5)")]
    command_timeout: Duration,
    #[builder(default = "vec![ResourceRequirement::new(\"ntasks\", true, 1)]")]
    requirements: Vec<ResourceRequirement>,
    #[builder(default)]
    extra: Vec<String>,
}

impl TestResourceBuilder {
    pub fn create(self, channel: Arc<ScriptedChannel>) -> Actuator {
        let resource = self.build().unwrap();
        let config = ResourceConfig {
            name: "cluster".to_string(),
            dialect: resource.dialect,
            channel: ChannelConfig::Local,
            work_dir: PathBuf::from("/scratch/agents"),
            agent_command: vec!["agent".to_string()],
            max_batch_size: resource.max_batch_size,
            command_timeout: resource.command_timeout,
            requirements: resource.requirements,
            extra: resource.extra,
        };
        Actuator::new(
            &config,
            create_dialect(resource.dialect),
            channel,
            Arc::new(test_broker()),
        )
    }
}

pub fn test_broker() -> BrokerConnection {
    BrokerConnection::builder()
        .uri("amqp://broker")
        .routing_key("agents")
        .build()
        .unwrap()
}

pub fn agent_ids(count: u128) -> Vec<AgentId> {
    (1..=count).map(uuid::Uuid::from_u128).collect()
}
