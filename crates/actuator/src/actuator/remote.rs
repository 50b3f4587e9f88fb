//! Execution of commands on the submission host of a cluster.
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;

use bstr::ByteSlice;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::common::error::ActuatorError;
use crate::common::utils::shell::{shell_escape, shell_join};

/// Exit code that `ssh` uses for its own (connection, authentication) failures.
const SSH_FAILURE_EXIT_CODE: i32 = 255;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success<S: Into<String>>(stdout: S) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout.to_str_lossy().into_owned(),
            stderr: output.stderr.to_str_lossy().into_owned(),
        }
    }
}

/// Connection to the host where scheduler commands are executed.
///
/// A non-zero exit status is returned as a normal [`CommandOutput`], only failures to execute
/// the command at all are reported as [`ActuatorError::Transport`].
pub trait RemoteChannel: Send + Sync {
    fn run_command<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, crate::Result<CommandOutput>>;

    /// Stores `contents` into `path` on the host, creating parent directories as needed.
    fn write_file<'a>(&'a self, path: &'a Path, contents: &'a str)
    -> BoxFuture<'a, crate::Result<()>>;
}

/// Where the commands of a resource are executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum ChannelConfig {
    #[default]
    Local,
    Ssh {
        host: String,
        user: Option<String>,
        port: Option<u16>,
    },
}

pub fn create_channel(config: &ChannelConfig) -> Arc<dyn RemoteChannel> {
    match config {
        ChannelConfig::Local => Arc::new(LocalChannel),
        ChannelConfig::Ssh { host, user, port } => Arc::new(SshChannel::new(
            host.clone(),
            user.clone(),
            *port,
        )),
    }
}

fn transport_error(program: &str, error: std::io::Error) -> ActuatorError {
    ActuatorError::Transport(format!("Cannot execute `{program}`: {error}"))
}

/// Runs commands on the local machine, for clusters where the actuator itself lives on a login
/// node.
pub struct LocalChannel;

impl RemoteChannel for LocalChannel {
    fn run_command<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, crate::Result<CommandOutput>> {
        Box::pin(async move {
            log::debug!("Running command `{program} {}`", args.join(" "));
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|error| transport_error(program, error))?;
            Ok(output.into())
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: &'a str,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, contents).await?;
            Ok(())
        })
    }
}

/// Runs commands on a remote host through the `ssh` binary.
///
/// Authentication is left to the SSH configuration of the user (agent, keys, `~/.ssh/config`).
pub struct SshChannel {
    host: String,
    user: Option<String>,
    port: Option<u16>,
}

impl SshChannel {
    pub fn new(host: String, user: Option<String>, port: Option<u16>) -> Self {
        Self { host, user, port }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments of `ssh` that execute `remote_command` (a shell command line) on the host.
    fn ssh_args(&self, remote_command: String) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(self.destination());
        args.push("--".to_string());
        args.push(remote_command);
        args
    }

    fn check_ssh_status(&self, output: CommandOutput) -> crate::Result<CommandOutput> {
        if output.status == SSH_FAILURE_EXIT_CODE {
            return Err(ActuatorError::Transport(format!(
                "SSH connection to {} failed: {}",
                self.host,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

impl RemoteChannel for SshChannel {
    fn run_command<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, crate::Result<CommandOutput>> {
        Box::pin(async move {
            let mut command_line = vec![program.to_string()];
            command_line.extend(args.iter().cloned());
            let ssh_args = self.ssh_args(shell_join(&command_line));
            log::debug!("Running command `ssh {}`", ssh_args.join(" "));

            let output = Command::new("ssh")
                .args(&ssh_args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|error| transport_error("ssh", error))?;
            self.check_ssh_status(output.into())
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        contents: &'a str,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
            let path_str = path.display().to_string();
            let remote_command = if parent.as_os_str().is_empty() {
                format!("cat > {}", shell_escape(&path_str))
            } else {
                format!(
                    "mkdir -p {} && cat > {}",
                    shell_escape(&parent.display().to_string()),
                    shell_escape(&path_str)
                )
            };
            let ssh_args = self.ssh_args(remote_command);
            log::debug!("Writing {path_str} through `ssh {}`", ssh_args.join(" "));

            let mut child = Command::new("ssh")
                .args(&ssh_args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|error| transport_error("ssh", error))?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(contents.as_bytes()).await?;
                // Dropping stdin closes the pipe, so that `cat` can finish.
            }
            let output = child
                .wait_with_output()
                .await
                .map_err(|error| transport_error("ssh", error))?;
            let output = self.check_ssh_status(output.into())?;
            if !output.is_success() {
                return Err(ActuatorError::Transport(format!(
                    "Cannot write {path_str} on {}: {}",
                    self.host,
                    output.stderr.trim()
                )));
            }
            Ok(())
        })
    }
}
