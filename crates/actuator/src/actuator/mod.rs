//! The actuator manages scheduler jobs of a single configured resource.
//!
//! Agent launch requests are collected into batches, each batch becomes one scheduler job. The
//! lifecycle of a batch is
//!
//! `pending -> submitted -> active -> killing -> (removed)`
//!
//! A batch whose submission fails is reported to the caller and forgotten, it never becomes
//! active. Only bookkeeping is done under the state lock, remote commands are always executed
//! without holding it.
pub mod dialect;
pub mod remote;
pub mod script;
pub mod state;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::actuator::dialect::{BatchHeader, Dialect, ResourceRequirement, create_dialect};
use crate::actuator::remote::{RemoteChannel, create_channel};
use crate::actuator::script::build_submit_script;
use crate::actuator::state::{
    ActuatorEvent, ActuatorEventHolder, ActuatorState, BatchId, JobId, JobRecord, JobStatus,
};
use crate::broker::BrokerConnection;
use crate::common::error::ActuatorError;
use crate::common::parser::parse_job_id;
use crate::config::ResourceConfig;
use crate::AgentId;

/// Name of a script that will be submitted to the scheduler.
const SUBMIT_SCRIPT_NAME: &str = "submit.sh";

/// Name of a file that will store the job id of a submitted batch.
const JOBID_FILE_NAME: &str = "jobid";

/// A group of agents that is submitted as a single scheduler job.
#[derive(Debug, Clone)]
pub struct SubmissionBatch {
    pub batch_id: BatchId,
    /// Order of submission, preserved for log correlation.
    pub agent_ids: Vec<AgentId>,
    pub working_dir: PathBuf,
    pub script_path: PathBuf,
    pub requirements: Arc<[ResourceRequirement]>,
    pub extra_args: Arc<[String]>,
}

/// Result of submitting a single batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_id: BatchId,
    pub agent_ids: Vec<AgentId>,
    pub result: crate::Result<JobId>,
}

pub struct Actuator {
    name: String,
    dialect: Arc<dyn Dialect>,
    channel: Arc<dyn RemoteChannel>,
    broker: Arc<BrokerConnection>,
    work_dir: PathBuf,
    agent_command: Vec<String>,
    max_batch_size: usize,
    command_timeout: Duration,
    requirements: Arc<[ResourceRequirement]>,
    extra_args: Arc<[String]>,
    /// Separates batch directories of actuators that share a work directory.
    session: String,
    state: Mutex<ActuatorState>,
}

/// Creation time with a random suffix, e.g. `20260301-142501-9f1c2a4b`.
fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &suffix[..8])
}

pub fn create_actuator(config: &ResourceConfig, broker: Arc<BrokerConnection>) -> Actuator {
    Actuator::new(
        config,
        create_dialect(config.dialect),
        create_channel(&config.channel),
        broker,
    )
}

impl Actuator {
    pub fn new(
        config: &ResourceConfig,
        dialect: Arc<dyn Dialect>,
        channel: Arc<dyn RemoteChannel>,
        broker: Arc<BrokerConnection>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            dialect,
            channel,
            broker,
            work_dir: config.work_dir.clone(),
            agent_command: config.agent_command.clone(),
            max_batch_size: config.max_batch_size.max(1),
            command_timeout: config.command_timeout,
            requirements: config.requirements.clone().into(),
            extra_args: config.extra.clone().into(),
            session: new_session_id(),
            state: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the directory (below `<work_dir>/<name>`) that holds batches of this actuator.
    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Adds agents to the pending batch. Returns how many of them were not known yet.
    pub fn enqueue<I: IntoIterator<Item = AgentId>>(&self, agents: I) -> usize {
        self.state.lock().enqueue(agents)
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending_count()
    }

    /// Enqueues the agents and immediately submits all pending batches.
    pub async fn launch(&self, agents: Vec<AgentId>) -> Vec<BatchOutcome> {
        self.enqueue(agents);
        self.flush().await
    }

    /// Submits all pending agents, in batches of at most `max_batch_size` agents.
    ///
    /// Batches are submitted one after another, a failure of one batch does not affect the others.
    /// If the returned future is dropped, batches that were not submitted yet are forgotten.
    pub async fn flush(&self) -> Vec<BatchOutcome> {
        let batches = self.state.lock().take_batches(self.max_batch_size);
        let mut guard = InFlightGuard {
            state: &self.state,
            batch_ids: batches.iter().map(|(batch_id, _)| *batch_id).collect(),
        };
        let mut outcomes = Vec::with_capacity(batches.len());
        for (batch_id, agent_ids) in batches {
            let batch = self.create_batch(batch_id, agent_ids);
            let result = self.submit_batch(&batch).await;
            guard.finish(batch_id);
            outcomes.push(BatchOutcome {
                batch_id,
                agent_ids: batch.agent_ids,
                result,
            });
        }
        outcomes
    }

    fn create_batch(&self, batch_id: BatchId, agent_ids: Vec<AgentId>) -> SubmissionBatch {
        let working_dir = self
            .work_dir
            .join(&self.name)
            .join(&self.session)
            .join(format!("{batch_id:03}"));
        SubmissionBatch {
            batch_id,
            agent_ids,
            script_path: working_dir.join(SUBMIT_SCRIPT_NAME),
            working_dir,
            requirements: self.requirements.clone(),
            extra_args: self.extra_args.clone(),
        }
    }

    /// Renders the submission script of a batch.
    pub fn render_script(&self, batch: &SubmissionBatch) -> crate::Result<String> {
        let stdout = batch.working_dir.join("stdout").display().to_string();
        let stderr = batch.working_dir.join("stderr").display().to_string();
        let job_name = format!("{}-{:03}", self.name, batch.batch_id);
        build_submit_script(
            self.dialect.as_ref(),
            &BatchHeader {
                job_name: &job_name,
                stdout: &stdout,
                stderr: &stderr,
                batch_size: batch.agent_ids.len() as u64,
                requirements: &batch.requirements,
                extra_args: &batch.extra_args,
            },
            &self.broker,
            &self.agent_command,
            &batch.agent_ids,
        )
    }

    /// Renders a batch for the given agents without submitting it or changing any state.
    pub fn dry_run(&self, agent_ids: Vec<AgentId>) -> crate::Result<(SubmissionBatch, String)> {
        let batch = self.create_batch(0, agent_ids);
        let script = self.render_script(&batch)?;
        Ok((batch, script))
    }

    /// Submits a batch that was previously taken out of the pending list.
    ///
    /// On success, the batch becomes a live [`JobRecord`], on failure the batch is forgotten.
    async fn submit_batch(&self, batch: &SubmissionBatch) -> crate::Result<JobId> {
        match self.submit_script(batch).await {
            Ok(job_id) => {
                log::info!(
                    "Resource {}: batch {} with {} agent(s) submitted as job {job_id}",
                    self.name,
                    batch.batch_id,
                    batch.agent_ids.len()
                );
                self.state.lock().activate_batch(JobRecord {
                    job_id: job_id.clone(),
                    batch_id: batch.batch_id,
                    agent_ids: batch.agent_ids.clone(),
                    submitted_at: Utc::now(),
                    status: JobStatus::Active,
                    working_dir: batch.working_dir.clone(),
                });
                Ok(job_id)
            }
            Err(error) => {
                log::error!(
                    "Resource {}: submission of batch {} failed: {error}",
                    self.name,
                    batch.batch_id
                );
                self.state
                    .lock()
                    .fail_batch(batch.batch_id, error.to_string());
                Err(error)
            }
        }
    }

    async fn submit_script(&self, batch: &SubmissionBatch) -> crate::Result<JobId> {
        // Has to happen before any remote side effect
        let script = self.render_script(batch)?;
        self.with_timeout(self.channel.write_file(&batch.script_path, &script))
            .await?;

        let program = self.dialect.submit_command();
        let args = vec![batch.script_path.display().to_string()];
        let output = self
            .with_timeout(self.channel.run_command(program, &args))
            .await?;
        if !output.is_success() {
            return Err(ActuatorError::Submission(format!(
                "{program} exited with code {}\nStderr: {}\nStdout: {}",
                output.status,
                output.stderr.trim(),
                output.stdout.trim()
            )));
        }
        if !output.stderr.trim().is_empty() {
            log::warn!(
                "Resource {}: {program} reported: {}",
                self.name,
                output.stderr.trim()
            );
        }
        log::debug!("{program} output: {}", output.stdout.trim());

        let job_id = parse_job_id(&output.stdout)
            .map(|id| id.to_string())
            .ok_or_else(|| ActuatorError::JobIdParse {
                output: output.stdout.clone(),
            })?;

        // The job id file only serves for debugging
        let jobid_path = batch.working_dir.join(JOBID_FILE_NAME);
        if let Err(error) = self
            .with_timeout(self.channel.write_file(&jobid_path, &job_id))
            .await
        {
            log::warn!("Cannot write job id file {}: {error}", jobid_path.display());
        }
        Ok(job_id)
    }

    /// Cancels the given scheduler jobs with a single cancel command.
    ///
    /// Returns `false` if the command could not be executed or failed. In that case the jobs stay
    /// active, since it is not known whether they were cancelled; the caller can retry or wait
    /// for an external status update.
    pub async fn kill_jobs(&self, job_ids: &[JobId]) -> bool {
        let mut unique = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if !unique.contains(job_id) {
                unique.push(job_id.clone());
            }
        }
        if unique.is_empty() {
            return true;
        }

        let guard = {
            let mut state = self.state.lock();
            state.set_status(&unique, JobStatus::Killing);
            KillGuard {
                state: &self.state,
                job_ids: &unique,
                armed: true,
            }
        };

        let program = self.dialect.cancel_command();
        let result = self
            .with_timeout(self.channel.run_command(program, &unique))
            .await;
        let error = match result {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(format!(
                "{program} exited with code {}: {}",
                output.status,
                output.stderr.trim()
            )),
            Err(error) => Some(error.to_string()),
        };

        match error {
            None => {
                guard.disarm();
                let mut state = self.state.lock();
                for job_id in &unique {
                    if state.remove_job(job_id).is_none() {
                        log::debug!("Cancelled job {job_id} was not tracked by {}", self.name);
                    }
                    state.add_event(ActuatorEvent::JobKilled(job_id.clone()));
                }
                log::info!("Resource {}: cancelled job(s) {}", self.name, unique.join(", "));
                true
            }
            Some(error) => {
                log::warn!(
                    "Resource {}: cancellation of job(s) {} failed: {error}",
                    self.name,
                    unique.join(", ")
                );
                // Dropping the guard puts the jobs back into the active state
                drop(guard);
                self.state.lock().add_event(ActuatorEvent::KillFailed {
                    job_ids: unique.clone(),
                    error,
                });
                false
            }
        }
    }

    /// Cancels the jobs that host the given agents.
    ///
    /// Agents that were not submitted yet are dropped from the pending list. A job is cancelled
    /// as a whole, so other agents sharing a job with a requested agent are stopped as well.
    /// Unknown agents are ignored.
    pub async fn kill_agents(&self, agents: &[AgentId]) -> bool {
        let job_ids = {
            let mut state = self.state.lock();
            let cancelled = state.cancel_pending(agents);
            if cancelled > 0 {
                log::debug!(
                    "Resource {}: {cancelled} pending agent(s) will not be submitted",
                    self.name
                );
            }
            state.jobs_of_agents(agents)
        };
        if job_ids.is_empty() {
            log::debug!("Resource {}: no live job hosts the given agents", self.name);
            return true;
        }
        self.kill_jobs(&job_ids).await
    }

    /// Cancels every live job of this resource.
    pub async fn kill_all(&self) -> bool {
        let job_ids: Vec<JobId> = self
            .state
            .lock()
            .jobs()
            .map(|job| job.job_id.clone())
            .collect();
        self.kill_jobs(&job_ids).await
    }

    /// Forgets a job that was reported as finished by an external status source.
    pub fn mark_terminal(&self, job_id: &str) -> Option<JobRecord> {
        let mut state = self.state.lock();
        let record = state.remove_job(job_id)?;
        state.add_event(ActuatorEvent::JobFinished(job_id.to_string()));
        Some(record)
    }

    pub fn job_of_agent(&self, agent: &AgentId) -> Option<JobId> {
        self.state.lock().job_of_agent(agent).cloned()
    }

    pub fn agents_of_job(&self, job_id: &str) -> Option<Vec<AgentId>> {
        self.state
            .lock()
            .get_job(job_id)
            .map(|job| job.agent_ids.clone())
    }

    pub fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.state.lock().get_job(job_id).cloned()
    }

    pub fn live_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.state.lock().jobs().cloned().collect();
        jobs.sort_by_key(|job| job.batch_id);
        jobs
    }

    pub fn events(&self) -> Vec<ActuatorEventHolder> {
        self.state.lock().events().iter().cloned().collect()
    }

    async fn with_timeout<T, F: Future<Output = crate::Result<T>>>(
        &self,
        future: F,
    ) -> crate::Result<T> {
        match tokio::time::timeout(self.command_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Transport(format!(
                "Remote command did not finish within {}",
                humantime::format_duration(self.command_timeout)
            ))),
        }
    }
}

/// Forgets in-flight batches whose submission was abandoned.
struct InFlightGuard<'a> {
    state: &'a Mutex<ActuatorState>,
    batch_ids: Vec<BatchId>,
}

impl InFlightGuard<'_> {
    fn finish(&mut self, batch_id: BatchId) {
        self.batch_ids.retain(|id| *id != batch_id);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.batch_ids.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for batch_id in self.batch_ids.drain(..) {
            log::warn!("Submission of batch {batch_id} was abandoned, its job state is unknown");
            state.fail_batch(batch_id, "Submission was abandoned".to_string());
        }
    }
}

/// Returns jobs to the active state unless the cancellation is confirmed.
struct KillGuard<'a> {
    state: &'a Mutex<ActuatorState>,
    job_ids: &'a [JobId],
    armed: bool,
}

impl KillGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for KillGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().set_status(self.job_ids, JobStatus::Active);
        }
    }
}
