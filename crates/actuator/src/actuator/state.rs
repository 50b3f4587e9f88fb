use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, Map, Set};

/// Maximum number of actuator events stored in memory
const MAX_EVENT_QUEUE_LENGTH: usize = 100;

pub type BatchId = u64;

/// Job id assigned by the scheduler.
pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// The job was accepted by the scheduler.
    Active,
    /// A cancel command for the job is in progress.
    Killing,
}

/// A scheduler job together with the agents that it hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub batch_id: BatchId,
    /// Agents in the order in which they were submitted.
    pub agent_ids: Vec<AgentId>,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorEventHolder {
    pub date: DateTime<Utc>,
    pub event: ActuatorEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorEvent {
    JobSubmitted { batch_id: BatchId, job_id: JobId },
    SubmissionFailed { batch_id: BatchId, error: String },
    JobKilled(JobId),
    KillFailed { job_ids: Vec<JobId>, error: String },
    JobFinished(JobId),
}

impl From<ActuatorEvent> for ActuatorEventHolder {
    fn from(event: ActuatorEvent) -> Self {
        Self {
            date: Utc::now(),
            event,
        }
    }
}

/// Bookkeeping of a single actuator.
///
/// Every live agent belongs to exactly one job record, and `agents` is the inverse of the agent
/// lists of `jobs`.
#[derive(Default)]
pub struct ActuatorState {
    /// Agents that were requested, but not yet put into a batch.
    pending: Vec<AgentId>,
    /// Batches handed to the scheduler that do not have a job id yet.
    in_flight: Map<BatchId, Vec<AgentId>>,
    jobs: Map<JobId, JobRecord>,
    agents: Map<AgentId, JobId>,
    batch_counter: BatchId,
    events: VecDeque<ActuatorEventHolder>,
}

impl ActuatorState {
    pub fn add_event<T: Into<ActuatorEventHolder>>(&mut self, event: T) {
        self.events.push_back(event.into());

        if self.events.len() > MAX_EVENT_QUEUE_LENGTH {
            self.events.pop_front();
        }
    }

    pub fn events(&self) -> &VecDeque<ActuatorEventHolder> {
        &self.events
    }

    /// Adds agents to the pending list. Agents that are already pending, submitted or live are
    /// ignored.
    pub fn enqueue<I: IntoIterator<Item = AgentId>>(&mut self, agents: I) -> usize {
        let mut known: Set<AgentId> = self.pending.iter().copied().collect();
        known.extend(self.in_flight.values().flatten().copied());
        let mut added = 0;
        for agent in agents {
            if self.agents.contains_key(&agent) || !known.insert(agent) {
                log::warn!("Agent {agent} was already requested, ignoring it");
                continue;
            }
            self.pending.push(agent);
            added += 1;
        }
        added
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops the given agents from the pending list. Returns how many of them were pending.
    pub fn cancel_pending(&mut self, agents: &[AgentId]) -> usize {
        let before = self.pending.len();
        self.pending.retain(|agent| !agents.contains(agent));
        before - self.pending.len()
    }

    /// Splits all pending agents into batches of at most `max_batch_size` agents, keeping their
    /// order, and marks the batches as in flight.
    pub fn take_batches(&mut self, max_batch_size: usize) -> Vec<(BatchId, Vec<AgentId>)> {
        let max_batch_size = max_batch_size.max(1);
        let pending = std::mem::take(&mut self.pending);
        pending
            .chunks(max_batch_size)
            .map(|agents| {
                self.batch_counter += 1;
                let batch_id = self.batch_counter;
                self.in_flight.insert(batch_id, agents.to_vec());
                (batch_id, agents.to_vec())
            })
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Finishes an in-flight batch whose submission failed.
    pub fn fail_batch(&mut self, batch_id: BatchId, error: String) {
        if self.in_flight.remove(&batch_id).is_none() {
            log::warn!("Trying to fail unknown batch {batch_id}");
        }
        self.add_event(ActuatorEvent::SubmissionFailed { batch_id, error });
    }

    /// Turns an in-flight batch into a live job.
    pub fn activate_batch(&mut self, record: JobRecord) {
        if self.in_flight.remove(&record.batch_id).is_none() {
            log::warn!("Activating batch {} that was not in flight", record.batch_id);
        }
        for agent in &record.agent_ids {
            if let Some(previous) = self.agents.insert(*agent, record.job_id.clone()) {
                log::warn!("Agent {agent} moved from job {previous} to {}", record.job_id);
            }
        }
        self.add_event(ActuatorEvent::JobSubmitted {
            batch_id: record.batch_id,
            job_id: record.job_id.clone(),
        });
        if let Some(record) = self.jobs.insert(record.job_id.clone(), record) {
            log::warn!("Duplicate job detected: {}", record.job_id);
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.get(job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    pub fn job_of_agent(&self, agent: &AgentId) -> Option<&JobId> {
        self.agents.get(agent)
    }

    /// Job ids hosting the given agents, deduplicated and in the order of the first agent that
    /// maps to them. Unknown agents are skipped.
    pub fn jobs_of_agents(&self, agents: &[AgentId]) -> Vec<JobId> {
        let mut seen: Set<&str> = Set::new();
        let mut job_ids = Vec::new();
        for agent in agents {
            if let Some(job_id) = self.agents.get(agent) {
                if seen.insert(job_id.as_str()) {
                    job_ids.push(job_id.clone());
                }
            }
        }
        job_ids
    }

    /// Switches jobs between [`JobStatus::Active`] and [`JobStatus::Killing`].
    pub fn set_status(&mut self, job_ids: &[JobId], status: JobStatus) {
        for job_id in job_ids {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.status = status;
            }
        }
    }

    /// Removes a job together with its agents.
    pub fn remove_job(&mut self, job_id: &str) -> Option<JobRecord> {
        let record = self.jobs.remove(job_id)?;
        for agent in &record.agent_ids {
            self.agents.remove(agent);
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::{ActuatorEvent, ActuatorState, JobRecord, JobStatus, MAX_EVENT_QUEUE_LENGTH};
    use crate::AgentId;
    use chrono::Utc;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn agents(ids: std::ops::Range<u128>) -> Vec<AgentId> {
        ids.map(Uuid::from_u128).collect()
    }

    fn record(job_id: &str, batch_id: u64, agent_ids: Vec<AgentId>) -> JobRecord {
        JobRecord {
            job_id: job_id.to_string(),
            batch_id,
            agent_ids,
            submitted_at: Utc::now(),
            status: JobStatus::Active,
            working_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn batches_keep_order() {
        let mut state = ActuatorState::default();
        state.enqueue(agents(0..5));
        let batches = state.take_batches(2);
        assert_eq!(
            batches,
            vec![
                (1, agents(0..2)),
                (2, agents(2..4)),
                (3, agents(4..5)),
            ]
        );
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.in_flight_count(), 3);
    }

    #[test]
    fn enqueue_ignores_duplicates() {
        let mut state = ActuatorState::default();
        assert_eq!(state.enqueue(agents(0..3)), 3);
        assert_eq!(state.enqueue(agents(2..4)), 1);
        state.take_batches(10);
        assert_eq!(state.enqueue(agents(0..1)), 0);
    }

    #[test]
    fn cancel_pending_agents() {
        let mut state = ActuatorState::default();
        state.enqueue(agents(0..4));
        assert_eq!(state.cancel_pending(&agents(1..3)), 2);
        assert_eq!(state.cancel_pending(&agents(1..3)), 0);
        assert_eq!(
            state.take_batches(10),
            vec![(1, vec![Uuid::from_u128(0), Uuid::from_u128(3)])]
        );
    }

    #[test]
    fn activate_and_remove() {
        let mut state = ActuatorState::default();
        state.enqueue(agents(0..2));
        let (batch_id, ids) = state.take_batches(10).pop().unwrap();
        state.activate_batch(record("100", batch_id, ids));
        assert_eq!(state.in_flight_count(), 0);
        assert_eq!(state.job_of_agent(&Uuid::from_u128(1)).unwrap(), "100");
        assert_eq!(
            state.jobs_of_agents(&agents(0..3)),
            vec!["100".to_string()]
        );

        let removed = state.remove_job("100").unwrap();
        assert_eq!(removed.agent_ids, agents(0..2));
        assert!(state.job_of_agent(&Uuid::from_u128(0)).is_none());
        assert!(state.remove_job("100").is_none());
    }

    #[test]
    fn failed_batch_is_forgotten() {
        let mut state = ActuatorState::default();
        state.enqueue(agents(0..2));
        let (batch_id, _) = state.take_batches(10).pop().unwrap();
        state.fail_batch(batch_id, "boom".to_string());
        assert_eq!(state.in_flight_count(), 0);
        assert_eq!(
            state.events().back().unwrap().event,
            ActuatorEvent::SubmissionFailed {
                batch_id,
                error: "boom".to_string()
            }
        );
    }

    #[test]
    fn event_queue_is_bounded() {
        let mut state = ActuatorState::default();
        for i in 0..(MAX_EVENT_QUEUE_LENGTH + 10) {
            state.add_event(ActuatorEvent::JobFinished(i.to_string()));
        }
        assert_eq!(state.events().len(), MAX_EVENT_QUEUE_LENGTH);
        assert_eq!(
            state.events().front().unwrap().event,
            ActuatorEvent::JobFinished("10".to_string())
        );
    }
}
