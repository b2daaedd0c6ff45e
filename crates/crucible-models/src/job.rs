//! Job - one task execution on one machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Keyed;

/// Where a job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    /// The task stopped partway and may be resumed.
    Incomplete,
    Failed,
    Finished,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Finished)
    }

    /// Whether the runner may move a job from `self` to `to`.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Running, Incomplete)
                | (Running, Failed)
                | (Running, Finished)
                | (Incomplete, Running)
        )
    }
}

/// What the machine should do once its job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobExitState {
    Reboot,
    Poweroff,
    Stop,
    Complete,
    Failed,
}

/// One unit of work produced by a task for the job runner.
///
/// If `path` is set the runner writes `content` there; otherwise it executes
/// `content` as a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAction {
    pub name: String,

    #[serde(default)]
    pub path: String,

    pub content: String,
}

/// A job: one task run against one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Primary key.
    pub uuid: Uuid,

    /// The previous job on the same machine, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Uuid>,

    /// The machine this job runs on.
    pub machine: Uuid,

    /// Name of the task the job executes.
    pub task: String,

    /// Stage the task belongs to.
    #[serde(default)]
    pub stage: String,

    pub state: JobState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_state: Option<JobExitState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub archived: bool,

    /// Whether this is the machine's current job or a superseded one.
    #[serde(default)]
    pub current: bool,
}

impl Job {
    pub fn new(machine: Uuid, task: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            previous: None,
            machine,
            task: task.into(),
            stage: stage.into(),
            state: JobState::Created,
            exit_state: None,
            start_time: None,
            end_time: None,
            archived: false,
            current: true,
        }
    }

    /// Move the job to a new state, stamping start/end times.
    pub fn transition(&mut self, to: JobState, now: DateTime<Utc>) -> Result<(), String> {
        if !self.state.can_transition_to(to) {
            return Err(format!("invalid job transition {:?} -> {to:?}", self.state));
        }
        if to == JobState::Running && self.start_time.is_none() {
            self.start_time = Some(now);
        }
        if to.is_terminal() {
            self.end_time = Some(now);
        }
        self.state = to;
        Ok(())
    }
}

impl Keyed for Job {
    const PREFIX: &'static str = "jobs";

    fn key(&self) -> String {
        self.uuid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_transitions() {
        let mut job = Job::new(Uuid::new_v4(), "install", "deploy");
        let now = Utc::now();

        assert!(job.transition(JobState::Finished, now).is_err());
        job.transition(JobState::Running, now).unwrap();
        assert_eq!(job.start_time, Some(now));

        job.transition(JobState::Incomplete, now).unwrap();
        job.transition(JobState::Running, now).unwrap();
        job.transition(JobState::Finished, now).unwrap();
        assert!(job.state.is_terminal());
        assert_eq!(job.end_time, Some(now));

        assert!(job.transition(JobState::Running, now).is_err());
    }

    #[test]
    fn test_job_state_serde() {
        assert_eq!(
            serde_json::to_string(&JobState::Incomplete).unwrap(),
            "\"incomplete\""
        );
        let s: JobState = serde_json::from_str("\"finished\"").unwrap();
        assert_eq!(s, JobState::Finished);
    }
}
