//! Download session and per-period task state machines
//!
//! A [`DownloadSession`] aggregates credentials, configuration, and one
//! [`PeriodTask`] per requested period. Both entities are plain state
//! machines: the engine in [`crate::downloader`] drives the transitions, and
//! every guarded transition returns [`Error::InvalidState`] when misused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, DownloadConfig};
use crate::error::{Error, Result};
use crate::period::Period;
use crate::types::{Artifact, SessionId, Status, TaskId};

/// One failed fetch attempt, recorded in the owning session's failure log
///
/// Entries are append-only; nothing ever mutates or removes them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedAttempt {
    period: Period,
    message: String,
    attempt_number: u32,
    failed_at: DateTime<Utc>,
}

impl FailedAttempt {
    /// Record a failed attempt for a period.
    pub fn new(period: Period, message: impl Into<String>, attempt_number: u32) -> Self {
        Self {
            period,
            message: message.into(),
            attempt_number,
            failed_at: Utc::now(),
        }
    }

    /// Period whose fetch failed
    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Failure description
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attempt number that failed, starting at 1
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    /// When the failure was recorded
    pub fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }
}

impl std::fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt {} for {} failed: {}",
            self.attempt_number,
            self.period.display_name(),
            self.message
        )
    }
}

/// Per-period download task
///
/// Transitions: `Pending -> InProgress` ([`start`](Self::start)),
/// `InProgress -> Completed` ([`complete`](Self::complete)),
/// `any -> Failed` ([`fail`](Self::fail)), and `Failed -> Pending`
/// ([`reset`](Self::reset)) for the next attempt. A task is only ever
/// mutated by the worker currently processing it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeriodTask {
    id: TaskId,
    period: Period,
    status: Status,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    attempt_count: u32,
    error_message: Option<String>,
    artifacts: Vec<Artifact>,
}

impl PeriodTask {
    /// Create a pending task for a period.
    pub fn new(period: Period) -> Self {
        Self {
            id: TaskId::new(),
            period,
            status: Status::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            error_message: None,
            artifacts: Vec::new(),
        }
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Period this task fetches
    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.status
    }

    /// When the task was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the current attempt started, if any
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the task reached a terminal status, if it has
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Number of attempts started so far
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Error recorded by the most recent failure
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Artifacts attached by the current attempt
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Begin an attempt: move to `InProgress` and count the attempt.
    ///
    /// Calling this while an attempt is already in progress is a no-op; the
    /// attempt count is not incremented twice.
    pub fn start(&mut self) {
        if self.status == Status::InProgress {
            return;
        }

        self.status = Status::InProgress;
        self.started_at = Some(Utc::now());
        self.attempt_count += 1;
    }

    /// Finish the current attempt successfully.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the task is `InProgress`.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != Status::InProgress {
            return Err(Error::InvalidState(format!(
                "cannot complete task for {} in status {}",
                self.period.key(),
                self.status
            )));
        }

        self.status = Status::Completed;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
        Ok(())
    }

    /// Mark the task failed, recording the error. Allowed from any state.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    /// Return to `Pending` for another attempt.
    ///
    /// Clears timestamps, the recorded error, and any artifacts from the
    /// failed attempt. The attempt count is preserved so the retry budget
    /// keeps shrinking.
    pub fn reset(&mut self) {
        self.status = Status::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error_message = None;
        self.artifacts.clear();
    }

    /// Whether the attempt budget allows another attempt
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.attempt_count < max_retries
    }

    /// Attach a fetched artifact. Artifact validity is enforced by
    /// [`Artifact::new`]; appending never fails.
    pub fn add_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Whether any artifact is attached
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }

    /// Wall time from start (or creation) to the terminal status, once
    /// terminal
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at
            .map(|done| done - self.started_at.unwrap_or(self.created_at))
    }
}

/// One batch download run: credentials, config, tasks, and outcome logs
///
/// The session exclusively owns its tasks and logs; while the engine
/// processes a session, nothing else may mutate it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadSession {
    id: SessionId,
    credentials: Credentials,
    config: DownloadConfig,
    status: Status,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    tasks: Vec<PeriodTask>,
    artifacts: Vec<Artifact>,
    failed_attempts: Vec<FailedAttempt>,
}

impl DownloadSession {
    /// Create a pending session. The start timestamp is recorded now.
    pub fn new(credentials: Credentials, config: DownloadConfig) -> Self {
        Self {
            id: SessionId::new(),
            credentials,
            config,
            status: Status::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            tasks: Vec::new(),
            artifacts: Vec::new(),
            failed_attempts: Vec::new(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Portal credentials for this run
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Download configuration for this run
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        self.status
    }

    /// When the session was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the session reached a terminal status, if it has
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Error recorded by [`fail`](Self::fail)
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Period tasks in insertion order
    pub fn tasks(&self) -> &[PeriodTask] {
        &self.tasks
    }

    /// Mutable access to one task, for the worker processing it
    pub fn task_mut(&mut self, index: usize) -> Option<&mut PeriodTask> {
        self.tasks.get_mut(index)
    }

    /// Artifacts fetched across all tasks
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Failure log across all tasks, in the order failures were recorded
    pub fn failed_attempts(&self) -> &[FailedAttempt] {
        &self.failed_attempts
    }

    /// Add a task for a period. Idempotent: a period already present (by
    /// year and ordinal) is silently ignored.
    pub fn add_period_task(&mut self, period: Period) {
        if self.tasks.iter().any(|t| t.period() == &period) {
            return;
        }

        self.tasks.push(PeriodTask::new(period));
    }

    /// Move the session to `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is `Pending`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != Status::Pending {
            return Err(Error::InvalidState(format!(
                "session {} already started (status {})",
                self.id, self.status
            )));
        }

        self.status = Status::InProgress;
        Ok(())
    }

    /// Mark the session completed.
    ///
    /// Completion means every per-task loop has finished, not that every
    /// task succeeded; inspect [`failed_attempts`](Self::failed_attempts)
    /// for partial failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the session is `InProgress`.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != Status::InProgress {
            return Err(Error::InvalidState(format!(
                "session {} is not in progress (status {})",
                self.id, self.status
            )));
        }

        self.status = Status::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the session failed, recording the reason. Allowed from any
    /// state.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    /// Attach an artifact to the session-level log.
    pub fn add_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    /// Append to the failure log.
    pub fn add_failed_attempt(&mut self, attempt: FailedAttempt) {
        self.failed_attempts.push(attempt);
    }

    /// Number of period tasks
    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Number of tasks currently `Completed`
    pub fn completed_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status() == Status::Completed)
            .count()
    }

    /// Number of entries in the failure log (attempts, not tasks)
    pub fn failed_count(&self) -> usize {
        self.failed_attempts.len()
    }

    /// Number of artifacts fetched
    pub fn successful_artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Completed tasks as a percentage of all tasks (0.0 when there are no
    /// tasks)
    pub fn progress_percent(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }

        self.completed_tasks() as f64 / self.tasks.len() as f64 * 100.0
    }

    /// Wall time from session start to its terminal status, once terminal
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}
