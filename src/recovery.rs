//! Bounded recovery pass for periods that failed silently
//!
//! When snapshot analysis finds period folders with no new files, an
//! [`ErrorRecoverySession`] is seeded with one [`FailedDownload`] per
//! affected period and drives a second, bounded round of fetches. Every
//! retry outcome is recorded as a [`RecoveryAttempt`]; once a period has
//! used up [`max_retry_attempts`](ErrorRecoverySession::max_retry_attempts)
//! recovery attempts it is never offered for retry again.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::period::Period;
use crate::types::{RecoveryId, RecoveryStatus, SessionId};
use crate::utils::period_folder_path;

/// A period download that needs recovering, with the evidence for it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedDownload {
    period: Period,
    message: String,
    folder_path: PathBuf,
    failed_at: DateTime<Utc>,
}

impl FailedDownload {
    /// Record a period as failed with the folder the evidence points at.
    pub fn new(period: Period, message: impl Into<String>, folder_path: impl Into<PathBuf>) -> Self {
        Self {
            period,
            message: message.into(),
            folder_path: folder_path.into(),
            failed_at: Utc::now(),
        }
    }

    /// Period that failed
    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Why the period is considered failed
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Folder that was expected to contain the period's files
    pub fn folder_path(&self) -> &Path {
        &self.folder_path
    }

    /// When the failure was recorded
    pub fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }
}

/// Outcome of one recovery retry for one period
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    period: Period,
    success: bool,
    message: Option<String>,
    attempted_at: DateTime<Utc>,
}

impl RecoveryAttempt {
    /// Record a retry outcome. Failures should carry a message.
    pub fn new(period: Period, success: bool, message: Option<String>) -> Self {
        Self {
            period,
            success,
            message,
            attempted_at: Utc::now(),
        }
    }

    /// Period that was retried
    pub fn period(&self) -> &Period {
        &self.period
    }

    /// Whether the retry produced files
    pub fn success(&self) -> bool {
        self.success
    }

    /// Failure description, when the retry failed
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// When the retry finished
    pub fn attempted_at(&self) -> DateTime<Utc> {
        self.attempted_at
    }
}

/// One bounded recovery pass over the silent failures of a session
///
/// Lifecycle mirrors [`DownloadSession`](crate::session::DownloadSession):
/// `Pending -> InProgress -> Completed`, with `Failed` reachable from any
/// state. Both logs are append-only; recovered and still-failed period sets
/// are derived from them rather than stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorRecoverySession {
    id: RecoveryId,
    original_session_id: SessionId,
    status: RecoveryStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    max_retry_attempts: u32,
    failed_downloads: Vec<FailedDownload>,
    recovery_attempts: Vec<RecoveryAttempt>,
    error_message: Option<String>,
}

impl ErrorRecoverySession {
    /// Create a pending recovery session for a finished download session.
    pub fn new(original_session_id: SessionId, max_retry_attempts: u32) -> Self {
        Self {
            id: RecoveryId::new(),
            original_session_id,
            status: RecoveryStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            max_retry_attempts,
            failed_downloads: Vec::new(),
            recovery_attempts: Vec::new(),
            error_message: None,
        }
    }

    /// Recovery session identifier
    pub fn id(&self) -> RecoveryId {
        self.id
    }

    /// Session whose failures this pass recovers
    pub fn original_session_id(&self) -> SessionId {
        self.original_session_id
    }

    /// Current lifecycle status
    pub fn status(&self) -> RecoveryStatus {
        self.status
    }

    /// When the recovery session was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the recovery session reached a terminal status, if it has
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Retry budget per period for this pass
    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    /// Seeded failures, in seed order
    pub fn failed_downloads(&self) -> &[FailedDownload] {
        &self.failed_downloads
    }

    /// Retry log, in the order retries finished
    pub fn recovery_attempts(&self) -> &[RecoveryAttempt] {
        &self.recovery_attempts
    }

    /// Error recorded by [`fail_recovery`](Self::fail_recovery)
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Seed a failed period into this pass.
    pub fn add_failed_download(
        &mut self,
        period: Period,
        message: impl Into<String>,
        folder_path: impl Into<PathBuf>,
    ) {
        self.failed_downloads
            .push(FailedDownload::new(period, message, folder_path));
    }

    /// Move the pass to `InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the pass is `Pending`.
    pub fn start_recovery(&mut self) -> Result<()> {
        if self.status != RecoveryStatus::Pending {
            return Err(Error::InvalidState(format!(
                "recovery session {} already started (status {})",
                self.id, self.status
            )));
        }

        self.status = RecoveryStatus::InProgress;
        Ok(())
    }

    /// Mark the pass completed. Completion means the sweep finished, not
    /// that every period recovered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the pass is `InProgress`.
    pub fn complete_recovery(&mut self) -> Result<()> {
        if self.status != RecoveryStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "recovery session {} is not in progress (status {})",
                self.id, self.status
            )));
        }

        self.status = RecoveryStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the pass failed, recording the reason. Allowed from any state.
    pub fn fail_recovery(&mut self, message: impl Into<String>) {
        self.status = RecoveryStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    /// Append a retry outcome to the log.
    pub fn add_recovery_attempt(
        &mut self,
        period: Period,
        success: bool,
        message: Option<String>,
    ) {
        self.recovery_attempts
            .push(RecoveryAttempt::new(period, success, message));
    }

    /// Whether the budget still allows retrying a period.
    ///
    /// Counts every logged attempt for the period, successful or not, so
    /// the answer only ever moves from `true` to `false`.
    pub fn should_retry_period(&self, period: &Period) -> bool {
        let attempts = self
            .recovery_attempts
            .iter()
            .filter(|a| a.period() == period)
            .count();

        (attempts as u32) < self.max_retry_attempts
    }

    /// Seeded periods still within the retry budget, in seed order
    pub fn periods_to_retry(&self) -> Vec<Period> {
        self.failed_downloads
            .iter()
            .map(FailedDownload::period)
            .filter(|period| self.should_retry_period(period))
            .cloned()
            .collect()
    }

    /// Whether any logged retry for the period succeeded
    pub fn has_successful_attempt(&self, period: &Period) -> bool {
        self.recovery_attempts
            .iter()
            .any(|a| a.period() == period && a.success())
    }

    /// Seeded periods with at least one successful retry, in seed order
    pub fn recovered_periods(&self) -> Vec<Period> {
        self.failed_downloads
            .iter()
            .map(FailedDownload::period)
            .filter(|period| self.has_successful_attempt(period))
            .cloned()
            .collect()
    }

    /// Seeded periods with no successful retry, in seed order
    pub fn still_failed_periods(&self) -> Vec<Period> {
        self.failed_downloads
            .iter()
            .map(FailedDownload::period)
            .filter(|period| !self.has_successful_attempt(period))
            .cloned()
            .collect()
    }
}

/// Build a recovery session from the periods flagged by snapshot analysis.
///
/// Each unique period is seeded once, pointing at its canonical folder
/// under `root` and carrying the standard silent-failure message.
///
/// # Errors
///
/// Returns [`Error::Validation`](crate::Error::Validation) when a period's
/// display name cannot be turned into a folder name.
pub fn build_recovery_session(
    original_session_id: SessionId,
    failed_periods: &[Period],
    root: &Path,
    max_retry_attempts: u32,
) -> Result<ErrorRecoverySession> {
    let mut session = ErrorRecoverySession::new(original_session_id, max_retry_attempts);

    for period in failed_periods {
        if session.failed_downloads.iter().any(|f| f.period() == period) {
            continue;
        }

        let folder = period_folder_path(root, period)?;
        session.add_failed_download(period.clone(), "empty folder after download", folder);
    }

    Ok(session)
}
