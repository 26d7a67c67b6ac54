//! Command surface - boundary handlers for driving sessions, snapshots,
//! and recovery sweeps.
//!
//! Handlers never propagate errors across the boundary: every operation
//! returns a result record carrying a `success` flag and the error message,
//! so callers match on data instead of error types. Progress is published
//! as [`Event`]s on the facade's broadcast channel.
//!
//! The snapshot commands are keyed by whatever [`SessionId`] the caller
//! associates them with; capture the baseline before starting the session
//! that will fill the folders, or the comparison has nothing to detect.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{Credentials, DownloadConfig};
use crate::downloader::{self, ParallelDownloader};
use crate::error::{Error, FetchError, Result};
use crate::observer::{BroadcastObserver, ProgressObserver};
use crate::period::Period;
use crate::portal::PortalClient;
use crate::recovery::{ErrorRecoverySession, build_recovery_session};
use crate::session::DownloadSession;
use crate::snapshot::{DownloadSnapshot, FolderSnapshot};
use crate::store::{
    InMemorySessionStore, JsonRecoveryStore, JsonSnapshotStore, RecoveryStore, SessionStore,
    SnapshotStore,
};
use crate::types::{Event, RecoveryId, SessionId, SnapshotId};
use crate::utils::period_folder_path;
use crate::validate::{ArtifactValidator, FsArtifactValidator};

/// Outcome of [`NominaDownloader::start_session`].
#[derive(Clone, Debug, Serialize)]
pub struct StartSessionResult {
    /// Id of the created session, when creation got that far
    pub session_id: Option<SessionId>,
    /// Whether the run settled without a batch error; per-period failures
    /// live in the session's failure log, not in this flag
    pub success: bool,
    /// Boundary-formatted error message
    pub error: Option<String>,
}

/// Outcome of [`NominaDownloader::create_snapshot`].
#[derive(Clone, Debug, Serialize)]
pub struct CreateSnapshotResult {
    /// Id of the captured snapshot document
    pub snapshot_id: Option<SnapshotId>,
    /// Whether the baseline was captured and persisted
    pub success: bool,
    /// Boundary-formatted error message
    pub error: Option<String>,
}

/// Outcome of [`NominaDownloader::analyze_empty_folders`].
///
/// A session without a readable snapshot yields the empty analysis rather
/// than an error.
#[derive(Clone, Debug, Serialize)]
pub struct AnalyzeEmptyFoldersResult {
    /// Session the analyzed snapshot belongs to
    pub session_id: SessionId,
    /// Target folders where no new file appeared since the baseline
    pub empty_folders: Vec<PathBuf>,
    /// Periods behind those folders
    pub failed_periods: Vec<Period>,
    /// Whether anything was flagged
    pub has_empty_folders: bool,
}

impl AnalyzeEmptyFoldersResult {
    fn nothing_flagged(session_id: SessionId) -> Self {
        Self {
            session_id,
            empty_folders: Vec::new(),
            failed_periods: Vec::new(),
            has_empty_folders: false,
        }
    }
}

/// Outcome of [`NominaDownloader::start_error_recovery`].
#[derive(Clone, Debug, Serialize)]
pub struct StartErrorRecoveryResult {
    /// Id of the recovery session document
    pub recovery_session_id: Option<RecoveryId>,
    /// Whether the sweep ran to its end; unrecovered periods are reported
    /// through `still_failed`, not through this flag
    pub success: bool,
    /// Boundary-formatted error message
    pub error: Option<String>,
    /// Periods the sweep attempted
    pub processed: Vec<Period>,
    /// Periods with a successful recovery attempt
    pub succeeded: Vec<Period>,
    /// Periods that still lack one
    pub still_failed: Vec<Period>,
}

/// Outcome of [`NominaDownloader::available_years`].
#[derive(Clone, Debug, Serialize)]
pub struct AvailableYearsResult {
    /// Years the portal exposes receipts for
    pub years: Vec<i32>,
    /// Whether the portal answered
    pub success: bool,
    /// Boundary-formatted error message
    pub error: Option<String>,
}

/// Outcome of [`NominaDownloader::available_periods`].
#[derive(Clone, Debug, Serialize)]
pub struct AvailablePeriodsResult {
    /// Periods the portal exposes within the requested year
    pub periods: Vec<Period>,
    /// Whether the portal answered
    pub success: bool,
    /// Boundary-formatted error message
    pub error: Option<String>,
}

/// Batch download facade: wires the engine to its stores, the portal, and
/// the event channel (cloneable - all fields are Arc-wrapped).
#[derive(Clone)]
pub struct NominaDownloader {
    /// Session persistence
    sessions: Arc<dyn SessionStore>,
    /// Snapshot documents
    snapshots: Arc<dyn SnapshotStore>,
    /// Recovery session documents
    recoveries: Arc<dyn RecoveryStore>,
    /// Portal automation client
    portal: Arc<dyn PortalClient>,
    /// Filesystem artifact checks
    validator: Arc<dyn ArtifactValidator>,
    /// Event publication
    observer: Arc<BroadcastObserver>,
    /// Concurrency/retry engine
    engine: ParallelDownloader,
    /// Root token; [`shutdown`](Self::shutdown) cancels every in-flight run
    cancel: CancellationToken,
}

impl NominaDownloader {
    /// Create a facade with the default wiring: in-memory sessions and
    /// JSON document stores under `state_dir`.
    pub fn new(portal: Arc<dyn PortalClient>, state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self::with_stores(
            portal,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(JsonSnapshotStore::new(state_dir.join("snapshots"))),
            Arc::new(JsonRecoveryStore::new(state_dir.join("recovery"))),
            Arc::new(FsArtifactValidator),
        )
    }

    /// Create a facade over explicit store and validator implementations.
    pub fn with_stores(
        portal: Arc<dyn PortalClient>,
        sessions: Arc<dyn SessionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        recoveries: Arc<dyn RecoveryStore>,
        validator: Arc<dyn ArtifactValidator>,
    ) -> Self {
        let observer = Arc::new(BroadcastObserver::default());
        let engine = ParallelDownloader::new(
            Arc::clone(&sessions),
            Arc::clone(&portal),
            Arc::clone(&validator),
            Arc::clone(&observer) as Arc<dyn ProgressObserver>,
        );

        Self {
            sessions,
            snapshots,
            recoveries,
            portal,
            validator,
            observer,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to the facade's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.observer.subscribe()
    }

    /// Cancel every run started by this facade, current and future.
    ///
    /// Interrupted sessions keep their last persisted state and stay
    /// re-processable.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down; cancelling in-flight session processing");
        self.cancel.cancel();
    }

    /// Create, persist, and run a download session over the given periods.
    ///
    /// Returns once every period task has reached a terminal outcome.
    /// `success` means the run settled; inspect the session's failure log
    /// (or the event stream) for per-period failures.
    pub async fn start_session(
        &self,
        credentials: Credentials,
        config: DownloadConfig,
        periods: &[Period],
    ) -> StartSessionResult {
        let session_id = match self.create_session(credentials, config, periods).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create download session");
                return StartSessionResult {
                    session_id: None,
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        };

        match self
            .engine
            .process_session(session_id, self.cancel.child_token())
            .await
        {
            Ok(()) => StartSessionResult {
                session_id: Some(session_id),
                success: true,
                error: None,
            },
            // The engine already logged and persisted the failure.
            Err(e) => StartSessionResult {
                session_id: Some(session_id),
                success: false,
                error: Some(e.to_string()),
            },
        }
    }

    async fn create_session(
        &self,
        credentials: Credentials,
        config: DownloadConfig,
        periods: &[Period],
    ) -> Result<SessionId> {
        let mut session = DownloadSession::new(credentials, config);
        for period in periods {
            session.add_period_task(period.clone());
        }

        let session_id = session.id();
        let total_tasks = session.total_tasks();

        self.sessions.create(session.clone()).await?;
        session.start()?;
        self.sessions.update(session).await?;

        self.observer.notify(Event::SessionStarted {
            session_id,
            total_tasks,
        });
        tracing::info!(
            session_id = %session_id,
            tasks = total_tasks,
            "Download session started"
        );
        Ok(session_id)
    }

    /// Capture the pre-download filesystem baseline for the given periods,
    /// keyed by `session_id` for later analysis.
    pub async fn create_snapshot(
        &self,
        session_id: SessionId,
        periods: &[Period],
        root: &Path,
    ) -> CreateSnapshotResult {
        match self.capture_snapshot(session_id, periods, root).await {
            Ok(snapshot_id) => CreateSnapshotResult {
                snapshot_id: Some(snapshot_id),
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to capture download snapshot"
                );
                CreateSnapshotResult {
                    snapshot_id: None,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn capture_snapshot(
        &self,
        session_id: SessionId,
        periods: &[Period],
        root: &Path,
    ) -> Result<SnapshotId> {
        let snapshot = DownloadSnapshot::capture(session_id, periods, root)?;
        let snapshot_id = snapshot.id();
        self.snapshots.save(&snapshot).await?;

        tracing::info!(
            snapshot_id = %snapshot_id,
            session_id = %session_id,
            folders = snapshot.requested_periods().len(),
            "Captured pre-download snapshot"
        );
        Ok(snapshot_id)
    }

    /// Compare the session's latest snapshot against the filesystem now.
    ///
    /// A period is flagged when its target folder gained no new file since
    /// the baseline. Returns the empty analysis (with a log entry) when the
    /// session has no snapshot or its document cannot be read.
    pub async fn analyze_empty_folders(&self, session_id: SessionId) -> AnalyzeEmptyFoldersResult {
        let snapshot = match self.snapshots.load_by_session(session_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::warn!(session_id = %session_id, "No snapshot recorded for session");
                return AnalyzeEmptyFoldersResult::nothing_flagged(session_id);
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to load snapshot for analysis"
                );
                return AnalyzeEmptyFoldersResult::nothing_flagged(session_id);
            }
        };

        let empty_folders = snapshot.empty_folders();
        let failed_periods = snapshot.periods_for_empty_folders();
        let has_empty_folders = !empty_folders.is_empty();

        if has_empty_folders {
            tracing::warn!(
                session_id = %session_id,
                flagged = empty_folders.len(),
                "Detected folders with no new files after download"
            );
        }

        AnalyzeEmptyFoldersResult {
            session_id,
            empty_folders,
            failed_periods,
            has_empty_folders,
        }
    }

    /// Re-fetch silently-failed periods in one bounded sweep.
    ///
    /// Credentials and fetch settings come from the original session; each
    /// worklist period gets its target folder purged and one fresh fetch,
    /// logged on the recovery session. `success` means the sweep ran;
    /// periods that still lack a successful attempt are in `still_failed`
    /// and the persisted recovery session ends `Failed` with a summary.
    pub async fn start_error_recovery(
        &self,
        session_id: SessionId,
        failed_periods: &[Period],
        root: &Path,
        max_retry_attempts: u32,
    ) -> StartErrorRecoveryResult {
        match self
            .run_recovery(session_id, failed_periods, root, max_retry_attempts)
            .await
        {
            Ok((recovery, processed)) => StartErrorRecoveryResult {
                recovery_session_id: Some(recovery.id()),
                success: true,
                error: None,
                processed,
                succeeded: recovery.recovered_periods(),
                still_failed: recovery.still_failed_periods(),
            },
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "Error recovery sweep failed"
                );
                StartErrorRecoveryResult {
                    recovery_session_id: None,
                    success: false,
                    error: Some(e.to_string()),
                    processed: Vec::new(),
                    succeeded: Vec::new(),
                    still_failed: Vec::new(),
                }
            }
        }
    }

    async fn run_recovery(
        &self,
        session_id: SessionId,
        failed_periods: &[Period],
        root: &Path,
        max_retry_attempts: u32,
    ) -> Result<(ErrorRecoverySession, Vec<Period>)> {
        // Credentials and fetch settings come from the original session;
        // only the destination root is the caller's.
        let original = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        let credentials = original.credentials().clone();
        let mut config = original.config().clone();
        config.download_path = root.to_path_buf();

        let mut recovery =
            build_recovery_session(session_id, failed_periods, root, max_retry_attempts)?;
        recovery.start_recovery()?;
        self.recoveries.save(&recovery).await?;

        let recovery_id = recovery.id();
        let worklist = recovery.periods_to_retry();
        tracing::info!(
            recovery_id = %recovery_id,
            session_id = %session_id,
            periods = worklist.len(),
            "Starting error recovery sweep"
        );

        for period in &worklist {
            // The attempt log is the sole retry authority.
            if !recovery.should_retry_period(period) {
                continue;
            }

            self.purge_period_folder(root, period).await;

            match self.recovery_attempt(&credentials, &config, period).await {
                Ok(()) => {
                    tracing::info!(
                        recovery_id = %recovery_id,
                        period = %period.key(),
                        "Recovery fetch succeeded"
                    );
                    self.observer.notify(Event::Message {
                        text: format!("recovered period {}", period.key()),
                    });
                    recovery.add_recovery_attempt(period.clone(), true, None);
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        recovery_id = %recovery_id,
                        period = %period.key(),
                        error = %message,
                        "Recovery fetch failed"
                    );
                    self.observer.notify(Event::Message {
                        text: format!("recovery of period {} failed: {message}", period.key()),
                    });
                    recovery.add_recovery_attempt(period.clone(), false, Some(message));
                }
            }
        }

        let still_failed = recovery.still_failed_periods();
        if still_failed.is_empty() {
            recovery.complete_recovery()?;
            tracing::info!(recovery_id = %recovery_id, "Error recovery completed");
        } else {
            let summary = format!(
                "{} of {} periods still failing after recovery",
                still_failed.len(),
                recovery.failed_downloads().len()
            );
            recovery.fail_recovery(&summary);
            tracing::warn!(
                recovery_id = %recovery_id,
                still_failed = still_failed.len(),
                "Error recovery finished with unrecovered periods"
            );
        }

        self.recoveries.save(&recovery).await?;
        Ok((recovery, worklist))
    }

    /// One recovery fetch for a period, then a check that files actually
    /// landed - silent failure is what brought the period here.
    async fn recovery_attempt(
        &self,
        credentials: &Credentials,
        config: &DownloadConfig,
        period: &Period,
    ) -> Result<()> {
        let artifacts = downloader::fetch_period_once(
            self.portal.as_ref(),
            self.validator.as_ref(),
            credentials,
            config,
            period,
        )
        .await?;

        let folder = period_folder_path(&config.download_path, period)?;
        if FolderSnapshot::capture(&folder).existing_files().is_empty() {
            return Err(FetchError::Portal {
                period: period.key(),
                message: "no files materialized in the period folder".into(),
            }
            .into());
        }

        tracing::debug!(
            period = %period.key(),
            artifacts = artifacts.len(),
            "Recovery fetch materialized files"
        );
        Ok(())
    }

    /// Delete a period's target folder before re-fetching into it.
    ///
    /// Purge failures are logged and the sweep moves on; the fresh fetch
    /// may still repair the folder.
    async fn purge_period_folder(&self, root: &Path, period: &Period) {
        let folder = match period_folder_path(root, period) {
            Ok(folder) => folder,
            Err(e) => {
                tracing::warn!(
                    period = %period.key(),
                    error = %e,
                    "Cannot resolve period folder for purge"
                );
                return;
            }
        };

        match tokio::fs::remove_dir_all(&folder).await {
            Ok(()) => {
                tracing::debug!(
                    period = %period.key(),
                    folder = %folder.display(),
                    "Purged period folder"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    period = %period.key(),
                    folder = %folder.display(),
                    error = %e,
                    "Failed to purge period folder"
                );
            }
        }
    }

    /// List the years the portal exposes receipts for.
    pub async fn available_years(&self, credentials: &Credentials) -> AvailableYearsResult {
        match self.list_years(credentials).await {
            Ok(years) => AvailableYearsResult {
                years,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to list available years");
                AvailableYearsResult {
                    years: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn list_years(&self, credentials: &Credentials) -> Result<Vec<i32>> {
        downloader::ensure_portal_auth(self.portal.as_ref(), credentials).await?;
        self.portal.list_years().await
    }

    /// List the periods the portal exposes within a year.
    pub async fn available_periods(
        &self,
        credentials: &Credentials,
        year: i32,
    ) -> AvailablePeriodsResult {
        match self.list_periods(credentials, year).await {
            Ok(periods) => AvailablePeriodsResult {
                periods,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::error!(year, error = %e, "Failed to list available periods");
                AvailablePeriodsResult {
                    periods: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn list_periods(&self, credentials: &Credentials, year: i32) -> Result<Vec<Period>> {
        downloader::ensure_portal_auth(self.portal.as_ref(), credentials).await?;
        self.portal.list_periods(year).await
    }
}
