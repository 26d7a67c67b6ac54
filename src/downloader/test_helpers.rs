//! Shared helpers for engine tests: a scriptable portal double, an event
//! collector, and session/config builders.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::{Credentials, DownloadConfig};
use crate::error::{FetchError, Result};
use crate::observer::ProgressObserver;
use crate::period::Period;
use crate::portal::PortalClient;
use crate::session::DownloadSession;
use crate::store::{InMemorySessionStore, SessionStore};
use crate::types::{Artifact, Event, SessionId};
use crate::utils::period_folder_path;
use crate::validate::FsArtifactValidator;

use super::ParallelDownloader;

/// Scripted outcome for one fetch attempt of one period
#[derive(Clone)]
pub(crate) enum FetchOutcome {
    /// Write the named files (with content) into the period folder and
    /// report them
    Files(Vec<&'static str>),
    /// Write the named files as zero-byte husks and report them
    EmptyFiles(Vec<&'static str>),
    /// Report success without writing anything (silent failure)
    NoFiles,
    /// Fail with a portal error
    Fail(&'static str),
    /// Never resolve, to exercise the per-download timeout
    Hang,
}

/// Decrements the in-flight gauge even when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`PortalClient`] double that plays back scripted outcomes per period.
///
/// Each fetch pops the next outcome for its period; the final outcome
/// repeats once the script runs out, and unscripted periods always fail.
pub(crate) struct ScriptedPortal {
    root: PathBuf,
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    available: Vec<Period>,
    reject_login: bool,
    session_valid: AtomicBool,
    pub(crate) logins: AtomicUsize,
    pub(crate) fetches: AtomicUsize,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

impl ScriptedPortal {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scripts: Mutex::new(HashMap::new()),
            available: Vec::new(),
            reject_login: false,
            session_valid: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script the fetch outcomes for one period, in attempt order.
    pub(crate) fn script(mut self, period: &Period, outcomes: Vec<FetchOutcome>) -> Self {
        self.available.push(period.clone());
        self.scripts
            .get_mut()
            .insert(period.key(), outcomes.into());
        self
    }

    /// Make every login attempt come back rejected.
    pub(crate) fn reject_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    async fn write_files(
        &self,
        period: &Period,
        dest_root: &Path,
        names: &[&'static str],
        content: &[u8],
    ) -> Result<Vec<Artifact>> {
        let folder = period_folder_path(dest_root, period)?;
        tokio::fs::create_dir_all(&folder).await?;

        let mut artifacts = Vec::with_capacity(names.len());
        for name in names {
            let path = folder.join(name);
            tokio::fs::write(&path, content).await?;
            artifacts.push(Artifact::new(
                period.clone(),
                *name,
                path,
                content.len() as u64,
            )?);
        }

        Ok(artifacts)
    }
}

#[async_trait]
impl PortalClient for ScriptedPortal {
    async fn login(&self, _credentials: &Credentials) -> Result<bool> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.reject_login {
            return Ok(false);
        }

        self.session_valid.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn validate_session(&self) -> Result<bool> {
        Ok(self.session_valid.load(Ordering::SeqCst))
    }

    async fn list_years(&self) -> Result<Vec<i32>> {
        let mut years: Vec<i32> = self.available.iter().map(Period::year).collect();
        years.sort_unstable();
        years.dedup();
        Ok(years)
    }

    async fn list_periods(&self, year: i32) -> Result<Vec<Period>> {
        Ok(self
            .available
            .iter()
            .filter(|p| p.year() == year)
            .cloned()
            .collect())
    }

    async fn fetch_period(&self, period: &Period, dest_root: &Path) -> Result<Vec<Artifact>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _gauge = InFlight(&self.in_flight);

        let outcome = {
            let mut scripts = self.scripts.lock().await;
            match scripts.get_mut(&period.key()) {
                Some(queue) if queue.len() > 1 => queue
                    .pop_front()
                    .unwrap_or(FetchOutcome::Fail("script exhausted")),
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or(FetchOutcome::Fail("script exhausted")),
                None => FetchOutcome::Fail("period not scripted"),
            }
        };

        // Small window so concurrent fetches overlap measurably.
        tokio::time::sleep(Duration::from_millis(10)).await;

        match outcome {
            FetchOutcome::Files(names) => {
                self.write_files(period, dest_root, &names, b"contenido real")
                    .await
            }
            FetchOutcome::EmptyFiles(names) => {
                self.write_files(period, dest_root, &names, b"").await
            }
            FetchOutcome::NoFiles => Ok(Vec::new()),
            FetchOutcome::Fail(message) => Err(FetchError::Portal {
                period: period.key(),
                message: message.into(),
            }
            .into()),
            FetchOutcome::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        self.session_valid.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Observer that keeps every event for later assertions
#[derive(Default)]
pub(crate) struct CollectingObserver {
    events: std::sync::Mutex<Vec<Event>>,
}

impl CollectingObserver {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for CollectingObserver {
    fn notify(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Config tuned for fast tests: tight backoff, roomy timeout.
pub(crate) fn test_config(root: &Path) -> DownloadConfig {
    DownloadConfig {
        download_path: root.to_path_buf(),
        max_concurrent_workers: 4,
        max_retry_attempts: 3,
        timeout_per_download: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
        validate_artifacts: true,
    }
}

pub(crate) fn periods(ordinals: &[u8]) -> Vec<Period> {
    ordinals
        .iter()
        .map(|&ordinal| Period::new(2024, ordinal).unwrap())
        .collect()
}

pub(crate) fn session_with_periods(config: DownloadConfig, periods: &[Period]) -> DownloadSession {
    let credentials = Credentials::new("empleado01", "secreto").unwrap();
    let mut session = DownloadSession::new(credentials, config);
    for period in periods {
        session.add_period_task(period.clone());
    }
    session
}

/// Start the session (the way the command surface does) and store it.
pub(crate) async fn start_and_store(
    mut session: DownloadSession,
) -> (Arc<InMemorySessionStore>, SessionId) {
    session.start().unwrap();

    let store = Arc::new(InMemorySessionStore::new());
    let id = session.id();
    store.create(session).await.unwrap();
    (store, id)
}

pub(crate) fn engine(
    store: Arc<InMemorySessionStore>,
    portal: Arc<ScriptedPortal>,
    observer: Arc<dyn ProgressObserver>,
) -> ParallelDownloader {
    ParallelDownloader::new(store, portal, Arc::new(FsArtifactValidator), observer)
}
