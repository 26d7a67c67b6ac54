//! Common test utilities: a scriptable portal fake and builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nomina_dl::utils::period_folder_path;
use nomina_dl::{
    Artifact, Credentials, DownloadConfig, FetchError, FsArtifactValidator, InMemorySessionStore,
    JsonRecoveryStore, JsonSnapshotStore, NominaDownloader, Period, PortalClient, RecoveryStore,
    Result, SessionStore, SnapshotStore,
};

/// What the fake portal does when asked to fetch a period.
#[derive(Clone)]
pub enum Outcome {
    /// Write the named files with real content and report them
    Deliver(Vec<&'static str>),
    /// Report success without writing anything (silent failure)
    DeliverNothing,
    /// Fail the fetch
    Refuse(&'static str),
}

/// [`PortalClient`] fake that plays back one scripted outcome per attempt.
///
/// The last outcome for a period repeats once the script runs out;
/// unscripted periods refuse the fetch.
pub struct FakePortal {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    catalog: Vec<Period>,
    logged_in: Mutex<bool>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            catalog: Vec::new(),
            logged_in: Mutex::new(false),
        }
    }

    /// Script the outcomes for one period, in attempt order.
    pub fn on_fetch(mut self, period: &Period, outcomes: Vec<Outcome>) -> Self {
        self.catalog.push(period.clone());
        self.scripts
            .get_mut()
            .unwrap()
            .insert(period.key(), outcomes.into());
        self
    }

    fn next_outcome(&self, period: &Period) -> Outcome {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&period.key()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or(Outcome::Refuse("script exhausted")),
            None => Outcome::Refuse("period not scripted"),
        }
    }
}

impl Default for FakePortal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortalClient for FakePortal {
    async fn login(&self, _credentials: &Credentials) -> Result<bool> {
        *self.logged_in.lock().unwrap() = true;
        Ok(true)
    }

    async fn validate_session(&self) -> Result<bool> {
        Ok(*self.logged_in.lock().unwrap())
    }

    async fn list_years(&self) -> Result<Vec<i32>> {
        let mut years: Vec<i32> = self.catalog.iter().map(Period::year).collect();
        years.sort_unstable();
        years.dedup();
        Ok(years)
    }

    async fn list_periods(&self, year: i32) -> Result<Vec<Period>> {
        Ok(self
            .catalog
            .iter()
            .filter(|p| p.year() == year)
            .cloned()
            .collect())
    }

    async fn fetch_period(&self, period: &Period, dest_root: &Path) -> Result<Vec<Artifact>> {
        // Give concurrent fetches a chance to interleave.
        tokio::time::sleep(Duration::from_millis(5)).await;

        match self.next_outcome(period) {
            Outcome::Deliver(names) => {
                let folder = period_folder_path(dest_root, period)?;
                tokio::fs::create_dir_all(&folder).await?;

                let mut artifacts = Vec::with_capacity(names.len());
                for name in names {
                    let path = folder.join(name);
                    let content = b"recibo de nomina";
                    tokio::fs::write(&path, content).await?;
                    artifacts.push(Artifact::new(
                        period.clone(),
                        name,
                        path,
                        content.len() as u64,
                    )?);
                }
                Ok(artifacts)
            }
            Outcome::DeliverNothing => Ok(Vec::new()),
            Outcome::Refuse(message) => Err(FetchError::Portal {
                period: period.key(),
                message: message.into(),
            }
            .into()),
        }
    }

    async fn logout(&self) -> Result<()> {
        *self.logged_in.lock().unwrap() = false;
        Ok(())
    }
}

pub fn period(year: i32, ordinal: u8) -> Period {
    Period::new(year, ordinal).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials::new("empleado01", "secreto").unwrap()
}

/// Config tuned for tests: short backoff, small worker pool.
pub fn config(root: &Path, workers: usize) -> DownloadConfig {
    let mut config = DownloadConfig::new(root).unwrap();
    config.max_concurrent_workers = workers;
    config.retry_backoff = Duration::from_millis(10);
    config
}

/// A facade wired over a fake portal, with the store handles the
/// assertions need kept alongside it.
pub struct TestRig {
    pub facade: NominaDownloader,
    pub sessions: Arc<InMemorySessionStore>,
    pub snapshots: Arc<JsonSnapshotStore>,
    pub recoveries: Arc<JsonRecoveryStore>,
}

/// Builds a [`NominaDownloader`] over `portal`, persisting its JSON
/// documents under `state_dir`.
pub fn rig(portal: FakePortal, state_dir: &Path) -> TestRig {
    let sessions = Arc::new(InMemorySessionStore::new());
    let snapshots = Arc::new(JsonSnapshotStore::new(state_dir.join("snapshots")));
    let recoveries = Arc::new(JsonRecoveryStore::new(state_dir.join("recovery")));

    let facade = NominaDownloader::with_stores(
        Arc::new(portal),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&snapshots) as Arc<dyn SnapshotStore>,
        Arc::clone(&recoveries) as Arc<dyn RecoveryStore>,
        Arc::new(FsArtifactValidator),
    );

    TestRig {
        facade,
        sessions,
        snapshots,
        recoveries,
    }
}
