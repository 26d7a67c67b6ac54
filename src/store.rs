//! Session, snapshot, and recovery persistence
//!
//! Sessions live in memory for the duration of the process; snapshots and
//! recovery sessions are written to disk as JSON documents so that analysis
//! and recovery can run after a restart. All stores are capabilities:
//! callers hold `Arc<dyn SessionStore>` and friends, and tests substitute
//! their own.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::recovery::ErrorRecoverySession;
use crate::session::DownloadSession;
use crate::snapshot::DownloadSnapshot;
use crate::types::{RecoveryId, SessionId, SnapshotId};

/// Storage for download sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the id is already stored.
    async fn create(&self, session: DownloadSession) -> Result<()>;

    /// Fetch a session by id, `None` when unknown.
    async fn get(&self, id: SessionId) -> Result<Option<DownloadSession>>;

    /// Persist the current state of a session. Upserts: an unknown id is
    /// stored rather than rejected, so engine snapshots never get lost.
    async fn update(&self, session: DownloadSession) -> Result<()>;

    /// Sessions that have not reached a terminal status
    async fn list_active(&self) -> Result<Vec<DownloadSession>>;

    /// Most recently started sessions, newest first
    async fn list_recent(&self, limit: usize) -> Result<Vec<DownloadSession>>;
}

/// Storage for pre-download filesystem snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot, overwriting any previous document with its id.
    async fn save(&self, snapshot: &DownloadSnapshot) -> Result<()>;

    /// Fetch a snapshot by id, `None` when unknown.
    async fn load(&self, id: SnapshotId) -> Result<Option<DownloadSnapshot>>;

    /// Fetch the most recently captured snapshot for a session, `None` when
    /// the session has none.
    async fn load_by_session(&self, session_id: SessionId) -> Result<Option<DownloadSnapshot>>;
}

/// Storage for error recovery sessions
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Persist a recovery session, overwriting any previous document with
    /// its id.
    async fn save(&self, session: &ErrorRecoverySession) -> Result<()>;

    /// Fetch a recovery session by id, `None` when unknown.
    async fn load(&self, id: RecoveryId) -> Result<Option<ErrorRecoverySession>>;
}

/// [`SessionStore`] backed by a process-local map
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionId, DownloadSession>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: DownloadSession) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id()) {
            return Err(Error::InvalidState(format!(
                "session {} already exists",
                session.id()
            )));
        }

        sessions.insert(session.id(), session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<DownloadSession>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn update(&self, session: DownloadSession) -> Result<()> {
        self.sessions.lock().await.insert(session.id(), session);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<DownloadSession>> {
        Ok(self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| s.status().is_active())
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<DownloadSession>> {
        let mut sessions: Vec<DownloadSession> =
            self.sessions.lock().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

/// [`SnapshotStore`] writing one pretty-printed JSON document per snapshot
///
/// Documents are named `snapshot_{id}.json` under the store directory; the
/// directory is created on first save.
#[derive(Clone, Debug)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: SnapshotId) -> PathBuf {
        self.dir.join(format!("snapshot_{id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, snapshot: &DownloadSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(self.path_for(snapshot.id()), json).await?;
        Ok(())
    }

    async fn load(&self, id: SnapshotId) -> Result<Option<DownloadSnapshot>> {
        let content = match tokio::fs::read(self.path_for(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn load_by_session(&self, session_id: SessionId) -> Result<Option<DownloadSnapshot>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<DownloadSnapshot> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("snapshot_") || !name.ends_with(".json") {
                continue;
            }

            let path = entry.path();
            let Ok(content) = tokio::fs::read(&path).await else {
                continue;
            };
            let snapshot: DownloadSnapshot = match serde_json::from_slice(&content) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable snapshot document");
                    continue;
                }
            };

            if snapshot.session_id() != session_id {
                continue;
            }
            if newest
                .as_ref()
                .is_none_or(|n| snapshot.created_at() > n.created_at())
            {
                newest = Some(snapshot);
            }
        }

        Ok(newest)
    }
}

/// [`RecoveryStore`] writing one pretty-printed JSON document per recovery
/// session, named `recovery_{id}.json`
#[derive(Clone, Debug)]
pub struct JsonRecoveryStore {
    dir: PathBuf,
}

impl JsonRecoveryStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: RecoveryId) -> PathBuf {
        self.dir.join(format!("recovery_{id}.json"))
    }
}

#[async_trait]
impl RecoveryStore for JsonRecoveryStore {
    async fn save(&self, session: &ErrorRecoverySession) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.path_for(session.id()), json).await?;
        Ok(())
    }

    async fn load(&self, id: RecoveryId) -> Result<Option<ErrorRecoverySession>> {
        let content = match tokio::fs::read(self.path_for(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, DownloadConfig};
    use crate::period::Period;
    use crate::recovery::build_recovery_session;
    use crate::types::Status;

    fn period(ordinal: u8) -> Period {
        Period::new(2024, ordinal).unwrap()
    }

    fn session() -> DownloadSession {
        DownloadSession::new(
            Credentials::new("empleado01", "secreto").unwrap(),
            DownloadConfig::default(),
        )
    }

    // --- in-memory session store ---

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let store = InMemorySessionStore::new();
        let mut session = session();
        session.add_period_task(period(1));
        let id = session.id();

        store.create(session).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), id);
        assert_eq!(loaded.total_tasks(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get(SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = InMemorySessionStore::new();
        let session = session();

        store.create(session.clone()).await.unwrap();

        match store.create(session).await {
            Err(Error::InvalidState(msg)) => assert!(msg.contains("already exists")),
            other => panic!("expected InvalidState, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_overwrites_and_upserts() {
        let store = InMemorySessionStore::new();
        let mut session = session();
        let id = session.id();

        // Unknown id is stored, not rejected.
        store.update(session.clone()).await.unwrap();

        session.start().unwrap();
        store.update(session).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), Status::InProgress);
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal_sessions() {
        let store = InMemorySessionStore::new();

        let pending = session();
        let mut failed = session();
        failed.fail("gave up");

        store.create(pending.clone()).await.unwrap();
        store.create(failed).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), pending.id());
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let store = InMemorySessionStore::new();
        let older = session();
        let newer = session();

        store.create(older.clone()).await.unwrap();
        store.create(newer.clone()).await.unwrap();

        let recent = store.list_recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id(), newer.id());
    }

    // --- json snapshot store ---

    #[tokio::test]
    async fn test_snapshot_save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("snapshots"));

        let session_id = SessionId::new();
        let periods = [period(1), period(2)];
        let snapshot = DownloadSnapshot::capture(session_id, &periods, dir.path()).unwrap();

        store.save(&snapshot).await.unwrap();

        let loaded = store.load(snapshot.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), snapshot.id());
        assert_eq!(loaded.session_id(), session_id);
        assert_eq!(loaded.requested_periods().len(), 2);
        assert!(loaded.folder_snapshot(&periods[0]).is_some());
    }

    #[tokio::test]
    async fn test_snapshot_load_unknown_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path());

        assert!(store.load(SnapshotId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_load_by_session_picks_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("snapshots"));

        let session_id = SessionId::new();
        let first = DownloadSnapshot::capture(session_id, &[period(1)], dir.path()).unwrap();
        let second = DownloadSnapshot::capture(session_id, &[period(2)], dir.path()).unwrap();
        let unrelated =
            DownloadSnapshot::capture(SessionId::new(), &[period(3)], dir.path()).unwrap();

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.save(&unrelated).await.unwrap();

        let loaded = store.load_by_session(session_id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), second.id(), "latest capture wins");
    }

    #[tokio::test]
    async fn test_snapshot_load_by_session_without_store_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::new(dir.path().join("never_created"));

        let result = store.load_by_session(SessionId::new()).await.unwrap();
        assert!(result.is_none(), "missing directory means no snapshots");
    }

    #[tokio::test]
    async fn test_snapshot_load_by_session_skips_junk_files() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("snapshots");
        let store = JsonSnapshotStore::new(&store_dir);

        let session_id = SessionId::new();
        let snapshot = DownloadSnapshot::capture(session_id, &[period(1)], dir.path()).unwrap();
        store.save(&snapshot).await.unwrap();

        tokio::fs::write(store_dir.join("snapshot_basura.json"), b"not json")
            .await
            .unwrap();
        tokio::fs::write(store_dir.join("notas.txt"), b"unrelated")
            .await
            .unwrap();

        let loaded = store.load_by_session(session_id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), snapshot.id());
    }

    // --- json recovery store ---

    #[tokio::test]
    async fn test_recovery_save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecoveryStore::new(dir.path().join("recovery"));

        let mut recovery = build_recovery_session(
            SessionId::new(),
            &[period(1), period(2)],
            dir.path(),
            2,
        )
        .unwrap();
        recovery.start_recovery().unwrap();
        recovery.add_recovery_attempt(period(1), true, None);
        recovery.complete_recovery().unwrap();

        store.save(&recovery).await.unwrap();

        let loaded = store.load(recovery.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), recovery.id());
        assert_eq!(loaded.failed_downloads().len(), 2);
        assert_eq!(loaded.recovery_attempts().len(), 1);
        assert!(loaded.has_successful_attempt(&period(1)));
    }

    #[tokio::test]
    async fn test_recovery_load_unknown_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecoveryStore::new(dir.path());

        assert!(store.load(RecoveryId::new()).await.unwrap().is_none());
    }
}
