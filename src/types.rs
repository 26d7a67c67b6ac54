//! Core types for nomina-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::period::Period;

/// Unique identifier for a download session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner Uuid value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<SessionId> for Uuid {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a period task within a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner Uuid value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<TaskId> for Uuid {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a download snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner Uuid value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SnapshotId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<SnapshotId> for Uuid {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an error recovery session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryId(pub Uuid);

impl RecoveryId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner Uuid value
    pub fn get(&self) -> Uuid {
        self.0
    }
}

impl Default for RecoveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RecoveryId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<RecoveryId> for Uuid {
    fn from(id: RecoveryId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status shared by period tasks and download sessions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, no attempt started yet
    Pending,
    /// An attempt is currently running
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with a recorded error
    Failed,
}

impl Status {
    /// Whether this status counts as active (not yet terminal)
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Pending | Status::InProgress)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Pending => "Pending",
            Status::InProgress => "InProgress",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle status of an error recovery session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// Created, sweep not started
    Pending,
    /// Sweep in progress
    InProgress,
    /// Every swept period recovered
    Completed,
    /// At least one period could not be recovered
    Failed,
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryStatus::Pending => "Pending",
            RecoveryStatus::InProgress => "InProgress",
            RecoveryStatus::Completed => "Completed",
            RecoveryStatus::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// Kind of artifact detected by file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Payroll receipt PDF
    ReciboPdf,
    /// CFDI invoice PDF
    CfdiPdf,
    /// CFDI invoice XML
    CfdiXml,
}

impl ArtifactKind {
    /// Detect the artifact kind from a file path's extension.
    ///
    /// `.xml` maps to [`ArtifactKind::CfdiXml`]; everything else (including
    /// `.pdf` and unknown extensions) maps to [`ArtifactKind::ReciboPdf`].
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("xml") => ArtifactKind::CfdiXml,
            _ => ArtifactKind::ReciboPdf,
        }
    }
}

/// Validation state of a fetched artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// Not validated yet
    Pending,
    /// Passed validation
    Valid,
    /// Failed validation
    Invalid,
    /// File content unreadable or damaged
    Corrupted,
}

/// One fetched file associated with a period
///
/// Artifacts reference their period by value; nothing points back at the
/// owning task or session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    /// Period this artifact belongs to
    pub period: Period,
    /// File name
    pub name: String,
    /// Full path on disk
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
    /// Artifact kind, detected from the file extension
    pub kind: ArtifactKind,
    /// Hex-encoded SHA-256 content hash, when computed
    pub hash: Option<String>,
    /// When the artifact was materialized
    pub downloaded_at: DateTime<Utc>,
    /// Current validation state
    pub validation: ValidationState,
    /// Reason recorded by mark_invalid/mark_corrupted
    pub validation_message: Option<String>,
}

impl Artifact {
    /// Create a new artifact descriptor.
    ///
    /// The name and path must be non-blank; the kind is detected from the
    /// path extension and validation starts out [`ValidationState::Pending`].
    pub fn new(
        period: Period,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Result<Self> {
        let name = name.into();
        let path = path.into();

        if name.trim().is_empty() {
            return Err(Error::Validation("artifact name cannot be blank".into()));
        }
        if path.as_os_str().is_empty() {
            return Err(Error::Validation("artifact path cannot be blank".into()));
        }

        let kind = ArtifactKind::from_path(&path);
        Ok(Self {
            period,
            name,
            path,
            size_bytes,
            kind,
            hash: None,
            downloaded_at: Utc::now(),
            validation: ValidationState::Pending,
            validation_message: None,
        })
    }

    /// Mark the artifact as having passed validation
    pub fn mark_valid(&mut self) {
        self.validation = ValidationState::Valid;
        self.validation_message = None;
    }

    /// Mark the artifact as having failed validation
    pub fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.validation = ValidationState::Invalid;
        self.validation_message = Some(reason.into());
    }

    /// Mark the artifact's content as unreadable or damaged
    pub fn mark_corrupted(&mut self, reason: impl Into<String>) {
        self.validation = ValidationState::Corrupted;
        self.validation_message = Some(reason.into());
    }

    /// Whether the artifact has passed validation
    pub fn is_valid(&self) -> bool {
        self.validation == ValidationState::Valid
    }

    /// Whether the descriptor itself is well formed: non-zero size and a
    /// recorded content hash
    pub fn is_well_formed(&self) -> bool {
        self.size_bytes > 0 && self.hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Event emitted during session and recovery lifecycles
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Session started processing
    SessionStarted {
        /// Session ID
        session_id: SessionId,
        /// Number of period tasks in the session
        total_tasks: usize,
    },

    /// A period task attempt began
    TaskStarted {
        /// Session ID
        session_id: SessionId,
        /// Period key ("{year}-{ordinal:02}")
        period: String,
        /// Attempt number, starting at 1
        attempt: u32,
    },

    /// A period task finished successfully
    TaskCompleted {
        /// Session ID
        session_id: SessionId,
        /// Period key
        period: String,
    },

    /// A period task attempt failed
    TaskFailed {
        /// Session ID
        session_id: SessionId,
        /// Period key
        period: String,
        /// Failure description
        message: String,
        /// Attempt number that failed
        attempt: u32,
    },

    /// An artifact was materialized and attached
    ArtifactFetched {
        /// Session ID
        session_id: SessionId,
        /// Period key
        period: String,
        /// Artifact file name
        name: String,
    },

    /// Session reached a terminal status
    SessionCompleted {
        /// Session ID
        session_id: SessionId,
        /// Number of tasks that completed
        completed: usize,
        /// Number of failed-attempt log entries
        failed: usize,
    },

    /// Free-text progress message
    Message {
        /// Message text
        text: String,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn period(year: i32, ordinal: u8) -> Period {
        Period::new(year, ordinal).unwrap()
    }

    // --- id newtypes ---

    #[test]
    fn session_id_is_unique_per_new() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b, "two generated ids must differ");
    }

    #[test]
    fn session_id_round_trips_through_uuid() {
        let raw = Uuid::new_v4();
        let id = SessionId::from(raw);
        let back: Uuid = id.into();
        assert_eq!(back, raw);
        assert_eq!(id.get(), raw);
    }

    #[test]
    fn session_id_serializes_transparently() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(
            json,
            format!("\"{}\"", id.get()),
            "transparent serde should produce a bare uuid string"
        );

        let parsed: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn id_display_matches_inner_uuid() {
        let raw = Uuid::new_v4();
        assert_eq!(TaskId::from(raw).to_string(), raw.to_string());
        assert_eq!(SnapshotId::from(raw).to_string(), raw.to_string());
        assert_eq!(RecoveryId::from(raw).to_string(), raw.to_string());
    }

    // --- Status ---

    #[test]
    fn status_active_classification() {
        assert!(Status::Pending.is_active());
        assert!(Status::InProgress.is_active());
        assert!(!Status::Completed.is_active());
        assert!(!Status::Failed.is_active());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&RecoveryStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    // --- ArtifactKind detection ---

    #[test]
    fn artifact_kind_from_extension() {
        let cases = [
            ("recibo.pdf", ArtifactKind::ReciboPdf),
            ("cfdi.XML", ArtifactKind::CfdiXml),
            ("cfdi.xml", ArtifactKind::CfdiXml),
            ("archivo.dat", ArtifactKind::ReciboPdf),
            ("sin_extension", ArtifactKind::ReciboPdf),
        ];

        for (name, expected) in cases {
            assert_eq!(
                ArtifactKind::from_path(Path::new(name)),
                expected,
                "kind for {name}"
            );
        }
    }

    // --- Artifact construction and validation marks ---

    #[test]
    fn artifact_new_rejects_blank_name() {
        let result = Artifact::new(period(2024, 1), "   ", "/downloads/a.pdf", 10);
        match result {
            Err(Error::Validation(msg)) => {
                assert!(msg.contains("name"), "message should mention name: {msg}")
            }
            other => panic!("expected Validation error, got: {other:?}"),
        }
    }

    #[test]
    fn artifact_new_rejects_empty_path() {
        let result = Artifact::new(period(2024, 1), "a.pdf", "", 10);
        match result {
            Err(Error::Validation(msg)) => {
                assert!(msg.contains("path"), "message should mention path: {msg}")
            }
            other => panic!("expected Validation error, got: {other:?}"),
        }
    }

    #[test]
    fn artifact_starts_pending_and_marks_transition() {
        let mut artifact =
            Artifact::new(period(2024, 3), "recibo.pdf", "/downloads/recibo.pdf", 1024).unwrap();
        assert_eq!(artifact.validation, ValidationState::Pending);
        assert!(!artifact.is_valid());

        artifact.mark_invalid("size mismatch");
        assert_eq!(artifact.validation, ValidationState::Invalid);
        assert_eq!(artifact.validation_message.as_deref(), Some("size mismatch"));

        artifact.mark_valid();
        assert!(artifact.is_valid());
        assert!(
            artifact.validation_message.is_none(),
            "mark_valid should clear the recorded reason"
        );

        artifact.mark_corrupted("unreadable");
        assert_eq!(artifact.validation, ValidationState::Corrupted);
    }

    #[test]
    fn artifact_well_formed_requires_size_and_hash() {
        let mut artifact =
            Artifact::new(period(2024, 1), "recibo.pdf", "/downloads/recibo.pdf", 0).unwrap();
        assert!(!artifact.is_well_formed(), "zero size is not well formed");

        artifact.size_bytes = 2048;
        assert!(!artifact.is_well_formed(), "missing hash is not well formed");

        artifact.hash = Some(String::new());
        assert!(!artifact.is_well_formed(), "empty hash is not well formed");

        artifact.hash = Some("ab12".into());
        assert!(artifact.is_well_formed());
    }

    // --- Event serde shape ---

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let event = Event::TaskFailed {
            session_id: SessionId::new(),
            period: "2024-01".into(),
            message: "portal timeout".into(),
            attempt: 2,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_failed");
        assert_eq!(json["period"], "2024-01");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::SessionCompleted {
            session_id: SessionId::new(),
            completed: 3,
            failed: 1,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        match parsed {
            Event::SessionCompleted {
                completed, failed, ..
            } => {
                assert_eq!(completed, 3);
                assert_eq!(failed, 1);
            }
            other => panic!("expected SessionCompleted, got: {other:?}"),
        }
    }
}
