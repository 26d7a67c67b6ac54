//! Filesystem baselines for detecting silent download failures
//!
//! A portal fetch can report success while materializing nothing on disk.
//! [`DownloadSnapshot`] records, per requested period, which file names
//! already existed in that period's folder before the run. After the run,
//! [`empty_folders`](DownloadSnapshot::empty_folders) re-lists each folder
//! and flags the ones where no file appeared that was not already in the
//! baseline. A folder that is missing at analysis time is flagged too.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::Result;
use crate::period::Period;
use crate::types::{SessionId, SnapshotId};
use crate::utils::period_folder_path;

/// File names currently present under a folder, recursively.
///
/// Only names are compared, not paths: a file moved between subfolders is
/// not a new download. An absent or unreadable folder yields an empty set.
fn current_file_names(path: &Path) -> BTreeSet<String> {
    WalkDir::new(path)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect()
}

/// Baseline listing of one period folder at capture time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FolderSnapshot {
    path: PathBuf,
    existing_files: BTreeSet<String>,
    captured_at: DateTime<Utc>,
}

impl FolderSnapshot {
    /// Capture the folder as it is right now. An absent folder produces an
    /// empty baseline, so any file written later counts as new.
    pub fn capture(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            existing_files: current_file_names(&path),
            captured_at: Utc::now(),
            path,
        }
    }

    /// Folder this baseline describes
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File names present at capture time
    pub fn existing_files(&self) -> &BTreeSet<String> {
        &self.existing_files
    }

    /// When the baseline was captured
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Re-list the folder and report whether any file name appeared that
    /// was not in the baseline. A folder missing now has no new files.
    pub fn has_new_files(&self) -> bool {
        current_file_names(&self.path)
            .iter()
            .any(|name| !self.existing_files.contains(name))
    }
}

/// Pre-download baseline across every period folder of a session
///
/// Captured before the engine runs and persisted alongside the session so
/// the analysis can happen in a later process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    id: SnapshotId,
    session_id: SessionId,
    created_at: DateTime<Utc>,
    root_path: PathBuf,
    requested_periods: Vec<Period>,
    baseline: BTreeMap<String, FolderSnapshot>,
}

impl DownloadSnapshot {
    /// Capture a baseline for every requested period under `root`.
    ///
    /// Folder paths follow [`period_folder_path`], the same layout the
    /// download engine writes into. Duplicate periods (by year and ordinal)
    /// are captured once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`](crate::Error::Validation) when a
    /// period's display name cannot be turned into a folder name.
    pub fn capture(
        session_id: SessionId,
        periods: &[Period],
        root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let root = root.into();
        let mut requested_periods: Vec<Period> = Vec::new();
        let mut baseline = BTreeMap::new();

        for period in periods {
            if baseline.contains_key(&period.key()) {
                continue;
            }

            let folder = period_folder_path(&root, period)?;
            baseline.insert(period.key(), FolderSnapshot::capture(folder));
            requested_periods.push(period.clone());
        }

        Ok(Self {
            id: SnapshotId::new(),
            session_id,
            created_at: Utc::now(),
            root_path: root,
            requested_periods,
            baseline,
        })
    }

    /// Snapshot identifier
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Session this baseline was captured for
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// When the baseline was captured
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Download root the period folders live under
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Periods covered by this snapshot, in request order, deduplicated
    pub fn requested_periods(&self) -> &[Period] {
        &self.requested_periods
    }

    /// Baseline for one period, if it was covered by the capture
    pub fn folder_snapshot(&self, period: &Period) -> Option<&FolderSnapshot> {
        self.baseline.get(&period.key())
    }

    /// Folders where the run produced no new files, in request order.
    ///
    /// Flags folders whose current listing is a subset of the baseline and
    /// folders that do not exist at all.
    pub fn empty_folders(&self) -> Vec<PathBuf> {
        self.requested_periods
            .iter()
            .filter_map(|period| self.baseline.get(&period.key()))
            .filter(|snapshot| !snapshot.has_new_files())
            .map(|snapshot| snapshot.path.clone())
            .collect()
    }

    /// Periods whose folders gained no new files, in request order
    pub fn periods_for_empty_folders(&self) -> Vec<Period> {
        self.requested_periods
            .iter()
            .filter(|period| {
                self.baseline
                    .get(&period.key())
                    .is_some_and(|snapshot| !snapshot.has_new_files())
            })
            .cloned()
            .collect()
    }
}
