//! # nomina-dl
//!
//! Backend library for batch payroll-receipt downloads from an employee
//! portal, with snapshot-based verification of what actually landed on disk.
//!
//! ## Design Philosophy
//!
//! nomina-dl is designed to be:
//! - **Portal-agnostic** - bring your own [`PortalClient`]; the library owns
//!   sessions, retries, bounded concurrency, and verification
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to progress events, no polling
//! - **Honest about silent failures** - a fetch that reports success but
//!   writes nothing is caught by comparing filesystem snapshots, and a
//!   bounded recovery sweep re-fetches the flagged periods
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use nomina_dl::{Credentials, DownloadConfig, NominaDownloader, Period, SessionId};
//!
//! # async fn example(portal: Arc<dyn nomina_dl::PortalClient>) -> nomina_dl::Result<()> {
//! let downloader = NominaDownloader::new(portal, "./estado");
//!
//! // Subscribe to progress events
//! let mut events = downloader.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//!
//! let credentials = Credentials::new("empleado01", "secreto")?;
//! let config = DownloadConfig::new("./descargas")?;
//! let periods = vec![Period::new(2024, 1)?, Period::new(2024, 2)?];
//!
//! // Baseline first, then the batch, then the consistency check.
//! let baseline_key = SessionId::new();
//! let root = Path::new("./descargas");
//! downloader.create_snapshot(baseline_key, &periods, root).await;
//!
//! let run = downloader.start_session(credentials, config, &periods).await;
//!
//! let analysis = downloader.analyze_empty_folders(baseline_key).await;
//! if let (true, Some(session_id)) = (analysis.has_empty_folders, run.session_id) {
//!     downloader
//!         .start_error_recovery(session_id, &analysis.failed_periods, root, 3)
//!         .await;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Command surface and facade
pub mod commands;
/// Credentials and download configuration
pub mod config;
/// Parallel download engine
pub mod downloader;
/// Error types
pub mod error;
/// Progress observation
pub mod observer;
/// Payroll period value object
pub mod period;
/// Portal capability interface
pub mod portal;
/// Bounded secondary retry sessions
pub mod recovery;
/// Session and task state machines
pub mod session;
/// Filesystem snapshots for silent-failure detection
pub mod snapshot;
/// Session, snapshot, and recovery persistence
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Artifact validation
pub mod validate;

// Re-export commonly used types
pub use commands::{
    AnalyzeEmptyFoldersResult, AvailablePeriodsResult, AvailableYearsResult, CreateSnapshotResult,
    NominaDownloader, StartErrorRecoveryResult, StartSessionResult,
};
pub use config::{Credentials, DownloadConfig};
pub use downloader::ParallelDownloader;
pub use error::{Error, FetchError, Result};
pub use observer::{BroadcastObserver, NullObserver, ProgressObserver};
pub use period::Period;
pub use portal::PortalClient;
pub use recovery::{ErrorRecoverySession, FailedDownload, RecoveryAttempt, build_recovery_session};
pub use session::{DownloadSession, FailedAttempt, PeriodTask};
pub use snapshot::{DownloadSnapshot, FolderSnapshot};
pub use store::{
    InMemorySessionStore, JsonRecoveryStore, JsonSnapshotStore, RecoveryStore, SessionStore,
    SnapshotStore,
};
pub use types::{
    Artifact, ArtifactKind, Event, RecoveryId, RecoveryStatus, SessionId, SnapshotId, Status,
    TaskId, ValidationState,
};
pub use validate::{ArtifactValidator, FsArtifactValidator};

/// Helper to run a downloader facade until a termination signal arrives.
///
/// Waits for a signal, then calls [`NominaDownloader::shutdown`] so every
/// in-flight session stops at its next suspension point and stays
/// re-processable.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with a Ctrl+C fallback if
///   signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use nomina_dl::{NominaDownloader, run_with_shutdown};
///
/// # async fn example(portal: Arc<dyn nomina_dl::PortalClient>) {
/// let downloader = NominaDownloader::new(portal, "./estado");
/// run_with_shutdown(downloader).await;
/// # }
/// ```
pub async fn run_with_shutdown(downloader: NominaDownloader) {
    wait_for_signal().await;
    downloader.shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers,
    // tests); fall back to ctrl_c rather than give up.
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        _ => {
            tracing::warn!("Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
