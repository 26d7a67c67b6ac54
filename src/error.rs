//! Error types for nomina-dl
//!
//! This module provides error handling for the library, including:
//! - Validation errors raised by value-object constructors
//! - State machine misuse errors (invalid transitions)
//! - Fetch attempt failures consumed by the retry engine
//! - Lookup failures for unknown session/snapshot/recovery ids

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nomina-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nomina-dl
///
/// The retry engine only ever retries [`Error::Fetch`]; every other variant is
/// terminal where it occurs. Command handlers convert errors into
/// `{success: false, error}` result records at the boundary instead of
/// propagating them.
#[derive(Debug, Error)]
pub enum Error {
    /// Constructor input rejected (blank credentials/path, out-of-range
    /// period or year, non-positive worker count)
    #[error("validation error: {0}")]
    Validation(String),

    /// State machine misuse (completing a task that is not in progress,
    /// starting a session twice)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unknown session, snapshot, or recovery session id
    #[error("not found: {0}")]
    NotFound(String),

    /// A single fetch attempt failed; the retry loop converts this into a
    /// failed-attempt log entry and retries while budget remains
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure modes of a single fetch attempt
///
/// Everything in here is transient from the engine's point of view: the
/// per-task retry loop catches it, records a failed attempt, and retries
/// until the attempt budget runs out.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The portal rejected the login or no session could be established
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Portal-side failure while fetching one period
    #[error("portal error for period {period}: {message}")]
    Portal {
        /// Key of the period whose fetch failed
        period: String,
        /// Portal-reported failure description
        message: String,
    },

    /// The attempt exceeded the configured per-download timeout
    #[error("fetch timed out after {seconds}s")]
    Timeout {
        /// Configured timeout in whole seconds
        seconds: u64,
    },

    /// An expected artifact file was missing when validated
    #[error("artifact missing at {path}")]
    MissingArtifact {
        /// Path where the artifact was expected on disk
        path: PathBuf,
    },
}
