//! Parallel download engine.
//!
//! [`ParallelDownloader`] drives every period task of a stored session to a
//! terminal state under the session's concurrency and retry budgets:
//! - [`process`] - session processing, the per-task retry loop, and the
//!   single-attempt fetch pipeline

mod process;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub(crate) use process::{ensure_portal_auth, fetch_period_once};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::observer::ProgressObserver;
use crate::portal::PortalClient;
use crate::store::SessionStore;
use crate::types::SessionId;
use crate::validate::ArtifactValidator;

/// Bounded-concurrency retry engine over the period tasks of one session
/// (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ParallelDownloader {
    /// Session storage, shared with the command surface
    pub(crate) store: Arc<dyn SessionStore>,
    /// Portal client the workers fetch through
    pub(crate) portal: Arc<dyn PortalClient>,
    /// Validator applied to every artifact a fetch reports
    pub(crate) validator: Arc<dyn ArtifactValidator>,
    /// Progress event sink
    pub(crate) observer: Arc<dyn ProgressObserver>,
}

impl ParallelDownloader {
    /// Create an engine over the given capabilities.
    pub fn new(
        store: Arc<dyn SessionStore>,
        portal: Arc<dyn PortalClient>,
        validator: Arc<dyn ArtifactValidator>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            store,
            portal,
            validator,
            observer,
        }
    }

    /// Drive every period task of a stored session to a terminal state.
    ///
    /// One worker runs per task, gated by a semaphore sized to the session's
    /// `max_concurrent_workers`. Each failed attempt is logged on the
    /// session and retried after `retry_backoff` until the task's
    /// `max_retry_attempts` budget is spent. The session completes when
    /// every task loop has finished, even when some tasks stay failed; it
    /// fails only when the run itself breaks (storage errors, a panicked
    /// worker, a session that was never started).
    ///
    /// Cancelling `cancel` stops new attempts and aborts in-flight ones.
    /// Tasks keep their last recorded status, the session is persisted as
    /// it stands and left un-completed, and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session id, and the first
    /// batch error after marking the session failed.
    pub async fn process_session(
        &self,
        session_id: SessionId,
        cancel: CancellationToken,
    ) -> Result<()> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        process::run_session(self, session, cancel).await
    }
}
