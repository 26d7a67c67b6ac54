//! Payroll portal client capability
//!
//! The download engine and the command surface only ever talk to the portal
//! through [`PortalClient`]. Production implementations drive a real portal
//! (browser automation, HTTP session); tests script outcomes per period.

use std::path::Path;

use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::Result;
use crate::period::Period;
use crate::types::Artifact;

/// Client for the payroll receipt portal
///
/// Implementations must be safe to share across the engine's workers; every
/// method takes `&self` and may be called concurrently.
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// Authenticate against the portal.
    ///
    /// Returns `Ok(false)` when the portal rejects the credentials, and an
    /// error only for transport-level failures.
    async fn login(&self, credentials: &Credentials) -> Result<bool>;

    /// Whether the current portal session is still usable.
    ///
    /// Callers re-[`login`](Self::login) when this returns `Ok(false)`.
    async fn validate_session(&self) -> Result<bool>;

    /// Years with receipts available for the authenticated employee.
    async fn list_years(&self) -> Result<Vec<i32>>;

    /// Payroll periods available within one year.
    async fn list_periods(&self, year: i32) -> Result<Vec<Period>>;

    /// Download every artifact of one period into the canonical layout.
    ///
    /// Files must land under the folder given by
    /// [`period_folder_path`](crate::utils::period_folder_path) applied to
    /// `dest_root` and `period`; snapshot analysis and recovery both look
    /// there. Returns a descriptor per file written.
    async fn fetch_period(&self, period: &Period, dest_root: &Path) -> Result<Vec<Artifact>>;

    /// End the portal session. Best-effort; a failed logout does not undo
    /// completed downloads.
    async fn logout(&self) -> Result<()>;
}
