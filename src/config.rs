//! Configuration values for sessions and the download engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Portal login credentials
///
/// The username is trimmed; both fields must be non-blank.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create credentials, trimming the username.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into().trim().to_string();
        let password = password.into();

        if username.is_empty() {
            return Err(Error::Validation("username cannot be blank".into()));
        }
        if password.trim().is_empty() {
            return Err(Error::Validation("password cannot be blank".into()));
        }

        Ok(Self { username, password })
    }

    /// Portal account name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Portal account password
    pub fn password(&self) -> &str {
        &self.password
    }
}

/// Per-session download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root folder that receives one subfolder per year/period
    #[serde(default = "default_download_path")]
    pub download_path: PathBuf,

    /// Maximum simultaneously in-flight fetches (default: 16)
    #[serde(default = "default_max_workers")]
    pub max_concurrent_workers: usize,

    /// Attempt budget per period task (default: 3). Zero means tasks are
    /// never attempted; the session still completes.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Upper bound on a single fetch attempt (default: 5 minutes)
    #[serde(default = "default_timeout_per_download", with = "duration_serde")]
    pub timeout_per_download: Duration,

    /// Fixed delay between retries of the same task (default: 2 seconds)
    #[serde(default = "default_retry_backoff", with = "duration_serde")]
    pub retry_backoff: Duration,

    /// Validate each materialized artifact after fetching (default: true)
    #[serde(default = "default_true")]
    pub validate_artifacts: bool,
}

impl DownloadConfig {
    /// Create a configuration with defaults rooted at `download_path`.
    pub fn new(download_path: impl Into<PathBuf>) -> Result<Self> {
        let config = Self {
            download_path: download_path.into(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants that serde deserialization cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.download_path.as_os_str().is_empty() {
            return Err(Error::Validation("download path cannot be blank".into()));
        }
        if self.max_concurrent_workers == 0 {
            return Err(Error::Validation(
                "max_concurrent_workers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            max_concurrent_workers: 16,
            max_retry_attempts: 3,
            timeout_per_download: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(2),
            validate_artifacts: true,
        }
    }
}

fn default_download_path() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_workers() -> usize {
    16
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_timeout_per_download() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
