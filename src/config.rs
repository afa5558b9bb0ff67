//! Registry configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide switches for a [`Registry`](crate::registry::Registry).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Run checksum-consistency and distributed-uniqueness checks.
    pub report_error_enabled: bool,
    /// Record recoverable user errors in the diagnostics list instead of failing.
    pub tolerant: bool,
    /// Directory receiving grid-exchange files.
    pub exchange_dir: Option<PathBuf>,
    /// Write an exchange file for every registered H2D grid.
    pub output_h2d_grids: bool,
    /// Upper bound on the remote-grid wait; `None` blocks indefinitely.
    pub remote_wait_timeout: Option<Duration>,
    /// Sleep between marker-file polls.
    pub poll_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            report_error_enabled: true,
            tolerant: false,
            exchange_dir: None,
            output_h2d_grids: false,
            remote_wait_timeout: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RegistryConfig {
    /// Production settings: skip distributed consistency checks.
    pub fn production() -> Self {
        Self {
            report_error_enabled: false,
            ..Self::default()
        }
    }
}
