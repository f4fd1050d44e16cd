//! Directory settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the gateways and coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Timeout of a single admin API request, in seconds.
    pub request_timeout_secs: u64,
    /// Per-cluster timeout of a federated search or health probe, in seconds.
    pub search_timeout_secs: u64,
    /// Maximum clusters queried at once by a federated search.
    pub search_parallelism: usize,
    /// Maximum clients loaded at once by a bulk prime.
    pub prime_parallelism: usize,
    /// Client used for admin password grants.
    pub admin_client_id: String,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            search_timeout_secs: 10,
            search_parallelism: 8,
            prime_parallelism: 4,
            admin_client_id: "admin-cli".to_string(),
        }
    }
}

impl DirectorySettings {
    /// Timeout of a single admin API request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Per-cluster timeout of a fan-out query.
    #[must_use]
    pub const fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Search parallelism, never below one.
    #[must_use]
    pub fn search_parallelism(&self) -> usize {
        self.search_parallelism.max(1)
    }

    /// Prime parallelism, never below one.
    #[must_use]
    pub fn prime_parallelism(&self) -> usize {
        self.prime_parallelism.max(1)
    }
}
