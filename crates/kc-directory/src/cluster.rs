//! Cluster registry.
//!
//! The set of known clusters is owned by an external connection-metadata
//! store ([`ClusterStore`]). [`ClusterRegistry`] keeps an immutable snapshot
//! of it that readers share without locking beyond a pointer swap.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};
use crate::model::ClusterId;

/// One independently administered authorization-server realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Display name.
    pub name: String,
    /// Base endpoint (e.g., `https://sso.example.com`).
    pub base_url: String,
    /// Realm administered through this cluster entry.
    pub realm: String,
    /// Admin credentials reference.
    pub credentials: Credentials,
}

impl Cluster {
    /// Base URL without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Reference to the admin credentials of a cluster.
///
/// The password is either given inline or read from an environment
/// variable at the time it is needed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Admin username.
    pub username: String,
    /// Inline password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl Credentials {
    /// Creates credentials with an inline password.
    #[must_use]
    pub fn inline(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            password_env: None,
        }
    }

    /// Resolves the password.
    ///
    /// ## Errors
    ///
    /// Returns `Unauthorized` if neither an inline password nor a set
    /// environment variable is available.
    pub fn resolve_password(&self) -> DirectoryResult<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        match &self.password_env {
            Some(var) => std::env::var(var).map_err(|_| {
                DirectoryError::Unauthorized(format!("password variable {var} is not set"))
            }),
            None => Err(DirectoryError::Unauthorized(format!(
                "no password configured for '{}'",
                self.username
            ))),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .finish()
    }
}

/// Connection-metadata store.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Lists all registered clusters.
    async fn list_clusters(&self) -> DirectoryResult<Vec<Cluster>>;

    /// Gets one cluster.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the id is not registered.
    async fn get_cluster(&self, id: ClusterId) -> DirectoryResult<Cluster>;
}

/// Cluster store backed by a TOML document with a `[[clusters]]` array.
#[derive(Debug, Clone, Default)]
pub struct FileClusterStore {
    clusters: Vec<Cluster>,
}

#[derive(Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: Vec<Cluster>,
}

impl FileClusterStore {
    /// Creates a store from an explicit list.
    #[must_use]
    pub fn from_clusters(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    /// Parses a TOML document.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the document is malformed or ids repeat.
    pub fn from_toml_str(content: &str) -> DirectoryResult<Self> {
        let file: ClustersFile = toml::from_str(content)
            .map_err(|e| DirectoryError::invalid(format!("failed to parse clusters: {e}")))?;
        let mut seen = std::collections::HashSet::new();
        for cluster in &file.clusters {
            if !seen.insert(cluster.id) {
                return Err(DirectoryError::invalid(format!(
                    "duplicate cluster id {}",
                    cluster.id
                )));
            }
        }
        Ok(Self {
            clusters: file.clusters,
        })
    }

    /// Loads a TOML file.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> DirectoryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::invalid(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

#[async_trait]
impl ClusterStore for FileClusterStore {
    async fn list_clusters(&self) -> DirectoryResult<Vec<Cluster>> {
        Ok(self.clusters.clone())
    }

    async fn get_cluster(&self, id: ClusterId) -> DirectoryResult<Cluster> {
        self.clusters
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found("Cluster", id.to_string()))
    }
}

/// Read-mostly registry of known clusters.
#[derive(Debug)]
pub struct ClusterRegistry {
    snapshot: RwLock<Arc<[Cluster]>>,
}

impl ClusterRegistry {
    /// Creates a registry from a list of clusters.
    #[must_use]
    pub fn new(clusters: Vec<Cluster>) -> Self {
        Self {
            snapshot: RwLock::new(clusters.into()),
        }
    }

    /// Creates a registry from a store.
    ///
    /// ## Errors
    ///
    /// Propagates the store's error.
    pub async fn from_store(store: &dyn ClusterStore) -> DirectoryResult<Self> {
        Ok(Self::new(store.list_clusters().await?))
    }

    /// Replaces the snapshot with the store's current contents.
    ///
    /// Returns the ids whose entry was removed or whose connection target
    /// changed; cached data for them is stale.
    ///
    /// ## Errors
    ///
    /// Propagates the store's error; the old snapshot stays in place.
    pub async fn reload(&self, store: &dyn ClusterStore) -> DirectoryResult<Vec<ClusterId>> {
        let fresh: Arc<[Cluster]> = store.list_clusters().await?.into();
        let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::clone(&fresh));

        let stale = previous
            .iter()
            .filter(|old| {
                fresh.iter().find(|c| c.id == old.id).map_or(true, |new| {
                    new.base_url != old.base_url
                        || new.realm != old.realm
                        || new.credentials != old.credentials
                })
            })
            .map(|c| c.id)
            .collect::<Vec<_>>();

        tracing::info!(clusters = fresh.len(), stale = stale.len(), "Cluster registry reloaded");
        Ok(stale)
    }

    /// Current snapshot, in registration order.
    #[must_use]
    pub fn list(&self) -> Arc<[Cluster]> {
        Arc::clone(&self.snapshot.read())
    }

    /// Gets a cluster by id.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the id is not registered.
    pub fn get(&self, id: ClusterId) -> DirectoryResult<Cluster> {
        self.snapshot
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| DirectoryError::not_found("Cluster", id.to_string()))
    }

    /// Resolves a target set: the explicit ids in the given order, or every
    /// registered cluster. Unknown ids are returned separately.
    #[must_use]
    pub fn resolve(&self, ids: Option<&[ClusterId]>) -> (Vec<Cluster>, Vec<ClusterId>) {
        let snapshot = self.list();
        match ids {
            None => (snapshot.to_vec(), Vec::new()),
            Some(ids) => {
                let mut found = Vec::with_capacity(ids.len());
                let mut missing = Vec::new();
                for id in ids {
                    if found.iter().any(|c: &Cluster| c.id == *id) || missing.contains(id) {
                        continue;
                    }
                    match snapshot.iter().find(|c| c.id == *id) {
                        Some(cluster) => found.push(cluster.clone()),
                        None => missing.push(*id),
                    }
                }
                (found, missing)
            }
        }
    }

    /// Number of registered clusters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Checks whether no cluster is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) fn test_cluster(id: u32, name: &str) -> Cluster {
    Cluster {
        id: ClusterId(id),
        name: name.to_string(),
        base_url: format!("http://{name}.test"),
        realm: "demo".to_string(),
        credentials: Credentials::inline("admin", "admin"),
    }
}
