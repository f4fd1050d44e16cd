//! Per-cluster directory gateways.
//!
//! A [`DirectoryGateway`] performs CRUD and query operations against one
//! cluster's administrative API. Gateways never retry; every failure is
//! returned verbatim and retry policy belongs to the caller.
//!
//! ## Implementations
//!
//! - [`HttpDirectoryGateway`] - talks to a remote admin REST API
//! - [`MemoryDirectory`] - in-process directory for tests and dry runs

pub mod http;
pub mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::cluster::{Cluster, ClusterRegistry, ClusterStore};
use crate::error::DirectoryResult;
use crate::model::{Client, ClusterId, Group, PrincipalRef, Role, RoleMappings, RoleScope, User};
use crate::token::{Grant, TokenResponse};

pub use http::HttpDirectoryGateway;
pub use memory::MemoryDirectory;

/// Operations against one cluster's administrative API.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait DirectoryGateway: Send + Sync {
    /// Lists all users, in the server's native order.
    async fn list_users(&self) -> DirectoryResult<Vec<User>>;

    /// Lists all groups.
    async fn list_groups(&self) -> DirectoryResult<Vec<Group>>;

    /// Lists all clients.
    async fn list_clients(&self) -> DirectoryResult<Vec<Client>>;

    /// Reads the roles mapped directly to a user or group.
    ///
    /// Listings do not carry role mappings; this is the authoritative read.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the principal does not exist.
    async fn role_mappings(&self, principal: &PrincipalRef) -> DirectoryResult<RoleMappings>;

    /// Lists the paths of the groups a user belongs to.
    async fn user_groups(&self, user_id: &str) -> DirectoryResult<BTreeSet<String>>;

    /// Lists realm roles.
    async fn list_realm_roles(&self) -> DirectoryResult<Vec<Role>>;

    /// Lists roles owned by a client.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if no client has that key.
    async fn list_client_roles(&self, client_key: &str) -> DirectoryResult<Vec<Role>>;

    /// Creates a user and returns its id.
    ///
    /// ## Errors
    ///
    /// Returns `Conflict` if the username is taken.
    async fn create_user(&self, user: &User) -> DirectoryResult<String>;

    /// Creates a top-level group and returns its id.
    async fn create_group(&self, group: &Group) -> DirectoryResult<String>;

    /// Creates a role in the given scope.
    async fn create_role(&self, scope: &RoleScope, role: &Role) -> DirectoryResult<()>;

    /// Creates a client and returns its id.
    async fn create_client(&self, client: &Client) -> DirectoryResult<String>;

    /// Replaces a user's representation.
    async fn update_user(&self, id: &str, user: &User) -> DirectoryResult<()>;

    /// Replaces a group's representation.
    async fn update_group(&self, id: &str, group: &Group) -> DirectoryResult<()>;

    /// Replaces a role's representation.
    async fn update_role(&self, scope: &RoleScope, name: &str, role: &Role) -> DirectoryResult<()>;

    /// Replaces a client's representation.
    async fn update_client(&self, id: &str, client: &Client) -> DirectoryResult<()>;

    /// Adds realm role mappings to a principal. Already-held roles are a no-op.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if a role name does not exist.
    async fn assign_realm_roles(&self, principal: &PrincipalRef, names: &[String])
        -> DirectoryResult<()>;

    /// Adds client role mappings to a principal.
    async fn assign_client_roles(
        &self,
        principal: &PrincipalRef,
        client_key: &str,
        names: &[String],
    ) -> DirectoryResult<()>;

    /// Adds a user to a group.
    async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> DirectoryResult<()>;

    /// Reads a confidential client's secret.
    async fn get_client_secret(&self, client_key: &str) -> DirectoryResult<String>;

    /// Exports the realm representation.
    async fn export_realm(&self) -> DirectoryResult<Value>;

    /// Imports a realm representation.
    async fn import_realm(&self, payload: &Value) -> DirectoryResult<()>;

    /// Obtains a token from the cluster's realm.
    async fn get_token(&self, grant: &Grant) -> DirectoryResult<TokenResponse>;

    /// Checks that the realm answers.
    async fn health(&self) -> DirectoryResult<()>;
}

/// Builds gateways for clusters.
pub trait GatewayFactory: Send + Sync {
    /// Creates a gateway for a cluster.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the cluster's connection data is unusable.
    fn connect(&self, cluster: &Cluster) -> DirectoryResult<Arc<dyn DirectoryGateway>>;
}

impl<F> GatewayFactory for F
where
    F: Fn(&Cluster) -> DirectoryResult<Arc<dyn DirectoryGateway>> + Send + Sync,
{
    fn connect(&self, cluster: &Cluster) -> DirectoryResult<Arc<dyn DirectoryGateway>> {
        self(cluster)
    }
}

/// Registry of connected gateways, one per cluster.
pub struct Gateways {
    registry: Arc<ClusterRegistry>,
    factory: Box<dyn GatewayFactory>,
    connected: DashMap<ClusterId, Arc<dyn DirectoryGateway>>,
}

impl Gateways {
    /// Creates an empty pool over a registry.
    pub fn new(registry: Arc<ClusterRegistry>, factory: impl GatewayFactory + 'static) -> Self {
        Self {
            registry,
            factory: Box::new(factory),
            connected: DashMap::new(),
        }
    }

    /// Creates a pool whose gateways are built by a closure.
    pub fn from_fn<F>(registry: Arc<ClusterRegistry>, connect: F) -> Self
    where
        F: Fn(&Cluster) -> DirectoryResult<Arc<dyn DirectoryGateway>> + Send + Sync + 'static,
    {
        Self::new(registry, connect)
    }

    /// Underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    /// Gets (connecting on first use) the gateway of a registered cluster.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the cluster is not registered, or the factory's
    /// error.
    pub fn for_cluster(&self, id: ClusterId) -> DirectoryResult<Arc<dyn DirectoryGateway>> {
        if let Some(gateway) = self.connected.get(&id) {
            return Ok(Arc::clone(gateway.value()));
        }
        let cluster = self.registry.get(id)?;
        self.connect(&cluster)
    }

    /// Gets the gateway for an already resolved cluster.
    ///
    /// ## Errors
    ///
    /// Returns the factory's error.
    pub fn connect(&self, cluster: &Cluster) -> DirectoryResult<Arc<dyn DirectoryGateway>> {
        if let Some(gateway) = self.connected.get(&cluster.id) {
            return Ok(Arc::clone(gateway.value()));
        }
        let gateway = self.factory.connect(cluster)?;
        Ok(Arc::clone(
            self.connected.entry(cluster.id).or_insert(gateway).value(),
        ))
    }

    /// Drops the gateway of a cluster; the next use reconnects.
    ///
    /// Role cache entries are not touched; see [`RoleCache::disconnect`].
    ///
    /// [`RoleCache::disconnect`]: crate::cache::RoleCache::disconnect
    pub fn disconnect(&self, id: ClusterId) {
        if self.connected.remove(&id).is_some() {
            tracing::debug!(cluster = %id, "Gateway disconnected");
        }
    }

    /// Reloads the registry from a store and disconnects every cluster that
    /// was removed or whose connection target changed.
    ///
    /// Returns the stale ids.
    ///
    /// ## Errors
    ///
    /// Propagates the store's error; nothing is disconnected then.
    pub async fn reload(&self, store: &dyn ClusterStore) -> DirectoryResult<Vec<ClusterId>> {
        let stale = self.registry.reload(store).await?;
        for id in &stale {
            self.disconnect(*id);
        }
        Ok(stale)
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways")
            .field("registry", &self.registry)
            .field("connected", &self.connected.len())
            .finish_non_exhaustive()
    }
}

/// Pool serving fixed in-memory directories.
#[cfg(test)]
pub(crate) fn memory_gateways(directories: Vec<(Cluster, Arc<MemoryDirectory>)>) -> Arc<Gateways> {
    use std::collections::HashMap;

    let registry = Arc::new(ClusterRegistry::new(
        directories.iter().map(|(c, _)| c.clone()).collect(),
    ));
    let by_id: HashMap<ClusterId, Arc<MemoryDirectory>> =
        directories.into_iter().map(|(c, d)| (c.id, d)).collect();
    Arc::new(Gateways::from_fn(registry, move |cluster| {
        by_id
            .get(&cluster.id)
            .map(|d| Arc::clone(d) as Arc<dyn DirectoryGateway>)
            .ok_or_else(|| {
                crate::error::DirectoryError::not_found("Cluster", cluster.id.to_string())
            })
    }))
}
