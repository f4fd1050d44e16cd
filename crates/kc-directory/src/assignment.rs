//! Role assignment.
//!
//! An [`AssignmentRequest`] holds the desired realm and client role sets of
//! one principal. [`AssignmentCoordinator::assign`] submits the full
//! desired set (the remote side is idempotent-additive, so nothing is ever
//! revoked) as one call per non-empty scope, in parallel, and reports each
//! scope's outcome separately.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::cache::{CacheEntry, RoleCache};
use crate::cancel::CancellationToken;
use crate::error::{DirectoryError, DirectoryResult, FailedTarget, PartialFailure};
use crate::gateway::{DirectoryGateway, Gateways};
use crate::model::{
    ClientRoleMap, ClusterId, PrincipalRef, Role, RoleBearer, RoleMappings, RoleScope,
};

/// Desired role state of one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentRequest {
    cluster_id: ClusterId,
    principal: PrincipalRef,
    realm_role_names: BTreeSet<String>,
    client_role_names: ClientRoleMap,
}

impl AssignmentRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new(cluster_id: ClusterId, principal: PrincipalRef) -> Self {
        Self {
            cluster_id,
            principal,
            realm_role_names: BTreeSet::new(),
            client_role_names: ClientRoleMap::new(),
        }
    }

    /// Creates a request seeded with a principal's current mappings.
    #[must_use]
    pub fn from_mappings(
        cluster_id: ClusterId,
        principal: PrincipalRef,
        mappings: RoleMappings,
    ) -> Self {
        let mut request = Self::new(cluster_id, principal);
        request.realm_role_names = mappings.realm_roles;
        request.client_role_names = mappings
            .client_roles
            .into_iter()
            .filter(|(_, names)| !names.is_empty())
            .collect();
        request
    }

    /// Creates a request seeded with the roles a representation carries.
    ///
    /// Listed users and groups carry no mappings when they come from a
    /// remote cluster; use [`AssignmentCoordinator::load_draft`] there.
    #[must_use]
    pub fn from_principal(cluster_id: ClusterId, principal: &impl RoleBearer) -> Self {
        Self::from_mappings(cluster_id, principal.principal_ref(), RoleMappings::of(principal))
    }

    /// Target cluster.
    #[must_use]
    pub const fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Target principal.
    #[must_use]
    pub const fn principal(&self) -> &PrincipalRef {
        &self.principal
    }

    /// Desired realm roles.
    #[must_use]
    pub const fn realm_role_names(&self) -> &BTreeSet<String> {
        &self.realm_role_names
    }

    /// Desired client roles. Never contains an empty set.
    #[must_use]
    pub const fn client_role_names(&self) -> &ClientRoleMap {
        &self.client_role_names
    }

    /// Adds a realm role. Returns `false` if it was already present.
    pub fn add_realm_role(&mut self, name: impl Into<String>) -> bool {
        self.realm_role_names.insert(name.into())
    }

    /// Removes a realm role from the request.
    pub fn remove_realm_role(&mut self, name: &str) -> bool {
        self.realm_role_names.remove(name)
    }

    /// Adds a client role. Returns `false` if it was already present.
    pub fn add_client_role(
        &mut self,
        client_key: impl Into<String>,
        name: impl Into<String>,
    ) -> bool {
        self.client_role_names
            .entry(client_key.into())
            .or_default()
            .insert(name.into())
    }

    /// Removes a client role from the request.
    pub fn remove_client_role(&mut self, client_key: &str, name: &str) -> bool {
        let Some(names) = self.client_role_names.get_mut(client_key) else {
            return false;
        };
        let removed = names.remove(name);
        if names.is_empty() {
            self.client_role_names.remove(client_key);
        }
        removed
    }

    /// Checks whether the request would issue no call.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.realm_role_names.is_empty() && self.client_role_names.is_empty()
    }

    /// Scopes that will be submitted, realm first, then clients by key.
    #[must_use]
    pub fn targets(&self) -> Vec<(RoleScope, Vec<String>)> {
        let realm = (!self.realm_role_names.is_empty()).then(|| {
            (
                RoleScope::Realm,
                self.realm_role_names.iter().cloned().collect::<Vec<_>>(),
            )
        });
        let clients = self
            .client_role_names
            .iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(key, names)| {
                (
                    RoleScope::Client(key.clone()),
                    names.iter().cloned().collect::<Vec<_>>(),
                )
            });
        realm.into_iter().chain(clients).collect()
    }
}

/// Result of a fully successful assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentOutcome {
    /// Scope labels that were submitted (`realm`, `client:<key>`).
    pub succeeded: Vec<String>,
}

impl AssignmentOutcome {
    /// Whether the caller should reload the principal's role view.
    #[must_use]
    pub fn refresh_principal(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Whether an assignment result changed anything on the remote side, in
/// which case the principal's role view is stale.
#[must_use]
pub fn needs_refresh(result: &DirectoryResult<AssignmentOutcome>) -> bool {
    match result {
        Ok(outcome) => outcome.refresh_principal(),
        Err(DirectoryError::PartialFailure(failure)) => !failure.succeeded.is_empty(),
        Err(_) => false,
    }
}

/// Submits assignment requests.
#[derive(Debug)]
pub struct AssignmentCoordinator {
    gateways: Arc<Gateways>,
    cache: Arc<RoleCache>,
}

impl AssignmentCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(gateways: Arc<Gateways>, cache: Arc<RoleCache>) -> Self {
        Self { gateways, cache }
    }

    /// Builds a request seeded with the roles the principal holds on the
    /// cluster right now.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the principal does not exist, or the gateway
    /// error.
    pub async fn load_draft(
        &self,
        cluster_id: ClusterId,
        principal: PrincipalRef,
    ) -> DirectoryResult<AssignmentRequest> {
        let mappings = self
            .gateways
            .for_cluster(cluster_id)?
            .role_mappings(&principal)
            .await?;
        tracing::debug!(
            cluster = %cluster_id,
            principal = %principal,
            realm = mappings.realm_roles.len(),
            clients = mappings.client_roles.len(),
            "Role mappings loaded"
        );
        Ok(AssignmentRequest::from_mappings(cluster_id, principal, mappings))
    }

    /// Creates a role under a client and invalidates that client's cached
    /// roles.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the client does not exist, `Conflict` if the
    /// name is taken, or the gateway error.
    pub async fn create_client_role(
        &self,
        cluster_id: ClusterId,
        client_key: &str,
        role: &Role,
    ) -> DirectoryResult<()> {
        let gateway = self.gateways.for_cluster(cluster_id)?;
        gateway
            .create_role(&RoleScope::Client(client_key.to_string()), role)
            .await?;
        self.cache.invalidate(cluster_id, client_key);
        tracing::info!(
            cluster = %cluster_id,
            client = client_key,
            role = %role.name,
            "Client role created"
        );
        Ok(())
    }

    /// Submits a request.
    ///
    /// Client role names are checked against the role cache when that
    /// client's roles are already loaded; an unknown name fails its scope
    /// without a remote call.
    ///
    /// ## Errors
    ///
    /// Returns `Cancelled` if cancelled before anything was issued, the
    /// gateway lookup error, or `PartialFailure` listing every scope that
    /// failed alongside those that succeeded.
    pub async fn assign(
        &self,
        request: &AssignmentRequest,
        cancel: &CancellationToken,
    ) -> DirectoryResult<AssignmentOutcome> {
        let targets = request.targets();
        if targets.is_empty() {
            return Ok(AssignmentOutcome::default());
        }
        crate::cancel::check(cancel)?;

        let gateway = self.gateways.for_cluster(request.cluster_id)?;
        let results = join_all(targets.iter().map(|(scope, names)| {
            self.submit(
                gateway.as_ref(),
                request.cluster_id,
                &request.principal,
                scope,
                names,
                cancel,
            )
        }))
        .await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for ((scope, _), result) in targets.iter().zip(results) {
            match result {
                Ok(()) => succeeded.push(scope.label()),
                Err(error) => {
                    tracing::warn!(
                        cluster = %request.cluster_id,
                        principal = %request.principal,
                        target = %scope.label(),
                        error = %error,
                        "Role assignment failed"
                    );
                    failed.push(FailedTarget {
                        target: scope.label(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            cluster = %request.cluster_id,
            principal = %request.principal,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "Role assignment submitted"
        );

        if failed.is_empty() {
            Ok(AssignmentOutcome { succeeded })
        } else {
            Err(DirectoryError::PartialFailure(PartialFailure { succeeded, failed }))
        }
    }

    async fn submit(
        &self,
        gateway: &dyn DirectoryGateway,
        cluster_id: ClusterId,
        principal: &PrincipalRef,
        scope: &RoleScope,
        names: &[String],
        cancel: &CancellationToken,
    ) -> DirectoryResult<()> {
        crate::cancel::check(cancel)?;
        match scope {
            RoleScope::Realm => gateway.assign_realm_roles(principal, names).await,
            RoleScope::Client(key) => {
                if let CacheEntry::Loaded(known) = self.cache.get(cluster_id, key) {
                    if let Some(missing) =
                        names.iter().find(|n| !known.iter().any(|r| &r.name == *n))
                    {
                        return Err(DirectoryError::not_found("Role", missing.clone()));
                    }
                }
                gateway.assign_client_roles(principal, key, names).await
            }
        }
    }
}
