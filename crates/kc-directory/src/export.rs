//! Selective export and import, and entity sync between clusters.
//!
//! Listing for selection returns lightweight `{id, displayName}` pairs.
//! Building the payload re-fetches the full entities so the export reflects
//! the cluster at export time rather than at listing time. Exported entities
//! carry no server ids, role mappings or memberships. Import replays a
//! payload entity by entity; a failure is recorded for that entity and the
//! rest of the batch continues.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DirectoryError, DirectoryResult, FailedTarget, PartialFailure};
use crate::gateway::{DirectoryGateway, Gateways};
use crate::model::{Client, ClientRoleMap, ClusterId, EntityType, Group, Role, RoleScope, User};

/// Entity offered for selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCandidate {
    /// Server id.
    pub id: String,
    /// Name shown to the operator.
    pub display_name: String,
}

/// Exported entities of one type.
///
/// Only the fields that make sense on another cluster are kept: server ids
/// are cleared, users lose their role and group memberships, groups their
/// role mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "entities", rename_all = "lowercase")]
pub enum ExportEntities {
    /// Users.
    User(Vec<User>),
    /// Groups.
    Group(Vec<Group>),
    /// Clients.
    Client(Vec<Client>),
    /// Realm roles.
    Role(Vec<Role>),
}

impl ExportEntities {
    /// Entity type of the batch.
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::User(_) => EntityType::User,
            Self::Group(_) => EntityType::Group,
            Self::Client(_) => EntityType::Client,
            Self::Role(_) => EntityType::Role,
        }
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::User(v) => v.len(),
            Self::Group(v) => v.len(),
            Self::Client(v) => v.len(),
            Self::Role(v) => v.len(),
        }
    }

    /// Checks whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interchange document produced by export and consumed by import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    /// Realm the entities were exported from.
    pub realm: String,
    /// Export instant.
    pub exported_at: DateTime<Utc>,
    /// The entities, in source id order.
    #[serde(flatten)]
    pub entities: ExportEntities,
}

impl ExportPayload {
    /// Serializes to pretty JSON.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if serialization fails.
    pub fn to_json(&self) -> DirectoryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a JSON document.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the document is malformed.
    pub fn from_json(json: &str) -> DirectoryResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Per-entity result of a fully successful import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Labels of created entities (`<type>:<name>`).
    pub created: Vec<String>,
    /// Labels of existing entities that were updated.
    pub updated: Vec<String>,
}

enum Applied {
    Created,
    Updated,
}

/// Plans exports and replays imports.
#[derive(Debug)]
pub struct ExportSelectionPlanner {
    gateways: Arc<Gateways>,
}

impl ExportSelectionPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new(gateways: Arc<Gateways>) -> Self {
        Self { gateways }
    }

    /// Lists `{id, displayName}` for every entity of a type.
    ///
    /// ## Errors
    ///
    /// Propagates the gateway error.
    pub async fn list_export_candidates(
        &self,
        cluster_id: ClusterId,
        entity_type: EntityType,
    ) -> DirectoryResult<Vec<ExportCandidate>> {
        let gateway = self.gateways.for_cluster(cluster_id)?;
        let candidate = |id: &str, name: &str| ExportCandidate {
            id: id.to_string(),
            display_name: name.to_string(),
        };
        Ok(match entity_type {
            EntityType::User => gateway
                .list_users()
                .await?
                .iter()
                .map(|u| candidate(&u.id, &u.username))
                .collect(),
            EntityType::Group => gateway
                .list_groups()
                .await?
                .iter()
                .map(|g| candidate(&g.id, &g.name))
                .collect(),
            EntityType::Client => gateway
                .list_clients()
                .await?
                .iter()
                .map(|c| candidate(&c.id, c.name.as_deref().unwrap_or(&c.client_key)))
                .collect(),
            EntityType::Role => gateway
                .list_realm_roles()
                .await?
                .iter()
                .map(|r| candidate(&r.id, &r.name))
                .collect(),
        })
    }

    /// Re-fetches the entities of a type and keeps exactly the selected ids.
    ///
    /// Selected ids that no longer exist are left out.
    ///
    /// ## Errors
    ///
    /// Propagates the gateway error.
    pub async fn build_export_payload(
        &self,
        cluster_id: ClusterId,
        entity_type: EntityType,
        selected_ids: &[String],
    ) -> DirectoryResult<ExportPayload> {
        let cluster = self.gateways.registry().get(cluster_id)?;
        let gateway = self.gateways.for_cluster(cluster_id)?;
        let selected: BTreeSet<&str> = selected_ids.iter().map(String::as_str).collect();

        let entities = match entity_type {
            EntityType::User => ExportEntities::User(select(
                gateway.list_users().await?,
                &selected,
                |u| &u.id,
                portable_user,
            )),
            EntityType::Group => ExportEntities::Group(select(
                gateway.list_groups().await?,
                &selected,
                |g| &g.id,
                portable_group,
            )),
            EntityType::Client => ExportEntities::Client(select(
                gateway.list_clients().await?,
                &selected,
                |c| &c.id,
                portable_client,
            )),
            EntityType::Role => ExportEntities::Role(select(
                gateway.list_realm_roles().await?,
                &selected,
                |r| &r.id,
                portable_role,
            )),
        };

        if entities.len() < selected.len() {
            tracing::warn!(
                cluster = %cluster_id,
                entity = %entity_type,
                selected = selected.len(),
                found = entities.len(),
                "Some selected entities no longer exist"
            );
        }
        tracing::info!(
            cluster = %cluster_id,
            entity = %entity_type,
            count = entities.len(),
            "Export payload built"
        );

        Ok(ExportPayload {
            realm: cluster.realm,
            exported_at: Utc::now(),
            entities,
        })
    }

    /// Replays a payload through create calls, updating entities that
    /// already exist.
    ///
    /// ## Errors
    ///
    /// Returns `Invalid` if the payload holds another entity type, the
    /// gateway lookup error, or `PartialFailure` naming each entity that
    /// could not be created or updated.
    pub async fn apply_import_payload(
        &self,
        cluster_id: ClusterId,
        entity_type: EntityType,
        payload: &ExportPayload,
    ) -> DirectoryResult<ImportReport> {
        if payload.entities.entity_type() != entity_type {
            return Err(DirectoryError::invalid(format!(
                "payload holds {} entities, expected {entity_type}",
                payload.entities.entity_type()
            )));
        }
        let gateway = self.gateways.for_cluster(cluster_id)?;
        let (report, failed) = replay(gateway.as_ref(), cluster_id, &payload.entities).await;

        tracing::info!(
            cluster = %cluster_id,
            entity = %entity_type,
            created = report.created.len(),
            updated = report.updated.len(),
            failed = failed.len(),
            "Import applied"
        );

        if failed.is_empty() {
            Ok(report)
        } else {
            let mut succeeded = report.created;
            succeeded.extend(report.updated);
            Err(DirectoryError::PartialFailure(PartialFailure { succeeded, failed }))
        }
    }

    /// Copies one entity from one cluster to another.
    ///
    /// The entity is found by its natural key: users by username, groups by
    /// path, clients by client key, realm roles by name. It goes through the
    /// export projection and is then created on the destination, or updated
    /// there if it already exists.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` if the source has no such entity, or the error of
    /// the source read or the destination write.
    pub async fn sync_entity(
        &self,
        source: ClusterId,
        destination: ClusterId,
        entity_type: EntityType,
        key: &str,
    ) -> DirectoryResult<ImportReport> {
        let source_gateway = self.gateways.for_cluster(source)?;
        let destination_gateway = self.gateways.for_cluster(destination)?;

        let entities = match entity_type {
            EntityType::User => {
                let users = source_gateway.list_users().await?;
                let user = find_one(users, key, |u| &u.username, "User")?;
                ExportEntities::User(vec![portable_user(user)])
            }
            EntityType::Group => {
                let groups = source_gateway.list_groups().await?;
                let group = find_one(groups, key, |g| &g.path, "Group")?;
                ExportEntities::Group(vec![portable_group(group)])
            }
            EntityType::Client => {
                let clients = source_gateway.list_clients().await?;
                let client = find_one(clients, key, |c| &c.client_key, "Client")?;
                ExportEntities::Client(vec![portable_client(client)])
            }
            EntityType::Role => {
                let roles = source_gateway.list_realm_roles().await?;
                let role = find_one(roles, key, |r| &r.name, "Role")?;
                ExportEntities::Role(vec![portable_role(role)])
            }
        };

        let (report, failed) = replay(destination_gateway.as_ref(), destination, &entities).await;
        if let Some(failure) = failed.into_iter().next() {
            return Err(failure.error);
        }
        tracing::info!(%source, %destination, entity = %entity_type, key, "Entity synced");
        Ok(report)
    }

    /// Exports a whole realm representation.
    ///
    /// ## Errors
    ///
    /// Propagates the gateway error.
    pub async fn export_realm(&self, cluster_id: ClusterId) -> DirectoryResult<Value> {
        self.gateways.for_cluster(cluster_id)?.export_realm().await
    }

    /// Imports a whole realm representation as a new realm.
    ///
    /// ## Errors
    ///
    /// Propagates the gateway error (`Conflict` if the realm exists).
    pub async fn import_realm(
        &self,
        cluster_id: ClusterId,
        payload: &Value,
    ) -> DirectoryResult<()> {
        self.gateways
            .for_cluster(cluster_id)?
            .import_realm(payload)
            .await
    }
}

fn select<T>(
    entities: Vec<T>,
    selected: &BTreeSet<&str>,
    id: impl Fn(&T) -> &String,
    project: impl Fn(T) -> T,
) -> Vec<T> {
    let mut kept: Vec<T> = entities
        .into_iter()
        .filter(|e| selected.contains(id(e).as_str()))
        .collect();
    kept.sort_by(|a, b| id(a).cmp(id(b)));
    kept.into_iter().map(project).collect()
}

fn find_one<T>(
    entities: Vec<T>,
    key: &str,
    natural_key: impl Fn(&T) -> &String,
    entity_type: &'static str,
) -> DirectoryResult<T> {
    entities
        .into_iter()
        .find(|e| natural_key(e) == key)
        .ok_or_else(|| DirectoryError::not_found(entity_type, key))
}

fn portable_user(user: User) -> User {
    User {
        id: String::new(),
        realm_roles: BTreeSet::new(),
        client_roles: ClientRoleMap::new(),
        groups: BTreeSet::new(),
        ..user
    }
}

fn portable_group(group: Group) -> Group {
    Group {
        id: String::new(),
        realm_roles: BTreeSet::new(),
        client_roles: ClientRoleMap::new(),
        ..group
    }
}

fn portable_client(client: Client) -> Client {
    Client {
        id: String::new(),
        ..client
    }
}

fn portable_role(role: Role) -> Role {
    Role {
        id: String::new(),
        ..role
    }
}

/// Creates or updates each entity; returns what was applied and what failed.
async fn replay(
    gateway: &dyn DirectoryGateway,
    cluster_id: ClusterId,
    entities: &ExportEntities,
) -> (ImportReport, Vec<FailedTarget>) {
    let mut report = ImportReport::default();
    let mut failed = Vec::new();
    let mut record = |label: String, result: DirectoryResult<Applied>| match result {
        Ok(Applied::Created) => report.created.push(label),
        Ok(Applied::Updated) => report.updated.push(label),
        Err(error) => {
            tracing::warn!(cluster = %cluster_id, entity = %label, error = %error, "Import failed");
            failed.push(FailedTarget {
                target: label,
                error,
            });
        }
    };

    match entities {
        ExportEntities::User(users) => {
            for user in users {
                record(format!("user:{}", user.username), import_user(gateway, user).await);
            }
        }
        ExportEntities::Group(groups) => {
            for group in groups {
                record(format!("group:{}", group.name), import_group(gateway, group).await);
            }
        }
        ExportEntities::Client(clients) => {
            for client in clients {
                record(
                    format!("client:{}", client.client_key),
                    import_client(gateway, client).await,
                );
            }
        }
        ExportEntities::Role(roles) => {
            for role in roles {
                record(format!("role:{}", role.name), import_role(gateway, role).await);
            }
        }
    }
    (report, failed)
}

async fn import_user(gateway: &dyn DirectoryGateway, user: &User) -> DirectoryResult<Applied> {
    let user = &User {
        id: String::new(),
        ..user.clone()
    };
    match gateway.create_user(user).await {
        Ok(_) => Ok(Applied::Created),
        Err(err) if err.is_conflict() => {
            let existing = gateway
                .list_users()
                .await?
                .into_iter()
                .find(|u| u.username == user.username)
                .ok_or(err)?;
            gateway.update_user(&existing.id, user).await?;
            Ok(Applied::Updated)
        }
        Err(err) => Err(err),
    }
}

async fn import_group(gateway: &dyn DirectoryGateway, group: &Group) -> DirectoryResult<Applied> {
    let group = &Group {
        id: String::new(),
        ..group.clone()
    };
    match gateway.create_group(group).await {
        Ok(_) => Ok(Applied::Created),
        Err(err) if err.is_conflict() => {
            let existing = gateway
                .list_groups()
                .await?
                .into_iter()
                .find(|g| g.name == group.name)
                .ok_or(err)?;
            gateway.update_group(&existing.id, group).await?;
            Ok(Applied::Updated)
        }
        Err(err) => Err(err),
    }
}

async fn import_client(
    gateway: &dyn DirectoryGateway,
    client: &Client,
) -> DirectoryResult<Applied> {
    let client = &portable_client(client.clone());
    match gateway.create_client(client).await {
        Ok(_) => Ok(Applied::Created),
        Err(err) if err.is_conflict() => {
            let existing = gateway
                .list_clients()
                .await?
                .into_iter()
                .find(|c| c.client_key == client.client_key)
                .ok_or(err)?;
            gateway.update_client(&existing.id, client).await?;
            Ok(Applied::Updated)
        }
        Err(err) => Err(err),
    }
}

async fn import_role(gateway: &dyn DirectoryGateway, role: &Role) -> DirectoryResult<Applied> {
    let role = &portable_role(role.clone());
    match gateway.create_role(&RoleScope::Realm, role).await {
        Ok(()) => Ok(Applied::Created),
        Err(err) if err.is_conflict() => {
            gateway
                .update_role(&RoleScope::Realm, &role.name, role)
                .await?;
            Ok(Applied::Updated)
        }
        Err(err) => Err(err),
    }
}
