//! Entity comparison between two clusters.
//!
//! Roles and clients are matched by name and client key, groups by path and
//! users by username. Multi-valued attributes compare as sets, so a
//! reordered redirect URI list is not a difference. Role mappings and
//! memberships are read through the dedicated gateway calls rather than the
//! list representations, which carry none over HTTP.

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::error::{DirectoryError, DirectoryResult};
use crate::gateway::{DirectoryGateway, Gateways};
use crate::model::{Client, ClusterId, Group, PrincipalRef, Role, RoleMappings, User};

/// Per-entity reads in flight per cluster while loading a comparison.
const FETCH_PARALLELISM: usize = 8;

/// One difference between a source and a destination entity set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Difference {
    /// Present in the source only.
    MissingInDestination {
        /// Natural key of the entity.
        name: String,
    },
    /// Present in the destination only.
    MissingInSource {
        /// Natural key of the entity.
        name: String,
    },
    /// Present in both with differing attributes.
    DifferentConfig {
        /// Natural key of the entity.
        name: String,
        /// Attributes that differ.
        fields: Vec<&'static str>,
    },
}

impl Difference {
    /// Entity the difference is about.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::MissingInDestination { name }
            | Self::MissingInSource { name }
            | Self::DifferentConfig { name, .. } => name,
        }
    }
}

/// Matches two entity lists by key.
///
/// Source entities come first in source order, then destination-only
/// entities in destination order.
fn diff_by<T>(
    source: &[T],
    destination: &[T],
    key: impl Fn(&T) -> &str,
    compare: impl Fn(&T, &T) -> Vec<&'static str>,
) -> Vec<Difference> {
    let mut differences = Vec::new();

    for entity in source {
        match destination.iter().find(|d| key(*d) == key(entity)) {
            None => differences.push(Difference::MissingInDestination {
                name: key(entity).to_string(),
            }),
            Some(other) => {
                let fields = compare(entity, other);
                if !fields.is_empty() {
                    differences.push(Difference::DifferentConfig {
                        name: key(entity).to_string(),
                        fields,
                    });
                }
            }
        }
    }

    differences.extend(
        destination
            .iter()
            .filter(|d| !source.iter().any(|s| key(s) == key(*d)))
            .map(|d| Difference::MissingInSource {
                name: key(d).to_string(),
            }),
    );
    differences
}

/// Collects the names of the fields whose values differ.
struct Fields(Vec<&'static str>);

impl Fields {
    fn check<V: PartialEq + ?Sized>(&mut self, name: &'static str, a: &V, b: &V) -> &mut Self {
        if a != b {
            self.0.push(name);
        }
        self
    }
}

fn set_of(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Compares two role lists by name.
#[must_use]
pub fn diff_roles(source: &[Role], destination: &[Role]) -> Vec<Difference> {
    diff_by(source, destination, |r| r.name.as_str(), |a, b| {
        let mut fields = Fields(Vec::new());
        fields
            .check(
                "description",
                a.description.as_deref().unwrap_or_default(),
                b.description.as_deref().unwrap_or_default(),
            )
            .check("composite", &a.composite, &b.composite);
        fields.0
    })
}

/// Fetches and compares the realm roles of two clusters.
///
/// ## Errors
///
/// Propagates the gateway error of either cluster.
pub async fn diff_realm_roles(
    gateways: &Gateways,
    source: ClusterId,
    destination: ClusterId,
) -> DirectoryResult<Vec<Difference>> {
    let source_gateway = gateways.for_cluster(source)?;
    let destination_gateway = gateways.for_cluster(destination)?;
    let (source_roles, destination_roles) = futures::try_join!(
        source_gateway.list_realm_roles(),
        destination_gateway.list_realm_roles()
    )?;

    let differences = diff_roles(&source_roles, &destination_roles);
    tracing::info!(
        %source,
        %destination,
        differences = differences.len(),
        "Realm roles compared"
    );
    Ok(differences)
}

/// A client with the names of its roles.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Client representation.
    pub client: Client,
    /// Client role names.
    pub roles: BTreeSet<String>,
}

/// A group with its role mappings.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    /// Group representation.
    pub group: Group,
    /// Realm and client roles mapped to the group.
    pub mappings: RoleMappings,
}

/// A user with role mappings and group paths.
#[derive(Debug, Clone)]
pub struct UserSnapshot {
    /// User representation.
    pub user: User,
    /// Realm and client roles mapped to the user.
    pub mappings: RoleMappings,
    /// Paths of the groups the user belongs to.
    pub groups: BTreeSet<String>,
}

/// Compares two client lists by client key.
///
/// `publicClient` and `bearerOnly` together are reported as `accessType`.
#[must_use]
pub fn diff_client_snapshots(
    source: &[ClientSnapshot],
    destination: &[ClientSnapshot],
) -> Vec<Difference> {
    diff_by(source, destination, |s| s.client.client_key.as_str(), |a, b| {
        let (x, y) = (&a.client, &b.client);
        let mut fields = Fields(Vec::new());
        fields
            .check("enabled", &x.enabled, &y.enabled)
            .check("protocol", &x.protocol, &y.protocol)
            .check("redirectUris", &set_of(&x.redirect_uris), &set_of(&y.redirect_uris))
            .check("webOrigins", &set_of(&x.web_origins), &set_of(&y.web_origins))
            .check(
                "accessType",
                &(x.public_client, x.bearer_only),
                &(y.public_client, y.bearer_only),
            )
            .check(
                "directAccessGrantsEnabled",
                &x.direct_access_grants_enabled,
                &y.direct_access_grants_enabled,
            )
            .check(
                "serviceAccountsEnabled",
                &x.service_accounts_enabled,
                &y.service_accounts_enabled,
            )
            .check(
                "defaultClientScopes",
                &set_of(&x.default_client_scopes),
                &set_of(&y.default_client_scopes),
            )
            .check(
                "optionalClientScopes",
                &set_of(&x.optional_client_scopes),
                &set_of(&y.optional_client_scopes),
            )
            .check("roles", &a.roles, &b.roles);
        fields.0
    })
}

/// Compares two group lists by path.
#[must_use]
pub fn diff_group_snapshots(
    source: &[GroupSnapshot],
    destination: &[GroupSnapshot],
) -> Vec<Difference> {
    diff_by(source, destination, |s| s.group.path.as_str(), |a, b| {
        let mut fields = Fields(Vec::new());
        fields
            .check("realmRoles", &a.mappings.realm_roles, &b.mappings.realm_roles)
            .check("clientRoles", &a.mappings.client_roles, &b.mappings.client_roles)
            .check("attributes", &a.group.attributes, &b.group.attributes);
        fields.0
    })
}

/// Compares two user lists by username.
#[must_use]
pub fn diff_user_snapshots(
    source: &[UserSnapshot],
    destination: &[UserSnapshot],
) -> Vec<Difference> {
    diff_by(source, destination, |s| s.user.username.as_str(), |a, b| {
        let (x, y) = (&a.user, &b.user);
        let mut fields = Fields(Vec::new());
        fields
            .check("enabled", &x.enabled, &y.enabled)
            .check("email", &x.email, &y.email)
            .check("realmRoles", &a.mappings.realm_roles, &b.mappings.realm_roles)
            .check("clientRoles", &a.mappings.client_roles, &b.mappings.client_roles)
            .check("groups", &a.groups, &b.groups)
            .check("attributes", &x.attributes, &y.attributes)
            .check(
                "requiredActions",
                &set_of(&x.required_actions),
                &set_of(&y.required_actions),
            );
        fields.0
    })
}

async fn load_clients(gateway: &dyn DirectoryGateway) -> DirectoryResult<Vec<ClientSnapshot>> {
    let clients = gateway.list_clients().await?;
    stream::iter(clients)
        .map(|client| async move {
            let roles = gateway.list_client_roles(&client.client_key).await?;
            Ok::<_, DirectoryError>(ClientSnapshot {
                roles: roles.into_iter().map(|r| r.name).collect(),
                client,
            })
        })
        .buffered(FETCH_PARALLELISM)
        .try_collect()
        .await
}

async fn load_groups(gateway: &dyn DirectoryGateway) -> DirectoryResult<Vec<GroupSnapshot>> {
    let groups = gateway.list_groups().await?;
    stream::iter(groups)
        .map(|group| async move {
            let principal = PrincipalRef::Group(group.id.clone());
            let mappings = gateway.role_mappings(&principal).await?;
            Ok::<_, DirectoryError>(GroupSnapshot { group, mappings })
        })
        .buffered(FETCH_PARALLELISM)
        .try_collect()
        .await
}

async fn load_users(gateway: &dyn DirectoryGateway) -> DirectoryResult<Vec<UserSnapshot>> {
    let users = gateway.list_users().await?;
    stream::iter(users)
        .map(|user| async move {
            let principal = PrincipalRef::User(user.id.clone());
            let (mappings, groups) = futures::try_join!(
                gateway.role_mappings(&principal),
                gateway.user_groups(&user.id)
            )?;
            Ok::<_, DirectoryError>(UserSnapshot {
                user,
                mappings,
                groups,
            })
        })
        .buffered(FETCH_PARALLELISM)
        .try_collect()
        .await
}

/// Fetches and compares the clients of two clusters, roles included.
///
/// ## Errors
///
/// Propagates the gateway error of either cluster.
pub async fn diff_clients(
    gateways: &Gateways,
    source: ClusterId,
    destination: ClusterId,
) -> DirectoryResult<Vec<Difference>> {
    let source_gateway = gateways.for_cluster(source)?;
    let destination_gateway = gateways.for_cluster(destination)?;
    let (a, b) = futures::try_join!(
        load_clients(source_gateway.as_ref()),
        load_clients(destination_gateway.as_ref())
    )?;

    let differences = diff_client_snapshots(&a, &b);
    tracing::info!(%source, %destination, differences = differences.len(), "Clients compared");
    Ok(differences)
}

/// Fetches and compares the groups of two clusters, role mappings included.
///
/// ## Errors
///
/// Propagates the gateway error of either cluster.
pub async fn diff_groups(
    gateways: &Gateways,
    source: ClusterId,
    destination: ClusterId,
) -> DirectoryResult<Vec<Difference>> {
    let source_gateway = gateways.for_cluster(source)?;
    let destination_gateway = gateways.for_cluster(destination)?;
    let (a, b) = futures::try_join!(
        load_groups(source_gateway.as_ref()),
        load_groups(destination_gateway.as_ref())
    )?;

    let differences = diff_group_snapshots(&a, &b);
    tracing::info!(%source, %destination, differences = differences.len(), "Groups compared");
    Ok(differences)
}

/// Fetches and compares the users of two clusters.
///
/// Reads the role mappings and group memberships of every user, so this
/// is meant for realms of modest size.
///
/// ## Errors
///
/// Propagates the gateway error of either cluster.
pub async fn diff_users(
    gateways: &Gateways,
    source: ClusterId,
    destination: ClusterId,
) -> DirectoryResult<Vec<Difference>> {
    let source_gateway = gateways.for_cluster(source)?;
    let destination_gateway = gateways.for_cluster(destination)?;
    let (a, b) = futures::try_join!(
        load_users(source_gateway.as_ref()),
        load_users(destination_gateway.as_ref())
    )?;

    let differences = diff_user_snapshots(&a, &b);
    tracing::info!(%source, %destination, differences = differences.len(), "Users compared");
    Ok(differences)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cluster::test_cluster;
    use crate::gateway::{memory_gateways, MemoryDirectory};

    fn two_clusters() -> (Arc<Gateways>, Arc<MemoryDirectory>, Arc<MemoryDirectory>) {
        let src = Arc::new(MemoryDirectory::new());
        let dst = Arc::new(MemoryDirectory::new());
        let gateways = memory_gateways(vec![
            (test_cluster(1, "src"), Arc::clone(&src)),
            (test_cluster(2, "dst"), Arc::clone(&dst)),
        ]);
        (gateways, src, dst)
    }

    #[test]
    fn reports_each_kind_in_order() {
        let source = vec![
            Role::new("1", "viewer"),
            Role::new("2", "editor").with_description("Edits things"),
            Role::new("3", "auditor"),
        ];
        let mut admin = Role::new("9", "editor");
        admin.composite = true;
        let destination = vec![Role::new("7", "owner"), admin, Role::new("8", "viewer")];

        let diff = diff_roles(&source, &destination);

        assert_eq!(
            diff,
            vec![
                Difference::DifferentConfig {
                    name: "editor".to_string(),
                    fields: vec!["description", "composite"],
                },
                Difference::MissingInDestination {
                    name: "auditor".to_string()
                },
                Difference::MissingInSource {
                    name: "owner".to_string()
                },
            ]
        );
    }

    #[test]
    fn empty_description_equals_none() {
        let a = vec![Role::new("1", "viewer").with_description("")];
        let b = vec![Role::new("2", "viewer")];
        assert!(diff_roles(&a, &b).is_empty());
    }

    #[tokio::test]
    async fn compares_clusters() {
        let (gateways, src, dst) = two_clusters();
        src.seed_realm_roles(&["viewer", "editor"]);
        dst.seed_realm_roles(&["viewer"]);

        let diff = diff_realm_roles(&gateways, ClusterId(1), ClusterId(2)).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].name(), "editor");

        let err = diff_realm_roles(&gateways, ClusterId(1), ClusterId(5)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn clients_compare_uris_as_sets() {
        let (gateways, src, dst) = two_clusters();
        let mut app = Client::new("app1");
        app.redirect_uris = vec!["https://a/*".to_string(), "https://b/*".to_string()];
        let mut reordered = app.clone();
        reordered.redirect_uris.reverse();
        src.seed_client(app.clone(), &["read"]);
        dst.seed_client(reordered, &["read"]);

        let mut spa = Client::new("spa");
        spa.public_client = true;
        src.seed_client(spa.clone(), &["read", "write"]);
        spa.public_client = false;
        spa.default_client_scopes = vec!["profile".to_string()];
        dst.seed_client(spa, &["read"]);

        let diff = diff_clients(&gateways, ClusterId(1), ClusterId(2)).await.unwrap();

        assert_eq!(
            diff,
            vec![Difference::DifferentConfig {
                name: "spa".to_string(),
                fields: vec!["accessType", "defaultClientScopes", "roles"],
            }]
        );
        assert_eq!(src.calls("list_client_roles"), 2);
    }

    #[tokio::test]
    async fn groups_compare_mappings_by_path() {
        let (gateways, src, dst) = two_clusters();
        let mut ops = Group {
            name: "ops".to_string(),
            ..Group::default()
        };
        ops.realm_roles.insert("viewer".to_string());
        src.seed_group(ops.clone());
        ops.realm_roles.insert("editor".to_string());
        dst.seed_group(ops);
        src.seed_group(Group {
            name: "dev".to_string(),
            ..Group::default()
        });

        let diff = diff_groups(&gateways, ClusterId(1), ClusterId(2)).await.unwrap();

        assert_eq!(
            diff,
            vec![
                Difference::DifferentConfig {
                    name: "/ops".to_string(),
                    fields: vec!["realmRoles"],
                },
                Difference::MissingInDestination {
                    name: "/dev".to_string()
                },
            ]
        );
        assert_eq!(src.calls("role_mappings"), 2);
    }

    #[tokio::test]
    async fn users_compare_memberships_and_attributes() {
        let (gateways, src, dst) = two_clusters();
        let mut alice = User {
            username: "alice".to_string(),
            enabled: true,
            ..User::default()
        };
        alice.groups.insert("/ops".to_string());
        alice
            .attributes
            .insert("team".to_string(), vec!["blue".to_string()]);
        src.seed_user(alice.clone());
        alice.groups.clear();
        alice
            .attributes
            .insert("team".to_string(), vec!["red".to_string()]);
        dst.seed_user(alice);
        dst.seed_user(User {
            username: "bob".to_string(),
            ..User::default()
        });

        let diff = diff_users(&gateways, ClusterId(1), ClusterId(2)).await.unwrap();

        assert_eq!(
            diff,
            vec![
                Difference::DifferentConfig {
                    name: "alice".to_string(),
                    fields: vec!["groups", "attributes"],
                },
                Difference::MissingInSource {
                    name: "bob".to_string()
                },
            ]
        );
        assert_eq!(dst.calls("user_groups"), 2);
    }

    #[tokio::test]
    async fn unreachable_side_fails_the_comparison() {
        let (gateways, src, dst) = two_clusters();
        src.seed_user(User {
            username: "alice".to_string(),
            ..User::default()
        });
        dst.set_unreachable(true);

        let err = diff_users(&gateways, ClusterId(1), ClusterId(2)).await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
