//! Role commands.

use std::sync::Arc;

use kc_directory::{
    AssignmentCoordinator, ClusterId, PrincipalRef, Role, RoleCache, RoleMappings, RoleScope,
};
use serde::Serialize;
use tabled::Tabled;

use super::{cancel_on_interrupt, Context};
use crate::cli::RolesCommand;
use crate::output::{error, info, output, success, warning};
use crate::{CliError, CliResult};

/// Role representation for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct RoleDisplay {
    /// Role ID.
    pub id: String,
    /// Role name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Whether it's a composite role.
    pub composite: bool,
}

impl From<&Role> for RoleDisplay {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id.clone(),
            name: role.name.clone(),
            description: role.description.clone().unwrap_or_default(),
            composite: role.composite,
        }
    }
}

/// Runs a role command.
pub async fn run_roles(cmd: RolesCommand, ctx: &Context) -> CliResult<()> {
    match cmd {
        RolesCommand::List { cluster, client } => list_roles(ctx, cluster, client.as_deref()).await,
        RolesCommand::Prime { cluster } => prime(ctx, cluster).await,
        RolesCommand::Create {
            cluster,
            client,
            name,
            description,
        } => {
            let role = match description {
                Some(text) => Role::new("", name).with_description(text),
                None => Role::new("", name),
            };
            create_role(ctx, cluster, client.as_deref(), &role).await
        }
        RolesCommand::Mappings {
            cluster,
            user,
            group,
        } => {
            let principal = match (user, group) {
                (Some(user), None) => PrincipalRef::User(user),
                (None, Some(group)) => PrincipalRef::Group(group),
                _ => {
                    return Err(CliError::InvalidArgument(
                        "exactly one of --user or --group is required".to_string(),
                    ))
                }
            };
            show_mappings(ctx, cluster, &principal).await
        }
    }
}

/// One mapped role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct MappingRow {
    /// `realm` or the client key.
    pub scope: String,
    /// Role name.
    pub role: String,
}

/// Flattens mappings to rows, realm roles first.
pub fn mapping_rows(mappings: &RoleMappings) -> Vec<MappingRow> {
    let realm = mappings.realm_roles.iter().map(|name| MappingRow {
        scope: "realm".to_string(),
        role: name.clone(),
    });
    let clients = mappings.client_roles.iter().flat_map(|(key, names)| {
        names.iter().map(move |name| MappingRow {
            scope: key.clone(),
            role: name.clone(),
        })
    });
    realm.chain(clients).collect()
}

/// Creates a role. Client roles go through the coordinator so the cached
/// role list of that client is dropped.
async fn create_role(
    ctx: &Context,
    cluster: ClusterId,
    client: Option<&str>,
    role: &Role,
) -> CliResult<()> {
    match client {
        Some(key) => {
            let cache = Arc::new(RoleCache::new(ctx.gateways.clone(), &ctx.config.settings));
            let coordinator = AssignmentCoordinator::new(ctx.gateways.clone(), cache);
            coordinator.create_client_role(cluster, key, role).await?;
            success(&format!("Created role '{}' on client '{key}'", role.name));
        }
        None => {
            ctx.gateways
                .for_cluster(cluster)?
                .create_role(&RoleScope::Realm, role)
                .await?;
            success(&format!("Created realm role '{}'", role.name));
        }
    }
    Ok(())
}

/// Prints the roles mapped to a principal.
async fn show_mappings(
    ctx: &Context,
    cluster: ClusterId,
    principal: &PrincipalRef,
) -> CliResult<()> {
    let mappings = ctx
        .gateways
        .for_cluster(cluster)?
        .role_mappings(principal)
        .await?;
    if mappings.is_empty() {
        info(&format!("No roles mapped to {principal}"));
        return Ok(());
    }
    output(&mapping_rows(&mappings), ctx.format)
}

/// Lists a client's roles through the cache, or the realm roles.
async fn list_roles(ctx: &Context, cluster: ClusterId, client: Option<&str>) -> CliResult<()> {
    let roles: Vec<RoleDisplay> = match client {
        Some(key) => {
            let cache = RoleCache::new(ctx.gateways.clone(), &ctx.config.settings);
            cache
                .ensure_loaded(cluster, key)
                .await?
                .iter()
                .map(RoleDisplay::from)
                .collect()
        }
        None => ctx
            .gateways
            .for_cluster(cluster)?
            .list_realm_roles()
            .await?
            .iter()
            .map(RoleDisplay::from)
            .collect(),
    };
    output(&roles, ctx.format)
}

/// Loads the roles of every client of a cluster.
async fn prime(ctx: &Context, cluster: ClusterId) -> CliResult<()> {
    let clients = ctx.gateways.for_cluster(cluster)?.list_clients().await?;
    let cache = RoleCache::new(ctx.gateways.clone(), &ctx.config.settings);
    let report = cache
        .bulk_prime(
            cluster,
            clients.into_iter().map(|c| c.client_key),
            &cancel_on_interrupt(),
        )
        .await;

    success(&format!("Loaded roles of {} client(s)", report.loaded.len()));
    for (key, err) in &report.failed {
        error(&format!("{key}: {err}"));
    }
    if !report.skipped.is_empty() {
        warning(&format!("Skipped {} client(s) after cancellation", report.skipped.len()));
        return Err(CliError::Cancelled);
    }
    if !report.failed.is_empty() {
        return Err(CliError::Incomplete(format!(
            "{} client(s) failed to load",
            report.failed.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_rows_list_realm_roles_first() {
        let mut mappings = RoleMappings::default();
        mappings.realm_roles.insert("viewer".to_string());
        mappings
            .client_roles
            .entry("app1".to_string())
            .or_default()
            .extend(["write".to_string(), "read".to_string()]);

        let rows = mapping_rows(&mappings);

        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.scope.as_str(), r.role.as_str()))
            .collect();
        assert_eq!(pairs, vec![("realm", "viewer"), ("app1", "read"), ("app1", "write")]);
    }
}
