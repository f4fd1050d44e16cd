//! Role assignment command.

use std::collections::BTreeSet;
use std::sync::Arc;

use kc_directory::{AssignmentCoordinator, AssignmentRequest, PrincipalRef, RoleCache};

use super::{cancel_on_interrupt, report, Context};
use crate::cli::AssignArgs;
use crate::output::{info, success};
use crate::{CliError, CliResult};

/// Builds the request described by the arguments.
pub fn build_request(args: &AssignArgs) -> CliResult<AssignmentRequest> {
    let principal = match (&args.user, &args.group) {
        (Some(user), None) => PrincipalRef::User(user.clone()),
        (None, Some(group)) => PrincipalRef::Group(group.clone()),
        _ => {
            return Err(CliError::InvalidArgument(
                "exactly one of --user or --group is required".to_string(),
            ))
        }
    };

    let mut request = AssignmentRequest::new(args.cluster, principal);
    for name in &args.realm_roles {
        request.add_realm_role(name.clone());
    }
    for (key, name) in &args.client_roles {
        request.add_client_role(key.clone(), name.clone());
    }
    Ok(request)
}

/// Runs an assignment.
pub async fn run_assign(args: AssignArgs, ctx: &Context) -> CliResult<()> {
    let request = build_request(&args)?;
    if request.is_empty() {
        info("Nothing to assign.");
        return Ok(());
    }

    let cancel = cancel_on_interrupt();
    let cache = Arc::new(RoleCache::new(ctx.gateways.clone(), &ctx.config.settings));

    // Loaded roles let the coordinator reject unknown names without a call.
    let keys: BTreeSet<String> = args.client_roles.iter().map(|(k, _)| k.clone()).collect();
    cache.bulk_prime(args.cluster, keys, &cancel).await;

    let coordinator = AssignmentCoordinator::new(ctx.gateways.clone(), cache);
    let outcome = coordinator.assign(&request, &cancel).await.map_err(report)?;

    for target in &outcome.succeeded {
        success(&format!("Assigned {target} roles to {}", request.principal()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kc_directory::{ClusterId, RoleScope};

    #[test]
    fn groups_client_roles_by_key() {
        let args = AssignArgs {
            cluster: ClusterId(3),
            user: None,
            group: Some("g1".to_string()),
            realm_roles: vec!["viewer".to_string()],
            client_roles: vec![
                ("app2".to_string(), "admin".to_string()),
                ("app1".to_string(), "read".to_string()),
                ("app1".to_string(), "write".to_string()),
            ],
        };

        let request = build_request(&args).unwrap();
        assert_eq!(request.principal(), &PrincipalRef::Group("g1".to_string()));

        let targets = request.targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], (RoleScope::Realm, vec!["viewer".to_string()]));
        assert_eq!(
            targets[1],
            (
                RoleScope::Client("app1".to_string()),
                vec!["read".to_string(), "write".to_string()]
            )
        );
    }
}
