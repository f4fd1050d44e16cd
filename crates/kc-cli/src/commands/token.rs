//! Token commands.

use chrono::Utc;
use kc_directory::{inspect_token, ClusterId, Grant};

use super::Context;
use crate::cli::TokenCommand;
use crate::config::OutputFormat;
use crate::output::{error, info, output_single};
use crate::{CliError, CliResult};

/// Runs a token command.
pub async fn run_token(cmd: TokenCommand, ctx: &Context) -> CliResult<()> {
    match cmd {
        TokenCommand::Get {
            cluster,
            password,
            client_credentials,
            secret,
            client_id,
        } => {
            let grant = build_grant(password, client_credentials, secret, client_id)?;
            get_token(ctx, cluster, &grant).await
        }
        TokenCommand::Inspect { token } => inspect(&token, ctx.format),
    }
}

/// Builds the grant named by the arguments.
pub fn build_grant(
    password: Option<String>,
    client_credentials: Option<String>,
    secret: String,
    client_id: Option<String>,
) -> CliResult<Grant> {
    match (password, client_credentials) {
        (Some(username), None) => Ok(Grant::Password {
            client_id,
            username,
            password: secret,
        }),
        (None, Some(client_id)) => Ok(Grant::ClientCredentials {
            client_id,
            client_secret: secret,
        }),
        _ => Err(CliError::InvalidArgument(
            "exactly one of --password or --client-credentials is required".to_string(),
        )),
    }
}

async fn get_token(ctx: &Context, cluster: ClusterId, grant: &Grant) -> CliResult<()> {
    let token = ctx.gateways.for_cluster(cluster)?.get_token(grant).await?;
    match ctx.format {
        OutputFormat::Json => output_single(&token, ctx.format),
        OutputFormat::Table => {
            println!("{}", token.access_token);
            info(&format!("{} token, expires in {}s", token.token_type, token.expires_in));
            Ok(())
        }
    }
}

fn inspect(token: &str, format: OutputFormat) -> CliResult<()> {
    let inspection = inspect_token(token, Utc::now())?;
    if format == OutputFormat::Json {
        return output_single(&inspection, format);
    }

    println!("=== Header ===");
    output_single(&inspection.header, format)?;
    println!("\n=== Payload ===");
    output_single(&inspection.claims, format)?;

    if let Some(exp) = inspection.expires_at {
        let exp_time = exp.format("%Y-%m-%d %H:%M:%S UTC");
        if inspection.expired {
            error(&format!("Token EXPIRED at: {exp_time}"));
        } else {
            info(&format!("Token expires at: {exp_time}"));
        }
    }
    let roles = inspection.realm_roles();
    if !roles.is_empty() {
        info(&format!("Realm roles: {}", roles.join(", ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_password_and_client_grants() {
        let grant = build_grant(Some("alice".to_string()), None, "pw".to_string(), None).unwrap();
        assert_eq!(grant.grant_type(), "password");

        let grant = build_grant(None, Some("app1".to_string()), "s".to_string(), None).unwrap();
        assert_eq!(
            grant,
            Grant::ClientCredentials {
                client_id: "app1".to_string(),
                client_secret: "s".to_string(),
            }
        );

        assert!(build_grant(None, None, "s".to_string(), None).is_err());
    }
}
