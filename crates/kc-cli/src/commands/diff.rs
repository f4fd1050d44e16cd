//! Diff commands.

use kc_directory::{diff_clients, diff_groups, diff_realm_roles, diff_users, Difference};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::cli::DiffCommand;
use crate::output::{output, success};
use crate::CliResult;

/// Difference row.
#[derive(Debug, Serialize, Tabled)]
pub struct DifferenceRow {
    /// Name, path or key of the entity.
    pub name: String,
    /// Kind of difference.
    pub kind: &'static str,
    /// Differing attributes.
    pub fields: String,
}

impl From<&Difference> for DifferenceRow {
    fn from(difference: &Difference) -> Self {
        let (kind, fields) = match difference {
            Difference::MissingInDestination { .. } => ("missing in destination", String::new()),
            Difference::MissingInSource { .. } => ("missing in source", String::new()),
            Difference::DifferentConfig { fields, .. } => ("different", fields.join(", ")),
        };
        Self {
            name: difference.name().to_string(),
            kind,
            fields,
        }
    }
}

/// Runs a diff command.
pub async fn run_diff(cmd: DiffCommand, ctx: &Context) -> CliResult<()> {
    let gateways = &ctx.gateways;
    let (what, differences) = match cmd {
        DiffCommand::Roles(pair) => (
            "Realm roles",
            diff_realm_roles(gateways, pair.source, pair.destination).await?,
        ),
        DiffCommand::Clients(pair) => (
            "Clients",
            diff_clients(gateways, pair.source, pair.destination).await?,
        ),
        DiffCommand::Groups(pair) => (
            "Groups",
            diff_groups(gateways, pair.source, pair.destination).await?,
        ),
        DiffCommand::Users(pair) => (
            "Users",
            diff_users(gateways, pair.source, pair.destination).await?,
        ),
    };

    if differences.is_empty() {
        success(&format!("{what} are identical"));
        return Ok(());
    }
    let rows: Vec<DifferenceRow> = differences.iter().map(DifferenceRow::from).collect();
    output(&rows, ctx.format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_join_differing_fields() {
        let row = DifferenceRow::from(&Difference::DifferentConfig {
            name: "app1".to_string(),
            fields: vec!["redirectUris", "roles"],
        });
        assert_eq!(row.kind, "different");
        assert_eq!(row.fields, "redirectUris, roles");

        let row = DifferenceRow::from(&Difference::MissingInSource {
            name: "/ops".to_string(),
        });
        assert_eq!(row.name, "/ops");
        assert!(row.fields.is_empty());
    }
}
