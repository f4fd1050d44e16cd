//! CLI argument parsing.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use kc_directory::{ClusterId, EntityType, SearchType};

use crate::config::OutputFormat;

/// kcmm - role administration across Keycloak clusters.
#[derive(Debug, Parser)]
#[command(name = "kcmm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ~/.keycloak/kcmm.toml).
    #[arg(short, long, env = "KCMM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format (overrides config).
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Registered clusters.
    #[command(subcommand)]
    Clusters(ClustersCommand),

    /// Search users, clients or realm roles across clusters.
    Search(SearchArgs),

    /// Client and realm roles.
    #[command(subcommand)]
    Roles(RolesCommand),

    /// Assign realm and client roles to a user or group.
    Assign(AssignArgs),

    /// Export selected entities, or a whole realm.
    Export(ExportArgs),

    /// Import an export file.
    Import(ImportArgs),

    /// Token acquisition and inspection.
    #[command(subcommand)]
    Token(TokenCommand),

    /// Compare clusters.
    #[command(subcommand)]
    Diff(DiffCommand),

    /// Copy one entity from a cluster to another.
    Sync(SyncArgs),
}

/// Cluster commands.
#[derive(Debug, Subcommand)]
pub enum ClustersCommand {
    /// List registered clusters.
    List,

    /// Probe the health of clusters.
    Health {
        /// Clusters to probe (all if omitted).
        #[arg(long = "cluster")]
        clusters: Vec<ClusterId>,
    },
}

/// Entity type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EntityArg {
    /// Users.
    User,
    /// Groups.
    Group,
    /// Clients.
    Client,
    /// Realm roles.
    Role,
}

impl From<EntityArg> for EntityType {
    fn from(arg: EntityArg) -> Self {
        match arg {
            EntityArg::User => Self::User,
            EntityArg::Group => Self::Group,
            EntityArg::Client => Self::Client,
            EntityArg::Role => Self::Role,
        }
    }
}

/// Search type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchArg {
    /// Username or email.
    User,
    /// Client key or name.
    Client,
    /// Realm role name.
    Role,
}

impl From<SearchArg> for SearchType {
    fn from(arg: SearchArg) -> Self {
        match arg {
            SearchArg::User => Self::User,
            SearchArg::Client => Self::Client,
            SearchArg::Role => Self::Role,
        }
    }
}

/// Search arguments.
#[derive(Debug, clap::Args)]
pub struct SearchArgs {
    /// Case-insensitive substring to look for.
    pub term: String,

    /// What to search.
    #[arg(short = 't', long = "type", value_enum, default_value = "user")]
    pub search_type: SearchArg,

    /// Clusters to search (all if omitted).
    #[arg(long = "cluster")]
    pub clusters: Vec<ClusterId>,
}

/// Role commands.
#[derive(Debug, Subcommand)]
pub enum RolesCommand {
    /// List a client's roles, or the realm roles.
    List {
        /// Cluster.
        #[arg(long)]
        cluster: ClusterId,

        /// Client key (realm roles if omitted).
        #[arg(long)]
        client: Option<String>,
    },

    /// Load the roles of every client of a cluster.
    Prime {
        /// Cluster.
        #[arg(long)]
        cluster: ClusterId,
    },

    /// Create a client role, or a realm role.
    Create {
        /// Cluster.
        #[arg(long)]
        cluster: ClusterId,

        /// Client key (realm role if omitted).
        #[arg(long)]
        client: Option<String>,

        /// Role name.
        name: String,

        /// Description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show the roles mapped to a user or group.
    #[command(group(ArgGroup::new("principal").required(true).args(["user", "group"])))]
    Mappings {
        /// Cluster.
        #[arg(long)]
        cluster: ClusterId,

        /// User id.
        #[arg(long)]
        user: Option<String>,

        /// Group id.
        #[arg(long)]
        group: Option<String>,
    },
}

/// Assignment arguments.
#[derive(Debug, clap::Args)]
#[command(group(ArgGroup::new("principal").required(true).args(["user", "group"])))]
pub struct AssignArgs {
    /// Cluster.
    #[arg(long)]
    pub cluster: ClusterId,

    /// User id.
    #[arg(long)]
    pub user: Option<String>,

    /// Group id.
    #[arg(long)]
    pub group: Option<String>,

    /// Realm role to assign.
    #[arg(long = "realm-role")]
    pub realm_roles: Vec<String>,

    /// Client role to assign, as CLIENT_KEY:ROLE_NAME.
    #[arg(long = "client-role", value_parser = parse_client_role)]
    pub client_roles: Vec<(String, String)>,
}

/// Parses `KEY:NAME`; the key ends at the first colon.
pub fn parse_client_role(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((key, name)) if !key.is_empty() && !name.is_empty() => {
            Ok((key.to_string(), name.to_string()))
        }
        _ => Err(format!("expected CLIENT_KEY:ROLE_NAME, got '{value}'")),
    }
}

/// Export arguments.
#[derive(Debug, clap::Args)]
pub struct ExportArgs {
    /// Cluster.
    #[arg(long)]
    pub cluster: ClusterId,

    /// Entity type to export.
    #[arg(short = 't', long = "type", value_enum, required_unless_present = "full")]
    pub entity_type: Option<EntityArg>,

    /// Ids to export (all if omitted).
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Export the whole realm representation instead.
    #[arg(long, conflicts_with_all = ["entity_type", "ids"])]
    pub full: bool,

    /// Output file (stdout if not specified).
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Import arguments.
#[derive(Debug, clap::Args)]
pub struct ImportArgs {
    /// Cluster.
    #[arg(long)]
    pub cluster: ClusterId,

    /// Entity type the file holds.
    #[arg(short = 't', long = "type", value_enum, required_unless_present = "full")]
    pub entity_type: Option<EntityArg>,

    /// Input file.
    #[arg(short, long)]
    pub file: PathBuf,

    /// The file is a whole realm representation.
    #[arg(long, conflicts_with = "entity_type")]
    pub full: bool,

    /// Skip confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

/// Token commands.
#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Obtain a token from a cluster's realm.
    #[command(group(
        ArgGroup::new("grant").required(true).args(["password", "client_credentials"])
    ))]
    Get {
        /// Cluster.
        #[arg(long)]
        cluster: ClusterId,

        /// Password grant for this username.
        #[arg(long, value_name = "USER")]
        password: Option<String>,

        /// Client credentials grant for this client.
        #[arg(long, value_name = "CLIENT")]
        client_credentials: Option<String>,

        /// Password or client secret.
        #[arg(long, env = "KCMM_SECRET", hide_env_values = true)]
        secret: String,

        /// Client for a password grant (defaults to admin-cli).
        #[arg(long)]
        client_id: Option<String>,
    },

    /// Decode a JWT without verifying it.
    Inspect {
        /// The token.
        token: String,
    },
}

/// Source and destination of a comparison.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct ClusterPair {
    /// Source cluster.
    #[arg(long)]
    pub source: ClusterId,

    /// Destination cluster.
    #[arg(long)]
    pub destination: ClusterId,
}

/// Diff commands.
#[derive(Debug, Subcommand)]
pub enum DiffCommand {
    /// Compare realm roles of two clusters.
    Roles(ClusterPair),

    /// Compare clients of two clusters, roles included.
    Clients(ClusterPair),

    /// Compare groups of two clusters by path.
    Groups(ClusterPair),

    /// Compare users of two clusters by username.
    Users(ClusterPair),
}

/// Sync arguments.
#[derive(Debug, clap::Args)]
pub struct SyncArgs {
    /// Clusters to copy between.
    #[command(flatten)]
    pub clusters: ClusterPair,

    /// Entity type.
    #[arg(short = 't', long = "type", value_enum)]
    pub entity_type: EntityArg,

    /// Username, group path, client key or realm role name.
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("kcmm").chain(args.iter().copied()))
    }

    #[test]
    fn definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_assignment() {
        let cli = parse(&[
            "assign",
            "--cluster",
            "1",
            "--user",
            "u1",
            "--realm-role",
            "viewer",
            "--client-role",
            "app1:read",
            "--client-role",
            "urn:app:write",
        ])
        .unwrap();

        let Command::Assign(args) = cli.command else {
            panic!("expected assign");
        };
        assert_eq!(args.cluster, ClusterId(1));
        assert_eq!(args.user.as_deref(), Some("u1"));
        assert_eq!(args.realm_roles, vec!["viewer"]);
        assert_eq!(
            args.client_roles,
            vec![
                ("app1".to_string(), "read".to_string()),
                ("urn".to_string(), "app:write".to_string()),
            ]
        );
    }

    #[test]
    fn assignment_needs_exactly_one_principal() {
        assert!(parse(&["assign", "--cluster", "1"]).is_err());
        assert!(parse(&["assign", "--cluster", "1", "--user", "u1", "--group", "g1"]).is_err());
    }

    #[test]
    fn rejects_malformed_client_role() {
        assert!(parse_client_role("app1").is_err());
        assert!(parse_client_role(":read").is_err());
        assert!(parse_client_role("app1:").is_err());
    }

    #[test]
    fn search_defaults_to_users_on_all_clusters() {
        let cli = parse(&["search", "ali", "-o", "json"]).unwrap();
        assert_eq!(cli.output, Some(OutputFormat::Json));
        let Command::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.search_type, SearchArg::User);
        assert!(args.clusters.is_empty());
    }

    #[test]
    fn export_requires_type_unless_full() {
        assert!(parse(&["export", "--cluster", "1"]).is_err());
        assert!(parse(&["export", "--cluster", "1", "--full"]).is_ok());
        assert!(parse(&["export", "--cluster", "1", "--type", "user", "--full"]).is_err());
    }

    #[test]
    fn token_get_requires_a_grant() {
        assert!(parse(&["token", "get", "--cluster", "1", "--secret", "s"]).is_err());
        let cli = parse(&[
            "token",
            "get",
            "--cluster",
            "1",
            "--client-credentials",
            "app1",
            "--secret",
            "s",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Token(TokenCommand::Get { client_credentials: Some(_), .. })
        ));
    }

    #[test]
    fn parses_sync_and_diff() {
        let cli = parse(&[
            "sync",
            "--source",
            "1",
            "--destination",
            "2",
            "--type",
            "group",
            "/ops/oncall",
        ])
        .unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.clusters.source, ClusterId(1));
        assert_eq!(args.clusters.destination, ClusterId(2));
        assert_eq!(args.entity_type, EntityArg::Group);
        assert_eq!(args.key, "/ops/oncall");

        assert!(parse(&["sync", "--source", "1", "--destination", "2", "alice"]).is_err());

        let cli = parse(&["diff", "users", "--source", "1", "--destination", "2"]).unwrap();
        assert!(matches!(cli.command, Command::Diff(DiffCommand::Users(_))));
    }

    #[test]
    fn parses_role_create_and_mappings() {
        let cli = parse(&[
            "roles", "create", "--cluster", "1", "--client", "app1", "export", "-d", "Exports",
        ])
        .unwrap();
        let Command::Roles(RolesCommand::Create {
            client,
            name,
            description,
            ..
        }) = cli.command
        else {
            panic!("expected roles create");
        };
        assert_eq!(client.as_deref(), Some("app1"));
        assert_eq!(name, "export");
        assert_eq!(description.as_deref(), Some("Exports"));

        assert!(parse(&["roles", "mappings", "--cluster", "1"]).is_err());
        assert!(parse(&["roles", "mappings", "--cluster", "1", "--group", "g1"]).is_ok());
    }
}
