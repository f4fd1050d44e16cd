//! # kcmm
//!
//! Role administration across Keycloak clusters.

#![forbid(unsafe_code)]

use clap::Parser;
use kc_cli::{
    cli::{Cli, Command},
    commands::{
        run_assign, run_clusters, run_diff, run_export, run_import, run_roles, run_search,
        run_sync, run_token, Context,
    },
    config::CliConfig,
    output::error,
    CliResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "kcmm=info,kc_cli=info,kc_directory=info";
const VERBOSE_FILTER: &str = "kcmm=debug,kc_cli=debug,kc_directory=debug";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let ctx = Context::new(config, cli.output).await?;

    match cli.command {
        Command::Clusters(cmd) => run_clusters(cmd, &ctx).await,
        Command::Search(args) => run_search(args, &ctx).await,
        Command::Roles(cmd) => run_roles(cmd, &ctx).await,
        Command::Assign(args) => run_assign(args, &ctx).await,
        Command::Export(args) => run_export(args, &ctx).await,
        Command::Import(args) => run_import(args, &ctx).await,
        Command::Token(cmd) => run_token(cmd, &ctx).await,
        Command::Diff(cmd) => run_diff(cmd, &ctx).await,
        Command::Sync(args) => run_sync(args, &ctx).await,
    }
}
