//! Command implementations.

pub mod assign;
pub mod clusters;
pub mod diff;
pub mod export;
pub mod import;
pub mod roles;
pub mod search;
pub mod sync;
pub mod token;

pub use assign::run_assign;
pub use clusters::run_clusters;
pub use diff::run_diff;
pub use export::run_export;
pub use import::run_import;
pub use roles::run_roles;
pub use search::run_search;
pub use sync::run_sync;
pub use token::run_token;

use std::sync::Arc;

use kc_directory::{
    CancellationToken, ClusterRegistry, DirectoryError, Gateways, HttpDirectoryGateway,
};

use crate::config::{CliConfig, OutputFormat};
use crate::{CliError, CliResult};

/// Everything a command needs: the connected gateways and output settings.
pub struct Context {
    /// Gateways for the configured clusters.
    pub gateways: Arc<Gateways>,
    /// Loaded configuration.
    pub config: CliConfig,
    /// Effective output format.
    pub format: OutputFormat,
}

impl Context {
    /// Builds the context from the loaded configuration.
    pub async fn new(config: CliConfig, output: Option<OutputFormat>) -> CliResult<Self> {
        let registry = Arc::new(config.registry().await?);
        let gateways = Arc::new(Gateways::new(
            registry,
            HttpDirectoryGateway::factory(config.settings.clone()),
        ));
        let format = output.unwrap_or(config.output_format);
        Ok(Self {
            gateways,
            config,
            format,
        })
    }

    /// The cluster registry.
    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        self.gateways.registry()
    }
}

/// Returns a token cancelled on Ctrl-C.
pub fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

/// Maps a directory error, printing the per-target breakdown of a partial
/// failure first.
pub(crate) fn report(err: DirectoryError) -> CliError {
    match err {
        DirectoryError::PartialFailure(failure) => {
            crate::output::partial_failure(&failure);
            CliError::Incomplete(format!(
                "{} of {} targets failed",
                failure.failed.len(),
                failure.failed.len() + failure.succeeded.len()
            ))
        }
        DirectoryError::Cancelled => CliError::Cancelled,
        other => CliError::Directory(other),
    }
}
