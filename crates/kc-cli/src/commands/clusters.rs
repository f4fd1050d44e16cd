//! Cluster commands.

use kc_directory::{ClusterHealth, FederatedSearch, HealthStatus};
use serde::Serialize;
use tabled::Tabled;

use super::{cancel_on_interrupt, Context};
use crate::cli::ClustersCommand;
use crate::output::output;
use crate::{CliError, CliResult};

/// Cluster row.
#[derive(Debug, Serialize, Tabled)]
pub struct ClusterRow {
    /// Cluster id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Base URL.
    pub base_url: String,
    /// Realm.
    pub realm: String,
}

/// Health row.
#[derive(Debug, Serialize, Tabled)]
pub struct HealthRow {
    /// Cluster id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Probe outcome.
    pub status: String,
    /// Failure reason.
    pub reason: String,
}

impl From<&ClusterHealth> for HealthRow {
    fn from(health: &ClusterHealth) -> Self {
        let (status, reason) = match &health.status {
            HealthStatus::Healthy => ("healthy", String::new()),
            HealthStatus::Unhealthy(reason) => ("unhealthy", reason.clone()),
            HealthStatus::Unreachable(reason) => ("unreachable", reason.clone()),
        };
        Self {
            id: health.cluster_id.0,
            name: health.cluster_name.clone(),
            status: status.to_string(),
            reason,
        }
    }
}

/// Runs a cluster command.
pub async fn run_clusters(cmd: ClustersCommand, ctx: &Context) -> CliResult<()> {
    match cmd {
        ClustersCommand::List => {
            let rows: Vec<ClusterRow> = ctx
                .registry()
                .list()
                .iter()
                .map(|c| ClusterRow {
                    id: c.id.0,
                    name: c.name.clone(),
                    base_url: c.base_url.clone(),
                    realm: c.realm.clone(),
                })
                .collect();
            output(&rows, ctx.format)
        }
        ClustersCommand::Health { clusters } => {
            let search = FederatedSearch::new(ctx.gateways.clone(), &ctx.config.settings);
            let ids = (!clusters.is_empty()).then_some(clusters.as_slice());
            let report = search.probe_health(ids, &cancel_on_interrupt()).await;

            let rows: Vec<HealthRow> = report.iter().map(HealthRow::from).collect();
            output(&rows, ctx.format)?;

            let down = report
                .iter()
                .filter(|h| h.status != HealthStatus::Healthy)
                .count();
            if down > 0 {
                return Err(CliError::Incomplete(format!("{down} cluster(s) not healthy")));
            }
            Ok(())
        }
    }
}
