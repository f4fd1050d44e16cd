//! Sync command.

use kc_directory::{EntityType, ExportSelectionPlanner};

use super::Context;
use crate::cli::SyncArgs;
use crate::output::{output_single, success};
use crate::CliResult;

/// Copies one entity between clusters.
pub async fn run_sync(args: SyncArgs, ctx: &Context) -> CliResult<()> {
    let registry = ctx.registry();
    let source = registry.get(args.clusters.source)?;
    let destination = registry.get(args.clusters.destination)?;
    let entity_type: EntityType = args.entity_type.into();

    let planner = ExportSelectionPlanner::new(ctx.gateways.clone());
    let result = planner
        .sync_entity(source.id, destination.id, entity_type, &args.key)
        .await?;

    output_single(&result, ctx.format)?;
    let action = if result.created.is_empty() { "updated" } else { "created" };
    success(&format!(
        "{entity_type} '{}' {action} on cluster '{}' from '{}'",
        args.key, destination.name, source.name
    ));
    Ok(())
}
