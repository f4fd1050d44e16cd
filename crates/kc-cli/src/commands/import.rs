//! Import command.

use kc_directory::{EntityType, ExportPayload, ExportSelectionPlanner};

use super::{report, Context};
use crate::cli::ImportArgs;
use crate::output::{confirm, info, output_single, success};
use crate::{CliError, CliResult};

/// Runs an import.
pub async fn run_import(args: ImportArgs, ctx: &Context) -> CliResult<()> {
    let content = std::fs::read_to_string(&args.file)?;
    let cluster = ctx.registry().get(args.cluster)?;
    let planner = ExportSelectionPlanner::new(ctx.gateways.clone());

    if args.full {
        let realm: serde_json::Value = serde_json::from_str(&content)?;
        if !args.yes
            && !confirm(&format!(
                "Create realm from {} on cluster '{}'?",
                args.file.display(),
                cluster.name
            ))?
        {
            info("Import cancelled.");
            return Ok(());
        }
        planner.import_realm(args.cluster, &realm).await?;
        success(&format!("Realm imported into cluster '{}'", cluster.name));
        return Ok(());
    }

    let entity_type: EntityType = args
        .entity_type
        .ok_or_else(|| CliError::InvalidArgument("--type is required".to_string()))?
        .into();
    let payload = ExportPayload::from_json(&content)?;

    if !args.yes
        && !confirm(&format!(
            "Import {} {entity_type}(s) into cluster '{}' realm '{}'?",
            payload.entities.len(),
            cluster.name,
            cluster.realm
        ))?
    {
        info("Import cancelled.");
        return Ok(());
    }

    let result = planner
        .apply_import_payload(args.cluster, entity_type, &payload)
        .await
        .map_err(report)?;

    output_single(&result, ctx.format)?;
    success(&format!(
        "Imported {} created, {} updated",
        result.created.len(),
        result.updated.len()
    ));
    Ok(())
}
