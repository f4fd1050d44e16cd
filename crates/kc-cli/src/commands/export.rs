//! Export command.

use std::path::Path;

use kc_directory::{EntityType, ExportSelectionPlanner};

use super::Context;
use crate::cli::ExportArgs;
use crate::output::{success, warning};
use crate::{CliError, CliResult};

/// Runs an export.
pub async fn run_export(args: ExportArgs, ctx: &Context) -> CliResult<()> {
    let planner = ExportSelectionPlanner::new(ctx.gateways.clone());

    let (json, summary) = if args.full {
        let realm = planner.export_realm(args.cluster).await?;
        (serde_json::to_string_pretty(&realm)?, "realm".to_string())
    } else {
        let entity_type: EntityType = args
            .entity_type
            .ok_or_else(|| CliError::InvalidArgument("--type is required".to_string()))?
            .into();

        let ids = if args.ids.is_empty() {
            planner
                .list_export_candidates(args.cluster, entity_type)
                .await?
                .into_iter()
                .map(|c| c.id)
                .collect()
        } else {
            args.ids.clone()
        };

        let payload = planner
            .build_export_payload(args.cluster, entity_type, &ids)
            .await?;
        if payload.entities.len() < ids.len() {
            warning(&format!(
                "{} selected {entity_type}(s) no longer exist",
                ids.len() - payload.entities.len()
            ));
        }
        let summary = format!("{} {entity_type}(s)", payload.entities.len());
        (payload.to_json()?, summary)
    };

    write_output(args.file.as_deref(), &json)?;
    if let Some(path) = &args.file {
        success(&format!("Exported {summary} to {}", path.display()));
    }
    Ok(())
}

/// Writes to a file, or stdout when no file is given.
fn write_output(file: Option<&Path>, content: &str) -> CliResult<()> {
    match file {
        Some(path) => std::fs::write(path, content)?,
        None => println!("{content}"),
    }
    Ok(())
}
