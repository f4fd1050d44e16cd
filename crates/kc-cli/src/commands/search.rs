//! Federated search command.

use kc_directory::{FederatedSearch, SearchData, SearchResult};
use serde::Serialize;
use tabled::Tabled;

use super::{cancel_on_interrupt, Context};
use crate::cli::SearchArgs;
use crate::config::OutputFormat;
use crate::output::{output, output_single, warning};
use crate::{CliError, CliResult};

/// Search hit row.
#[derive(Debug, Serialize, Tabled)]
pub struct SearchRow {
    /// Cluster name.
    pub cluster: String,
    /// Realm.
    pub realm: String,
    /// Entity id.
    pub id: String,
    /// Username, client key or role name.
    pub name: String,
    /// Email, client name or role description.
    pub detail: String,
}

impl From<&SearchResult> for SearchRow {
    fn from(result: &SearchResult) -> Self {
        let (id, detail) = match &result.data {
            SearchData::User(u) => (u.id.clone(), u.email.clone().unwrap_or_default()),
            SearchData::Client(c) => (c.id.clone(), c.name.clone().unwrap_or_default()),
            SearchData::Role(r) => (r.id.clone(), r.description.clone().unwrap_or_default()),
        };
        Self {
            cluster: result.cluster_name.clone(),
            realm: result.realm.clone(),
            id,
            name: result.data.label().to_string(),
            detail,
        }
    }
}

/// Runs a search.
pub async fn run_search(args: SearchArgs, ctx: &Context) -> CliResult<()> {
    let search = FederatedSearch::new(ctx.gateways.clone(), &ctx.config.settings);
    let ids = (!args.clusters.is_empty()).then_some(args.clusters.as_slice());
    let outcome = search
        .search(&args.term, args.search_type.into(), ids, &cancel_on_interrupt())
        .await;

    match ctx.format {
        OutputFormat::Json => output_single(&outcome.results, ctx.format)?,
        OutputFormat::Table => {
            let rows: Vec<SearchRow> = outcome.results.iter().map(SearchRow::from).collect();
            output(&rows, ctx.format)?;
        }
    }

    for failure in &outcome.failed {
        warning(&format!("cluster {}: {}", failure.cluster_id, failure.error));
    }
    if !outcome.failed.is_empty() {
        return Err(CliError::Incomplete(format!(
            "{} cluster(s) failed",
            outcome.failed.len()
        )));
    }
    Ok(())
}
