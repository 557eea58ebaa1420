//! One-shot collection for debugging a source outside the server.

use std::collections::BTreeMap;

use serde::Serialize;

use cflow_collector::{build_source, CursorStore, Source};
use cflow_core::{AppConfig, JsonCheckpointStore, PipelineConfig};
use cflow_ingest::normalize;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct CollectSummary {
    pub source: String,
    pub since: Option<String>,
    pub next_cursor: Option<String>,
    pub committed: bool,
    pub pages: usize,
    pub records: usize,
    pub normalized: usize,
    pub rejected: BTreeMap<&'static str, usize>,
}

pub(crate) async fn run_collect(
    config: &AppConfig,
    pipeline: &PipelineConfig,
    name: &str,
    commit: bool,
) -> anyhow::Result<()> {
    let source_config = pipeline
        .source(name)
        .ok_or_else(|| anyhow::anyhow!("source '{name}' is not in the pipeline file"))?;
    if !source_config.enabled {
        tracing::warn!(source = name, "source is disabled in the pipeline file");
    }

    let source = build_source(source_config, config.http_timeout_secs, &config.user_agent)?;
    let cursors = CursorStore::open(JsonCheckpointStore::new(config.state_dir.clone())).await?;
    let summary = collect_once(source.as_ref(), &cursors, commit).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Fetch from the stored cursor and normalize every record without
/// publishing anything.
pub(crate) async fn collect_once(
    source: &dyn Source,
    cursors: &CursorStore,
    commit: bool,
) -> anyhow::Result<CollectSummary> {
    let since = cursors.get(source.name()).await;
    let page = source.fetch(since.as_deref()).await?;

    let mut normalized = 0;
    let mut rejected = BTreeMap::new();
    for raw in &page.records {
        match normalize(raw) {
            Ok(_) => normalized += 1,
            Err(e) => {
                tracing::info!(reason = %e.reason, detail = %e.detail, "record rejected");
                *rejected.entry(e.reason.as_str()).or_insert(0) += 1;
            }
        }
    }

    let committed = match (&page.next_cursor, commit) {
        (Some(cursor), true) => {
            cursors.commit(source.name(), cursor).await?;
            true
        }
        _ => false,
    };

    Ok(CollectSummary {
        source: source.name().to_owned(),
        since,
        next_cursor: page.next_cursor,
        committed,
        pages: page.pages,
        records: page.records.len(),
        normalized,
        rejected,
    })
}

#[cfg(test)]
#[path = "collect_test.rs"]
mod tests;
