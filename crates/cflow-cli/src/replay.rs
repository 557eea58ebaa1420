//! Offline replay: raw payloads from a file, replayed in event-time order
//! through normalization, a fresh feature store and the trend detector.
//!
//! Detection passes run at the configured cadence on the event-time clock,
//! starting at the earliest event.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use cflow_core::{PipelineConfig, RawRecord, TrendSignal};
use cflow_features::FeatureStore;
use cflow_ingest::{normalize, DedupWindow};
use cflow_trends::{TrendBoard, TrendService};

#[derive(Debug, Default, Serialize)]
pub(crate) struct ReplayReport {
    pub lines: usize,
    pub normalized: usize,
    pub duplicates: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub passes: usize,
    pub alerts: usize,
    /// Every signal of every pass, in pass order.
    pub signals: Vec<TrendSignal>,
}

pub(crate) async fn run_replay(pipeline: &PipelineConfig, file: &Path) -> anyhow::Result<()> {
    let reader = std::io::BufReader::new(std::fs::File::open(file)?);
    let report = replay(pipeline, reader).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub(crate) async fn replay<R: BufRead>(
    pipeline: &PipelineConfig,
    input: R,
) -> anyhow::Result<ReplayReport> {
    let mut report = ReplayReport::default();
    let mut records = Vec::new();

    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        report.lines += 1;
        let payload: Value = match serde_json::from_str(&line) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "unparseable line");
                *report.rejected.entry("malformed_payload").or_insert(0) += 1;
                continue;
            }
        };
        let raw = RawRecord {
            source: "replay".to_owned(),
            payload,
            received_at: Utc::now(),
        };
        match normalize(&raw) {
            Ok(record) => records.push(record),
            Err(rejected) => {
                tracing::debug!(
                    line = index + 1,
                    reason = %rejected.reason,
                    detail = %rejected.detail,
                    "record rejected"
                );
                *report.rejected.entry(rejected.reason.as_str()).or_insert(0) += 1;
            }
        }
    }
    records.sort_by_key(|r| r.event.timestamp);

    let Some(mut tick) = records.first().map(|r| r.event.timestamp) else {
        return Ok(report);
    };
    let store = Arc::new(FeatureStore::from_config(pipeline));
    let service = TrendService::new(
        pipeline.trend.clone(),
        Arc::clone(&store),
        Arc::new(TrendBoard::new()),
        Vec::new(),
    )?;
    let cadence = Duration::try_seconds(i64::try_from(pipeline.trend.cadence_secs)?)
        .ok_or_else(|| anyhow::anyhow!("trend.cadence_secs is out of range"))?;
    let mut dedup = DedupWindow::new(pipeline.bus.dedup_window_secs);
    let mut pending = records.into_iter().peekable();

    loop {
        while let Some(record) = pending.next_if(|r| r.event.timestamp <= tick) {
            let event = &record.event;
            if !dedup.check_and_insert(event.platform, &event.source_event_id, event.timestamp) {
                report.duplicates += 1;
                continue;
            }
            store.apply(&record).await;
            report.normalized += 1;
        }

        let outcome = service.run_pass(tick).await?;
        report.passes += 1;
        report.alerts += outcome.alerts.len();
        report.signals.extend(outcome.pass.signals.iter().cloned());

        if pending.peek().is_none() {
            break;
        }
        tick += cadence;
    }

    Ok(report)
}
