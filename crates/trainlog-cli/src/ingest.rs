//! JSON-lines replay of training events.

use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, info};
use trainlog_core::{
    EventRecorder, LogRecordCache, PersistenceBackend, RequestSummary, TrainingEvent,
};

/// What one ingest run did.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub requests: Vec<RequestSummary>,
}

impl IngestReport {
    pub fn events(&self) -> usize {
        self.requests.iter().map(|r| r.events).sum()
    }
}

/// Record every event in `reader`, one request per `batch` events.
///
/// Without a batch size the whole input is one request. Blank lines are
/// skipped; a malformed line aborts the run.
pub fn ingest(
    reader: impl BufRead,
    backend: Arc<dyn PersistenceBackend>,
    batch: Option<usize>,
) -> Result<IngestReport> {
    if batch == Some(0) {
        bail!("batch size must be at least 1");
    }

    let mut report = IngestReport::default();
    let mut recorder = EventRecorder::new(LogRecordCache::new(backend.clone()));
    let mut in_request = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_no))?;
        if line.trim().is_empty() {
            continue;
        }

        let event: TrainingEvent = serde_json::from_str(&line)
            .with_context(|| format!("Invalid event on line {}", line_no))?;
        let ids = recorder
            .record(&event)
            .with_context(|| format!("Failed to record event on line {}", line_no))?;
        debug!("Line {} -> log {}", line_no, ids.log);
        in_request += 1;

        if batch.is_some_and(|size| in_request >= size) {
            let finished = std::mem::replace(
                &mut recorder,
                EventRecorder::new(LogRecordCache::new(backend.clone())),
            );
            finish_request(&mut report, finished);
            in_request = 0;
        }
    }

    if in_request > 0 {
        finish_request(&mut report, recorder);
    }

    Ok(report)
}

fn finish_request(report: &mut IngestReport, recorder: EventRecorder) {
    let summary = recorder.finish();
    info!(
        "Request {}: {} events, {} cached rows",
        report.requests.len() + 1,
        summary.events,
        summary.cached_entries
    );
    report.requests.push(summary);
}
