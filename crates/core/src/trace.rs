use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineStage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success,
    NoMatch,
    Failed,
    TimedOut,
}

/// One record per stage exit. The coordinator emits exactly one of these
/// on every exit path, including typed errors and timeouts, so a request's
/// trace is complete even when it fails mid-pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub record_id: String,
    pub request_id: String,
    pub session_id: String,
    pub stage: PipelineStage,
    pub outcome: StageOutcome,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(
        request_id: impl Into<String>,
        session_id: impl Into<String>,
        stage: PipelineStage,
        outcome: StageOutcome,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            session_id: session_id.into(),
            stage,
            outcome,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub trait TraceSink: Send + Sync {
    fn emit(&self, record: StageRecord);
}

#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    records: Arc<Mutex<Vec<StageRecord>>>,
}

impl InMemoryTraceSink {
    pub fn records(&self) -> Vec<StageRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TraceSink for InMemoryTraceSink {
    fn emit(&self, record: StageRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::PipelineStage;
    use crate::trace::{InMemoryTraceSink, StageOutcome, StageRecord, TraceSink};

    #[test]
    fn in_memory_sink_records_stage_exits_in_order() {
        let sink = InMemoryTraceSink::default();
        sink.emit(StageRecord::new(
            "req-1",
            "sess-9",
            PipelineStage::Classification,
            StageOutcome::Success,
        ));
        sink.emit(
            StageRecord::new("req-1", "sess-9", PipelineStage::Resolution, StageOutcome::Failed)
                .with_detail("no_orders_found"),
        );

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stage, PipelineStage::Classification);
        assert_eq!(records[1].outcome, StageOutcome::Failed);
        assert_eq!(records[1].detail.as_deref(), Some("no_orders_found"));
        assert_eq!(records[1].request_id, "req-1");
    }
}
