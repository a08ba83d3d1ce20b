//! Persisted models for recorded traces and re-evaluation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecordingMode;
use crate::error::SalvoError;
use crate::eval::EvalResult;
use crate::scenario::Scenario;
use crate::trace::Trace;

/// Schema version stamped into every recorded trace file.
pub const CURRENT_TRACE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub schema_version: u32,
    pub recording_mode: RecordingMode,
    pub salvo_version: String,
    pub recorded_at: DateTime<Utc>,
    pub source_run_id: Uuid,
    pub scenario_name: String,
    pub scenario_file: String,
    pub scenario_hash: String,
}

/// A redacted trace wrapped with recording metadata and a full scenario
/// snapshot, so replay and re-evaluation are self-contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTrace {
    pub metadata: TraceMetadata,
    pub trace: Trace,
    pub scenario_snapshot: Scenario,
}

impl RecordedTrace {
    pub fn is_metadata_only(&self) -> bool {
        self.metadata.recording_mode == RecordingMode::MetadataOnly
    }
}

/// Refuse traces written by a newer schema than this build understands.
pub fn validate_trace_version(metadata: &TraceMetadata) -> Result<(), SalvoError> {
    if metadata.schema_version > CURRENT_TRACE_SCHEMA_VERSION {
        return Err(SalvoError::Storage(format!(
            "trace schema version {} is newer than supported version {}; upgrade salvo to read this trace",
            metadata.schema_version, CURRENT_TRACE_SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// Result of re-evaluating a recorded trace, stored under `revals/` so it
/// never contaminates the run index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevalResult {
    pub reval_id: Uuid,
    pub original_trace_id: Uuid,
    pub scenario_hash_at_reeval: String,
    pub eval_results: Vec<EvalResult>,
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    pub evaluated_at: DateTime<Utc>,
    pub assertions_used: u32,
    #[serde(default)]
    pub assertions_skipped: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(schema_version: u32) -> TraceMetadata {
        TraceMetadata {
            schema_version,
            recording_mode: RecordingMode::Full,
            salvo_version: env!("CARGO_PKG_VERSION").to_string(),
            recorded_at: Utc::now(),
            source_run_id: Uuid::now_v7(),
            scenario_name: "demo".into(),
            scenario_file: "demo.yaml".into(),
            scenario_hash: "hash".into(),
        }
    }

    #[test]
    fn current_version_validates() {
        assert!(validate_trace_version(&metadata(CURRENT_TRACE_SCHEMA_VERSION)).is_ok());
    }

    #[test]
    fn newer_version_is_refused_with_upgrade_hint() {
        let err = validate_trace_version(&metadata(CURRENT_TRACE_SCHEMA_VERSION + 1)).unwrap_err();
        assert!(err.to_string().contains("upgrade salvo"));
    }

    #[test]
    fn reval_result_roundtrips() {
        let reval = RevalResult {
            reval_id: Uuid::now_v7(),
            original_trace_id: Uuid::now_v7(),
            scenario_hash_at_reeval: "h2".into(),
            eval_results: vec![],
            score: 0.5,
            passed: false,
            threshold: 0.8,
            evaluated_at: Utc::now(),
            assertions_used: 2,
            assertions_skipped: 1,
        };
        let json = serde_json::to_string(&reval).unwrap();
        let back: RevalResult = serde_json::from_str(&json).unwrap();
        assert_eq!(reval, back);
    }
}
