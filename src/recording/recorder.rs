//! TraceRecorder: redact, apply size caps, strip for metadata_only mode,
//! wrap with metadata, and persist each trial's trace from a suite.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::config::{RecordingConfig, RecordingMode};
use crate::error::SalvoError;
use crate::recording::models::{RecordedTrace, TraceMetadata, CURRENT_TRACE_SCHEMA_VERSION};
use crate::redaction::{apply_trace_limits, Redactor};
use crate::scenario::Scenario;
use crate::storage::RunStore;
use crate::suite::SuiteResult;
use crate::trace::Trace;
use uuid::Uuid;

pub const CONTENT_EXCLUDED: &str = "[CONTENT_EXCLUDED]";

pub struct TraceRecorder {
    store: Arc<RunStore>,
    mode: RecordingMode,
    redactor: Redactor,
}

impl TraceRecorder {
    pub fn new(store: Arc<RunStore>, recording: &RecordingConfig) -> Result<Self, SalvoError> {
        Ok(Self {
            store,
            mode: recording.mode,
            redactor: Redactor::with_custom_patterns(&recording.custom_patterns)?,
        })
    }

    /// Record every trial trace in the suite. Returns the recorded trace ids
    /// and leaves `traces/latest` pointing at the last one.
    pub fn record_suite(
        &self,
        suite: &SuiteResult,
        scenario: &Scenario,
        scenario_file: &str,
    ) -> Result<Vec<Uuid>, SalvoError> {
        let mut recorded_ids = Vec::new();

        for trial in &suite.trials {
            let Some(trace) = &trial.trace else {
                continue;
            };

            let mut sanitized = apply_trace_limits(&self.redactor.redact_trace(trace));
            if self.mode == RecordingMode::MetadataOnly {
                sanitized = strip_content_for_metadata_only(&sanitized);
            }

            // The snapshot's prompts can carry the same secrets the trace
            // does; scrub them before they reach disk.
            let mut snapshot = scenario.clone();
            snapshot.system_prompt = self.redactor.redact(&snapshot.system_prompt);
            snapshot.prompt = self.redactor.redact(&snapshot.prompt);

            let recorded = RecordedTrace {
                metadata: TraceMetadata {
                    schema_version: CURRENT_TRACE_SCHEMA_VERSION,
                    recording_mode: self.mode,
                    salvo_version: env!("CARGO_PKG_VERSION").to_string(),
                    recorded_at: Utc::now(),
                    source_run_id: suite.run_id,
                    scenario_name: suite.scenario_id.clone(),
                    scenario_file: scenario_file.to_string(),
                    scenario_hash: trace.scenario_hash.clone(),
                },
                trace: sanitized,
                scenario_snapshot: snapshot,
            };

            self.store.save_recorded_trace(&recorded)?;
            recorded_ids.push(trace.trace_id);
        }

        if let Some(last) = recorded_ids.last() {
            self.store.update_latest_pointer(*last)?;
        }

        Ok(recorded_ids)
    }
}

/// Replace message content and tool-call arguments with a sentinel while
/// preserving roles, tool names, turn counts, and usage.
pub fn strip_content_for_metadata_only(trace: &Trace) -> Trace {
    let mut out = trace.clone();
    for msg in &mut out.messages {
        if msg.content.is_some() {
            msg.content = Some(CONTENT_EXCLUDED.to_string());
        }
        for call in &mut msg.tool_calls {
            call.arguments = Value::String(CONTENT_EXCLUDED.to_string());
        }
    }
    for call in &mut out.tool_calls {
        call.arguments = Value::String(CONTENT_EXCLUDED.to_string());
    }
    out.final_content = None;
    out
}
