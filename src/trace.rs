//! The full record of a trial's multi-turn conversation: messages, tool
//! calls, usage, timing, and cost. Designed for lossless JSON round-trips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{FinishReason, Message, TokenUsage, ToolCall};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Time-sortable id, minted before the trial's first suspension point so
    /// it is available on both success and error paths.
    pub trace_id: Uuid,
    /// Scenario hash at the moment the trial started.
    pub scenario_hash: String,
    pub provider: String,
    pub model: String,
    /// Ordered conversation history including assistant turns and tool
    /// results.
    pub messages: Vec<Message>,
    /// Flat concatenation of tool calls across assistant turns, in emission
    /// order.
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub latency_seconds: f64,
    /// None means pricing is unknown for the model; rendered as "n/a" and
    /// never folded into sums.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub turn_count: u32,
    pub finish_reason: FinishReason,
    pub max_turns_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub extras_resolved: Map<String, Value>,
}

impl Trace {
    /// A minimal stub for trials that failed before producing a real trace,
    /// so the error path still persists something addressable by trace_id.
    pub fn error_stub(
        trace_id: Uuid,
        scenario_hash: String,
        provider: String,
        model: String,
    ) -> Self {
        Self {
            trace_id,
            scenario_hash,
            provider,
            model,
            messages: Vec::new(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            latency_seconds: 0.0,
            cost_usd: None,
            turn_count: 0,
            finish_reason: FinishReason::Error,
            max_turns_hit: false,
            final_content: None,
            timestamp: Utc::now(),
            extras_resolved: Map::new(),
        }
    }
}
