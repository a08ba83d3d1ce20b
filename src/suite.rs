//! Trial and suite result models: what one trial produced, and the
//! aggregate the orchestrator folds N trials into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::eval::EvalResult;
use crate::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// The trial produced a trace and a verdict, passing or not.
    Ok,
    /// External failure: no meaningful verdict could be produced.
    InfraError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_index: u32,
    pub run_id: Uuid,
    pub trace_id: Uuid,
    pub status: TrialStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    #[serde(default)]
    pub eval_results: Vec<EvalResult>,
    pub score: f64,
    pub passed: bool,
    pub hard_failed: bool,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transient_error_kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_seconds: f64,
}

impl TrialResult {
    pub fn is_infra_error(&self) -> bool {
        self.status == TrialStatus::InfraError
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "HARD_FAIL")]
    HardFail,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "INFRA_ERROR")]
    InfraError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::HardFail => "HARD_FAIL",
            Verdict::Partial => "PARTIAL",
            Verdict::InfraError => "INFRA_ERROR",
        }
    }

    /// Process exit code for the CLI: 0 pass, 1 fail/partial, 2 hard fail,
    /// 3 infra error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail | Verdict::Partial => 1,
            Verdict::HardFail => 2,
            Verdict::InfraError => 3,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the cross-trial failure ranking, grouped by assertion index
/// and ordered by weighted impact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRow {
    pub assertion_index: usize,
    pub assertion_type: String,
    pub fail_count: u32,
    pub fail_rate: f64,
    pub total_weight_lost: f64,
    /// Up to three sample failure details.
    #[serde(default)]
    pub sample_details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub run_id: Uuid,
    pub scenario_id: String,
    pub scenario_hash: String,
    pub model: String,
    pub adapter: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub trials: Vec<TrialResult>,
    pub verdict: Verdict,
    pub pass_rate: f64,
    pub mean_score: f64,
    pub score_min: f64,
    pub score_p50: f64,
    pub score_p95: f64,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p95: Option<f64>,
    /// Agent-side spend only; None when every trial's pricing was unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_avg_per_trial: Option<f64>,
    /// Judge-side spend, kept apart from agent cost.
    pub judge_cost_total: f64,
    pub total_retries: u32,
    pub trials_with_retries: u32,
    pub early_stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stop_reason: Option<String>,
    pub n_requested: u32,
    #[serde(default)]
    pub failure_ranking: Vec<FailureRow>,
}
