//! Assertion evaluation: dispatch, the shared result type, and the context
//! threaded into evaluators.
//!
//! Dispatch is a match over the closed assertion enum; sugar kinds are
//! expanded before they reach an evaluator. Evaluator failures (bad regex,
//! bad query, judge without votes) become failing results, never errors: an
//! assertion can only ever fail the assertion, not the trial.

pub mod aggregation;
pub mod judge;
pub mod limits;
pub mod query;
pub mod scorer;
pub mod sequence;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::JudgeConfig;
use crate::scenario::{Assertion, Scenario};
use crate::trace::Trace;

/// The outcome of one assertion against one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub assertion_index: usize,
    pub assertion_type: String,
    pub passed: bool,
    pub score: f64,
    pub weight: f64,
    pub required: bool,
    #[serde(default)]
    pub details: String,
    /// Structured extras; the judge stores per-criterion medians, k, model,
    /// and its own cost here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl EvalResult {
    pub fn pass(
        index: usize,
        assertion_type: &str,
        weight: f64,
        required: bool,
        details: String,
    ) -> Self {
        Self {
            assertion_index: index,
            assertion_type: assertion_type.to_string(),
            passed: true,
            score: 1.0,
            weight,
            required,
            details,
            metadata: None,
        }
    }

    pub fn fail(
        index: usize,
        assertion_type: &str,
        weight: f64,
        required: bool,
        details: String,
    ) -> Self {
        Self {
            assertion_index: index,
            assertion_type: assertion_type.to_string(),
            passed: false,
            score: 0.0,
            weight,
            required,
            details,
            metadata: None,
        }
    }
}

/// Read-only context threaded into evaluators by the orchestrator. Replaces
/// in-band sentinel keys on the assertion itself.
#[derive(Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub scenario: Option<&'a Scenario>,
    pub judge_config: Option<&'a JudgeConfig>,
    pub verbose: bool,
}

/// Evaluate a single assertion against a trace. `index` is the assertion's
/// position in the scenario, carried through for cross-trial grouping.
pub async fn evaluate_assertion(
    trace: &Trace,
    index: usize,
    assertion: &Assertion,
    ctx: &EvalContext<'_>,
) -> EvalResult {
    let normalized = assertion.normalized();
    match &normalized {
        Assertion::Jmespath {
            expression,
            operator,
            value,
            weight,
            required,
        } => query::evaluate(trace, index, expression, *operator, value, *weight, *required),
        Assertion::ToolSequence {
            sequence,
            mode,
            weight,
            required,
        } => sequence::evaluate(trace, index, sequence, *mode, *weight, *required),
        Assertion::CostLimit {
            max_usd,
            weight,
            required,
        } => limits::evaluate_cost(trace, index, *max_usd, *weight, *required),
        Assertion::LatencyLimit {
            max_seconds,
            weight,
            required,
        } => limits::evaluate_latency(trace, index, *max_seconds, *weight, *required),
        Assertion::Judge { .. } => judge::evaluate(trace, index, &normalized, ctx).await,
        Assertion::ToolCalled { .. } | Assertion::OutputContains { .. } => {
            unreachable!("sugar assertions are expanded by Assertion::normalized")
        }
    }
}
