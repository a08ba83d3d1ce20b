//! Weighted scoring with required-assertion hard-fail semantics, plus the
//! orchestration entry point that runs every evaluator over a trace.

use crate::eval::{evaluate_assertion, EvalContext, EvalResult};
use crate::scenario::Assertion;
use crate::trace::Trace;

/// Pure scoring outcome for one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub score: f64,
    pub passed: bool,
    pub hard_failed: bool,
}

/// Fold evaluation results into a trial-level outcome:
/// - any required assertion failing forces `{0.0, failed, hard_failed}`;
/// - no results or zero total weight is a degenerate fail (not hard);
/// - otherwise the weighted average compared against the threshold.
pub fn compute_score(results: &[EvalResult], threshold: f64) -> ScoreOutcome {
    let hard_failed = results.iter().any(|r| r.required && !r.passed);
    if hard_failed {
        return ScoreOutcome {
            score: 0.0,
            passed: false,
            hard_failed: true,
        };
    }

    let total_weight: f64 = results.iter().map(|r| r.weight).sum();
    if results.is_empty() || total_weight == 0.0 {
        return ScoreOutcome {
            score: 0.0,
            passed: false,
            hard_failed: false,
        };
    }

    let score = results
        .iter()
        .map(|r| r.score * r.weight)
        .sum::<f64>()
        / total_weight;

    ScoreOutcome {
        score,
        passed: score >= threshold,
        hard_failed: false,
    }
}

/// Run every assertion against the trace and score the results. Assertions
/// must already be normalized (sugar kinds expanded).
pub async fn evaluate_trace(
    trace: &Trace,
    assertions: &[Assertion],
    threshold: f64,
    ctx: &EvalContext<'_>,
) -> (Vec<EvalResult>, ScoreOutcome) {
    let mut results = Vec::with_capacity(assertions.len());
    for (index, assertion) in assertions.iter().enumerate() {
        results.push(evaluate_assertion(trace, index, assertion, ctx).await);
    }
    let outcome = compute_score(&results, threshold);
    (results, outcome)
}
