//! Cost and latency cap evaluators. An unknown cost fails the cost cap
//! closed: a limit that cannot be verified is not satisfied.

use crate::eval::EvalResult;
use crate::trace::Trace;

pub fn evaluate_cost(
    trace: &Trace,
    index: usize,
    max_usd: f64,
    weight: f64,
    required: bool,
) -> EvalResult {
    let Some(cost) = trace.cost_usd else {
        return EvalResult::fail(
            index,
            "cost_limit",
            weight,
            required,
            format!("unknown cost for model {:?}; cannot verify limit of ${max_usd:.4}", trace.model),
        );
    };

    let details = format!("cost ${cost:.4} vs limit ${max_usd:.4}");
    if cost <= max_usd {
        EvalResult::pass(index, "cost_limit", weight, required, details)
    } else {
        EvalResult::fail(index, "cost_limit", weight, required, details)
    }
}

pub fn evaluate_latency(
    trace: &Trace,
    index: usize,
    max_seconds: f64,
    weight: f64,
    required: bool,
) -> EvalResult {
    let details = format!(
        "latency {:.3}s vs limit {max_seconds:.3}s",
        trace.latency_seconds
    );
    if trace.latency_seconds <= max_seconds {
        EvalResult::pass(index, "latency_limit", weight, required, details)
    } else {
        EvalResult::fail(index, "latency_limit", weight, required, details)
    }
}
