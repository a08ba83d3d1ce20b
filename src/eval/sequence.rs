//! Tool-sequence evaluator: compares observed tool names against an expected
//! pattern under EXACT, IN_ORDER, or ANY_ORDER matching.
//!
//! Failure details name the first point of divergence to aid debugging.

use std::collections::HashMap;

use crate::eval::EvalResult;
use crate::scenario::SequenceMode;
use crate::trace::Trace;

const TYPE_NAME: &str = "tool_sequence";

pub fn evaluate(
    trace: &Trace,
    index: usize,
    expected: &[String],
    mode: SequenceMode,
    weight: f64,
    required: bool,
) -> EvalResult {
    let actual: Vec<&str> = trace.tool_calls.iter().map(|tc| tc.name.as_str()).collect();

    let (passed, details) = match mode {
        SequenceMode::Exact => match_exact(&actual, expected),
        SequenceMode::InOrder => match_in_order(&actual, expected),
        SequenceMode::AnyOrder => match_any_order(&actual, expected),
    };

    if passed {
        EvalResult::pass(index, TYPE_NAME, weight, required, details)
    } else {
        EvalResult::fail(index, TYPE_NAME, weight, required, details)
    }
}

/// Observed equals expected: same length, same order.
fn match_exact(actual: &[&str], expected: &[String]) -> (bool, String) {
    if actual.is_empty() && !expected.is_empty() {
        return (false, format!("no tool calls made; expected {expected:?}"));
    }

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        if *a != e.as_str() {
            return (
                false,
                format!(
                    "divergence at position {i}: expected {e:?} but got {a:?}; \
                     actual {actual:?}, expected {expected:?}"
                ),
            );
        }
    }

    if actual.len() < expected.len() {
        let missing = &expected[actual.len()..];
        return (
            false,
            format!(
                "too few tool calls: got {}, expected {}; missing {missing:?}",
                actual.len(),
                expected.len()
            ),
        );
    }

    if actual.len() > expected.len() {
        let extra = &actual[expected.len()..];
        return (
            false,
            format!(
                "too many tool calls: got {}, expected {}; extra {extra:?}",
                actual.len(),
                expected.len()
            ),
        );
    }

    (true, format!("exact match: {actual:?}"))
}

/// Expected is a subsequence of observed; extras are allowed anywhere.
fn match_in_order(actual: &[&str], expected: &[String]) -> (bool, String) {
    if actual.is_empty() && !expected.is_empty() {
        return (false, format!("no tool calls made; expected {expected:?}"));
    }

    let mut ei = 0;
    for a in actual {
        if ei < expected.len() && *a == expected[ei].as_str() {
            ei += 1;
        }
    }

    if ei == expected.len() {
        return (
            true,
            format!("in-order match: found {expected:?} within {actual:?}"),
        );
    }

    let matched = &expected[..ei];
    let stalled_at = &expected[ei];
    (
        false,
        format!(
            "in-order match stalled: matched {matched:?} but could not find \
             {stalled_at:?} (expected[{ei}]) in the remaining calls; \
             actual {actual:?}, expected {expected:?}"
        ),
    )
}

/// Observed is a multiset-superset of expected: every expected tool appears
/// at least as often as demanded.
fn match_any_order(actual: &[&str], expected: &[String]) -> (bool, String) {
    if actual.is_empty() && !expected.is_empty() {
        return (false, format!("no tool calls made; expected {expected:?}"));
    }

    let mut actual_counts: HashMap<&str, usize> = HashMap::new();
    for a in actual {
        *actual_counts.entry(a).or_default() += 1;
    }
    let mut expected_counts: HashMap<&str, usize> = HashMap::new();
    for e in expected {
        *expected_counts.entry(e.as_str()).or_default() += 1;
    }

    let mut missing: Vec<String> = Vec::new();
    for e in expected {
        let Some(count) = expected_counts.remove(e.as_str()) else {
            continue; // already reported for a duplicate entry
        };
        let have = actual_counts.get(e.as_str()).copied().unwrap_or(0);
        if have < count {
            missing.push(format!("{e:?} (expected {count}, got {have})"));
        }
    }

    if missing.is_empty() {
        (
            true,
            format!("any-order match: all of {expected:?} found in {actual:?}"),
        )
    } else {
        (false, format!("missing tool calls: {}", missing.join(", ")))
    }
}
