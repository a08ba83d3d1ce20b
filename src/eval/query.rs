//! Structured-query evaluator: JMESPath expressions over a flattened view of
//! the trace.
//!
//! The view exposes four top-level names: `response` (final content and
//! finish reason), `turns` (the ordered message list), `tool_calls` (the
//! flat call list with arguments), and `metadata` (model, provider, cost,
//! latency, tokens, turn count).

use jmespath::Variable;
use regex::Regex;
use serde_json::{json, Value};

use crate::eval::EvalResult;
use crate::scenario::Operator;
use crate::trace::Trace;

const TYPE_NAME: &str = "jmespath";

/// Project a trace into the JSON shape query expressions run against.
pub fn build_trace_data(trace: &Trace) -> Value {
    json!({
        "response": {
            "content": trace.final_content,
            "finish_reason": trace.finish_reason.as_str(),
        },
        "turns": trace.messages,
        "tool_calls": trace.tool_calls,
        "metadata": {
            "model": trace.model,
            "provider": trace.provider,
            "cost_usd": trace.cost_usd,
            "latency_seconds": trace.latency_seconds,
            "input_tokens": trace.usage.input_tokens,
            "output_tokens": trace.usage.output_tokens,
            "total_tokens": trace.usage.total_tokens,
            "turn_count": trace.turn_count,
            "finish_reason": trace.finish_reason.as_str(),
        },
    })
}

pub fn evaluate(
    trace: &Trace,
    index: usize,
    expression: &str,
    operator: Operator,
    expected: &Value,
    weight: f64,
    required: bool,
) -> EvalResult {
    let compiled = match jmespath::compile(expression) {
        Ok(compiled) => compiled,
        Err(err) => {
            return EvalResult::fail(
                index,
                TYPE_NAME,
                weight,
                required,
                format!("JMESPath parse error: {err}"),
            )
        }
    };

    let data = build_trace_data(trace);
    let variable = match Variable::from_json(&data.to_string()) {
        Ok(variable) => variable,
        Err(err) => {
            return EvalResult::fail(
                index,
                TYPE_NAME,
                weight,
                required,
                format!("trace projection error: {err}"),
            )
        }
    };

    let actual = match compiled.search(variable) {
        Ok(actual) => actual,
        Err(err) => {
            return EvalResult::fail(
                index,
                TYPE_NAME,
                weight,
                required,
                format!("JMESPath search error: {err}"),
            )
        }
    };

    // Invalid regex patterns fail the assertion with the cause, rather than
    // silently comparing false.
    if operator == Operator::Regex {
        let pattern = value_as_text(expected);
        if let Err(err) = Regex::new(&pattern) {
            return EvalResult::fail(
                index,
                TYPE_NAME,
                weight,
                required,
                format!("invalid regex {pattern:?}: {err}"),
            );
        }
    }

    let passed = compare(&actual, operator, expected);
    let details = format!(
        "path={expression:?} operator={} expected={expected} actual={actual:?}",
        operator.as_str()
    );

    if passed {
        EvalResult::pass(index, TYPE_NAME, weight, required, details)
    } else {
        EvalResult::fail(index, TYPE_NAME, weight, required, details)
    }
}

/// Apply an operator between the resolved value and the expected literal.
/// A missing path resolves to null, which fails every operator including
/// `exists`. Ordering operators require both sides to be numbers; strings
/// are never implicitly coerced.
fn compare(actual: &Variable, operator: Operator, expected: &Value) -> bool {
    if actual.is_null() {
        return false;
    }

    match operator {
        Operator::Exists => true,
        Operator::Eq => expected_variable(expected)
            .map(|e| *actual == e)
            .unwrap_or(false),
        Operator::Ne => expected_variable(expected)
            .map(|e| *actual != e)
            .unwrap_or(false),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(a), Some(e)) = (actual.as_number(), expected.as_f64()) else {
                return false;
            };
            match operator {
                Operator::Gt => a > e,
                Operator::Gte => a >= e,
                Operator::Lt => a < e,
                _ => a <= e,
            }
        }
        Operator::Contains => {
            if let Some(haystack) = actual.as_string() {
                return haystack.contains(&value_as_text(expected));
            }
            if let Some(items) = actual.as_array() {
                return expected_variable(expected)
                    .map(|e| items.iter().any(|item| **item == e))
                    .unwrap_or(false);
            }
            false
        }
        Operator::Regex => {
            let pattern = value_as_text(expected);
            let Ok(regex) = Regex::new(&pattern) else {
                return false;
            };
            let haystack = match actual.as_string() {
                Some(s) => s.clone(),
                None => format!("{actual:?}"),
            };
            regex.is_match(&haystack)
        }
    }
}

fn expected_variable(expected: &Value) -> Option<Variable> {
    Variable::from_json(&expected.to_string()).ok()
}

/// Render an expected literal as plain text: strings unquoted, everything
/// else as compact JSON.
fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
