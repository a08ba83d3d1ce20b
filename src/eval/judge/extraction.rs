//! Vote extraction from judge responses: the forced tool call first, then
//! three text-JSON fallbacks (whole response, brace-balanced substring,
//! fenced code block). Votes that cannot be parsed are discarded.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::eval::judge::prompt::SCORING_TOOL_NAME;
use crate::scenario::Criterion;
use crate::types::AdapterTurnResult;

/// One vote: criterion name to clamped score in [0, 1].
pub type Vote = HashMap<String, f64>;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```").expect("fenced-json pattern must compile")
});

/// Extract a vote from one judge turn, or `None` when nothing parseable and
/// criterion-shaped came back.
pub fn extract_vote(result: &AdapterTurnResult, criteria: &[Criterion]) -> Option<Vote> {
    for tc in &result.tool_calls {
        if tc.name == SCORING_TOOL_NAME {
            if let Some(vote) = vote_from_value(&tc.arguments, criteria) {
                return Some(vote);
            }
        }
    }

    let content = result.content.as_deref()?;
    let parsed = json_from_text(content)?;
    vote_from_value(&parsed, criteria)
}

/// Pull per-criterion scores out of a `{name: {score, ...}}` object,
/// clamping into [0, 1]. At least one expected criterion must be present.
fn vote_from_value(value: &Value, criteria: &[Criterion]) -> Option<Vote> {
    let object = value.as_object()?;
    let mut vote = Vote::new();

    for criterion in criteria {
        let Some(entry) = object.get(&criterion.name) else {
            continue;
        };
        let Some(score) = entry.get("score").and_then(Value::as_f64) else {
            continue;
        };
        vote.insert(criterion.name.clone(), score.clamp(0.0, 1.0));
    }

    if vote.is_empty() {
        None
    } else {
        Some(vote)
    }
}

/// Three fallback strategies for judges that answered in prose instead of
/// calling the tool.
fn json_from_text(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() {
            return Some(value);
        }
    }

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if last > first {
            if let Ok(value) = serde_json::from_str::<Value>(&text[first..=last]) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    if let Some(captures) = FENCED_JSON.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, TokenUsage, ToolCall};
    use serde_json::json;

    fn criteria() -> Vec<Criterion> {
        vec![Criterion {
            name: "accuracy".into(),
            description: "correct".into(),
            weight: 1.0,
        }]
    }

    fn turn_with_tool_call(arguments: Value) -> AdapterTurnResult {
        AdapterTurnResult {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: SCORING_TOOL_NAME.into(),
                arguments,
            }],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::ToolUse,
        }
    }

    fn turn_with_text(content: &str) -> AdapterTurnResult {
        AdapterTurnResult {
            content: Some(content.to_string()),
            tool_calls: vec![],
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        }
    }

    #[test]
    fn tool_call_vote_extracts_and_clamps() {
        let turn = turn_with_tool_call(json!({
            "accuracy": {"score": 1.7, "reasoning": "great"},
        }));
        let vote = extract_vote(&turn, &criteria()).unwrap();
        assert_eq!(vote["accuracy"], 1.0);
    }

    #[test]
    fn negative_scores_clamp_to_zero() {
        let turn = turn_with_tool_call(json!({
            "accuracy": {"score": -0.5, "reasoning": "bad"},
        }));
        let vote = extract_vote(&turn, &criteria()).unwrap();
        assert_eq!(vote["accuracy"], 0.0);
    }

    #[test]
    fn whole_response_json_fallback() {
        let turn = turn_with_text(r#"{"accuracy": {"score": 0.75, "reasoning": "ok"}}"#);
        let vote = extract_vote(&turn, &criteria()).unwrap();
        assert_eq!(vote["accuracy"], 0.75);
    }

    #[test]
    fn brace_substring_fallback() {
        let turn = turn_with_text(
            r#"Here is my evaluation: {"accuracy": {"score": 0.5, "reasoning": "mixed"}} hope it helps"#,
        );
        let vote = extract_vote(&turn, &criteria()).unwrap();
        assert_eq!(vote["accuracy"], 0.5);
    }

    #[test]
    fn fenced_code_block_fallback() {
        let turn = turn_with_text(
            "my verdict:\n```json\n{\"accuracy\": {\"score\": 0.25, \"reasoning\": \"weak\"}}\n```\n",
        );
        let vote = extract_vote(&turn, &criteria()).unwrap();
        assert_eq!(vote["accuracy"], 0.25);
    }

    #[test]
    fn unrelated_json_is_discarded() {
        let turn = turn_with_text(r#"{"something_else": {"score": 1.0}}"#);
        assert!(extract_vote(&turn, &criteria()).is_none());
    }

    #[test]
    fn garbage_is_discarded() {
        let turn = turn_with_text("I cannot evaluate this.");
        assert!(extract_vote(&turn, &criteria()).is_none());
    }

    #[test]
    fn wrong_tool_name_falls_back_to_text() {
        let mut turn = turn_with_tool_call(json!({"accuracy": {"score": 0.9}}));
        turn.tool_calls[0].name = "other_tool".into();
        assert!(extract_vote(&turn, &criteria()).is_none());
    }
}
