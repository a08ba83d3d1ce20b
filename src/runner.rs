//! ScenarioRunner: the multi-turn conversation loop with mock tool injection.
//!
//! Drives a scenario against one adapter, feeding mock tool responses back
//! into the conversation until the model answers without tool calls or the
//! turn cap intervenes. Retry is not handled here; that is an orchestrator
//! concern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::{Adapter, AdapterConfig};
use crate::cost::estimate_cost;
use crate::error::SalvoError;
use crate::orchestrator::CancelToken;
use crate::scenario::Scenario;
use crate::trace::Trace;
use crate::types::{AdapterTurnResult, FinishReason, Message, TokenUsage};

pub struct ScenarioRunner {
    adapter: Arc<dyn Adapter>,
}

impl ScenarioRunner {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }

    /// Execute one trial and return the full trace. `trace_id` is minted by
    /// the caller before any suspension point so error paths can reuse it.
    pub async fn run(
        &self,
        scenario: &Scenario,
        config: &AdapterConfig,
        trace_id: Uuid,
        cancel: &CancelToken,
    ) -> Result<Trace, SalvoError> {
        let scenario_hash = scenario.content_hash();

        let mut messages = Vec::new();
        if !scenario.system_prompt.is_empty() {
            messages.push(Message::system(scenario.system_prompt.clone()));
        }
        messages.push(Message::user(scenario.prompt.clone()));

        let mocks: HashMap<&str, &Value> = scenario
            .tools
            .iter()
            .filter_map(|tool| {
                tool.mock_response
                    .as_ref()
                    .map(|mock| (tool.name.as_str(), mock))
            })
            .collect();

        let mut usage = TokenUsage::default();
        let mut all_tool_calls = Vec::new();
        let mut turn_count: u32 = 0;
        let mut last_result: Option<AdapterTurnResult> = None;
        let started = Instant::now();

        for _ in 0..scenario.max_turns {
            if cancel.is_cancelled() {
                return Err(SalvoError::Cancelled);
            }

            turn_count += 1;
            let result = self
                .adapter
                .send_turn(&messages, &scenario.tools, config)
                .await?;

            usage.accumulate(&result.usage);
            messages.push(Message::assistant(
                result.content.clone(),
                result.tool_calls.clone(),
            ));
            all_tool_calls.extend(result.tool_calls.iter().cloned());

            if result.tool_calls.is_empty() {
                last_result = Some(result);
                break;
            }

            // Resolve every call in the turn before the next send, in
            // emission order, so parallel tool calls stay deterministic.
            for tc in &result.tool_calls {
                let Some(mock) = mocks.get(tc.name.as_str()) else {
                    let mut available: Vec<&str> = mocks.keys().copied().collect();
                    available.sort_unstable();
                    return Err(SalvoError::ToolMockMissing {
                        tool: tc.name.clone(),
                        available: if available.is_empty() {
                            "none".to_string()
                        } else {
                            available.join(", ")
                        },
                    });
                };
                let payload = match mock {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                messages.push(Message::tool_result(tc.id.clone(), tc.name.clone(), payload));
            }

            last_result = Some(result);
        }

        let latency_seconds = started.elapsed().as_secs_f64();

        let pending_tool_calls = last_result
            .as_ref()
            .map(|r| !r.tool_calls.is_empty())
            .unwrap_or(false);
        let max_turns_hit = turn_count >= scenario.max_turns && pending_tool_calls;

        let finish_reason = if max_turns_hit {
            FinishReason::Length
        } else {
            last_result
                .as_ref()
                .map(|r| r.finish_reason)
                .unwrap_or(FinishReason::Error)
        };

        let final_content = last_result.and_then(|r| r.content);

        let cost_usd = estimate_cost(&config.model, usage.input_tokens, usage.output_tokens);

        Ok(Trace {
            trace_id,
            scenario_hash,
            provider: self.adapter.provider_name().to_string(),
            model: config.model.clone(),
            messages,
            tool_calls: all_tool_calls,
            usage,
            latency_seconds,
            cost_usd,
            turn_count,
            finish_reason,
            max_turns_hit,
            final_content,
            timestamp: Utc::now(),
            extras_resolved: config.extras.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ScriptedAdapter, ScriptedTurn};
    use crate::scenario::ToolDef;
    use crate::types::MessageRole;
    use serde_json::json;

    fn scenario_with_search() -> Scenario {
        Scenario {
            description: "search scenario".into(),
            adapter: "scripted".into(),
            model: "gpt-4o".into(),
            system_prompt: "Use the tools.".into(),
            prompt: "find it".into(),
            tools: vec![ToolDef::new("search", "look things up")
                .with_mock_response(json!({"result": "ok"}))],
            assertions: vec![],
            threshold: 0.8,
            max_turns: 10,
            temperature: None,
            seed: None,
            extras: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn tool_loop_terminates_on_plain_answer() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::tool_call("search", json!({"q": "it"})),
            ScriptedTurn::text("done"),
        ]));
        let runner = ScenarioRunner::new(adapter);
        let scenario = scenario_with_search();
        let config = AdapterConfig::new("gpt-4o");

        let trace = runner
            .run(&scenario, &config, Uuid::now_v7(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(trace.turn_count, 2);
        assert_eq!(trace.finish_reason, FinishReason::Stop);
        assert!(!trace.max_turns_hit);
        assert_eq!(trace.final_content.as_deref(), Some("done"));
        assert_eq!(trace.tool_calls.len(), 1);
        assert_eq!(trace.tool_calls[0].name, "search");
        // system, user, assistant(tool), tool_result, assistant(final)
        assert_eq!(trace.messages.len(), 5);
        assert_eq!(trace.messages[3].role, MessageRole::ToolResult);
        assert_eq!(trace.scenario_hash, scenario.content_hash());
    }

    #[tokio::test]
    async fn dict_mocks_serialize_to_json_text() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::tool_call("search", json!({})),
            ScriptedTurn::text("done"),
        ]));
        let runner = ScenarioRunner::new(adapter);
        let scenario = scenario_with_search();

        let trace = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let tool_result = &trace.messages[3];
        assert_eq!(tool_result.content.as_deref(), Some(r#"{"result":"ok"}"#));
        assert_eq!(tool_result.tool_name.as_deref(), Some("search"));
    }

    #[tokio::test]
    async fn undefined_tool_fails_with_mock_missing() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::tool_call(
            "delete_everything",
            json!({}),
        )]));
        let runner = ScenarioRunner::new(adapter);
        let scenario = scenario_with_search();

        let err = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            SalvoError::ToolMockMissing { tool, available } => {
                assert_eq!(tool, "delete_everything");
                assert!(available.contains("search"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn turn_cap_marks_max_turns_hit_with_length_finish() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::tool_call(
            "search",
            json!({}),
        )]));
        let runner = ScenarioRunner::new(adapter);
        let mut scenario = scenario_with_search();
        scenario.max_turns = 1;

        let trace = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert!(trace.max_turns_hit);
        assert_eq!(trace.turn_count, 1);
        assert_eq!(trace.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn parallel_tool_calls_resolve_in_emission_order() {
        let turn = ScriptedTurn::tool_call("search", json!({"q": 1}))
            .with_tool_call("lookup", json!({"q": 2}));
        let adapter = Arc::new(ScriptedAdapter::new(vec![turn, ScriptedTurn::text("done")]));
        let runner = ScenarioRunner::new(adapter);
        let mut scenario = scenario_with_search();
        scenario
            .tools
            .push(ToolDef::new("lookup", "second tool").with_mock_response(json!("found")));

        let trace = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        let names: Vec<&str> = trace.tool_calls.iter().map(|tc| tc.name.as_str()).collect();
        assert_eq!(names, vec!["search", "lookup"]);
        let result_names: Vec<&str> = trace
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::ToolResult)
            .filter_map(|m| m.tool_name.as_deref())
            .collect();
        assert_eq!(result_names, vec!["search", "lookup"]);
        // string mock passes through without extra quoting
        assert_eq!(
            trace
                .messages
                .iter()
                .find(|m| m.tool_name.as_deref() == Some("lookup"))
                .and_then(|m| m.content.as_deref()),
            Some("found")
        );
    }

    #[tokio::test]
    async fn usage_accumulates_across_turns() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            ScriptedTurn::tool_call("search", json!({})).with_usage(100, 30),
            ScriptedTurn::text("done").with_usage(200, 20),
        ]));
        let runner = ScenarioRunner::new(adapter);
        let scenario = scenario_with_search();

        let trace = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(trace.usage.input_tokens, 300);
        assert_eq!(trace.usage.output_tokens, 50);
        assert_eq!(trace.usage.total_tokens, 350);
        // gpt-4o pricing is known, so cost is present
        assert!(trace.cost_usd.is_some());
    }

    #[tokio::test]
    async fn unknown_model_leaves_cost_unknown() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::text("hi")]));
        let runner = ScenarioRunner::new(adapter);
        let mut scenario = scenario_with_search();
        scenario.model = "mystery".into();

        let trace = runner
            .run(
                &scenario,
                &AdapterConfig::new("mystery"),
                Uuid::now_v7(),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert!(trace.cost_usd.is_none());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_first_turn() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedTurn::text("hi")]));
        let runner = ScenarioRunner::new(adapter.clone());
        let scenario = scenario_with_search();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = runner
            .run(
                &scenario,
                &AdapterConfig::new("gpt-4o"),
                Uuid::now_v7(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SalvoError::Cancelled));
        assert_eq!(adapter.calls(), 0);
    }
}
