//! Assembles the context block the judge LLM sees: the agent's final
//! response and a tool-call summary, optionally preceded by the scenario's
//! system prompt and tool listing.

use crate::scenario::Scenario;
use crate::trace::Trace;

const MAX_ARG_LENGTH: usize = 100;
const MAX_SYSTEM_PROMPT_LENGTH: usize = 2000;

pub fn build_tool_call_summary(trace: &Trace) -> String {
    if trace.tool_calls.is_empty() {
        return "No tool calls were made.".to_string();
    }

    trace
        .tool_calls
        .iter()
        .enumerate()
        .map(|(i, tc)| {
            let mut args = tc.arguments.to_string();
            if args.len() > MAX_ARG_LENGTH {
                let mut cut = MAX_ARG_LENGTH;
                while cut > 0 && !args.is_char_boundary(cut) {
                    cut -= 1;
                }
                args.truncate(cut);
                args.push_str("...");
            }
            format!("{}. {}({args})", i + 1, tc.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_context(
    trace: &Trace,
    scenario: Option<&Scenario>,
    include_system_prompt: bool,
) -> String {
    let mut sections = Vec::new();

    if include_system_prompt {
        if let Some(scenario) = scenario {
            let mut sp = scenario.system_prompt.clone();
            if sp.len() > MAX_SYSTEM_PROMPT_LENGTH {
                let mut cut = MAX_SYSTEM_PROMPT_LENGTH;
                while cut > 0 && !sp.is_char_boundary(cut) {
                    cut -= 1;
                }
                sp.truncate(cut);
                sp.push_str("...");
            }
            sections.push(format!("## Scenario System Prompt\n\n{sp}"));

            if !scenario.tools.is_empty() {
                let tool_lines = scenario
                    .tools
                    .iter()
                    .map(|t| format!("- **{}**: {}", t.name, t.description))
                    .collect::<Vec<_>>()
                    .join("\n");
                sections.push(format!("## Available Tools\n\n{tool_lines}"));
            }
        }
    }

    let final_content = trace.final_content.as_deref().unwrap_or("(empty)");
    sections.push(format!("## Agent's Final Response\n\n{final_content}"));
    sections.push(format!(
        "## Tool Calls Made\n\n{}",
        build_tool_call_summary(trace)
    ));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ToolDef;
    use crate::types::{FinishReason, TokenUsage, ToolCall};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn trace() -> Trace {
        Trace {
            trace_id: Uuid::now_v7(),
            scenario_hash: "h".into(),
            provider: "scripted".into(),
            model: "m".into(),
            messages: vec![],
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "search".into(),
                arguments: json!({"q": "rust"}),
            }],
            usage: TokenUsage::default(),
            latency_seconds: 0.1,
            cost_usd: None,
            turn_count: 2,
            finish_reason: FinishReason::Stop,
            max_turns_hit: false,
            final_content: Some("the answer".into()),
            timestamp: Utc::now(),
            extras_resolved: serde_json::Map::new(),
        }
    }

    fn scenario() -> Scenario {
        Scenario {
            description: String::new(),
            adapter: "scripted".into(),
            model: "m".into(),
            system_prompt: "Be careful.".into(),
            prompt: "go".into(),
            tools: vec![ToolDef::new("search", "look things up")],
            assertions: vec![],
            threshold: 0.8,
            max_turns: 10,
            temperature: None,
            seed: None,
            extras: serde_json::Map::new(),
        }
    }

    #[test]
    fn summary_numbers_calls_with_arguments() {
        let summary = build_tool_call_summary(&trace());
        assert!(summary.starts_with("1. search("));
        assert!(summary.contains("rust"));
    }

    #[test]
    fn oversize_arguments_are_clipped() {
        let mut t = trace();
        t.tool_calls[0].arguments = json!({"blob": "x".repeat(500)});
        let summary = build_tool_call_summary(&t);
        assert!(summary.contains("..."));
        assert!(summary.len() < 200);
    }

    #[test]
    fn context_always_has_response_and_tool_sections() {
        let context = build_context(&trace(), None, false);
        assert!(context.contains("## Agent's Final Response"));
        assert!(context.contains("the answer"));
        assert!(context.contains("## Tool Calls Made"));
        assert!(!context.contains("## Scenario System Prompt"));
    }

    #[test]
    fn system_prompt_section_is_opt_in() {
        let scenario = scenario();
        let context = build_context(&trace(), Some(&scenario), true);
        assert!(context.contains("## Scenario System Prompt"));
        assert!(context.contains("Be careful."));
        assert!(context.contains("## Available Tools"));
        assert!(context.contains("**search**"));
    }

    #[test]
    fn empty_final_content_shows_placeholder() {
        let mut t = trace();
        t.final_content = None;
        let context = build_context(&t, None, false);
        assert!(context.contains("(empty)"));
    }
}
