//! Judge prompt assembly: system prompt with the 5-point anchoring scale,
//! user prompt wrapping the trace context, the scoring tool definition, and
//! provider-specific forced tool choice.

use serde_json::{json, Map, Value};

use crate::scenario::{Criterion, ToolDef};

pub const SCORING_TOOL_NAME: &str = "score_criteria";

const JUDGE_SYSTEM_TEMPLATE: &str = "\
You are an expert evaluator assessing the quality of an AI agent's response.

Evaluate the agent's response against each of the following criteria independently. Score each criterion on a 0.0 to 1.0 scale using these anchors:

- **0.0**: Completely fails to meet the criterion
- **0.25**: Mostly fails, with only minor elements present
- **0.5**: Partially meets the criterion
- **0.75**: Mostly meets the criterion with minor gaps
- **1.0**: Fully meets the criterion

**Criteria to evaluate:**

{criteria_block}

**Instructions:**
- Evaluate each criterion independently -- do not let one criterion's score influence another.
- Provide specific reasoning for each score referencing the agent's actual output.
- Use the score_criteria tool to submit your evaluation.";

const JUDGE_USER_TEMPLATE: &str = "\
Please evaluate the following agent interaction against the criteria defined in your instructions.

{context_block}

Use the score_criteria tool to submit your per-criterion scores and reasoning.";

pub fn build_criteria_block(criteria: &[Criterion]) -> String {
    criteria
        .iter()
        .map(|c| format!("- **{}** (weight: {}): {}", c.name, c.weight, c.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_judge_system_prompt(criteria: &[Criterion]) -> String {
    JUDGE_SYSTEM_TEMPLATE.replace("{criteria_block}", &build_criteria_block(criteria))
}

pub fn build_judge_user_prompt(context_block: &str) -> String {
    JUDGE_USER_TEMPLATE.replace("{context_block}", context_block)
}

/// The structured scoring tool the judge is forced to call: one nested
/// object per criterion with a numeric score and textual reasoning.
pub fn build_scoring_tool(criteria: &[Criterion]) -> ToolDef {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for c in criteria {
        required.push(Value::String(c.name.clone()));
        properties.insert(
            c.name.clone(),
            json!({
                "type": "object",
                "description": format!("Evaluation for '{}': {}", c.name, c.description),
                "properties": {
                    "score": {
                        "type": "number",
                        "description": format!("Score for {} on 0.0-1.0 scale", c.name),
                    },
                    "reasoning": {
                        "type": "string",
                        "description": format!("Reasoning for the {} score", c.name),
                    },
                },
                "required": ["score", "reasoning"],
            }),
        );
    }

    ToolDef::new(
        SCORING_TOOL_NAME,
        "Submit per-criterion evaluation scores and reasoning.",
    )
    .with_parameters(json!({
        "type": "object",
        "properties": properties,
        "required": required,
    }))
}

/// Provider-specific extras that force the scoring tool. Unknown providers
/// get no directive and rely on the prompt instruction alone.
pub fn format_tool_choice(provider_name: &str, tool_name: &str) -> Map<String, Value> {
    let lower = provider_name.to_ascii_lowercase();
    let mut extras = Map::new();

    if lower.contains("openai") {
        extras.insert(
            "tool_choice".to_string(),
            json!({"type": "function", "function": {"name": tool_name}}),
        );
    } else if lower.contains("anthropic") {
        extras.insert(
            "tool_choice".to_string(),
            json!({"type": "tool", "name": tool_name}),
        );
    }

    extras
}
