//! LLM-as-judge evaluator with k-vote consensus.
//!
//! Pipeline: resolve effective config (assertion > project > defaults),
//! build prompts and the forced scoring tool, issue k independent calls,
//! extract votes with text-JSON fallbacks, aggregate per-criterion medians
//! into a weighted score. Judge cost accumulates separately from agent cost.

pub mod aggregation;
pub mod context;
pub mod extraction;
pub mod prompt;

use serde_json::json;

use crate::adapters::{get_adapter, AdapterConfig};
use crate::config::JudgeConfig;
use crate::cost::estimate_cost;
use crate::eval::judge::aggregation::aggregate_votes;
use crate::eval::judge::context::build_context;
use crate::eval::judge::extraction::{extract_vote, Vote};
use crate::eval::judge::prompt::{
    build_judge_system_prompt, build_judge_user_prompt, build_scoring_tool, format_tool_choice,
    SCORING_TOOL_NAME,
};
use crate::eval::{EvalContext, EvalResult};
use crate::scenario::{Assertion, Criterion};
use crate::trace::Trace;
use crate::types::Message;

const TYPE_NAME: &str = "judge";

/// Effective judge configuration after the three-tier merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJudgeConfig {
    pub adapter: String,
    pub model: String,
    pub k: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub threshold: f64,
}

/// Merge per-assertion overrides over the project judge section over the
/// hard-coded defaults.
pub fn resolve_judge_config(
    judge_adapter: Option<&str>,
    judge_model: Option<&str>,
    k: Option<u32>,
    threshold: Option<f64>,
    project: Option<&JudgeConfig>,
) -> ResolvedJudgeConfig {
    let defaults = JudgeConfig::default();
    let base = project.unwrap_or(&defaults);

    ResolvedJudgeConfig {
        adapter: judge_adapter.map(str::to_string).unwrap_or_else(|| base.adapter.clone()),
        model: judge_model.map(str::to_string).unwrap_or_else(|| base.model.clone()),
        k: k.unwrap_or(base.k),
        temperature: base.temperature,
        max_tokens: base.max_tokens,
        threshold: threshold.unwrap_or(base.default_threshold),
    }
}

pub async fn evaluate(
    trace: &Trace,
    index: usize,
    assertion: &Assertion,
    ctx: &EvalContext<'_>,
) -> EvalResult {
    let Assertion::Judge {
        criteria,
        judge_adapter,
        judge_model,
        k,
        include_system_prompt,
        custom_prompt,
        threshold,
        weight,
        required,
    } = assertion
    else {
        return EvalResult::fail(
            index,
            TYPE_NAME,
            assertion.weight(),
            assertion.required(),
            "judge evaluator dispatched on a non-judge assertion".to_string(),
        );
    };

    let config = resolve_judge_config(
        judge_adapter.as_deref(),
        judge_model.as_deref(),
        *k,
        *threshold,
        ctx.judge_config,
    );

    if config.k == 1 && ctx.verbose {
        tracing::warn!("judge k=1: a single vote has no outlier protection");
    }

    let adapter = match get_adapter(&config.adapter) {
        Ok(adapter) => adapter,
        Err(err) => {
            return EvalResult::fail(
                index,
                TYPE_NAME,
                *weight,
                *required,
                format!("judge adapter unavailable: {err}"),
            )
        }
    };

    let context_block = build_context(trace, ctx.scenario, *include_system_prompt);
    let system_prompt = custom_prompt
        .clone()
        .unwrap_or_else(|| build_judge_system_prompt(criteria));
    let user_prompt = build_judge_user_prompt(&context_block);
    let scoring_tool = build_scoring_tool(criteria);

    let adapter_config = AdapterConfig::new(config.model.clone())
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_extras(format_tool_choice(adapter.provider_name(), SCORING_TOOL_NAME));

    let messages = vec![
        Message::system(system_prompt),
        Message::user(user_prompt),
    ];
    let tools = vec![scoring_tool];

    let mut votes: Vec<Vote> = Vec::with_capacity(config.k as usize);
    let mut discarded = 0u32;
    let mut judge_cost_usd = 0.0;

    for _ in 0..config.k {
        match adapter.send_turn(&messages, &tools, &adapter_config).await {
            Ok(result) => {
                if let Some(cost) = estimate_cost(
                    &config.model,
                    result.usage.input_tokens,
                    result.usage.output_tokens,
                ) {
                    judge_cost_usd += cost;
                }
                match extract_vote(&result, criteria) {
                    Some(vote) => votes.push(vote),
                    None => {
                        discarded += 1;
                        tracing::debug!("judge vote discarded: unparseable response");
                    }
                }
            }
            Err(err) => {
                discarded += 1;
                tracing::debug!(error = %err, "judge call failed, vote discarded");
            }
        }
    }

    let metadata = |per_criterion: serde_json::Map<String, serde_json::Value>| {
        json!({
            "judge_model": config.model,
            "judge_k": config.k,
            "judge_cost_usd": judge_cost_usd,
            "per_criterion": per_criterion,
        })
    };

    if votes.is_empty() {
        let mut result = EvalResult::fail(
            index,
            TYPE_NAME,
            *weight,
            *required,
            format!("judge had no valid votes: {discarded}/{} calls failed", config.k),
        );
        result.metadata = Some(metadata(serde_json::Map::new()));
        return result;
    }

    let aggregated = aggregate_votes(&votes, criteria, config.threshold);

    let criterion_summary = criteria
        .iter()
        .map(|c: &Criterion| {
            let median = aggregated
                .per_criterion
                .get(&c.name)
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            format!("{}={median:.2}", c.name)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let details = format!(
        "judge={} k={} votes={}/{} | judge_cost=${judge_cost_usd:.6} | {criterion_summary}",
        config.model,
        config.k,
        votes.len(),
        config.k,
    );

    EvalResult {
        assertion_index: index,
        assertion_type: TYPE_NAME.to_string(),
        passed: aggregated.passed,
        score: aggregated.overall_score,
        weight: *weight,
        required: *required,
        details,
        metadata: Some(metadata(aggregated.per_criterion)),
    }
}
