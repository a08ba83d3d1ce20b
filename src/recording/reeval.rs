//! Re-evaluation of recorded traces against updated assertions, with drift
//! detection and metadata_only compatibility handling.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::JudgeConfig;
use crate::error::SalvoError;
use crate::eval::scorer::compute_score;
use crate::eval::{evaluate_assertion, EvalContext};
use crate::recording::models::{RecordedTrace, RevalResult};
use crate::scenario::Scenario;
use crate::storage::RunStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReevalOptions {
    /// Skip content-dependent assertions on metadata_only traces instead of
    /// refusing outright.
    pub allow_partial: bool,
    /// Refuse when the supplied scenario's hash differs from the recorded
    /// one; the default is a warning.
    pub strict_scenario: bool,
}

#[derive(Debug)]
pub struct ReevalOutcome {
    pub reval: RevalResult,
    /// Human-readable notices: hash drift warnings, skipped assertions.
    pub notices: Vec<String>,
}

/// Re-run the assertion pipeline over a recorded trace. When `scenario` is
/// None the snapshot embedded in the recording is used. The result is
/// persisted under `revals/`.
pub async fn reevaluate(
    store: &Arc<RunStore>,
    recorded: &RecordedTrace,
    scenario: Option<&Scenario>,
    judge_config: Option<&JudgeConfig>,
    options: ReevalOptions,
) -> Result<ReevalOutcome, SalvoError> {
    let mut notices = Vec::new();

    let effective = scenario.unwrap_or(&recorded.scenario_snapshot);
    let hash_at_reeval = effective.content_hash();

    if scenario.is_some() && hash_at_reeval != recorded.metadata.scenario_hash {
        if options.strict_scenario {
            return Err(SalvoError::ScenarioInvalid(format!(
                "scenario hash {hash_at_reeval} does not match recorded hash {}; \
                 drop --strict-scenario to re-evaluate anyway",
                recorded.metadata.scenario_hash
            )));
        }
        notices.push(format!(
            "scenario has changed since recording (hash {} -> {hash_at_reeval})",
            recorded.metadata.scenario_hash
        ));
    }

    // Keep original indexes so cross-run comparisons line up even when some
    // assertions are skipped.
    let mut evaluable = Vec::new();
    let mut skipped = 0u32;

    for (index, assertion) in effective.assertions.iter().enumerate() {
        if recorded.is_metadata_only() && assertion.is_content_dependent() {
            if options.allow_partial {
                skipped += 1;
                notices.push(format!(
                    "skipping assertion {index} ({}): content excluded by metadata_only recording",
                    assertion.type_name()
                ));
                continue;
            }
            return Err(SalvoError::ScenarioInvalid(format!(
                "assertion {index} ({}) needs message content, but this trace was recorded \
                 metadata_only; pass --allow-partial-reeval to skip such assertions",
                assertion.type_name()
            )));
        }
        evaluable.push((index, assertion.normalized()));
    }

    let ctx = EvalContext {
        scenario: Some(effective),
        judge_config,
        verbose: false,
    };

    let mut eval_results = Vec::with_capacity(evaluable.len());
    for (index, assertion) in &evaluable {
        eval_results.push(evaluate_assertion(&recorded.trace, *index, assertion, &ctx).await);
    }

    let outcome = compute_score(&eval_results, effective.threshold);

    let reval = RevalResult {
        reval_id: Uuid::now_v7(),
        original_trace_id: recorded.trace.trace_id,
        scenario_hash_at_reeval: hash_at_reeval,
        eval_results,
        score: outcome.score,
        passed: outcome.passed,
        threshold: effective.threshold,
        evaluated_at: Utc::now(),
        assertions_used: evaluable.len() as u32,
        assertions_skipped: skipped,
    };

    store.save_reval(&reval)?;

    Ok(ReevalOutcome { reval, notices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingMode;
    use crate::recording::models::{TraceMetadata, CURRENT_TRACE_SCHEMA_VERSION};
    use crate::recording::recorder::strip_content_for_metadata_only;
    use crate::scenario::{Assertion, SequenceMode};
    use crate::trace::Trace;
    use crate::types::{FinishReason, Message, TokenUsage, ToolCall};
    use serde_json::json;

    fn scenario(assertions: Vec<Assertion>) -> Scenario {
        Scenario {
            description: "reeval demo".into(),
            adapter: "scripted".into(),
            model: "gpt-4o".into(),
            system_prompt: String::new(),
            prompt: "go".into(),
            tools: vec![],
            assertions,
            threshold: 0.8,
            max_turns: 10,
            temperature: None,
            seed: None,
            extras: serde_json::Map::new(),
        }
    }

    fn trace(scenario_hash: &str) -> Trace {
        Trace {
            trace_id: Uuid::now_v7(),
            scenario_hash: scenario_hash.to_string(),
            provider: "scripted".into(),
            model: "gpt-4o".into(),
            messages: vec![
                Message::user("go"),
                Message::assistant(Some("done searching".into()), vec![]),
            ],
            tool_calls: vec![ToolCall {
                id: "call_search".into(),
                name: "search".into(),
                arguments: json!({"q": "x"}),
            }],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
            },
            latency_seconds: 0.3,
            cost_usd: Some(0.001),
            turn_count: 2,
            finish_reason: FinishReason::Stop,
            max_turns_hit: false,
            final_content: Some("done searching".into()),
            timestamp: Utc::now(),
            extras_resolved: serde_json::Map::new(),
        }
    }

    fn recorded(scenario: Scenario, mode: RecordingMode) -> RecordedTrace {
        let hash = scenario.content_hash();
        let mut t = trace(&hash);
        if mode == RecordingMode::MetadataOnly {
            t = strip_content_for_metadata_only(&t);
        }
        RecordedTrace {
            metadata: TraceMetadata {
                schema_version: CURRENT_TRACE_SCHEMA_VERSION,
                recording_mode: mode,
                salvo_version: env!("CARGO_PKG_VERSION").to_string(),
                recorded_at: Utc::now(),
                source_run_id: Uuid::now_v7(),
                scenario_name: "reeval demo".into(),
                scenario_file: "demo.yaml".into(),
                scenario_hash: hash,
            },
            trace: t,
            scenario_snapshot: scenario,
        }
    }

    fn store() -> (tempfile::TempDir, Arc<RunStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::new(dir.path()));
        (dir, store)
    }

    #[tokio::test]
    async fn reeval_with_snapshot_scores_and_persists() {
        let (_dir, store) = store();
        let rec = recorded(
            scenario(vec![Assertion::ToolCalled {
                tool: "search".into(),
                weight: 1.0,
                required: false,
            }]),
            RecordingMode::Full,
        );

        let outcome = reevaluate(&store, &rec, None, None, ReevalOptions::default())
            .await
            .unwrap();

        assert!(outcome.reval.passed);
        assert_eq!(outcome.reval.assertions_used, 1);
        assert_eq!(outcome.reval.original_trace_id, rec.trace.trace_id);
        assert!(outcome.notices.is_empty());

        let loaded = store
            .load_reval(&outcome.reval.reval_id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, outcome.reval);
    }

    #[tokio::test]
    async fn strict_scenario_refuses_on_hash_drift() {
        let (_dir, store) = store();
        let rec = recorded(scenario(vec![]), RecordingMode::Full);
        let mut fresh = scenario(vec![]);
        fresh.prompt = "something new".into();

        let options = ReevalOptions {
            allow_partial: false,
            strict_scenario: true,
        };
        let err = reevaluate(&store, &rec, Some(&fresh), None, options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn non_strict_drift_warns_and_records_new_hash() {
        let (_dir, store) = store();
        let rec = recorded(
            scenario(vec![Assertion::ToolCalled {
                tool: "search".into(),
                weight: 1.0,
                required: false,
            }]),
            RecordingMode::Full,
        );
        let mut fresh = scenario(vec![Assertion::ToolCalled {
            tool: "search".into(),
            weight: 1.0,
            required: false,
        }]);
        fresh.prompt = "something new".into();

        let outcome = reevaluate(&store, &rec, Some(&fresh), None, ReevalOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.reval.scenario_hash_at_reeval, fresh.content_hash());
        assert_ne!(
            outcome.reval.scenario_hash_at_reeval,
            rec.metadata.scenario_hash
        );
        assert!(outcome.notices.iter().any(|n| n.contains("changed")));
    }

    #[tokio::test]
    async fn metadata_only_refuses_content_dependent_by_default() {
        let (_dir, store) = store();
        let rec = recorded(
            scenario(vec![Assertion::OutputContains {
                value: "searching".into(),
                weight: 1.0,
                required: false,
            }]),
            RecordingMode::MetadataOnly,
        );

        let err = reevaluate(&store, &rec, None, None, ReevalOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("metadata_only"));
    }

    #[tokio::test]
    async fn metadata_only_skips_with_allow_partial() {
        let (_dir, store) = store();
        let rec = recorded(
            scenario(vec![
                Assertion::OutputContains {
                    value: "searching".into(),
                    weight: 1.0,
                    required: false,
                },
                Assertion::ToolSequence {
                    sequence: vec!["search".into()],
                    mode: SequenceMode::AnyOrder,
                    weight: 1.0,
                    required: false,
                },
            ]),
            RecordingMode::MetadataOnly,
        );

        let options = ReevalOptions {
            allow_partial: true,
            strict_scenario: false,
        };
        let outcome = reevaluate(&store, &rec, None, None, options).await.unwrap();

        assert_eq!(outcome.reval.assertions_skipped, 1);
        assert_eq!(outcome.reval.assertions_used, 1);
        // tool names survive metadata_only stripping
        assert!(outcome.reval.eval_results[0].passed);
        assert_eq!(outcome.reval.eval_results[0].assertion_index, 1);
        assert!(outcome.notices.iter().any(|n| n.contains("skipping")));
    }
}
