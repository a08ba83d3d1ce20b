//! Plain-text rendering of suite results, replays, and re-evaluations.
//!
//! Output is terminal-agnostic text; the `CI` environment variable (or a
//! non-TTY stdout) is the caller's cue to avoid anything interactive, which
//! this module never produces anyway. Unknown cost always renders as "n/a",
//! never as zero.

use crate::recording::models::{RecordedTrace, RevalResult};
use crate::suite::{SuiteResult, TrialResult, Verdict};
use crate::types::MessageRole;

pub fn is_ci() -> bool {
    std::env::var("CI").map(|v| !v.is_empty()).unwrap_or(false)
}

pub fn format_cost(cost: Option<f64>) -> String {
    match cost {
        Some(cost) => format!("${cost:.4}"),
        None => "n/a".to_string(),
    }
}

fn verdict_symbol(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "✓ PASS",
        Verdict::Fail => "✗ FAIL",
        Verdict::HardFail => "! HARD FAIL",
        Verdict::Partial => "~ PARTIAL",
        Verdict::InfraError => "! INFRA ERROR",
    }
}

pub fn render_suite(suite: &SuiteResult, detailed: bool) -> String {
    let mut out = String::new();

    let scored: Vec<&TrialResult> = suite.trials.iter().filter(|t| !t.is_infra_error()).collect();
    let infra = suite.trials.len() - scored.len();
    let passed = scored.iter().filter(|t| t.passed).count();
    let hard_fails = scored.iter().filter(|t| t.hard_failed).count();
    let soft_fails = scored.len() - passed - hard_fails;

    out.push_str(&format!("Verdict   {}\n", verdict_symbol(suite.verdict)));
    out.push_str(&format!(
        "Scenario  {} ({} via {})\n",
        suite.scenario_id, suite.model, suite.adapter
    ));
    out.push_str(&format!(
        "Trials    {passed}/{} passed ({:.0}%)\n",
        suite.trials.len(),
        suite.pass_rate * 100.0
    ));
    out.push_str(&format!(
        "Score     avg={:.2} min={:.2} p50={:.2} p95={:.2} (threshold={:.2})\n",
        suite.mean_score, suite.score_min, suite.score_p50, suite.score_p95, suite.threshold
    ));

    if hard_fails > 0 || soft_fails > 0 {
        out.push_str(&format!(
            "Failures  {hard_fails} hard fail, {soft_fails} soft fail\n"
        ));
    }
    if let (Some(p50), Some(p95)) = (suite.latency_p50, suite.latency_p95) {
        out.push_str(&format!("Latency   p50={p50:.2}s p95={p95:.2}s\n"));
    }

    let cost_line = match (suite.cost_total, suite.cost_avg_per_trial) {
        (Some(total), Some(avg)) if suite.judge_cost_total > 0.0 => Some(format!(
            "total=${:.4} (agent=${total:.4} + judge=${:.4}) avg=${avg:.4}/trial",
            total + suite.judge_cost_total,
            suite.judge_cost_total
        )),
        (Some(total), Some(avg)) => Some(format!("total=${total:.4} avg=${avg:.4}/trial")),
        _ => Some("n/a".to_string()),
    };
    if let Some(cost_line) = cost_line {
        out.push_str(&format!("Cost      {cost_line}\n"));
    }

    if suite.total_retries > 0 {
        out.push_str(&format!(
            "Retries   {} across {} trial(s)\n",
            suite.total_retries, suite.trials_with_retries
        ));
    }
    if infra > 0 {
        out.push_str(&format!(
            "Infra     {infra} trial(s) errored (excluded from score)\n"
        ));
    }
    if suite.early_stopped {
        out.push_str(&format!(
            "Stopped   early after {}/{} trials ({})\n",
            suite.trials.len(),
            suite.n_requested,
            suite.early_stop_reason.as_deref().unwrap_or("cancelled")
        ));
    }

    if detailed {
        out.push('\n');
        out.push_str(&render_details(suite));
    }

    out
}

fn render_details(suite: &SuiteResult) -> String {
    let mut out = String::new();

    if !suite.failure_ranking.is_empty() {
        out.push_str("Top offenders\n");
        for (i, row) in suite.failure_ranking.iter().take(5).enumerate() {
            let avg_weight_lost = if row.fail_count > 0 {
                row.total_weight_lost / f64::from(row.fail_count)
            } else {
                0.0
            };
            out.push_str(&format!(
                "  {}. assertion #{} ({}) failed {}/{} ({:.0}%), weight impact {avg_weight_lost:.2}\n",
                i + 1,
                row.assertion_index,
                row.assertion_type,
                row.fail_count,
                suite.trials.len(),
                row.fail_rate * 100.0
            ));
            if let Some(sample) = row.sample_details.first() {
                out.push_str(&format!("     e.g. {sample}\n"));
            }
        }
        out.push('\n');
    }

    for trial in &suite.trials {
        out.push_str(&render_trial(trial));
    }

    out
}

/// Per-assertion lines for one trial, severity-ordered: hard fails first,
/// soft fails second, passes last.
pub fn render_trial(trial: &TrialResult) -> String {
    let mut out = String::new();

    let status = if trial.is_infra_error() {
        format!(
            "infra error: {}",
            trial.error.as_deref().unwrap_or("unknown")
        )
    } else if trial.hard_failed {
        "hard fail".to_string()
    } else if trial.passed {
        format!("passed (score {:.2})", trial.score)
    } else {
        format!("failed (score {:.2})", trial.score)
    };
    out.push_str(&format!("Trial {}: {status}\n", trial.trial_index));

    let mut ordered: Vec<&crate::eval::EvalResult> = trial.eval_results.iter().collect();
    ordered.sort_by_key(|r| {
        if r.required && !r.passed {
            0
        } else if !r.passed {
            1
        } else {
            2
        }
    });

    for result in ordered {
        let mark = if result.passed {
            "✓"
        } else if result.required {
            "!!"
        } else {
            "✗"
        };
        out.push_str(&format!(
            "  {mark} [{}] #{} {}\n",
            result.assertion_type, result.assertion_index, result.details
        ));
    }

    out
}

pub fn render_replay(recorded: &RecordedTrace) -> String {
    let mut out = String::new();
    out.push_str("══════════ [REPLAY] ══════════\n\n");

    if recorded.is_metadata_only() {
        out.push_str("Note: content excluded (metadata_only recording mode).\n\n");
    }

    let trace = &recorded.trace;
    out.push_str(&format!("Scenario  {}\n", recorded.metadata.scenario_name));
    out.push_str(&format!("Model     {} via {}\n", trace.model, trace.provider));
    out.push_str(&format!(
        "Recorded  {}\n",
        recorded.metadata.recorded_at.to_rfc3339()
    ));
    out.push_str(&format!("Run       {}\n", recorded.metadata.source_run_id));
    out.push_str(&format!("Turns     {}\n", trace.turn_count));
    out.push_str(&format!(
        "Tokens    {} (in={}, out={})\n",
        trace.usage.total_tokens, trace.usage.input_tokens, trace.usage.output_tokens
    ));
    out.push_str(&format!(
        "Latency   {:.2}s (recorded)\n",
        trace.latency_seconds
    ));
    out.push_str(&format!(
        "Cost      {} (recorded)\n",
        format_cost(trace.cost_usd)
    ));
    out.push_str(&format!("Finish    {}\n", trace.finish_reason.as_str()));

    out.push('\n');
    let final_output = match &trace.final_content {
        Some(content) if content.chars().count() > 500 => {
            let clipped: String = content.chars().take(500).collect();
            format!("{clipped}...")
        }
        Some(content) => content.clone(),
        None if recorded.is_metadata_only() => "[CONTENT_EXCLUDED]".to_string(),
        None => "(empty)".to_string(),
    };
    out.push_str(&format!("Final output: {final_output}\n"));

    let mut counts: Vec<(MessageRole, usize)> = Vec::new();
    for msg in &trace.messages {
        match counts.iter_mut().find(|(role, _)| *role == msg.role) {
            Some((_, count)) => *count += 1,
            None => counts.push((msg.role, 1)),
        }
    }
    if !counts.is_empty() {
        let summary = counts
            .iter()
            .map(|(role, count)| {
                let name = match role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::ToolResult => "tool_result",
                };
                format!("{count} {name}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("Messages: {summary}\n"));
    }

    out.push_str(&format!(
        "\nSchema version: {}\n",
        recorded.metadata.schema_version
    ));
    out
}

pub fn render_reval(reval: &RevalResult, notices: &[String]) -> String {
    let mut out = String::new();

    for notice in notices {
        out.push_str(&format!("warning: {notice}\n"));
    }
    if !notices.is_empty() {
        out.push('\n');
    }

    let verdict = if reval.passed { "✓ PASS" } else { "✗ FAIL" };
    out.push_str(&format!("Re-evaluation {verdict}\n"));
    out.push_str(&format!("Trace     {}\n", reval.original_trace_id));
    out.push_str(&format!(
        "Score     {:.2} (threshold={:.2})\n",
        reval.score, reval.threshold
    ));
    out.push_str(&format!(
        "Asserts   {} evaluated, {} skipped\n",
        reval.assertions_used, reval.assertions_skipped
    ));
    out.push_str(&format!("Saved     revals/{}.json\n", reval.reval_id));

    for result in &reval.eval_results {
        let mark = if result.passed { "✓" } else { "✗" };
        out.push_str(&format!(
            "  {mark} [{}] #{} {}\n",
            result.assertion_type, result.assertion_index, result.details
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalResult;
    use crate::suite::TrialStatus;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn unknown_cost_renders_na_never_zero() {
        assert_eq!(format_cost(None), "n/a");
        assert_eq!(format_cost(Some(0.1234)), "$0.1234");
    }

    #[test]
    fn trial_rendering_orders_by_severity() {
        let result = |index: usize, passed: bool, required: bool| EvalResult {
            assertion_index: index,
            assertion_type: "jmespath".into(),
            passed,
            score: if passed { 1.0 } else { 0.0 },
            weight: 1.0,
            required,
            details: format!("assertion {index}"),
            metadata: None,
        };
        let trial = TrialResult {
            trial_index: 1,
            run_id: Uuid::now_v7(),
            trace_id: Uuid::now_v7(),
            status: TrialStatus::Ok,
            trace: None,
            eval_results: vec![
                result(0, true, false),
                result(1, false, true),
                result(2, false, false),
            ],
            score: 0.3,
            passed: false,
            hard_failed: true,
            retry_count: 0,
            transient_error_kinds: vec![],
            error: None,
            latency_seconds: 0.1,
        };

        let rendered = render_trial(&trial);
        let hard = rendered.find("assertion 1").unwrap();
        let soft = rendered.find("assertion 2").unwrap();
        let pass = rendered.find("assertion 0").unwrap();
        assert!(hard < soft && soft < pass);
    }

    #[test]
    fn replay_banner_and_recorded_suffixes() {
        use crate::config::RecordingMode;
        use crate::recording::models::{RecordedTrace, TraceMetadata};
        use crate::scenario::Scenario;
        use crate::trace::Trace;

        let trace = Trace {
            cost_usd: Some(0.0123),
            latency_seconds: 1.5,
            ..Trace::error_stub(Uuid::now_v7(), "h".into(), "openai".into(), "gpt-4o".into())
        };
        let recorded = RecordedTrace {
            metadata: TraceMetadata {
                schema_version: 1,
                recording_mode: RecordingMode::Full,
                salvo_version: "0.1.0".into(),
                recorded_at: Utc::now(),
                source_run_id: Uuid::now_v7(),
                scenario_name: "demo".into(),
                scenario_file: "demo.yaml".into(),
                scenario_hash: "h".into(),
            },
            trace,
            scenario_snapshot: Scenario {
                description: "demo".into(),
                adapter: "openai".into(),
                model: "gpt-4o".into(),
                system_prompt: String::new(),
                prompt: "go".into(),
                tools: vec![],
                assertions: vec![],
                threshold: 0.8,
                max_turns: 10,
                temperature: None,
                seed: None,
                extras: serde_json::Map::new(),
            },
        };

        let rendered = render_replay(&recorded);
        assert!(rendered.contains("[REPLAY]"));
        assert!(rendered.contains("1.50s (recorded)"));
        assert!(rendered.contains("$0.0123 (recorded)"));
    }
}
