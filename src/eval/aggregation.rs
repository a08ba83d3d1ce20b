//! Cross-trial aggregation: score/latency/cost metrics, the suite verdict,
//! and the failure ranking by assertion index.

use std::collections::BTreeMap;

use crate::suite::{FailureRow, TrialResult, Verdict};

/// Aggregate metrics over the scored (non-infra) trials.
#[derive(Debug, Clone, Default)]
pub struct AggregateMetrics {
    pub mean_score: f64,
    pub score_min: f64,
    pub score_p50: f64,
    pub score_p95: f64,
    pub pass_rate: f64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub cost_total: Option<f64>,
    pub cost_avg_per_trial: Option<f64>,
}

pub fn compute_aggregate_metrics(trials: &[TrialResult]) -> AggregateMetrics {
    let scored: Vec<&TrialResult> = trials.iter().filter(|t| !t.is_infra_error()).collect();
    if scored.is_empty() {
        return AggregateMetrics::default();
    }

    let scores: Vec<f64> = scored.iter().map(|t| t.score).collect();
    let latencies: Vec<f64> = scored.iter().map(|t| t.latency_seconds).collect();
    let costs: Vec<f64> = scored
        .iter()
        .filter_map(|t| t.trace.as_ref().and_then(|trace| trace.cost_usd))
        .collect();

    let n = scored.len() as f64;
    let mean_score = scores.iter().sum::<f64>() / n;
    let score_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let pass_rate = scored.iter().filter(|t| t.passed).count() as f64 / n;

    let (cost_total, cost_avg_per_trial) = if costs.is_empty() {
        (None, None)
    } else {
        let total: f64 = costs.iter().sum();
        (Some(total), Some(total / n))
    };

    AggregateMetrics {
        mean_score,
        score_min,
        score_p50: percentile(&scores, 0.50),
        score_p95: percentile(&scores, 0.95),
        pass_rate,
        latency_p50: Some(percentile(&latencies, 0.50)),
        latency_p95: Some(percentile(&latencies, 0.95)),
        cost_total,
        cost_avg_per_trial,
    }
}

/// Exclusive-interpolation percentile. A single sample stands for itself.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let h = (sorted.len() as f64 + 1.0) * p;
    if h <= 1.0 {
        return sorted[0];
    }
    if h >= sorted.len() as f64 {
        return sorted[sorted.len() - 1];
    }
    let lower = h.floor() as usize;
    let frac = h - h.floor();
    sorted[lower - 1] + frac * (sorted[lower] - sorted[lower - 1])
}

/// Suite verdict, by precedence. With `allow_infra`, infra-errored trials
/// are excluded from the counted set entirely.
pub fn determine_verdict(trials: &[TrialResult], allow_infra: bool) -> Verdict {
    let counted: Vec<&TrialResult> = if allow_infra {
        trials.iter().filter(|t| !t.is_infra_error()).collect()
    } else {
        trials.iter().collect()
    };

    if counted.is_empty() || counted.iter().all(|t| t.is_infra_error()) {
        return Verdict::InfraError;
    }

    if counted.iter().any(|t| t.hard_failed) {
        return Verdict::HardFail;
    }

    let passed = counted.iter().filter(|t| t.passed).count();
    if passed == counted.len() {
        Verdict::Pass
    } else if passed > 0 {
        Verdict::Partial
    } else {
        Verdict::Fail
    }
}

/// Group failing eval results by assertion index across trials and rank by
/// total weight lost (frequency times average weight lost). Each row keeps
/// up to three sample details.
pub fn aggregate_failures(trials: &[TrialResult]) -> Vec<FailureRow> {
    let total_trials = trials.len() as u32;
    if total_trials == 0 {
        return Vec::new();
    }

    let mut rows: BTreeMap<usize, FailureRow> = BTreeMap::new();

    for trial in trials {
        for result in &trial.eval_results {
            if result.passed {
                continue;
            }
            let row = rows
                .entry(result.assertion_index)
                .or_insert_with(|| FailureRow {
                    assertion_index: result.assertion_index,
                    assertion_type: result.assertion_type.clone(),
                    fail_count: 0,
                    fail_rate: 0.0,
                    total_weight_lost: 0.0,
                    sample_details: Vec::new(),
                });
            row.fail_count += 1;
            row.total_weight_lost += (1.0 - result.score) * result.weight;
            if row.sample_details.len() < 3 {
                row.sample_details.push(result.details.clone());
            }
        }
    }

    let mut ranked: Vec<FailureRow> = rows.into_values().collect();
    for row in &mut ranked {
        row.fail_rate = f64::from(row.fail_count) / f64::from(total_trials);
    }
    ranked.sort_by(|a, b| {
        b.total_weight_lost
            .partial_cmp(&a.total_weight_lost)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalResult;
    use crate::suite::TrialStatus;
    use uuid::Uuid;

    fn trial(
        index: u32,
        status: TrialStatus,
        score: f64,
        passed: bool,
        hard_failed: bool,
    ) -> TrialResult {
        TrialResult {
            trial_index: index,
            run_id: Uuid::now_v7(),
            trace_id: Uuid::now_v7(),
            status,
            trace: None,
            eval_results: vec![],
            score,
            passed,
            hard_failed,
            retry_count: 0,
            transient_error_kinds: vec![],
            error: None,
            latency_seconds: 1.0,
        }
    }

    fn failing_result(index: usize, score: f64, weight: f64) -> EvalResult {
        EvalResult {
            assertion_index: index,
            assertion_type: "jmespath".into(),
            passed: false,
            score,
            weight,
            required: false,
            details: format!("failure on assertion {index}"),
            metadata: None,
        }
    }

    #[test]
    fn percentile_single_value_stands() {
        assert_eq!(percentile(&[4.2], 0.95), 4.2);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.50) - 2.5).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.95), 4.0);
    }

    #[test]
    fn verdict_pass_requires_every_trial_passed() {
        let trials = vec![
            trial(1, TrialStatus::Ok, 1.0, true, false),
            trial(2, TrialStatus::Ok, 1.0, true, false),
        ];
        assert_eq!(determine_verdict(&trials, false), Verdict::Pass);
    }

    #[test]
    fn verdict_partial_when_some_pass() {
        let trials = vec![
            trial(1, TrialStatus::Ok, 1.0, true, false),
            trial(2, TrialStatus::Ok, 0.5, false, false),
        ];
        assert_eq!(determine_verdict(&trials, false), Verdict::Partial);
    }

    #[test]
    fn verdict_fail_when_none_pass() {
        let trials = vec![
            trial(1, TrialStatus::Ok, 0.2, false, false),
            trial(2, TrialStatus::Ok, 0.3, false, false),
        ];
        assert_eq!(determine_verdict(&trials, false), Verdict::Fail);
    }

    #[test]
    fn verdict_hard_fail_takes_precedence_over_partial() {
        let trials = vec![
            trial(1, TrialStatus::Ok, 1.0, true, false),
            trial(2, TrialStatus::Ok, 0.0, false, true),
        ];
        assert_eq!(determine_verdict(&trials, false), Verdict::HardFail);
    }

    #[test]
    fn all_infra_errors_yield_infra_verdict() {
        let trials = vec![
            trial(1, TrialStatus::InfraError, 0.0, false, false),
            trial(2, TrialStatus::InfraError, 0.0, false, false),
        ];
        assert_eq!(determine_verdict(&trials, false), Verdict::InfraError);
    }

    #[test]
    fn allow_infra_excludes_infra_trials_from_the_base_set() {
        let trials = vec![
            trial(1, TrialStatus::InfraError, 0.0, false, false),
            trial(2, TrialStatus::Ok, 1.0, true, false),
        ];
        assert_eq!(determine_verdict(&trials, true), Verdict::Pass);
        // Without the flag the infra trial counts and blocks PASS.
        assert_eq!(determine_verdict(&trials, false), Verdict::Partial);
    }

    #[test]
    fn metrics_skip_infra_trials() {
        let trials = vec![
            trial(1, TrialStatus::Ok, 1.0, true, false),
            trial(2, TrialStatus::InfraError, 0.0, false, false),
        ];
        let metrics = compute_aggregate_metrics(&trials);
        assert_eq!(metrics.mean_score, 1.0);
        assert_eq!(metrics.pass_rate, 1.0);
        assert_eq!(metrics.score_p50, 1.0);
    }

    #[test]
    fn failure_ranking_orders_by_weight_lost() {
        let mut t1 = trial(1, TrialStatus::Ok, 0.5, false, false);
        t1.eval_results = vec![failing_result(0, 0.0, 1.0), failing_result(1, 0.0, 5.0)];
        let mut t2 = trial(2, TrialStatus::Ok, 0.5, false, false);
        t2.eval_results = vec![failing_result(0, 0.0, 1.0)];

        let ranking = aggregate_failures(&[t1, t2]);
        assert_eq!(ranking.len(), 2);
        // assertion 1 lost 5.0 weight in one trial, assertion 0 lost 2.0 in two
        assert_eq!(ranking[0].assertion_index, 1);
        assert_eq!(ranking[0].fail_count, 1);
        assert_eq!(ranking[1].assertion_index, 0);
        assert_eq!(ranking[1].fail_count, 2);
        assert!((ranking[1].fail_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sample_details_cap_at_three() {
        let mut trials = Vec::new();
        for i in 1..=5 {
            let mut t = trial(i, TrialStatus::Ok, 0.0, false, false);
            t.eval_results = vec![failing_result(0, 0.0, 1.0)];
            trials.push(t);
        }
        let ranking = aggregate_failures(&trials);
        assert_eq!(ranking[0].fail_count, 5);
        assert_eq!(ranking[0].sample_details.len(), 3);
    }
}
