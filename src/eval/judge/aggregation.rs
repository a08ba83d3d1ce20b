//! k-vote aggregation: per-criterion medians, then a weighted mean across
//! criteria compared against the judge threshold. The median is robust to a
//! single outlier vote, which is the point of running k > 1.

use serde_json::{Map, Value};

use crate::eval::judge::extraction::Vote;
use crate::scenario::Criterion;

pub struct AggregatedVotes {
    pub overall_score: f64,
    pub passed: bool,
    /// Criterion name to median score, in criterion order.
    pub per_criterion: Map<String, Value>,
}

pub fn aggregate_votes(votes: &[Vote], criteria: &[Criterion], threshold: f64) -> AggregatedVotes {
    if votes.is_empty() {
        return AggregatedVotes {
            overall_score: 0.0,
            passed: false,
            per_criterion: Map::new(),
        };
    }

    let mut per_criterion = Map::new();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for criterion in criteria {
        let mut scores: Vec<f64> = votes
            .iter()
            .filter_map(|vote| vote.get(&criterion.name).copied())
            .collect();
        let med = median(&mut scores);
        per_criterion.insert(criterion.name.clone(), Value::from(med));
        weighted_sum += med * criterion.weight;
        total_weight += criterion.weight;
    }

    let overall_score = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    };

    AggregatedVotes {
        overall_score,
        passed: overall_score >= threshold,
        per_criterion,
    }
}

/// Median of the collected scores; a criterion no vote scored counts as 0.
fn median(scores: &mut [f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = scores.len() / 2;
    if scores.len() % 2 == 1 {
        scores[mid]
    } else {
        (scores[mid - 1] + scores[mid]) / 2.0
    }
}
