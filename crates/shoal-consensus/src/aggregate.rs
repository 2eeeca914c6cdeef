// crates/shoal-consensus/src/aggregate.rs
//
// Score aggregation for settled epochs.
//
// Consumes the validated (commitment-matched) reveals of one epoch and
// produces each target peer's consensus score plus an agreement metric:
// the fraction of authors whose score fell within the configured tolerance
// band of the aggregate. A target nobody validly scored yields an explicit
// NoConsensus outcome, never a numeric zero.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shoal_core::identity::PeerId;
use shoal_core::records::{EpochSettlement, RevealRecord, TargetOutcome};

/// How per-target scores are combined. Mean is the default; Median is
/// available for outlier robustness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Mean,
    Median,
}

/// Aggregation parameters. Deliberately configuration, not hidden
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub method: AggregationMethod,
    /// Half-width of the agreement band around the aggregate.
    pub tolerance: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            method: AggregationMethod::Mean,
            tolerance: 0.1,
        }
    }
}

/// Aggregate one epoch's valid reveals into a settlement.
///
/// `targets` is the eligible target set (peers live at commit time); every
/// target receives an outcome. Scores for peers outside the target set are
/// ignored. The result depends only on the multiset of input scores, not
/// on the order reveals arrive in.
pub fn aggregate_epoch(
    epoch: u64,
    reveals: &[RevealRecord],
    targets: &[PeerId],
    config: &AggregatorConfig,
    settled_at: DateTime<Utc>,
) -> EpochSettlement {
    // Collect per-target score lists across all authors.
    let mut per_target: BTreeMap<&PeerId, Vec<f64>> =
        targets.iter().map(|t| (t, Vec::new())).collect();

    for reveal in reveals {
        for (target, score) in reveal.scores.iter() {
            if let Some(scores) = per_target.get_mut(target) {
                scores.push(score);
            }
        }
    }

    let outcomes: BTreeMap<PeerId, TargetOutcome> = per_target
        .into_iter()
        .map(|(target, scores)| {
            let outcome = if scores.is_empty() {
                TargetOutcome::NoConsensus
            } else {
                let score = match config.method {
                    AggregationMethod::Mean => mean(&scores),
                    AggregationMethod::Median => median(&scores),
                };
                let within_band = scores
                    .iter()
                    .filter(|s| (**s - score).abs() <= config.tolerance)
                    .count();
                TargetOutcome::Scored {
                    score,
                    agreement: within_band as f64 / scores.len() as f64,
                    sample_size: scores.len(),
                }
            };
            (target.clone(), outcome)
        })
        .collect();

    EpochSettlement {
        epoch,
        settled_at,
        outcomes,
    }
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn median(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
