//! Byzantine-fault-tolerant consensus over signed scorer votes (spec §4.5).
//!
//! Verifies signatures, rejects outliers by Median Absolute Deviation, and
//! emits one [`ConsensusAssessment`] per connection. Consensus never knows
//! which concrete scorers produced the votes -- it only depends on
//! [`VoteVerifier`] and the vote set itself, so the algorithm generalizes
//! unchanged to any `n >= 2` scorers.

pub mod mad;
pub mod verifier;

pub use verifier::{MapVerifier, VoteVerifier};

use cobalt_common::config::ConsensusConfig;
use cobalt_common::record::{ConsensusAssessment, ScorerVote, CONSENSUS_METHOD};
use cobalt_common::timestamp::Timestamp;
use tracing::{debug, warn};

/// Runs the consensus procedure over one connection's collected votes.
///
/// `votes` may already be short (a scorer that missed its deadline emits
/// no vote at all -- that never reaches this function). Any vote that
/// fails `verifier.verify` is discarded before the MAD step and does not
/// count toward `num_scorers`.
pub fn run(
    dst_ip: &str,
    dst_port: u16,
    timestamp: Timestamp,
    votes: Vec<ScorerVote>,
    config: &ConsensusConfig,
    verifier: &dyn VoteVerifier,
) -> ConsensusAssessment {
    let (verified, rejected): (Vec<ScorerVote>, Vec<ScorerVote>) = votes
        .into_iter()
        .partition(|v| verifier.verify(&v.scorer_id, v));

    for vote in &rejected {
        warn!(scorer_id = %vote.scorer_id, dst_ip, "vote signature invalid, discarded");
    }

    let n = verified.len();

    if n < config.min_scorers {
        let consensus_score = if verified.is_empty() {
            0.0
        } else {
            verified.iter().map(|v| v.score).sum::<f64>() / n as f64
        };
        debug!(dst_ip, n, min = config.min_scorers, "degraded consensus: too few verified votes");
        return ConsensusAssessment {
            dst_ip: dst_ip.to_string(),
            dst_port,
            timestamp,
            consensus_score,
            confidence: 0.0,
            method: CONSENSUS_METHOD.to_string(),
            votes: verified,
            outliers: Vec::new(),
            high_uncertainty: true,
            score_spread: 0.0,
            num_scorers: n,
            num_outliers: 0,
        };
    }

    let scores: Vec<f64> = verified.iter().map(|v| v.score).collect();
    let center = mad::median(&scores);
    let mad_value = mad::mad(&scores, center);

    let is_outlier = |score: f64| -> bool {
        let deviation = (score - center).abs();
        if mad_value == 0.0 {
            deviation > config.outlier_threshold
        } else {
            deviation > config.mad_k * mad_value || deviation > config.outlier_threshold
        }
    };

    let mut outlier_ids = Vec::new();
    let mut non_outliers: Vec<&ScorerVote> = Vec::new();
    for vote in &verified {
        if is_outlier(vote.score) {
            outlier_ids.push(vote.scorer_id.clone());
        } else {
            non_outliers.push(vote);
        }
    }

    // All votes agreeing to disagree: fall back to the full set rather
    // than emit a score with nothing backing it, and flag the result.
    let (consensus_score, confidence_pool, forced_uncertainty) = if non_outliers.is_empty() {
        (center, verified.iter().collect::<Vec<_>>(), true)
    } else {
        let pool_scores: Vec<f64> = non_outliers.iter().map(|v| v.score).collect();
        (mad::median(&pool_scores), non_outliers.clone(), false)
    };

    let mean_confidence = confidence_pool.iter().map(|v| v.confidence).sum::<f64>()
        / confidence_pool.len() as f64;
    let fraction_outliers = outlier_ids.len() as f64 / n as f64;
    let confidence = (mean_confidence * (1.0 - fraction_outliers)).clamp(0.0, 1.0);

    let score_spread = if confidence_pool.len() < 2 {
        0.0
    } else {
        let max = confidence_pool
            .iter()
            .map(|v| v.score)
            .fold(f64::MIN, f64::max);
        let min = confidence_pool
            .iter()
            .map(|v| v.score)
            .fold(f64::MAX, f64::min);
        max - min
    };

    let outlier_tolerance = (n.saturating_sub(1)) / 3;
    let high_uncertainty = forced_uncertainty
        || score_spread > config.uncertainty_threshold
        || outlier_ids.len() > outlier_tolerance;

    ConsensusAssessment {
        dst_ip: dst_ip.to_string(),
        dst_port,
        timestamp,
        consensus_score,
        confidence,
        method: CONSENSUS_METHOD.to_string(),
        votes: verified,
        outliers: outlier_ids.clone(),
        high_uncertainty,
        score_spread,
        num_scorers: n,
        num_outliers: outlier_ids.len(),
    }
}
