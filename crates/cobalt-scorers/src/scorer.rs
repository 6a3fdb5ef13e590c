//! Common `Scorer` capability set (spec §9: dynamic dispatch over scorers).

use async_trait::async_trait;
use cobalt_common::record::{EnrichedRecord, ScorerVote};

/// Capability set every scorer implements: `score`, `verify` (via its
/// signing key), and a stable `id`. Consensus only depends on this trait,
/// so adding a fourth scorer never requires touching the BFT algorithm.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn id(&self) -> &str;

    /// Deterministic given `(enriched, internal state)`; must complete
    /// within the scorer's deadline -- callers enforce the deadline with
    /// `tokio::time::timeout`, not the scorer itself.
    async fn score(&self, enriched: &EnrichedRecord) -> ScorerVote;

    fn verify(&self, vote: &ScorerVote) -> bool;
}

/// A vote carrying `score=0.0, confidence=0.0` and a `missing_features`
/// rationale, for when required inputs are absent (spec §4.4).
pub fn missing_features_vote(scorer_id: &str, signer: &crate::signing::SigningKey) -> ScorerVote {
    use cobalt_common::timestamp::Timestamp;
    use std::collections::HashMap;

    let rationale = HashMap::from([("missing_features".to_string(), 1.0)]);
    let timestamp = Timestamp::now();
    let signature = signer.sign(scorer_id, 0.0, 0.0, &rationale, timestamp);
    ScorerVote {
        scorer_id: scorer_id.to_string(),
        score: 0.0,
        confidence: 0.0,
        rationale,
        timestamp,
        signature,
    }
}
