//! Signature-verification seam between scorers and consensus.
//!
//! Consensus never constructs a `SigningKey` itself -- it only needs to
//! ask "does this vote verify", so it depends on this one trait rather
//! than on `cobalt-scorers` (spec §9: adding a scorer must never touch
//! consensus).

use cobalt_common::record::ScorerVote;

pub trait VoteVerifier: Send + Sync {
    /// `None` if no verifier is registered for `scorer_id` -- treated the
    /// same as a failed verification (the vote is discarded).
    fn verify(&self, scorer_id: &str, vote: &ScorerVote) -> bool;
}

/// A verifier backed by a fixed map of per-scorer verification closures,
/// built once at pipeline startup from the live `Scorer` instances.
pub struct MapVerifier {
    verifiers: std::collections::HashMap<String, Box<dyn Fn(&ScorerVote) -> bool + Send + Sync>>,
}

impl MapVerifier {
    pub fn new() -> Self {
        Self {
            verifiers: std::collections::HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        scorer_id: impl Into<String>,
        verify_fn: impl Fn(&ScorerVote) -> bool + Send + Sync + 'static,
    ) {
        self.verifiers.insert(scorer_id.into(), Box::new(verify_fn));
    }
}

impl Default for MapVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl VoteVerifier for MapVerifier {
    fn verify(&self, scorer_id: &str, vote: &ScorerVote) -> bool {
        match self.verifiers.get(scorer_id) {
            Some(f) => f(vote),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_common::timestamp::Timestamp;

    fn vote(scorer_id: &str) -> ScorerVote {
        ScorerVote {
            scorer_id: scorer_id.to_string(),
            score: 0.1,
            confidence: 0.5,
            rationale: Default::default(),
            timestamp: Timestamp(0.0),
            signature: String::new(),
        }
    }

    #[test]
    fn unregistered_scorer_fails_verification() {
        let verifier = MapVerifier::new();
        assert!(!verifier.verify("statistical", &vote("statistical")));
    }

    #[test]
    fn registered_scorer_delegates() {
        let mut verifier = MapVerifier::new();
        verifier.register("statistical", |_v| true);
        assert!(verifier.verify("statistical", &vote("statistical")));
    }
}
