//! HMAC-SHA256 signing/verification for `ScorerVote` (spec §3, §4.4).

use std::collections::HashMap;

use cobalt_common::record::ScorerVote;
use cobalt_common::timestamp::Timestamp;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Minimum key length required by spec §4.4 ("secret key material of >= 32 bytes").
pub const MIN_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("key material must be at least {MIN_KEY_LEN} bytes, got {0}")]
    KeyTooShort(usize),
}

/// Holds a scorer's signing key and exposes sign/verify over the vote's
/// canonical serialization. `verify` recomputes the HMAC and compares in
/// constant time via `hmac::Mac::verify_slice`.
pub struct SigningKey {
    key: Vec<u8>,
}

impl SigningKey {
    pub fn from_bytes(key: Vec<u8>) -> Result<Self, SigningError> {
        if key.len() < MIN_KEY_LEN {
            return Err(SigningError::KeyTooShort(key.len()));
        }
        Ok(Self { key })
    }

    /// Generates a fresh random key for a process run with no configured
    /// secret (spec §4.4: "generated fresh per process run").
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// First 8 hex chars of SHA256(key): safe to log, never reveals the key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.key);
        hex::encode(digest)[..8].to_string()
    }

    pub fn sign(
        &self,
        scorer_id: &str,
        score: f64,
        confidence: f64,
        rationale: &HashMap<String, f64>,
        timestamp: Timestamp,
    ) -> String {
        let bytes = ScorerVote::canonical_bytes(scorer_id, score, confidence, rationale, timestamp);
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&bytes);
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, vote: &ScorerVote) -> bool {
        let bytes = ScorerVote::canonical_bytes(
            &vote.scorer_id,
            vote.score,
            vote.confidence,
            &vote.rationale,
            vote.timestamp,
        );
        let Ok(expected) = hex::decode(&vote.signature) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(&bytes);
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_bytes(vec![7u8; 32]).unwrap()
    }

    #[test]
    fn short_key_rejected() {
        assert!(SigningKey::from_bytes(vec![0u8; 16]).is_err());
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let k = key();
        let rationale = HashMap::from([("port".to_string(), 1.0)]);
        let ts = Timestamp(12345.0);
        let sig = k.sign("statistical", 0.42, 0.8, &rationale, ts);
        let vote = ScorerVote {
            scorer_id: "statistical".into(),
            score: 0.42,
            confidence: 0.8,
            rationale,
            timestamp: ts,
            signature: sig,
        };
        assert!(k.verify(&vote));
    }

    #[test]
    fn tampered_score_fails_verification() {
        let k = key();
        let rationale = HashMap::new();
        let ts = Timestamp(1.0);
        let sig = k.sign("rule_based", 0.1, 0.5, &rationale, ts);
        let mut vote = ScorerVote {
            scorer_id: "rule_based".into(),
            score: 0.1,
            confidence: 0.5,
            rationale,
            timestamp: ts,
            signature: sig,
        };
        vote.score = 0.9;
        assert!(!k.verify(&vote));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let k = key();
        assert_eq!(k.fingerprint().len(), 8);
        assert_eq!(k.fingerprint(), key().fingerprint());
    }
}

#[cfg(test)]
mod roundtrip_laws {
    use super::*;
    use proptest::prelude::*;

    // spec §8 round-trip law: a vote a scorer signed must verify under that
    // same key for any score/confidence/rationale/timestamp it might emit,
    // and any single-field tamper must break verification.
    fn arb_rationale() -> impl Strategy<Value = HashMap<String, f64>> {
        prop::collection::hash_map(
            "[a-z_]{1,12}",
            -10.0f64..10.0,
            0..5,
        )
    }

    proptest! {
        #[test]
        fn sign_verify_roundtrips_for_arbitrary_votes(
            scorer_id in "[a-z_]{1,16}",
            score in 0.0f64..=1.0,
            confidence in 0.0f64..=1.0,
            rationale in arb_rationale(),
            ts in 0.0f64..2_000_000_000.0,
        ) {
            let k = SigningKey::from_bytes(vec![3u8; 32]).unwrap();
            let timestamp = Timestamp(ts);
            let signature = k.sign(&scorer_id, score, confidence, &rationale, timestamp);
            let vote = ScorerVote {
                scorer_id,
                score,
                confidence,
                rationale,
                timestamp,
                signature,
            };
            prop_assert!(k.verify(&vote));
        }

        #[test]
        fn tampering_score_after_signing_always_fails_verification(
            scorer_id in "[a-z_]{1,16}",
            score in 0.0f64..=1.0,
            confidence in 0.0f64..=1.0,
            rationale in arb_rationale(),
            ts in 0.0f64..2_000_000_000.0,
            delta in 0.01f64..1.0,
        ) {
            let k = SigningKey::from_bytes(vec![3u8; 32]).unwrap();
            let timestamp = Timestamp(ts);
            let signature = k.sign(&scorer_id, score, confidence, &rationale, timestamp);
            let mut vote = ScorerVote {
                scorer_id,
                score,
                confidence,
                rationale,
                timestamp,
                signature,
            };
            vote.score = (vote.score + delta) % 1.0001;
            prop_assert!(!k.verify(&vote));
        }
    }
}
