//! Fixed-weight "ML" scorer: a logistic combination of enriched features
//! with weights loaded from a TOML file at startup (spec §4.4).
//!
//! No training loop, no online learning -- the spec explicitly scopes
//! model training out (Non-goals), so this is a static linear model
//! evaluated per record, same shape as the teacher's `ModelConfig` but
//! with the feature set the spec actually calls for.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use cobalt_common::error::{CobaltError, CobaltResult};
use cobalt_common::record::{EnrichedRecord, ScorerVote};
use cobalt_common::timestamp::Timestamp;
use serde::Deserialize;

use crate::scorer::{missing_features_vote, Scorer};
use crate::signing::SigningKey;

pub const SCORER_ID: &str = "ml_based";

#[derive(Debug, Clone, Deserialize)]
pub struct MlWeights {
    #[serde(default = "default_bias")]
    pub bias: f64,
    #[serde(default = "default_reputation_weight")]
    pub reputation_weight: f64,
    #[serde(default = "default_vt_weight")]
    pub vt_ratio_weight: f64,
    #[serde(default = "default_abuseipdb_weight")]
    pub abuseipdb_weight: f64,
    #[serde(default = "default_unprivileged_port_weight")]
    pub unprivileged_port_weight: f64,
    #[serde(default = "default_tag_weight")]
    pub suspicious_tag_weight: f64,
}

fn default_bias() -> f64 {
    -2.0
}
fn default_reputation_weight() -> f64 {
    3.0
}
fn default_vt_weight() -> f64 {
    2.5
}
fn default_abuseipdb_weight() -> f64 {
    2.0
}
fn default_unprivileged_port_weight() -> f64 {
    0.3
}
fn default_tag_weight() -> f64 {
    1.5
}

impl Default for MlWeights {
    fn default() -> Self {
        Self {
            bias: default_bias(),
            reputation_weight: default_reputation_weight(),
            vt_ratio_weight: default_vt_weight(),
            abuseipdb_weight: default_abuseipdb_weight(),
            unprivileged_port_weight: default_unprivileged_port_weight(),
            suspicious_tag_weight: default_tag_weight(),
        }
    }
}

impl MlWeights {
    pub fn from_toml_str(s: &str) -> CobaltResult<Self> {
        toml::from_str(s).map_err(|e| CobaltError::ConfigInvalid(format!("ml weights: {e}")))
    }

    pub fn load_from_file(path: &Path) -> CobaltResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CobaltError::ConfigInvalid(format!("reading ml weights {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub struct MlScorer {
    signer: SigningKey,
    weights: MlWeights,
}

impl MlScorer {
    pub fn new(signer: SigningKey, weights: MlWeights) -> Self {
        Self { signer, weights }
    }

    fn features(enriched: &EnrichedRecord) -> HashMap<&'static str, f64> {
        let mut features = HashMap::new();

        let reputation_feature = if enriched.is_known_malicious() { 1.0 } else { 0.0 };
        features.insert("reputation", reputation_feature);

        let vt_ratio = enriched
            .reputation
            .as_ref()
            .and_then(|r| match (r.vt_positives, r.vt_total) {
                (Some(pos), Some(total)) if total > 0 => Some(pos as f64 / total as f64),
                _ => None,
            })
            .unwrap_or(0.0);
        features.insert("vt_ratio", vt_ratio);

        let abuseipdb = enriched
            .reputation
            .as_ref()
            .and_then(|r| r.abuseipdb_score)
            .map(|s| s as f64 / 100.0)
            .unwrap_or(0.0);
        features.insert("abuseipdb", abuseipdb);

        let unprivileged_port = if enriched.connection.dst_port >= 1024 {
            1.0
        } else {
            0.0
        };
        features.insert("unprivileged_port", unprivileged_port);

        let suspicious_tag = enriched
            .reputation
            .as_ref()
            .map(|r| {
                if r.tags.iter().any(|t| t == "tor" || t == "vpn" || t == "c2") {
                    1.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        features.insert("suspicious_tag", suspicious_tag);

        features
    }
}

#[async_trait]
impl Scorer for MlScorer {
    fn id(&self) -> &str {
        SCORER_ID
    }

    async fn score(&self, enriched: &EnrichedRecord) -> ScorerVote {
        // Reputation is this scorer's one required input (every feature but
        // the port bucket derives from it); without it there is nothing to
        // evaluate the model against (spec §4.4).
        if enriched.reputation.is_none() {
            return missing_features_vote(SCORER_ID, &self.signer);
        }

        let features = Self::features(enriched);
        let w = &self.weights;

        let logit = w.bias
            + w.reputation_weight * features["reputation"]
            + w.vt_ratio_weight * features["vt_ratio"]
            + w.abuseipdb_weight * features["abuseipdb"]
            + w.unprivileged_port_weight * features["unprivileged_port"]
            + w.suspicious_tag_weight * features["suspicious_tag"];

        let score = sigmoid(logit).clamp(0.0, 1.0);
        let confidence = ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0);

        let mut rationale = HashMap::new();
        for (k, v) in features {
            rationale.insert(k.to_string(), v);
        }

        let timestamp = Timestamp::now();
        let signature = self
            .signer
            .sign(SCORER_ID, score, confidence, &rationale, timestamp);

        ScorerVote {
            scorer_id: SCORER_ID.to_string(),
            score,
            confidence,
            rationale,
            timestamp,
            signature,
        }
    }

    fn verify(&self, vote: &ScorerVote) -> bool {
        self.signer.verify(vote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_common::record::{CaptureMode, ConnectionRecord, Protocol, ReputationInfo};

    fn record(malicious: bool) -> EnrichedRecord {
        let connection = ConnectionRecord {
            timestamp: Timestamp(0.0),
            src_ip: "10.0.0.1".into(),
            dst_ip: "8.8.8.8".into(),
            src_port: 5000,
            dst_port: 443,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        };
        let mut enriched = EnrichedRecord::new(connection);
        enriched.reputation = Some(if malicious {
            ReputationInfo {
                vt_positives: Some(10),
                vt_total: Some(70),
                abuseipdb_score: Some(90),
                is_known_malicious: true,
                tags: vec!["c2".to_string()],
                sources_used: vec!["virustotal".to_string()],
            }
        } else {
            ReputationInfo::default()
        });
        enriched
    }

    #[test]
    fn default_weights_parse_from_empty_toml() {
        let weights = MlWeights::from_toml_str("").unwrap();
        assert_eq!(weights.bias, default_bias());
    }

    #[test]
    fn malformed_weights_file_is_config_invalid() {
        let err = MlWeights::from_toml_str("bias = not_a_number").unwrap_err();
        assert!(matches!(err, CobaltError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn malicious_record_scores_higher_than_clean() {
        let scorer = MlScorer::new(
            SigningKey::from_bytes(vec![9u8; 32]).unwrap(),
            MlWeights::default(),
        );
        let clean_vote = scorer.score(&record(false)).await;
        let bad_vote = scorer.score(&record(true)).await;
        assert!(bad_vote.score > clean_vote.score);
        assert!(bad_vote.confidence > clean_vote.confidence);
    }

    #[tokio::test]
    async fn vote_self_verifies() {
        let scorer = MlScorer::new(
            SigningKey::from_bytes(vec![9u8; 32]).unwrap(),
            MlWeights::default(),
        );
        let vote = scorer.score(&record(true)).await;
        assert!(scorer.verify(&vote));
    }

    #[tokio::test]
    async fn missing_reputation_yields_missing_features_vote() {
        let scorer = MlScorer::new(
            SigningKey::from_bytes(vec![9u8; 32]).unwrap(),
            MlWeights::default(),
        );
        let mut enriched = record(false);
        enriched.reputation = None;
        let vote = scorer.score(&enriched).await;
        assert_eq!(vote.score, 0.0);
        assert_eq!(vote.confidence, 0.0);
        assert_eq!(vote.rationale.get("missing_features"), Some(&1.0));
        assert!(scorer.verify(&vote));
    }
}
