//! Rule-Based scorer: an ordered list of predicates over the enriched
//! record, each contributing an additive weight (spec §4.4).

use std::collections::HashMap;

use async_trait::async_trait;
use cobalt_common::record::{EnrichedRecord, Protocol, ScorerVote};
use cobalt_common::timestamp::Timestamp;

use crate::scorer::Scorer;
use crate::signing::SigningKey;

pub const SCORER_ID: &str = "rule_based";

/// Countries treated as sanctioned destinations for rule purposes. A fixed,
/// small illustrative list -- operationalizing a real sanctions feed is
/// outside the core's scope (spec §1).
const SANCTIONED_COUNTRIES: &[&str] = &["KP", "IR", "SY"];

/// Ports commonly associated with malware C2 / lateral movement.
const KNOWN_BAD_PORT_RANGES: &[(u16, u16)] = &[(4444, 4444), (1337, 1337), (31337, 31337)];

pub struct Rule {
    pub name: &'static str,
    pub weight: f64,
    pub matches: fn(&EnrichedRecord) -> bool,
}

fn matches_known_bad_port(r: &EnrichedRecord) -> bool {
    KNOWN_BAD_PORT_RANGES
        .iter()
        .any(|(lo, hi)| r.connection.dst_port >= *lo && r.connection.dst_port <= *hi)
}

fn matches_sanctioned_country(r: &EnrichedRecord) -> bool {
    r.country_code()
        .map(|cc| SANCTIONED_COUNTRIES.contains(&cc))
        .unwrap_or(false)
}

fn matches_tor_or_vpn_tag(r: &EnrichedRecord) -> bool {
    r.reputation
        .as_ref()
        .map(|rep| rep.tags.iter().any(|t| t == "tor" || t == "vpn"))
        .unwrap_or(false)
}

fn matches_known_malicious(r: &EnrichedRecord) -> bool {
    r.is_known_malicious()
}

fn matches_private_to_public_anomaly(r: &EnrichedRecord) -> bool {
    // A device-mode capture observing a non-loopback source paired with a
    // public, known-malicious destination on an unencrypted protocol.
    r.connection.protocol == Protocol::Udp && r.is_known_malicious()
}

/// The fixed, ordered rule set (spec §4.4: "Typical rules: known-bad port
/// ranges, sanctioned-country destinations, Tor/VPN tags, private->public
/// anomalies").
fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "known_bad_port",
            weight: 0.3,
            matches: matches_known_bad_port,
        },
        Rule {
            name: "sanctioned_country",
            weight: 0.4,
            matches: matches_sanctioned_country,
        },
        Rule {
            name: "tor_or_vpn_tag",
            weight: 0.25,
            matches: matches_tor_or_vpn_tag,
        },
        Rule {
            name: "known_malicious_reputation",
            weight: 0.5,
            matches: matches_known_malicious,
        },
        Rule {
            name: "private_to_public_anomaly",
            weight: 0.15,
            matches: matches_private_to_public_anomaly,
        },
    ]
}

pub struct RuleBasedScorer {
    signer: SigningKey,
    rules: Vec<Rule>,
}

impl RuleBasedScorer {
    pub fn new(signer: SigningKey) -> Self {
        Self {
            signer,
            rules: default_rules(),
        }
    }

    pub fn with_rules(signer: SigningKey, rules: Vec<Rule>) -> Self {
        Self { signer, rules }
    }
}

#[async_trait]
impl Scorer for RuleBasedScorer {
    fn id(&self) -> &str {
        SCORER_ID
    }

    async fn score(&self, enriched: &EnrichedRecord) -> ScorerVote {
        let mut rationale = HashMap::new();
        let mut matched = 0usize;
        let mut sum = 0.0;

        for rule in &self.rules {
            if (rule.matches)(enriched) {
                rationale.insert(rule.name.to_string(), rule.weight);
                sum += rule.weight;
                matched += 1;
            }
        }

        let score = sum.clamp(0.0, 1.0);
        // Confidence rises with both how many rules fired and how specific
        // (high-weight) they were -- a single sanctioned-country hit is
        // more conclusive than one low-weight port match.
        let confidence = if matched == 0 {
            0.2
        } else {
            (0.3 + 0.15 * matched as f64 + 0.2 * (sum / self.rules.len() as f64)).min(1.0)
        };

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
    use cobalt_common::record::{CaptureMode, ConnectionRecord, GeoInfo, ReputationInfo};

    fn base_record() -> ConnectionRecord {
        ConnectionRecord {
            timestamp: Timestamp(0.0),
            src_ip: "10.0.0.1".into(),
            dst_ip: "185.220.101.1".into(),
            src_port: 5000,
            dst_port: 9001,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        }
    }

    #[tokio::test]
    async fn clean_record_scores_near_zero() {
        let scorer = RuleBasedScorer::new(SigningKey::from_bytes(vec![3u8; 32]).unwrap());
        let mut enriched = EnrichedRecord::new(base_record());
        enriched.connection.dst_port = 443;
        enriched.geo = Some(GeoInfo {
            country_code: Some("US".into()),
            ..Default::default()
        });
        let vote = scorer.score(&enriched).await;
        assert_eq!(vote.score, 0.0);
        assert!((vote.confidence - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tor_tagged_known_malicious_scores_high() {
        let scorer = RuleBasedScorer::new(SigningKey::from_bytes(vec![3u8; 32]).unwrap());
        let mut enriched = EnrichedRecord::new(base_record());
        enriched.reputation = Some(ReputationInfo {
            is_known_malicious: true,
            tags: vec!["tor".to_string()],
            ..Default::default()
        });
        let vote = scorer.score(&enriched).await;
        assert!(vote.score > 0.5);
        assert!(vote.rationale.contains_key("tor_or_vpn_tag"));
        assert!(vote.rationale.contains_key("known_malicious_reputation"));
    }
}
