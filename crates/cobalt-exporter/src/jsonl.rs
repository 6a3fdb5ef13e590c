//! Detailed JSON Lines sink: one line per `ConsensusAssessment`, full
//! enriched record and vote set included (spec §4.7, §6.3).

use cobalt_common::record::{ConsensusAssessment, EnrichedRecord, ScorerVote};
use serde::Serialize;

#[derive(Serialize)]
struct JsonlMetadata {
    num_scorers: usize,
    num_outliers: usize,
    score_spread: f64,
}

#[derive(Serialize)]
struct JsonlConsensus<'a> {
    consensus_score: f64,
    confidence: f64,
    high_uncertainty: bool,
    method: &'a str,
    votes: &'a [ScorerVote],
    outliers: &'a [String],
    metadata: JsonlMetadata,
}

#[derive(Serialize)]
struct JsonlLine<'a> {
    timestamp: f64,
    dst_ip: &'a str,
    dst_port: u16,
    enriched: &'a EnrichedRecord,
    consensus: JsonlConsensus<'a>,
}

/// Renders one newline-terminated JSONL record. UTF-8, no BOM -- `serde_json`
/// never emits one.
pub fn render_line(enriched: &EnrichedRecord, consensus: &ConsensusAssessment) -> String {
    let line = JsonlLine {
        timestamp: consensus.timestamp.as_secs_f64(),
        dst_ip: &consensus.dst_ip,
        dst_port: consensus.dst_port,
        enriched,
        consensus: JsonlConsensus {
            consensus_score: consensus.consensus_score,
            confidence: consensus.confidence,
            high_uncertainty: consensus.high_uncertainty,
            method: &consensus.method,
            votes: &consensus.votes,
            outliers: &consensus.outliers,
            metadata: JsonlMetadata {
                num_scorers: consensus.num_scorers,
                num_outliers: consensus.num_outliers,
                score_spread: consensus.score_spread,
            },
        },
    };
    let mut s = serde_json::to_string(&line).expect("JsonlLine is always serializable");
    s.push('\n');
    s
}


#[cfg(test)]
mod roundtrip_laws {
    use super::*;
    use cobalt_common::record::{CaptureMode, ConnectionRecord, Protocol};
    use cobalt_common::timestamp::Timestamp;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn assessment_for(dst_ip: String, dst_port: u16, score: f64, n: usize) -> ConsensusAssessment {
        let votes: Vec<ScorerVote> = (0..n)
            .map(|i| ScorerVote {
                scorer_id: format!("scorer_{i}"),
                score,
                confidence: 0.5,
                rationale: HashMap::new(),
                timestamp: Timestamp(1.0),
                signature: "deadbeef".into(),
            })
            .collect();
        ConsensusAssessment {
            dst_ip,
            dst_port,
            timestamp: Timestamp(1.0),
            consensus_score: score,
            confidence: 0.5,
            method: "median_bft".into(),
            votes,
            outliers: vec![],
            high_uncertainty: false,
            score_spread: 0.0,
            num_scorers: n,
            num_outliers: 0,
        }
    }

    fn enriched_for(dst_ip: &str, dst_port: u16) -> EnrichedRecord {
        EnrichedRecord::new(ConnectionRecord {
            timestamp: Timestamp(1.0),
            src_ip: "10.0.0.1".into(),
            dst_ip: dst_ip.into(),
            src_port: 5000,
            dst_port,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        })
    }

    proptest! {
        // spec §8 round-trip law: every rendered line is independently valid
        // JSON regardless of the destination/score/vote-count it carries.
        #[test]
        fn every_rendered_line_is_independently_parseable(
            dst_ip in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
            dst_port in 1u16..=65535,
            score in 0.0f64..=1.0,
            n in 0usize..6,
        ) {
            let enriched = enriched_for(&dst_ip, dst_port);
            let assessment = assessment_for(dst_ip, dst_port, score, n);
            let line = render_line(&enriched, &assessment);
            prop_assert!(line.ends_with('\n'));
            let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
            prop_assert_eq!(parsed["consensus"]["votes"].as_array().unwrap().len(), n);
        }

        // Concatenating independently rendered lines must stay valid JSONL:
        // every line parses on its own even after files are appended together.
        #[test]
        fn concatenated_lines_remain_independently_parseable(
            scores in prop::collection::vec(0.0f64..=1.0, 1..8),
        ) {
            let mut buf = String::new();
            for (i, score) in scores.iter().enumerate() {
                let enriched = enriched_for("8.8.8.8", 443);
                let assessment = assessment_for("8.8.8.8".into(), 443, *score, i % 3);
                buf.push_str(&render_line(&enriched, &assessment));
            }
            for line in buf.lines().filter(|l| !l.is_empty()) {
                let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
                prop_assert!(parsed["consensus"]["consensus_score"].is_number());
            }
        }
    }
}
