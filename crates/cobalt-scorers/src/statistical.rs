//! Statistical scorer: exponentially-weighted per-port/country/ASN baselines,
//! scoring on normalized deviation (spec §4.4).

use std::collections::HashMap;

use async_trait::async_trait;
use cobalt_common::record::{EnrichedRecord, ScorerVote};
use cobalt_common::timestamp::Timestamp;
use parking_lot::RwLock;

use crate::scorer::Scorer;
use crate::signing::SigningKey;

pub const SCORER_ID: &str = "statistical";

const EWMA_ALPHA: f64 = 0.1;
const MIN_SAMPLES_FOR_FULL_CONFIDENCE: u64 = 50;
const COLD_START_CONFIDENCE_CAP: f64 = 0.3;

#[derive(Clone, Default)]
struct Baseline {
    mean_freq: f64,
    samples: u64,
}

impl Baseline {
    fn update(&mut self, observed: f64) {
        if self.samples == 0 {
            self.mean_freq = observed;
        } else {
            self.mean_freq = EWMA_ALPHA * observed + (1.0 - EWMA_ALPHA) * self.mean_freq;
        }
        self.samples += 1;
    }

    fn deviation(&self, observed: f64) -> f64 {
        if self.mean_freq <= 0.0 {
            return 0.0;
        }
        ((observed - self.mean_freq).abs() / self.mean_freq.max(1.0)).min(1.0)
    }

    fn confidence(&self) -> f64 {
        (self.samples as f64 / MIN_SAMPLES_FOR_FULL_CONFIDENCE as f64).min(1.0)
    }
}

/// Rolling per-port, per-country, per-ASN connection-frequency baselines
/// from this scorer's own observation window. One `StatisticalScorer` is
/// either owned per enrichment worker, or shared behind the `RwLock`
/// already embedded here -- either variant is safe (spec §5).
pub struct StatisticalScorer {
    signer: SigningKey,
    port_baselines: RwLock<HashMap<u16, Baseline>>,
    country_baselines: RwLock<HashMap<String, Baseline>>,
    asn_baselines: RwLock<HashMap<u32, Baseline>>,
}

impl StatisticalScorer {
    pub fn new(signer: SigningKey) -> Self {
        Self {
            signer,
            port_baselines: RwLock::new(HashMap::new()),
            country_baselines: RwLock::new(HashMap::new()),
            asn_baselines: RwLock::new(HashMap::new()),
        }
    }

    fn observe_and_deviate_port(&self, port: u16) -> (f64, f64) {
        let mut baselines = self.port_baselines.write();
        let baseline = baselines.entry(port).or_default();
        let deviation = baseline.deviation(1.0);
        let confidence = baseline.confidence();
        baseline.update(1.0);
        (deviation, confidence)
    }

    fn observe_and_deviate_country(&self, country: &str) -> (f64, f64) {
        let mut baselines = self.country_baselines.write();
        let baseline = baselines.entry(country.to_string()).or_default();
        let deviation = baseline.deviation(1.0);
        let confidence = baseline.confidence();
        baseline.update(1.0);
        (deviation, confidence)
    }

    fn observe_and_deviate_asn(&self, asn: u32) -> (f64, f64) {
        let mut baselines = self.asn_baselines.write();
        let baseline = baselines.entry(asn).or_default();
        let deviation = baseline.deviation(1.0);
        let confidence = baseline.confidence();
        baseline.update(1.0);
        (deviation, confidence)
    }
}

#[async_trait]
impl Scorer for StatisticalScorer {
    fn id(&self) -> &str {
        SCORER_ID
    }

    async fn score(&self, enriched: &EnrichedRecord) -> ScorerVote {
        let mut rationale = HashMap::new();
        let (port_dev, port_conf) = self.observe_and_deviate_port(enriched.connection.dst_port);
        rationale.insert("port_deviation".to_string(), port_dev);

        let mut deviations = vec![port_dev];
        let mut confidences = vec![port_conf];

        if let Some(country) = enriched.country_code() {
            let (dev, conf) = self.observe_and_deviate_country(country);
            rationale.insert("country_deviation".to_string(), dev);
            deviations.push(dev);
            confidences.push(conf);
        }

        if let Some(asn) = enriched.asn() {
            let (dev, conf) = self.observe_and_deviate_asn(asn);
            rationale.insert("asn_deviation".to_string(), dev);
            deviations.push(dev);
            confidences.push(conf);
        }

        let score = (deviations.iter().sum::<f64>() / deviations.len() as f64).clamp(0.0, 1.0);
        let raw_confidence =
            (confidences.iter().sum::<f64>() / confidences.len() as f64).clamp(0.0, 1.0);
        let confidence = raw_confidence.min(
            // Cold start is gated by the least-filled window, since a
            // strong port baseline shouldn't mask an empty country one.
            if confidences.iter().any(|c| *c < 1.0) {
                confidences
                    .iter()
                    .cloned()
                    .fold(1.0, f64::min)
                    .max(COLD_START_CONFIDENCE_CAP.min(raw_confidence))
            } else {
                1.0
            },
        );

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
    use cobalt_common::record::{CaptureMode, ConnectionRecord, GeoInfo, Protocol};

    fn record(port: u16) -> EnrichedRecord {
        let connection = ConnectionRecord {
            timestamp: Timestamp(0.0),
            src_ip: "10.0.0.1".into(),
            dst_ip: "8.8.8.8".into(),
            src_port: 5000,
            dst_port: port,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        };
        let mut enriched = EnrichedRecord::new(connection);
        enriched.geo = Some(GeoInfo {
            country_code: Some("US".to_string()),
            asn: Some(15169),
            ..Default::default()
        });
        enriched
    }

    #[tokio::test]
    async fn cold_start_confidence_is_capped() {
        let scorer = StatisticalScorer::new(SigningKey::from_bytes(vec![1u8; 32]).unwrap());
        let vote = scorer.score(&record(443)).await;
        assert!(vote.confidence <= COLD_START_CONFIDENCE_CAP + 1e-9);
    }

    #[tokio::test]
    async fn repeated_observations_raise_confidence() {
        let scorer = StatisticalScorer::new(SigningKey::from_bytes(vec![1u8; 32]).unwrap());
        let mut last_confidence = 0.0;
        for _ in 0..60 {
            let vote = scorer.score(&record(443)).await;
            last_confidence = vote.confidence;
        }
        assert!(last_confidence > COLD_START_CONFIDENCE_CAP);
    }

    #[tokio::test]
    async fn vote_is_self_verifiable() {
        let scorer = StatisticalScorer::new(SigningKey::from_bytes(vec![2u8; 32]).unwrap());
        let vote = scorer.score(&record(22)).await;
        assert!(scorer.verify(&vote));
    }
}
