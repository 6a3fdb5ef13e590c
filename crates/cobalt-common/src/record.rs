//! Connection, enrichment, vote, and consensus record schemas (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Transport protocol observed on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Capture source mode (spec §4.1). `Simulated` runs the synthetic
/// generator described in `cobalt_pipeline::capture` -- no root, no live
/// interface, no host-dependent `/proc` state -- and exists for running
/// the pipeline end to end in tests and local demos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Device,
    Network,
    Simulated,
}

/// Raw connection metadata as produced by the capture source.
///
/// Owned by the pipeline orchestrator: created by capture, consumed once by
/// enrichment, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub timestamp: Timestamp,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub src_mac: Option<String>,
    pub dst_mac: Option<String>,
    pub mode: CaptureMode,
    pub raw_flags: u32,
}

impl ConnectionRecord {
    /// A record with an empty `dst_ip` is dropped at ingress (spec §3 invariant).
    pub fn is_valid(&self) -> bool {
        !self.dst_ip.is_empty()
    }
}

/// Geolocation/ASN fields attached by the Geo and ASN intel clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
    pub as_org: Option<String>,
}

/// Aggregated reputation fields from the Reputation client (VT + AbuseIPDB).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReputationInfo {
    pub vt_positives: Option<u32>,
    pub vt_total: Option<u32>,
    pub abuseipdb_score: Option<u32>,
    pub is_known_malicious: bool,
    pub tags: Vec<String>,
    pub sources_used: Vec<String>,
}

impl ReputationInfo {
    /// Tie-break policy from spec §4.2.
    pub fn compute_is_known_malicious(&self) -> bool {
        self.vt_positives.unwrap_or(0) >= 3 || self.abuseipdb_score.unwrap_or(0) >= 75
    }
}

/// `ConnectionRecord` plus whatever enrichment succeeded before the deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub connection: ConnectionRecord,
    pub geo: Option<GeoInfo>,
    pub reputation: Option<ReputationInfo>,
    pub mac_vendor: Option<String>,
    pub enrichment_latency_ms: f64,
    pub enrichment_partial: bool,
}

impl EnrichedRecord {
    pub fn new(connection: ConnectionRecord) -> Self {
        Self {
            connection,
            geo: None,
            reputation: None,
            mac_vendor: None,
            enrichment_latency_ms: 0.0,
            enrichment_partial: false,
        }
    }

    pub fn is_known_malicious(&self) -> bool {
        self.reputation
            .as_ref()
            .map(|r| r.is_known_malicious)
            .unwrap_or(false)
    }

    pub fn country_code(&self) -> Option<&str> {
        self.geo.as_ref().and_then(|g| g.country_code.as_deref())
    }

    pub fn asn(&self) -> Option<u32> {
        self.geo.as_ref().and_then(|g| g.asn)
    }
}

/// Stable identifier for one of the three scorer implementations.
pub type ScorerId = String;

/// A signed vote emitted by one scorer for one record (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerVote {
    pub scorer_id: ScorerId,
    pub score: f64,
    pub confidence: f64,
    pub rationale: HashMap<String, f64>,
    pub timestamp: Timestamp,
    /// Hex-encoded HMAC-SHA256 over the canonical serialization of
    /// (scorer_id, score, confidence, rationale, timestamp).
    pub signature: String,
}

impl ScorerVote {
    /// Canonical byte serialization signed/verified by scorers and consensus.
    ///
    /// Field order and the pipe separator are fixed: any change here breaks
    /// every existing signature, so this is the one place both the signer
    /// and the verifier must stay in lockstep with.
    pub fn canonical_bytes(
        scorer_id: &str,
        score: f64,
        confidence: f64,
        rationale: &HashMap<String, f64>,
        timestamp: Timestamp,
    ) -> Vec<u8> {
        let mut keys: Vec<&String> = rationale.keys().collect();
        keys.sort();
        let rationale_str = keys
            .into_iter()
            .map(|k| format!("{}={:.6}", k, rationale[k]))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}|{:.6}|{:.6}|{}|{:.6}",
            scorer_id,
            score,
            confidence,
            rationale_str,
            timestamp.as_secs_f64()
        )
        .into_bytes()
    }
}

/// Final BFT-aggregated score for one observed connection (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusAssessment {
    pub dst_ip: String,
    pub dst_port: u16,
    pub timestamp: Timestamp,
    pub consensus_score: f64,
    pub confidence: f64,
    pub method: String,
    pub votes: Vec<ScorerVote>,
    pub outliers: Vec<ScorerId>,
    pub high_uncertainty: bool,
    pub score_spread: f64,
    pub num_scorers: usize,
    pub num_outliers: usize,
}

pub const CONSENSUS_METHOD: &str = "median_bft";
