//! Summary CSV sink: fixed column set, one row per `ConsensusAssessment`
//! (spec §4.7, §6.3).

use cobalt_common::record::{ConsensusAssessment, EnrichedRecord};

pub const HEADER: &str = "timestamp,dst_ip,dst_port,protocol,country_code,asn,as_org,consensus_score,confidence,high_uncertainty,num_scorers,num_outliers,is_known_malicious";

/// Renders one CSV row (no trailing header). Uses the `csv` crate's writer
/// over an in-memory buffer so field quoting/escaping follows RFC 4180
/// instead of being hand-rolled here.
pub fn render_row(enriched: &EnrichedRecord, consensus: &ConsensusAssessment) -> String {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let country_code = enriched.country_code().unwrap_or("").to_string();
    let asn = enriched.asn().map(|a| a.to_string()).unwrap_or_default();
    let as_org = enriched
        .geo
        .as_ref()
        .and_then(|g| g.as_org.clone())
        .unwrap_or_default();

    writer
        .write_record([
            format!("{:.6}", consensus.timestamp.as_secs_f64()),
            consensus.dst_ip.clone(),
            consensus.dst_port.to_string(),
            enriched.connection.protocol.to_string(),
            country_code,
            asn,
            as_org,
            format!("{:.6}", consensus.consensus_score),
            format!("{:.6}", consensus.confidence),
            consensus.high_uncertainty.to_string(),
            consensus.num_scorers.to_string(),
            consensus.num_outliers.to_string(),
            enriched.is_known_malicious().to_string(),
        ])
        .expect("in-memory CSV writer never fails");

    String::from_utf8(writer.into_inner().expect("flushed writer"))
        .expect("CSV output is valid UTF-8")
}
