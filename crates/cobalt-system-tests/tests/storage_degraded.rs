//! Storage degraded (scenario 5): once the database file is corrupted
//! out from under the open connection, `Store` writes fail and report
//! degraded health, but the `Exporter` sink keeps appending
//! independently -- no assessment is lost from the JSONL side just
//! because storage fell over.
//!
//! Driven directly against `Store` and `Exporter` rather than through a
//! full `Pipeline`, since the simulated capture source's 30s dedup
//! window would otherwise stop producing fresh connections long before
//! a sustained write-failure window could be observed. The file is
//! corrupted rather than permission-locked so the fault trips
//! regardless of which user the test runs as.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use cobalt_common::config::ExportConfig;
use cobalt_common::record::{
    CaptureMode, ConnectionRecord, ConsensusAssessment, EnrichedRecord, Protocol, ScorerVote,
    CONSENSUS_METHOD,
};
use cobalt_common::timestamp::Timestamp;
use cobalt_exporter::Exporter;
use cobalt_storage::{Store, StorageHealth};

fn enriched(n: u16) -> EnrichedRecord {
    let connection = ConnectionRecord {
        timestamp: Timestamp(n as f64),
        src_ip: "10.0.0.2".into(),
        dst_ip: "8.8.8.8".into(),
        src_port: n,
        dst_port: 443,
        protocol: Protocol::Tcp,
        src_mac: None,
        dst_mac: None,
        mode: CaptureMode::Device,
        raw_flags: 0,
    };
    EnrichedRecord::new(connection)
}

fn assessment(n: u16) -> ConsensusAssessment {
    ConsensusAssessment {
        dst_ip: "8.8.8.8".into(),
        dst_port: 443,
        timestamp: Timestamp(n as f64),
        consensus_score: 0.05,
        confidence: 0.7,
        method: CONSENSUS_METHOD.to_string(),
        votes: vec![ScorerVote {
            scorer_id: "statistical".into(),
            score: 0.05,
            confidence: 0.7,
            rationale: HashMap::new(),
            timestamp: Timestamp(n as f64),
            signature: "irrelevant-for-this-scenario".into(),
        }],
        outliers: vec![],
        high_uncertainty: false,
        score_spread: 0.0,
        num_scorers: 1,
        num_outliers: 0,
    }
}

#[tokio::test]
async fn storage_degrades_without_losing_export_output() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    let export_dir = dir.path().join("exports");

    let db_path = db_dir.join("cobaltgraph.db");
    let store = Store::open(&db_path).unwrap();
    let exporter = Exporter::spawn(&ExportConfig {
        dir: export_dir.to_string_lossy().to_string(),
        buffer_size: 1,
        flush_interval_ms: 20,
        csv_max_size_mb: 64,
        jsonl_max_size_mb: 64,
    })
    .await
    .unwrap();

    store.append_record(&enriched(1), &assessment(1)).await.unwrap();
    exporter.submit(enriched(1), assessment(1)).await;
    assert_eq!(store.health(), StorageHealth::Ok);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let jsonl_path = export_dir.join("assessments.jsonl");
    let len_before = std::fs::metadata(&jsonl_path).unwrap().len();
    assert!(len_before > 0);

    // Smash the file's header out from under the still-open connection:
    // any further transaction now fails with a corruption error rather
    // than a permission error, regardless of which user runs the test.
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&db_path)
            .unwrap();
        file.write_all(b"not a sqlite database").unwrap();
        file.flush().unwrap();
    }

    // Storage write fails, retries once, and gives up; the exporter is an
    // entirely separate sink and is never told about the failure.
    let result = store.append_record(&enriched(2), &assessment(2)).await;
    assert!(result.is_err());
    assert_eq!(store.health(), StorageHealth::Degraded);
    exporter.submit(enriched(2), assessment(2)).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let len_after = std::fs::metadata(&jsonl_path).unwrap().len();
    assert!(
        len_after > len_before,
        "exporter must keep accepting and flushing assessments while storage is degraded"
    );
}
