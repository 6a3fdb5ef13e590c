//! Single-writer SQLite store (spec §4.6).
//!
//! `rusqlite::Connection` is `Send` but requires external synchronization
//! for concurrent access; every other crate only ever reaches it through
//! this handle, and every call hops onto a blocking thread via
//! `tokio::task::spawn_blocking` so the async runtime's worker threads
//! never block on disk I/O.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::error::{CobaltError, CobaltResult};
use cobalt_common::record::{ConsensusAssessment, EnrichedRecord};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{error, warn};

use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageHealth {
    Ok,
    Degraded,
}

impl std::fmt::Display for StorageHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageHealth::Ok => "ok",
            StorageHealth::Degraded => "degraded",
        })
    }
}

/// One retry after this backoff before a write is counted as a storage
/// degradation (spec §4.6: "retried once with backoff").
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(50);

struct Inner {
    conn: Mutex<Connection>,
    degraded: AtomicBool,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    pub fn open(path: &Path) -> CobaltResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            CobaltError::StorageTransient(format!("opening {}: {e}", path.display()))
        })?;
        schema::create_if_absent(&conn)
            .map_err(|e| CobaltError::StorageTransient(format!("schema init: {e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                degraded: AtomicBool::new(false),
            }),
        })
    }

    pub fn health(&self) -> StorageHealth {
        if self.inner.degraded.load(Ordering::Relaxed) {
            StorageHealth::Degraded
        } else {
            StorageHealth::Ok
        }
    }

    /// Inserts one `connections` row and its matching `consensus_assessments`
    /// row in a single transaction: both commit or neither does (spec §4.6).
    pub async fn append_record(
        &self,
        enriched: &EnrichedRecord,
        consensus: &ConsensusAssessment,
    ) -> CobaltResult<()> {
        let first = {
            let inner = self.inner.clone();
            let enriched = enriched.clone();
            let consensus = consensus.clone();
            tokio::task::spawn_blocking(move || write_record(&inner.conn, &enriched, &consensus))
                .await
                .map_err(|e| CobaltError::StorageTransient(format!("join error: {e}")))?
        };

        if first.is_ok() {
            self.inner.degraded.store(false, Ordering::Relaxed);
            return Ok(());
        }

        warn!("record append failed, retrying once after backoff");
        tokio::time::sleep(WRITE_RETRY_BACKOFF).await;

        let retry = {
            let inner = self.inner.clone();
            let enriched = enriched.clone();
            let consensus = consensus.clone();
            tokio::task::spawn_blocking(move || write_record(&inner.conn, &enriched, &consensus))
                .await
                .map_err(|e| CobaltError::StorageTransient(format!("join error: {e}")))?
        };

        match retry {
            Ok(()) => {
                self.inner.degraded.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.inner.degraded.store(true, Ordering::Relaxed);
                error!(error = %e, "storage write failed twice, marking degraded");
                Err(e)
            }
        }
    }
}

fn write_record(
    conn: &Mutex<Connection>,
    enriched: &EnrichedRecord,
    consensus: &ConsensusAssessment,
) -> CobaltResult<()> {
    let mut guard = conn.lock();
    let tx = guard
        .transaction()
        .map_err(|e| CobaltError::StorageTransient(e.to_string()))?;

    let geo = enriched.geo.as_ref();
    let rep = enriched.reputation.as_ref();

    tx.execute(
        "INSERT INTO connections (
            ts, src_ip, src_port, dst_ip, dst_port, protocol, src_mac, dst_mac, mode,
            country_code, country_name, lat, lon, asn, as_org,
            vt_positives, vt_total, abuseipdb_score, is_known_malicious,
            consensus_score, confidence, high_uncertainty, enrichment_partial
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
        params![
            enriched.connection.timestamp.as_secs_f64(),
            enriched.connection.src_ip,
            enriched.connection.src_port,
            enriched.connection.dst_ip,
            enriched.connection.dst_port,
            enriched.connection.protocol.to_string(),
            enriched.connection.src_mac,
            enriched.connection.dst_mac,
            format!("{:?}", enriched.connection.mode).to_lowercase(),
            geo.and_then(|g| g.country_code.clone()),
            geo.and_then(|g| g.country_name.clone()),
            geo.and_then(|g| g.lat),
            geo.and_then(|g| g.lon),
            geo.and_then(|g| g.asn),
            geo.and_then(|g| g.as_org.clone()),
            rep.and_then(|r| r.vt_positives),
            rep.and_then(|r| r.vt_total),
            rep.and_then(|r| r.abuseipdb_score),
            rep.map(|r| r.is_known_malicious as i32),
            consensus.consensus_score,
            consensus.confidence,
            consensus.high_uncertainty as i32,
            enriched.enrichment_partial as i32,
        ],
    )
    .map_err(|e| CobaltError::StorageTransient(e.to_string()))?;

    let votes_json = serde_json::to_string(&consensus.votes)
        .map_err(|e| CobaltError::StorageTransient(format!("serializing votes: {e}")))?;
    let outliers_json = serde_json::to_string(&consensus.outliers)
        .map_err(|e| CobaltError::StorageTransient(format!("serializing outliers: {e}")))?;

    tx.execute(
        "INSERT INTO consensus_assessments (
            ts, dst_ip, dst_port, consensus_score, confidence, high_uncertainty,
            num_scorers, num_outliers, method, votes_json, outliers_json
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            consensus.timestamp.as_secs_f64(),
            consensus.dst_ip,
            consensus.dst_port,
            consensus.consensus_score,
            consensus.confidence,
            consensus.high_uncertainty as i32,
            consensus.num_scorers as i64,
            consensus.num_outliers as i64,
            consensus.method,
            votes_json,
            outliers_json,
        ],
    )
    .map_err(|e| CobaltError::StorageTransient(e.to_string()))?;

    tx.commit()
        .map_err(|e| CobaltError::StorageTransient(e.to_string()))
}
