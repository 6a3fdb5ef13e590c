//! Bit-exact schema from spec §6.2: created on first open, no migrations.

use rusqlite::Connection;

pub fn create_if_absent(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS connections (
            id INTEGER PRIMARY KEY,
            ts REAL NOT NULL,
            src_ip TEXT,
            src_port INT,
            dst_ip TEXT NOT NULL,
            dst_port INT,
            protocol TEXT,
            src_mac TEXT,
            dst_mac TEXT,
            mode TEXT,
            country_code TEXT,
            country_name TEXT,
            lat REAL,
            lon REAL,
            asn INT,
            as_org TEXT,
            vt_positives INT,
            vt_total INT,
            abuseipdb_score INT,
            is_known_malicious INT,
            consensus_score REAL,
            confidence REAL,
            high_uncertainty INT,
            enrichment_partial INT
        );
        CREATE INDEX IF NOT EXISTS idx_connections_ts ON connections (ts DESC);
        CREATE INDEX IF NOT EXISTS idx_connections_dst_ip ON connections (dst_ip);
        CREATE INDEX IF NOT EXISTS idx_connections_src_mac_ts ON connections (src_mac, ts);

        CREATE TABLE IF NOT EXISTS consensus_assessments (
            id INTEGER PRIMARY KEY,
            ts REAL NOT NULL,
            dst_ip TEXT NOT NULL,
            dst_port INT,
            consensus_score REAL,
            confidence REAL,
            high_uncertainty INT,
            num_scorers INT,
            num_outliers INT,
            method TEXT,
            votes_json TEXT,
            outliers_json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_assessments_dst_ip_ts ON consensus_assessments (dst_ip, ts DESC);
        ",
    )
}
