//! Enrichment orchestrator (spec §4.3).
//!
//! For each `ConnectionRecord` this fans out geo, ASN, and reputation
//! lookups in parallel under an overall deadline. Private destinations take
//! a shortcut and never touch the intel clients.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use cobalt_common::ipclass::{is_private, PRIVATE_COUNTRY_CODE};
use cobalt_common::record::{ConnectionRecord, EnrichedRecord, GeoInfo};
use cobalt_intel::{AsnClient, GeoClient, ReputationClient};
use tracing::warn;

pub struct EnrichmentOrchestrator {
    geo: GeoClient,
    asn: AsnClient,
    reputation: ReputationClient,
    deadline: Duration,
}

impl EnrichmentOrchestrator {
    pub fn new(
        geo: GeoClient,
        asn: AsnClient,
        reputation: ReputationClient,
        deadline_ms: u64,
    ) -> Self {
        Self {
            geo,
            asn,
            reputation,
            deadline: Duration::from_millis(deadline_ms),
        }
    }

    /// Enrich one connection record. Always returns a record -- no intel
    /// failure is fatal (spec §4.3).
    pub async fn enrich(&self, connection: ConnectionRecord) -> EnrichedRecord {
        let started = std::time::Instant::now();
        let mut record = EnrichedRecord::new(connection);

        let dst_ip = match IpAddr::from_str(&record.connection.dst_ip) {
            Ok(ip) => ip,
            Err(_) => {
                // Malformed IP reached this far past ingress validation;
                // treat like an unenrichable public address.
                record.enrichment_partial = true;
                record.enrichment_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                return record;
            }
        };

        if is_private(&dst_ip) {
            record.geo = Some(GeoInfo {
                country_code: Some(PRIVATE_COUNTRY_CODE.to_string()),
                ..Default::default()
            });
            record.reputation = None;
            record.enrichment_partial = false;
            record.enrichment_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            return record;
        }

        let ip_str = record.connection.dst_ip.clone();
        let geo_fut = self.geo.lookup(&ip_str);
        let asn_fut = self.asn.lookup(&ip_str);
        let rep_fut = self.reputation.lookup(&ip_str);

        let joined = futures_join3(geo_fut, asn_fut, rep_fut);
        let mut partial = false;

        match tokio::time::timeout(self.deadline, joined).await {
            Ok((geo_res, asn_res, rep_res)) => {
                let mut geo = match geo_res {
                    Ok(g) => g,
                    Err(e) => {
                        warn!(error = %e, "geo enrichment failed");
                        partial = true;
                        GeoInfo::default()
                    }
                };
                match asn_res {
                    Ok(a) => {
                        geo.asn = a.asn;
                        geo.as_org = a.as_org;
                    }
                    Err(e) => {
                        warn!(error = %e, "asn enrichment failed");
                        partial = true;
                    }
                }
                record.geo = Some(geo);

                match rep_res {
                    Ok(r) => record.reputation = Some(r),
                    Err(e) => {
                        warn!(error = %e, "reputation enrichment failed");
                        partial = true;
                    }
                }
            }
            Err(_) => {
                // Whole-record deadline expired; whatever completed before
                // the timeout is simply absent. We don't have partial
                // results from a cancelled join, so everything is unset.
                partial = true;
            }
        }

        record.enrichment_partial = partial;
        record.enrichment_latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        record
    }
}

/// `tokio::join!` requires all three futures to resolve before the overall
/// `timeout` wrapper can observe completion; wrapping it as a plain async
/// fn keeps the call site in `enrich` readable.
async fn futures_join3<A, B, C, TA, TB, TC>(a: A, b: B, c: C) -> (TA, TB, TC)
where
    A: std::future::Future<Output = TA>,
    B: std::future::Future<Output = TB>,
    C: std::future::Future<Output = TC>,
{
    tokio::join!(a, b, c)
}
