//! Pipeline orchestrator: binds the capture source to enrichment, scorers,
//! consensus, storage, the exporter, and the dashboard feed (spec §4.8).
//!
//! `run(config)` is the single entry point the launcher calls; the core
//! never parses CLI flags itself (spec §6.1).

pub mod capture;
pub mod ingress;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::config::{ConsensusConfig, PipelineConfig};
use cobalt_common::error::{CobaltError, ExitCode};
use cobalt_common::record::{CaptureMode, ConnectionRecord, EnrichedRecord};
use cobalt_consensus::{MapVerifier, VoteVerifier};
use cobalt_dashboard::{ComponentHealth, Counters, FeedBus, HealthSnapshot, IntelHealth};
use cobalt_enrichment::EnrichmentOrchestrator;
use cobalt_exporter::{Exporter, SinkHealth};
use cobalt_intel::{AsnClient, GeoClient, ReputationClient};
use cobalt_scorers::{MlScorer, MlWeights, RuleBasedScorer, Scorer, SigningKey, StatisticalScorer};
use cobalt_storage::{Store, StorageHealth};
use tracing::{error, info, warn};

use crate::capture::{CaptureSource, DeviceModeCapture, NetworkModeCapture, SimulatedCaptureSource};
use crate::ingress::IngressQueue;

/// Default upstream endpoints used when an intel client has credentials
/// configured but the config format (spec §6.1) carries no endpoint field
/// of its own -- only the provider pairing is fixed, not the URL.
const GEO_ENDPOINT: &str = "https://geo.example";
const ASN_ENDPOINT: &str = "https://asn.example";
const VT_ENDPOINT: &str = "https://www.virustotal.com/api/v3/ip_addresses";
const ABUSEIPDB_ENDPOINT: &str = "https://api.abuseipdb.com/api/v2/check";

/// Runtime counters, one atomic per slot so every task can update them
/// without contending on a shared lock (spec §4.8 item 4).
#[derive(Default)]
struct AtomicCounters {
    records_accepted: AtomicU64,
    records_dropped: AtomicU64,
    enrichment_partials: AtomicU64,
    storage_degradations: AtomicU64,
    exporter_errors: AtomicU64,
    scorer_rejections: parking_lot::Mutex<HashMap<String, u64>>,
}

impl AtomicCounters {
    fn record_scorer_rejection(&self, scorer_id: &str) {
        let mut map = self.scorer_rejections.lock();
        *map.entry(scorer_id.to_string()).or_insert(0) += 1;
    }

    fn snapshot(&self) -> Counters {
        Counters {
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            enrichment_partials: self.enrichment_partials.load(Ordering::Relaxed),
            scorer_vote_rejections: self.scorer_rejections.lock().clone(),
            storage_degradations: self.storage_degradations.load(Ordering::Relaxed),
            exporter_errors: self.exporter_errors.load(Ordering::Relaxed),
        }
    }
}

/// Builds the fixed set of scorers from config, generating a fresh key for
/// any scorer with no configured secret (spec §4.4), then has every scorer
/// self-verify a vote it just signed before the pipeline accepts a single
/// record (spec §4.8 item 1).
async fn build_scorers(config: &PipelineConfig) -> Result<Vec<Arc<dyn Scorer>>, CobaltError> {
    let key_for = |configured: &Option<String>| -> Result<SigningKey, CobaltError> {
        match configured {
            Some(s) => SigningKey::from_bytes(s.as_bytes().to_vec())
                .map_err(|e| CobaltError::ConfigInvalid(e.to_string())),
            None => Ok(SigningKey::generate()),
        }
    };

    let statistical_key = key_for(&config.scorers.keys.statistical)?;
    let rule_based_key = key_for(&config.scorers.keys.rule_based)?;
    let ml_key = key_for(&config.scorers.keys.ml_based)?;

    let ml_weights = match &config.scorers.ml_weights_path {
        Some(path) => MlWeights::load_from_file(std::path::Path::new(path))?,
        None => MlWeights::default(),
    };

    let scorers: Vec<Arc<dyn Scorer>> = vec![
        Arc::new(StatisticalScorer::new(statistical_key)),
        Arc::new(RuleBasedScorer::new(rule_based_key)),
        Arc::new(MlScorer::new(ml_key, ml_weights)),
    ];

    let canary_record = EnrichedRecord::new(ConnectionRecord {
        timestamp: cobalt_common::timestamp::Timestamp::now(),
        src_ip: "0.0.0.0".into(),
        dst_ip: "0.0.0.0".into(),
        src_port: 0,
        dst_port: 0,
        protocol: cobalt_common::record::Protocol::Other,
        src_mac: None,
        dst_mac: None,
        mode: CaptureMode::Device,
        raw_flags: 0,
    });
    for scorer in &scorers {
        let canary = scorer.score(&canary_record).await;
        if !scorer.verify(&canary) {
            return Err(CobaltError::ConfigInvalid(format!(
                "scorer '{}' failed its startup canary self-verification",
                scorer.id()
            )));
        }
        info!(scorer_id = scorer.id(), "scorer key verified at startup");
    }

    Ok(scorers)
}

fn build_verifier(scorers: &[Arc<dyn Scorer>]) -> MapVerifier {
    let mut verifier = MapVerifier::new();
    for scorer in scorers {
        let scorer = scorer.clone();
        verifier.register(scorer.id().to_string(), move |vote| scorer.verify(vote));
    }
    verifier
}

fn build_capture(config: &PipelineConfig) -> Arc<dyn CaptureSource> {
    match config.mode {
        CaptureMode::Device => Arc::new(DeviceModeCapture::new(config.capture.tick_ms)),
        CaptureMode::Network => match &config.capture.interface {
            Some(interface) => Arc::new(NetworkModeCapture::new(interface.clone())),
            // Rejected by `PipelineConfig::validate` before this runs; kept
            // as a defensive fallback rather than a panic.
            None => Arc::new(SimulatedCaptureSource::new(config.capture.tick_ms)),
        },
        CaptureMode::Simulated => Arc::new(SimulatedCaptureSource::new(config.capture.tick_ms)),
    }
}

struct IntelClients {
    geo: GeoClient,
    asn: AsnClient,
    reputation: ReputationClient,
}

fn build_intel(config: &PipelineConfig) -> IntelClients {
    let intel = &config.intel;
    let geo_endpoint = intel.geo.api_key.as_ref().map(|_| GEO_ENDPOINT.to_string());
    let asn_endpoint = intel.geo.api_key.as_ref().map(|_| ASN_ENDPOINT.to_string());
    let vt_endpoint = intel.vt.api_key.as_ref().map(|_| VT_ENDPOINT.to_string());
    let abuseipdb_endpoint = intel
        .abuseipdb
        .api_key
        .as_ref()
        .map(|_| ABUSEIPDB_ENDPOINT.to_string());

    IntelClients {
        geo: GeoClient::new(
            geo_endpoint,
            intel.geo.api_key.clone(),
            intel.geo.rate_per_minute(),
            intel.geo.timeout_ms,
            intel.cache_capacity,
        ),
        // ASN lookups ride the same provider pairing as geo (cobalt-intel's
        // own doc comment on `AsnClient`), so they share its rate budget.
        asn: AsnClient::new(
            asn_endpoint,
            intel.geo.api_key.clone(),
            intel.geo.rate_per_minute(),
            intel.geo.timeout_ms,
            intel.cache_capacity,
        ),
        reputation: ReputationClient::new(
            vt_endpoint,
            intel.vt.api_key.clone(),
            intel.vt.rate_per_minute() / 60.0,
            intel.vt.timeout_ms,
            abuseipdb_endpoint,
            intel.abuseipdb.api_key.clone(),
            intel.abuseipdb.rate_per_minute() / 60.0,
            intel.abuseipdb.timeout_ms,
            intel.cache_capacity,
        ),
    }
}

fn to_component(degraded: bool) -> ComponentHealth {
    if degraded {
        ComponentHealth::Degraded
    } else {
        ComponentHealth::Ok
    }
}

fn to_intel(enabled: bool, rate_limited: bool) -> IntelHealth {
    if !enabled {
        IntelHealth::Unavailable
    } else if rate_limited {
        IntelHealth::RateLimited
    } else {
        IntelHealth::Ok
    }
}

/// One running pipeline. Returned by [`Pipeline::start`]; call
/// [`Pipeline::shutdown`] to stop it in dependency order (spec §4.8 item 5).
pub struct Pipeline {
    counters: Arc<AtomicCounters>,
    feed: FeedBus,
    capture: Arc<dyn CaptureSource>,
    ingress: Arc<IngressQueue>,
    store: Store,
    exporter: Arc<Exporter>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
    capture_handle: tokio::task::JoinHandle<()>,
    health_handle: tokio::task::JoinHandle<()>,
    stop: Arc<tokio::sync::Notify>,
    drain_deadline: Duration,
    geo_enabled: bool,
    vt_enabled: bool,
    abuseipdb_enabled: bool,
    geo_rate_limited: Arc<AtomicBool>,
    vt_rate_limited: Arc<AtomicBool>,
    abuseipdb_rate_limited: Arc<AtomicBool>,
}

impl Pipeline {
    /// Starts every component in dependency order and begins consuming
    /// from the capture source (spec §4.8 items 1-3).
    pub async fn start(config: PipelineConfig) -> Result<Self, CobaltError> {
        config.validate()?;

        let store = Store::open(std::path::Path::new(&config.storage.path)).map_err(|e| {
            error!(error = %e, "fatal storage error at startup");
            e
        })?;
        let exporter = Arc::new(Exporter::spawn(&config.export).await?);

        let intel = build_intel(&config);
        let geo_enabled = intel.geo.is_enabled();
        let vt_enabled = intel.reputation.vt_enabled();
        let abuseipdb_enabled = intel.reputation.abuseipdb_enabled();
        let geo_rate_limited = intel.geo.rate_limit_flag();
        let vt_rate_limited = intel.reputation.vt_rate_limit_flag();
        let abuseipdb_rate_limited = intel.reputation.abuseipdb_rate_limit_flag();
        let enrichment = Arc::new(EnrichmentOrchestrator::new(
            intel.geo,
            intel.asn,
            intel.reputation,
            config.enrichment.deadline_ms,
        ));

        let scorers = build_scorers(&config).await?;
        let verifier: Arc<dyn VoteVerifier> = Arc::new(build_verifier(&scorers));

        let capture = build_capture(&config);
        let capture_rx = capture.start().await.map_err(|e| {
            error!(error = %e, "capture source failed to start");
            e
        })?;

        let feed = FeedBus::new();
        let counters = Arc::new(AtomicCounters::default());
        let num_workers = config.enrichment.workers.max(1);
        let ingress = Arc::new(IngressQueue::new(
            num_workers,
            config.enrichment.ingress_capacity,
        ));

        let capture_handle = spawn_capture_forwarder(capture_rx, ingress.clone(), counters.clone());

        let record_deadline = Duration::from_millis(config.pipeline.record_deadline_ms);
        let per_scorer_deadline = Duration::from_millis(config.scorers.deadline_ms);
        let consensus_config = config.consensus.clone();

        let mut worker_handles = Vec::with_capacity(num_workers);
        for worker_idx in 0..num_workers {
            worker_handles.push(spawn_enrichment_worker(WorkerArgs {
                worker_idx,
                ingress: ingress.clone(),
                enrichment: enrichment.clone(),
                scorers: scorers.clone(),
                verifier: verifier.clone(),
                consensus_config: consensus_config.clone(),
                record_deadline,
                per_scorer_deadline,
                store: store.clone(),
                exporter: exporter.clone(),
                feed: feed.clone(),
                counters: counters.clone(),
            }));
        }

        let stop = Arc::new(tokio::sync::Notify::new());
        let health_handle = spawn_health_publisher(
            store.clone(),
            exporter.clone(),
            feed.clone(),
            counters.clone(),
            geo_enabled,
            vt_enabled,
            abuseipdb_enabled,
            geo_rate_limited.clone(),
            vt_rate_limited.clone(),
            abuseipdb_rate_limited.clone(),
            stop.clone(),
        );

        Ok(Self {
            counters,
            feed,
            capture,
            ingress,
            store,
            exporter,
            worker_handles,
            capture_handle,
            health_handle,
            stop,
            drain_deadline: Duration::from_millis(config.pipeline.drain_deadline_ms),
            geo_enabled,
            vt_enabled,
            abuseipdb_enabled,
            geo_rate_limited,
            vt_rate_limited,
            abuseipdb_rate_limited,
        })
    }

    pub fn feed(&self) -> FeedBus {
        self.feed.clone()
    }

    pub fn counters(&self) -> Counters {
        self.counters.snapshot()
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            storage: to_component(self.store.health() == StorageHealth::Degraded),
            exporter_jsonl: to_component(self.exporter.jsonl_health() == SinkHealth::Degraded),
            exporter_csv: to_component(self.exporter.csv_health() == SinkHealth::Degraded),
            intel_geo: to_intel(self.geo_enabled, self.geo_rate_limited.load(Ordering::Relaxed)),
            intel_vt: to_intel(self.vt_enabled, self.vt_rate_limited.load(Ordering::Relaxed)),
            intel_abuseipdb: to_intel(
                self.abuseipdb_enabled,
                self.abuseipdb_rate_limited.load(Ordering::Relaxed),
            ),
        }
    }

    /// Stops capture first, drains the ingress queue within
    /// `drain_deadline`, then stops the workers and flushes storage and
    /// the exporter (spec §4.8 item 5, §5 reverse-dependency shutdown).
    pub async fn shutdown(self) {
        self.capture.stop().await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.capture_handle).await;

        let drain_start = tokio::time::Instant::now();
        while !self.ingress.is_empty() && drain_start.elapsed() < self.drain_deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !self.ingress.is_empty() {
            warn!("ingress drain deadline exceeded, remaining records abandoned");
        }

        self.stop.notify_waiters();
        for handle in self.worker_handles {
            handle.abort();
        }
        self.health_handle.abort();
        // `Store`/`Exporter` flush their buffered writers on drop of the
        // last handle; dropping them here (end of scope) is the final
        // step in the shutdown order.
    }
}

struct WorkerArgs {
    worker_idx: usize,
    ingress: Arc<IngressQueue>,
    enrichment: Arc<EnrichmentOrchestrator>,
    scorers: Vec<Arc<dyn Scorer>>,
    verifier: Arc<dyn VoteVerifier>,
    consensus_config: ConsensusConfig,
    record_deadline: Duration,
    per_scorer_deadline: Duration,
    store: Store,
    exporter: Arc<Exporter>,
    feed: FeedBus,
    counters: Arc<AtomicCounters>,
}

/// Collects one vote per scorer, dropping any scorer that misses its own
/// deadline or the overall record deadline (spec §4.4, §4.8 item 2).
async fn collect_votes(
    scorers: &[Arc<dyn Scorer>],
    enriched: &EnrichedRecord,
    record_deadline: Duration,
    per_scorer_deadline: Duration,
    counters: &AtomicCounters,
) -> Vec<cobalt_common::record::ScorerVote> {
    let gather = async {
        let mut votes = Vec::with_capacity(scorers.len());
        for scorer in scorers {
            match tokio::time::timeout(per_scorer_deadline, scorer.score(enriched)).await {
                Ok(vote) => votes.push(vote),
                Err(_) => {
                    warn!(scorer_id = scorer.id(), "scorer missed its deadline");
                    counters.record_scorer_rejection(scorer.id());
                }
            }
        }
        votes
    };

    match tokio::time::timeout(record_deadline, gather).await {
        Ok(votes) => votes,
        Err(_) => {
            warn!("record scoring deadline exceeded, proceeding with whatever votes landed");
            Vec::new()
        }
    }
}

fn spawn_enrichment_worker(args: WorkerArgs) -> tokio::task::JoinHandle<()> {
    let WorkerArgs {
        worker_idx,
        ingress,
        enrichment,
        scorers,
        verifier,
        consensus_config,
        record_deadline,
        per_scorer_deadline,
        store,
        exporter,
        feed,
        counters,
    } = args;

    tokio::spawn(async move {
        loop {
            let connection = ingress.pop(worker_idx).await;
            let enriched = enrichment.enrich(connection).await;
            if enriched.enrichment_partial {
                counters.enrichment_partials.fetch_add(1, Ordering::Relaxed);
            }

            let votes = collect_votes(
                &scorers,
                &enriched,
                record_deadline,
                per_scorer_deadline,
                &counters,
            )
            .await;

            let assessment = cobalt_consensus::run(
                &enriched.connection.dst_ip,
                enriched.connection.dst_port,
                enriched.connection.timestamp,
                votes,
                &consensus_config,
                verifier.as_ref(),
            );

            if let Err(e) = store.append_record(&enriched, &assessment).await {
                warn!(error = %e, "record append failed after retry");
                counters.storage_degradations.fetch_add(1, Ordering::Relaxed);
            }

            feed.publish_assessment(assessment.clone());
            feed.publish_counters(counters.snapshot());
            exporter.submit(enriched, assessment).await;
        }
    })
}

fn spawn_capture_forwarder(
    mut capture_rx: tokio::sync::mpsc::Receiver<ConnectionRecord>,
    ingress: Arc<IngressQueue>,
    counters: Arc<AtomicCounters>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = capture_rx.recv().await {
            if !record.is_valid() {
                continue;
            }
            if ingress.push(record) {
                counters.records_dropped.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.records_accepted.fetch_add(1, Ordering::Relaxed);
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_health_publisher(
    store: Store,
    exporter: Arc<Exporter>,
    feed: FeedBus,
    counters: Arc<AtomicCounters>,
    geo_enabled: bool,
    vt_enabled: bool,
    abuseipdb_enabled: bool,
    geo_rate_limited: Arc<AtomicBool>,
    vt_rate_limited: Arc<AtomicBool>,
    abuseipdb_rate_limited: Arc<AtomicBool>,
    stop: Arc<tokio::sync::Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let jsonl_degraded = exporter.jsonl_health() == SinkHealth::Degraded;
                    let csv_degraded = exporter.csv_health() == SinkHealth::Degraded;
                    if jsonl_degraded || csv_degraded {
                        counters.exporter_errors.fetch_add(1, Ordering::Relaxed);
                    }
                    let health = HealthSnapshot {
                        storage: to_component(store.health() == StorageHealth::Degraded),
                        exporter_jsonl: to_component(jsonl_degraded),
                        exporter_csv: to_component(csv_degraded),
                        intel_geo: to_intel(geo_enabled, geo_rate_limited.load(Ordering::Relaxed)),
                        intel_vt: to_intel(vt_enabled, vt_rate_limited.load(Ordering::Relaxed)),
                        intel_abuseipdb: to_intel(
                            abuseipdb_enabled,
                            abuseipdb_rate_limited.load(Ordering::Relaxed),
                        ),
                    };
                    feed.publish_health(health);
                    feed.publish_counters(counters.snapshot());
                }
                _ = stop.notified() => break,
            }
        }
    })
}

/// The CLI's single entry point (spec §6.1): runs until interrupted
/// (Ctrl-C, matching this being a terminal-only tool) and returns the
/// process exit code the launcher should use.
pub async fn run(config: PipelineConfig) -> ExitCode {
    let pipeline = match Pipeline::start(config).await {
        Ok(p) => p,
        Err(CobaltError::ConfigInvalid(msg)) => {
            eprintln!("configuration invalid: {msg}");
            return ExitCode::ConfigInvalid;
        }
        Err(CobaltError::CaptureUnavailable(msg)) => {
            eprintln!("capture source unavailable: {msg}");
            return ExitCode::CaptureFailed;
        }
        Err(e) => {
            eprintln!("fatal storage error at startup: {e}");
            return ExitCode::StorageFatal;
        }
    };

    info!("pipeline started, awaiting shutdown signal");
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler, shutting down anyway");
    }
    info!("shutdown signal received, draining pipeline");
    pipeline.shutdown().await;
    ExitCode::Clean
}
