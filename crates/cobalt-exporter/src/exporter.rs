//! Two sinks written in parallel, each single-writer, sharing the same
//! ring-buffer-then-flush discipline (spec §4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cobalt_common::config::ExportConfig;
use cobalt_common::error::CobaltResult;
use cobalt_common::record::{ConsensusAssessment, EnrichedRecord};
use tokio::sync::mpsc;
use tracing::error;

use crate::csv_sink;
use crate::jsonl;
use crate::ring::RingBuffer;
use crate::rotation::RotatingFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkHealth {
    Ok,
    Degraded,
}

impl std::fmt::Display for SinkHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SinkHealth::Ok => "ok",
            SinkHealth::Degraded => "degraded",
        })
    }
}

struct HealthFlag(AtomicBool);

impl HealthFlag {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }
    fn mark(&self, ok: bool) {
        self.0.store(!ok, Ordering::Relaxed);
    }
    fn get(&self) -> SinkHealth {
        if self.0.load(Ordering::Relaxed) {
            SinkHealth::Degraded
        } else {
            SinkHealth::Ok
        }
    }
}

type Item = (EnrichedRecord, ConsensusAssessment);

/// Handle held by the pipeline orchestrator: `submit` fans one assessment
/// out to both sink queues, never blocking the caller on disk I/O.
pub struct Exporter {
    jsonl_tx: mpsc::Sender<Item>,
    csv_tx: mpsc::Sender<Item>,
    jsonl_health: Arc<HealthFlag>,
    csv_health: Arc<HealthFlag>,
}

impl Exporter {
    pub async fn spawn(config: &ExportConfig) -> CobaltResult<Self> {
        let dir = std::path::PathBuf::from(&config.dir);
        let (jsonl_tx, jsonl_rx) = mpsc::channel(config.buffer_size.max(1));
        let (csv_tx, csv_rx) = mpsc::channel(config.buffer_size.max(1));

        let jsonl_health = Arc::new(HealthFlag::new());
        let csv_health = Arc::new(HealthFlag::new());

        let jsonl_file = RotatingFile::open(
            &dir,
            "assessments",
            "jsonl",
            config.jsonl_max_size_mb * 1024 * 1024,
            true,
        )
        .await?;
        let csv_file = RotatingFile::open(
            &dir,
            "assessments",
            "csv",
            config.csv_max_size_mb * 1024 * 1024,
            false,
        )
        .await?;

        let buffer_size = config.buffer_size;
        let flush_interval = Duration::from_millis(config.flush_interval_ms);

        tokio::spawn(run_jsonl_writer(
            jsonl_rx,
            jsonl_file,
            buffer_size,
            flush_interval,
            jsonl_health.clone(),
        ));
        tokio::spawn(run_csv_writer(
            csv_rx,
            csv_file,
            buffer_size,
            flush_interval,
            csv_health.clone(),
        ));

        Ok(Self {
            jsonl_tx,
            csv_tx,
            jsonl_health,
            csv_health,
        })
    }

    pub async fn submit(&self, enriched: EnrichedRecord, consensus: ConsensusAssessment) {
        // Never drop an assessment that upstream already accepted (spec
        // §8 invariant): these sends apply backpressure instead of
        // failing, same as the exporter's own internal ring buffer.
        let _ = self.jsonl_tx.send((enriched.clone(), consensus.clone())).await;
        let _ = self.csv_tx.send((enriched, consensus)).await;
    }

    pub fn jsonl_health(&self) -> SinkHealth {
        self.jsonl_health.get()
    }

    pub fn csv_health(&self) -> SinkHealth {
        self.csv_health.get()
    }
}

async fn run_jsonl_writer(
    mut rx: mpsc::Receiver<Item>,
    mut file: RotatingFile,
    buffer_size: usize,
    flush_interval: Duration,
    health: Arc<HealthFlag>,
) {
    let mut buffer: RingBuffer<Item> = RingBuffer::new(buffer_size.max(1));
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(item) => {
                        buffer.push(item);
                        if buffer.is_full() {
                            flush_jsonl(&mut file, &mut buffer, &health).await;
                        }
                    }
                    None => {
                        flush_jsonl(&mut file, &mut buffer, &health).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_jsonl(&mut file, &mut buffer, &health).await;
                }
            }
        }
    }
}

async fn flush_jsonl(file: &mut RotatingFile, buffer: &mut RingBuffer<Item>, health: &HealthFlag) {
    let items = buffer.drain();
    for (enriched, consensus) in items {
        let line = jsonl::render_line(&enriched, &consensus);
        if let Err(e) = write_one(file, line.as_bytes()).await {
            error!(error = %e, "jsonl export write failed");
            health.mark(false);
        } else {
            health.mark(true);
        }
    }
    if let Err(e) = file.flush().await {
        error!(error = %e, "jsonl export flush failed");
        health.mark(false);
    }
}

async fn write_one(file: &mut RotatingFile, bytes: &[u8]) -> CobaltResult<()> {
    file.prepare_write().await?;
    file.write_all(bytes).await
}

async fn run_csv_writer(
    mut rx: mpsc::Receiver<Item>,
    mut file: RotatingFile,
    buffer_size: usize,
    flush_interval: Duration,
    health: Arc<HealthFlag>,
) {
    let mut buffer: RingBuffer<Item> = RingBuffer::new(buffer_size.max(1));
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            item = rx.recv() => {
                match item {
                    Some(item) => {
                        buffer.push(item);
                        if buffer.is_full() {
                            flush_csv(&mut file, &mut buffer, &health).await;
                        }
                    }
                    None => {
                        flush_csv(&mut file, &mut buffer, &health).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_csv(&mut file, &mut buffer, &health).await;
                }
            }
        }
    }
}

async fn flush_csv(file: &mut RotatingFile, buffer: &mut RingBuffer<Item>, health: &HealthFlag) {
    let items = buffer.drain();
    for (enriched, consensus) in items {
        let row = csv_sink::render_row(&enriched, &consensus);
        let write_result: CobaltResult<()> = async {
            let fresh = file.prepare_write().await?;
            if fresh {
                file.write_all(format!("{}\n", csv_sink::HEADER).as_bytes()).await?;
            }
            file.write_all(row.as_bytes()).await
        }
        .await;

        if let Err(e) = write_result {
            error!(error = %e, "csv export write failed");
            health.mark(false);
        } else {
            health.mark(true);
        }
    }
    if let Err(e) = file.flush().await {
        error!(error = %e, "csv export flush failed");
        health.mark(false);
    }
}
