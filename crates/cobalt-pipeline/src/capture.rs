//! Capture source: the one true external-collaborator boundary (spec §4.1).
//!
//! The core only ever depends on [`CaptureSource`]. `DeviceModeCapture`
//! gives a real, privilege-free implementation (polling the kernel's own
//! connection tables); `NetworkModeCapture` is the interface shape for a
//! promiscuous packet-capture backend, which the spec explicitly treats
//! as "interface only" and out of this core's dependency stack.
//! `SimulatedCaptureSource` exists for tests and for running the pipeline
//! without root or a live interface.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cobalt_common::error::{CobaltError, CobaltResult};
use cobalt_common::record::{CaptureMode, ConnectionRecord, Protocol};
use cobalt_common::timestamp::Timestamp;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Duplicate 5-tuples observed within this window are suppressed by the
/// capture source itself, not the core (spec §4.1).
const DEDUP_WINDOW: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Starts the source and returns the channel the pipeline reads from.
    /// Non-restartable: calling `start` twice is a programmer error.
    async fn start(&self) -> CobaltResult<mpsc::Receiver<ConnectionRecord>>;

    /// Releases resources and deterministically terminates the sequence
    /// (the returned receiver closes after any already-queued records).
    async fn stop(&self);
}

struct DedupTracker {
    seen: HashMap<(String, u16, String, u16, Protocol), Instant>,
}

impl DedupTracker {
    fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    /// Returns `true` if this 5-tuple should be emitted (not a dup within
    /// the window), and opportunistically evicts stale entries.
    fn observe(&mut self, record: &ConnectionRecord) -> bool {
        let key = (
            record.src_ip.clone(),
            record.src_port,
            record.dst_ip.clone(),
            record.dst_port,
            record.protocol,
        );
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_WINDOW);
        if self.seen.contains_key(&key) {
            false
        } else {
            self.seen.insert(key, now);
            true
        }
    }
}

/// Synthetic capture source used for local runs and tests: emits a small
/// rotating set of connections on a fixed tick so the whole pipeline can
/// be exercised without a live interface.
pub struct SimulatedCaptureSource {
    tick: Duration,
    stop_tx: tokio::sync::watch::Sender<bool>,
    stop_rx: tokio::sync::watch::Receiver<bool>,
}

impl SimulatedCaptureSource {
    pub fn new(tick_ms: u64) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        Self {
            tick: Duration::from_millis(tick_ms),
            stop_tx,
            stop_rx,
        }
    }

    fn sample_records() -> Vec<ConnectionRecord> {
        vec![
            ConnectionRecord {
                timestamp: Timestamp::now(),
                src_ip: "10.0.0.2".into(),
                dst_ip: "8.8.8.8".into(),
                src_port: 51000,
                dst_port: 443,
                protocol: Protocol::Tcp,
                src_mac: None,
                dst_mac: None,
                mode: CaptureMode::Device,
                raw_flags: 0,
            },
            ConnectionRecord {
                timestamp: Timestamp::now(),
                src_ip: "10.0.0.2".into(),
                dst_ip: "185.220.101.1".into(),
                src_port: 51010,
                dst_port: 9001,
                protocol: Protocol::Tcp,
                src_mac: None,
                dst_mac: None,
                mode: CaptureMode::Device,
                raw_flags: 0,
            },
        ]
    }
}

#[async_trait]
impl CaptureSource for SimulatedCaptureSource {
    async fn start(&self) -> CobaltResult<mpsc::Receiver<ConnectionRecord>> {
        let (tx, rx) = mpsc::channel(256);
        let tick = self.tick;
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut dedup = DedupTracker::new();
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for record in Self::sample_records() {
                            if dedup.observe(&record) && tx.send(record).await.is_err() {
                                return;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Reads the kernel's own connection tables (`/proc/net/tcp`, `/proc/net/udp`
/// on Linux) on a fixed tick. Requires no elevated privileges, matching
/// spec §4.1's device-mode contract.
pub struct DeviceModeCapture {
    tick: Duration,
    stop_tx: tokio::sync::watch::Sender<bool>,
    stop_rx: tokio::sync::watch::Receiver<bool>,
}

impl DeviceModeCapture {
    pub fn new(tick_ms: u64) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        Self {
            tick: Duration::from_millis(tick_ms),
            stop_tx,
            stop_rx,
        }
    }

    fn hex_ip_to_dotted(hex: &str) -> Option<String> {
        let n = u32::from_str_radix(hex, 16).ok()?;
        let bytes = n.to_le_bytes();
        Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
    }

    fn parse_proc_net_line(line: &str, protocol: Protocol) -> Option<ConnectionRecord> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let local = fields.get(1)?;
        let remote = fields.get(2)?;
        let (local_ip_hex, local_port_hex) = local.split_once(':')?;
        let (remote_ip_hex, remote_port_hex) = remote.split_once(':')?;

        let src_ip = Self::hex_ip_to_dotted(local_ip_hex)?;
        let dst_ip = Self::hex_ip_to_dotted(remote_ip_hex)?;
        let src_port = u16::from_str_radix(local_port_hex, 16).ok()?;
        let dst_port = u16::from_str_radix(remote_port_hex, 16).ok()?;

        if dst_ip == "0.0.0.0" && dst_port == 0 {
            // Listening socket, not an established connection.
            return None;
        }

        Some(ConnectionRecord {
            timestamp: Timestamp::now(),
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        })
    }

    fn read_table(path: &str, protocol: Protocol) -> Vec<ConnectionRecord> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path, error = %e, "proc net table unreadable, skipping");
                return Vec::new();
            }
        };
        contents
            .lines()
            .skip(1)
            .filter_map(|line| Self::parse_proc_net_line(line, protocol))
            .collect()
    }

    fn poll_once() -> Vec<ConnectionRecord> {
        let mut records = Self::read_table("/proc/net/tcp", Protocol::Tcp);
        records.extend(Self::read_table("/proc/net/udp", Protocol::Udp));
        records
    }
}

#[async_trait]
impl CaptureSource for DeviceModeCapture {
    async fn start(&self) -> CobaltResult<mpsc::Receiver<ConnectionRecord>> {
        let (tx, rx) = mpsc::channel(256);
        let tick = self.tick;
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut dedup = DedupTracker::new();
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let records = tokio::task::spawn_blocking(Self::poll_once)
                            .await
                            .unwrap_or_default();
                        for record in records {
                            if dedup.observe(&record) && tx.send(record).await.is_err() {
                                return;
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Interface shape for a promiscuous packet-capture backend. The spec
/// scopes packet capture itself out as an external collaborator; this
/// type documents the contract a real backend would fulfill and fails
/// fast with `CaptureUnavailable` rather than silently doing nothing.
pub struct NetworkModeCapture {
    interface: String,
}

impl NetworkModeCapture {
    pub fn new(interface: String) -> Self {
        Self { interface }
    }
}

#[async_trait]
impl CaptureSource for NetworkModeCapture {
    async fn start(&self) -> CobaltResult<mpsc::Receiver<ConnectionRecord>> {
        warn!(interface = %self.interface, "network-mode capture requires a packet-capture backend not present in this build");
        Err(CobaltError::CaptureUnavailable(format!(
            "no packet-capture backend available for interface '{}'",
            self.interface
        )))
    }

    async fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(src_port: u16) -> ConnectionRecord {
        ConnectionRecord {
            timestamp: Timestamp(0.0),
            src_ip: "10.0.0.2".into(),
            dst_ip: "8.8.8.8".into(),
            src_port,
            dst_port: 443,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        }
    }

    #[test]
    fn dedup_suppresses_repeated_five_tuple() {
        let mut tracker = DedupTracker::new();
        assert!(tracker.observe(&record(1000)));
        assert!(!tracker.observe(&record(1000)));
        assert!(tracker.observe(&record(1001)));
    }

    #[test]
    fn proc_net_line_parses_established_connection() {
        // local=10.0.0.2:51000 (hex LE), remote=8.8.8.8:443 (hex LE)
        let line = "   0: 0200000A:C738 08080808:01BB 01 00000000:00000000 00:00000000 00000000     0        0 12345 1 0000000000000000 100 0 0 10 0";
        let parsed = DeviceModeCapture::parse_proc_net_line(line, Protocol::Tcp).unwrap();
        assert_eq!(parsed.src_ip, "10.0.0.2");
        assert_eq!(parsed.dst_ip, "8.8.8.8");
        assert_eq!(parsed.dst_port, 443);
    }

    #[tokio::test]
    async fn network_mode_capture_fails_fast() {
        let source = NetworkModeCapture::new("eth0".to_string());
        let result = source.start().await;
        assert!(matches!(result, Err(CobaltError::CaptureUnavailable(_))));
    }

    #[tokio::test]
    async fn simulated_source_emits_records() {
        let source = SimulatedCaptureSource::new(10);
        let mut rx = source.start().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(first.is_some());
        source.stop().await;
    }
}
