//! Bounded ingress queue with drop-oldest backpressure (spec §4.3).
//!
//! Routing happens here, not downstream: each record is hashed to a single
//! shard by `dst_ip` the moment it enters the queue, so per-destination
//! FIFO order falls out of each shard being a plain bounded deque -- no
//! enrichment worker ever needs to know about any other worker's records
//! (spec §5: "hashing dst_ip to a single enrichment worker").

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cobalt_common::record::ConnectionRecord;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct Shard {
    buf: Mutex<VecDeque<ConnectionRecord>>,
    capacity: usize,
    notify: Notify,
}

/// Shared ingress queue, partitioned into one shard per enrichment worker.
/// Each shard enforces `capacity` independently and drops its own oldest
/// entry on overflow (spec §4.3: "the oldest record is dropped").
pub struct IngressQueue {
    shards: Vec<Arc<Shard>>,
    dropped: AtomicU64,
    accepted: AtomicU64,
}

impl IngressQueue {
    pub fn new(num_workers: usize, capacity_per_shard: usize) -> Self {
        let shards = (0..num_workers.max(1))
            .map(|_| {
                Arc::new(Shard {
                    buf: Mutex::new(VecDeque::with_capacity(capacity_per_shard)),
                    capacity: capacity_per_shard.max(1),
                    notify: Notify::new(),
                })
            })
            .collect();
        Self {
            shards,
            dropped: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, dst_ip: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        dst_ip.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Routes and pushes `record`, dropping the oldest entry in its shard
    /// if that shard is already full. Returns `true` if something was
    /// dropped to make room.
    pub fn push(&self, record: ConnectionRecord) -> bool {
        let idx = self.shard_for(&record.dst_ip);
        let shard = &self.shards[idx];
        let mut dropped_one = false;
        {
            let mut buf = shard.buf.lock();
            if buf.len() >= shard.capacity {
                buf.pop_front();
                dropped_one = true;
            }
            buf.push_back(record);
        }
        shard.notify.notify_one();
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if dropped_one {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        dropped_one
    }

    /// Waits for and pops the next record assigned to `worker_idx`.
    pub async fn pop(&self, worker_idx: usize) -> ConnectionRecord {
        let shard = &self.shards[worker_idx];
        loop {
            if let Some(record) = shard.buf.lock().pop_front() {
                return record;
            }
            shard.notify.notified().await;
        }
    }

    /// Non-blocking pop, used while draining at shutdown.
    pub fn try_pop(&self, worker_idx: usize) -> Option<ConnectionRecord> {
        self.shards[worker_idx].buf.lock().pop_front()
    }

    pub fn records_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn records_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.buf.lock().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobalt_common::record::{CaptureMode, Protocol};
    use cobalt_common::timestamp::Timestamp;

    fn record(dst_ip: &str, n: u16) -> ConnectionRecord {
        ConnectionRecord {
            timestamp: Timestamp(n as f64),
            src_ip: "10.0.0.1".into(),
            dst_ip: dst_ip.into(),
            src_port: n,
            dst_port: 443,
            protocol: Protocol::Tcp,
            src_mac: None,
            dst_mac: None,
            mode: CaptureMode::Device,
            raw_flags: 0,
        }
    }

    #[test]
    fn same_destination_routes_to_same_shard() {
        let queue = IngressQueue::new(4, 16);
        let a = queue.shard_for("8.8.8.8");
        let b = queue.shard_for("8.8.8.8");
        assert_eq!(a, b);
    }

    #[test]
    fn overflow_drops_exactly_one_oldest() {
        let queue = IngressQueue::new(1, 2);
        queue.push(record("8.8.8.8", 1));
        queue.push(record("8.8.8.8", 2));
        assert_eq!(queue.records_dropped(), 0);
        queue.push(record("8.8.8.8", 3));
        assert_eq!(queue.records_dropped(), 1);
        let first = queue.try_pop(0).unwrap();
        assert_eq!(first.src_port, 2);
    }

    #[tokio::test]
    async fn pop_preserves_fifo_order_per_shard() {
        let queue = IngressQueue::new(1, 16);
        queue.push(record("8.8.8.8", 1));
        queue.push(record("8.8.8.8", 2));
        let first = queue.pop(0).await;
        let second = queue.pop(0).await;
        assert_eq!(first.src_port, 1);
        assert_eq!(second.src_port, 2);
    }
}
