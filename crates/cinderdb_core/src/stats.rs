//! Store statistics and injected metrics.
//!
//! Counters are atomic and readable while operations are in flight.
//! Latency observation goes through the [`MetricsSink`] trait so the
//! embedder decides what to do with timings (histograms, exporters, or
//! nothing); the store itself only calls [`MetricsSink::observe`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Client operations the store reports latencies for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A `put` call.
    Put,
    /// A `get` call.
    Get,
    /// A `delete` call.
    Delete,
}

/// Receiver for operation latencies.
///
/// Implementations must be cheap; `observe` is called on the hot path of
/// every client operation.
pub trait MetricsSink: Send + Sync {
    /// Records that `op` took `nanos` nanoseconds.
    fn observe(&self, op: Operation, nanos: u64);
}

/// A metrics sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe(&self, _op: Operation, _nanos: u64) {}
}

/// Store operation counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Total `put` operations.
    puts: AtomicU64,
    /// Total `get` operations.
    gets: AtomicU64,
    /// Total `delete` operations that removed a key.
    deletes: AtomicU64,
    /// Total record bytes appended by clients.
    bytes_written: AtomicU64,
    /// Total value bytes returned to clients.
    bytes_read: AtomicU64,
    /// Segments created (rollover and compaction destinations).
    segments_created: AtomicU64,
    /// Source segments deleted by compaction.
    segments_compacted: AtomicU64,
    /// Fresh records copied by compaction.
    records_copied: AtomicU64,
    /// Directory CAS hand-offs lost to a concurrent write.
    compaction_cas_losses: AtomicU64,
}

impl StoreStats {
    /// Creates a zeroed stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_put(&self, bytes: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self, bytes: u64) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_created(&self) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_segment_compacted(&self) {
        self.segments_compacted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_record_copied(&self) {
        self.records_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cas_loss(&self) {
        self.compaction_cas_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of `put` operations.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Returns the total number of `get` operations.
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Returns the total number of `delete` operations that removed a key.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the total record bytes appended by clients.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the total value bytes returned to clients.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the number of segments created.
    pub fn segments_created(&self) -> u64 {
        self.segments_created.load(Ordering::Relaxed)
    }

    /// Returns the number of source segments deleted by compaction.
    pub fn segments_compacted(&self) -> u64 {
        self.segments_compacted.load(Ordering::Relaxed)
    }

    /// Returns the number of fresh records copied by compaction.
    pub fn records_copied(&self) -> u64 {
        self.records_copied.load(Ordering::Relaxed)
    }

    /// Returns the number of compaction CAS hand-offs lost to writers.
    pub fn compaction_cas_losses(&self) -> u64 {
        self.compaction_cas_losses.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            puts: self.puts(),
            gets: self.gets(),
            deletes: self.deletes(),
            bytes_written: self.bytes_written(),
            bytes_read: self.bytes_read(),
            segments_created: self.segments_created(),
            segments_compacted: self.segments_compacted(),
            records_copied: self.records_copied(),
            compaction_cas_losses: self.compaction_cas_losses(),
        }
    }
}

/// A point-in-time snapshot of store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total `put` operations.
    pub puts: u64,
    /// Total `get` operations.
    pub gets: u64,
    /// Total `delete` operations that removed a key.
    pub deletes: u64,
    /// Total record bytes appended by clients.
    pub bytes_written: u64,
    /// Total value bytes returned to clients.
    pub bytes_read: u64,
    /// Segments created.
    pub segments_created: u64,
    /// Source segments deleted by compaction.
    pub segments_compacted: u64,
    /// Fresh records copied by compaction.
    pub records_copied: u64,
    /// Directory CAS hand-offs lost to a concurrent write.
    pub compaction_cas_losses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = StoreStats::new();
        assert_eq!(stats.puts(), 0);
        assert_eq!(stats.gets(), 0);
        assert_eq!(stats.deletes(), 0);
    }

    #[test]
    fn counters_accumulate() {
        let stats = StoreStats::new();

        stats.record_put(100);
        stats.record_put(50);
        stats.record_get(20);
        stats.record_delete();

        assert_eq!(stats.puts(), 2);
        assert_eq!(stats.bytes_written(), 150);
        assert_eq!(stats.gets(), 1);
        assert_eq!(stats.bytes_read(), 20);
        assert_eq!(stats.deletes(), 1);
    }

    #[test]
    fn snapshot_matches_counters() {
        let stats = StoreStats::new();
        stats.record_put(10);
        stats.record_segment_created();
        stats.record_record_copied();
        stats.record_cas_loss();

        let snap = stats.snapshot();
        assert_eq!(snap.puts, 1);
        assert_eq!(snap.bytes_written, 10);
        assert_eq!(snap.segments_created, 1);
        assert_eq!(snap.records_copied, 1);
        assert_eq!(snap.compaction_cas_losses, 1);
    }

    #[test]
    fn noop_sink_accepts_observations() {
        let sink = NoopMetrics;
        sink.observe(Operation::Put, 1_000);
        sink.observe(Operation::Get, 2_000);
    }
}
