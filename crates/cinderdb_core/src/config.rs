//! Store configuration.

use crate::error::{StoreError, StoreResult};
use crate::stats::{MetricsSink, NoopMetrics};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for opening a store.
///
/// All options are injected by the embedder; nothing is read from the
/// environment. Use the builder-style setters:
///
/// ```rust
/// use cinderdb_core::Options;
/// use std::time::Duration;
///
/// let options = Options::new()
///     .max_file_size(64 * 1024 * 1024)
///     .merge_threshold_per_file(0.5)
///     .merge_job_interval(Duration::from_secs(5));
/// ```
#[derive(Clone)]
pub struct Options {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Rollover threshold, in bytes, for data and tombstone files.
    pub max_file_size: u64,

    /// Expected number of live keys; sizes the key directory.
    pub number_of_records: usize,

    /// How often the compactor wakes to look for work.
    pub merge_job_interval: Duration,

    /// Stale fraction of a file that makes it a merge candidate, in (0, 1].
    pub merge_threshold_per_file: f64,

    /// Minimum number of candidates before a merge batch runs.
    pub merge_threshold_file_number: usize,

    /// Disables compaction entirely.
    pub merge_disabled: bool,

    /// Compaction copy rate in bytes per second.
    pub compaction_job_rate: u64,

    /// How many bytes the compactor copies between destination fsyncs.
    /// `None` disables the periodic fsync.
    pub flush_data_size_bytes: Option<u64>,

    /// Shard count override for the key directory. Defaults to a power of
    /// two at least twice the available hardware parallelism.
    pub index_shards: Option<usize>,

    /// Whether each `put` syncs the data file before returning.
    pub sync_on_put: bool,

    /// Receiver for operation latencies.
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_file_size: 128 * 1024 * 1024, // 128 MB
            number_of_records: 1_000_000,
            merge_job_interval: Duration::from_secs(10),
            merge_threshold_per_file: 0.75,
            merge_threshold_file_number: 4,
            merge_disabled: false,
            compaction_job_rate: 32 * 1024 * 1024, // 32 MB/s
            flush_data_size_bytes: Some(8 * 1024 * 1024),
            index_shards: None,
            sync_on_put: false,
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl Options {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the rollover threshold for data and tombstone files.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the expected number of live keys.
    #[must_use]
    pub fn number_of_records(mut self, count: usize) -> Self {
        self.number_of_records = count;
        self
    }

    /// Sets the compactor wake interval.
    #[must_use]
    pub fn merge_job_interval(mut self, interval: Duration) -> Self {
        self.merge_job_interval = interval;
        self
    }

    /// Sets the per-file stale fraction that triggers candidacy.
    #[must_use]
    pub fn merge_threshold_per_file(mut self, fraction: f64) -> Self {
        self.merge_threshold_per_file = fraction;
        self
    }

    /// Sets the minimum candidate count per merge batch.
    #[must_use]
    pub fn merge_threshold_file_number(mut self, count: usize) -> Self {
        self.merge_threshold_file_number = count;
        self
    }

    /// Disables or enables compaction.
    #[must_use]
    pub fn merge_disabled(mut self, value: bool) -> Self {
        self.merge_disabled = value;
        self
    }

    /// Sets the compaction copy rate in bytes per second.
    #[must_use]
    pub fn compaction_job_rate(mut self, bytes_per_sec: u64) -> Self {
        self.compaction_job_rate = bytes_per_sec;
        self
    }

    /// Sets the fsync cadence for compaction writes; `None` disables it.
    #[must_use]
    pub fn flush_data_size_bytes(mut self, bytes: Option<u64>) -> Self {
        self.flush_data_size_bytes = bytes;
        self
    }

    /// Overrides the key directory shard count.
    #[must_use]
    pub fn index_shards(mut self, shards: usize) -> Self {
        self.index_shards = Some(shards);
        self
    }

    /// Sets whether each `put` syncs the data file before returning.
    #[must_use]
    pub fn sync_on_put(mut self, value: bool) -> Self {
        self.sync_on_put = value;
        self
    }

    /// Installs a metrics sink for operation latencies.
    #[must_use]
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Validates option ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for any value out of range.
    pub fn validate(&self) -> StoreResult<()> {
        if self.max_file_size == 0 || self.max_file_size > u64::from(u32::MAX) {
            return Err(StoreError::invalid_argument(format!(
                "max_file_size must be in 1..=2^32-1, got {}",
                self.max_file_size
            )));
        }
        if self.number_of_records == 0 {
            return Err(StoreError::invalid_argument(
                "number_of_records must be positive",
            ));
        }
        if !(self.merge_threshold_per_file > 0.0 && self.merge_threshold_per_file <= 1.0) {
            return Err(StoreError::invalid_argument(format!(
                "merge_threshold_per_file must be in (0, 1], got {}",
                self.merge_threshold_per_file
            )));
        }
        if self.merge_threshold_file_number == 0 {
            return Err(StoreError::invalid_argument(
                "merge_threshold_file_number must be positive",
            ));
        }
        if self.compaction_job_rate == 0 {
            return Err(StoreError::invalid_argument(
                "compaction_job_rate must be positive",
            ));
        }
        if let Some(shards) = self.index_shards {
            if shards == 0 || !shards.is_power_of_two() {
                return Err(StoreError::invalid_argument(format!(
                    "index_shards must be a positive power of two, got {shards}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("max_file_size", &self.max_file_size)
            .field("number_of_records", &self.number_of_records)
            .field("merge_job_interval", &self.merge_job_interval)
            .field("merge_threshold_per_file", &self.merge_threshold_per_file)
            .field(
                "merge_threshold_file_number",
                &self.merge_threshold_file_number,
            )
            .field("merge_disabled", &self.merge_disabled)
            .field("compaction_job_rate", &self.compaction_job_rate)
            .field("flush_data_size_bytes", &self.flush_data_size_bytes)
            .field("index_shards", &self.index_shards)
            .field("sync_on_put", &self.sync_on_put)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let options = Options::new()
            .max_file_size(1024)
            .merge_threshold_per_file(0.5)
            .merge_disabled(true);

        assert_eq!(options.max_file_size, 1024);
        assert_eq!(options.merge_threshold_per_file, 0.5);
        assert!(options.merge_disabled);
    }

    #[test]
    fn rejects_zero_max_file_size() {
        let result = Options::new().max_file_size(0).validate();
        assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
    }

    #[test]
    fn rejects_oversized_max_file_size() {
        let result = Options::new().max_file_size(1 << 40).validate();
        assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        for fraction in [0.0, -0.5, 1.5] {
            let result = Options::new().merge_threshold_per_file(fraction).validate();
            assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
        }
        assert!(Options::new().merge_threshold_per_file(1.0).validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_shards() {
        let result = Options::new().index_shards(6).validate();
        assert!(matches!(result, Err(StoreError::InvalidArgument { .. })));
        assert!(Options::new().index_shards(8).validate().is_ok());
    }
}
