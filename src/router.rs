//! Write router: partitions incoming batches by storage region.

use std::sync::Arc;

use crate::directory::ChannelDirectory;
use crate::storage::{
    LogRecord, RegionKind, StorageEngine, StorageError, Timestamp, WriteOutcome, region_for,
};

/// What happened to one routed batch.
#[derive(Debug, Default)]
pub struct RouteReport {
    /// Per-region outcome of every partition that was written.
    pub written: Vec<(RegionKind, WriteOutcome)>,
    /// Records whose channel is not in the directory.
    pub unregistered: usize,
    /// Partitions whose batched insert failed. Their records were not stored.
    pub failures: Vec<(RegionKind, StorageError)>,
}

impl RouteReport {
    /// Rows committed across all regions.
    pub fn inserted(&self) -> usize {
        self.written.iter().map(|(_, o)| o.inserted).sum()
    }

    /// Records filtered as invalid inside successfully written partitions.
    pub fn dropped(&self) -> usize {
        self.written.iter().map(|(_, o)| o.dropped).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Routes batches to the engine, one batched insert per region.
#[derive(Debug, Clone)]
pub struct WriteRouter {
    engine: Arc<StorageEngine>,
}

impl WriteRouter {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    /// Partition `records` by the region of their declared channel and write
    /// each non-empty partition under `batch_timestamp`.
    ///
    /// Values are converted to their channel's declared type first; values
    /// that do not fit it are dropped. Records of undeclared channels are
    /// dropped. A failing partition is logged and reported; the other
    /// partitions are still written.
    pub fn route<I>(
        &self,
        directory: &ChannelDirectory,
        records: I,
        batch_timestamp: Timestamp,
    ) -> RouteReport
    where
        I: IntoIterator<Item = LogRecord>,
    {
        let mut report = RouteReport::default();
        let mut partitions: [Vec<LogRecord>; 5] = Default::default();

        for mut record in records {
            let Some(channel) = directory.get(&record.channel_id) else {
                report.unregistered += 1;
                continue;
            };
            // A value that does not fit the declared type is cleared here and
            // counted as dropped by the engine.
            let value_type = channel.value_type;
            record.value = record.value.and_then(|v| v.coerce(value_type));
            partitions[region_for(value_type).index()].push(record);
        }

        if report.unregistered > 0 {
            tracing::debug!(
                count = report.unregistered,
                "Dropped records of channels not declared for logging"
            );
        }

        for region in RegionKind::ALL {
            let partition = &partitions[region.index()];
            if partition.is_empty() {
                continue;
            }
            match self.engine.write_batch(region, partition, batch_timestamp) {
                Ok(outcome) => report.written.push((region, outcome)),
                Err(e) => {
                    tracing::error!(
                        %region,
                        count = partition.len(),
                        batch_timestamp,
                        error = %e,
                        "Error while writing log values"
                    );
                    report.failures.push((region, e));
                }
            }
        }

        report
    }
}
