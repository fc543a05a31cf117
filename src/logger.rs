//! Data logger: the host-facing core instance.
//!
//! Owns the storage engine, the channel directory and the retention reaper,
//! and exposes the operations a host needs: announce channels, log batches,
//! read ranges, shut down.

use std::sync::{Arc, RwLock};

use crate::config::AppConfig;
use crate::directory::ChannelDirectory;
use crate::retention::{Clock, ReaperStats, RetentionPolicy, RetentionReaper, SystemClock};
use crate::router::{RouteReport, WriteRouter};
use crate::storage::{Channel, LogRecord, Record, StorageEngine, StorageError, Timestamp};

/// A running data logger.
pub struct DataLogger {
    engine: Arc<StorageEngine>,
    directory: RwLock<ChannelDirectory>,
    router: WriteRouter,
    reaper: Option<RetentionReaper>,
}

impl std::fmt::Debug for DataLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLogger")
            .field("engine", &self.engine)
            .field("retention", &self.reaper.is_some())
            .finish_non_exhaustive()
    }
}

impl DataLogger {
    /// Connect to the configured store and schedule retention.
    ///
    /// # Errors
    /// Connection failures are terminal: no logger is returned.
    pub fn start(config: &AppConfig) -> Result<Self, StorageError> {
        Self::start_with_clock(
            &config.database.resolved_location(),
            config.retention.policy(),
            Arc::new(SystemClock),
        )
    }

    /// Like [`DataLogger::start`] with an explicit location, policy and clock.
    pub fn start_with_clock(
        location: &str,
        retention: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        tracing::info!(location, "Starting data logger");
        let engine = Arc::new(StorageEngine::open(location)?);
        let reaper = RetentionReaper::spawn(Arc::clone(&engine), clock, retention)?;

        Ok(Self {
            router: WriteRouter::new(Arc::clone(&engine)),
            engine,
            directory: RwLock::new(ChannelDirectory::new()),
            reaper,
        })
    }

    /// Replace the set of channels to log.
    ///
    /// The directory is rebuilt from `channels` and every channel is upserted
    /// into the channel table. A failed upsert is logged and skipped. Returns
    /// the number of channels now declared.
    ///
    /// The directory stays write-locked while the channel table is updated, so
    /// concurrent announcements leave both agreeing on the last one.
    pub fn set_channels_to_log(&self, channels: Vec<Channel>) -> Result<usize, StorageError> {
        let mut directory = self.directory.write().map_err(|_| directory_poisoned())?;

        for channel in &channels {
            if let Err(e) = self.engine.upsert_channel(channel) {
                tracing::error!(
                    channel = %channel.id,
                    error = %e,
                    "Error while writing log channel information to database"
                );
            }
        }
        directory.replace(channels);

        tracing::debug!(count = directory.len(), "Channels declared for logging");
        Ok(directory.len())
    }

    /// Persist one batch, every record stored under `batch_timestamp`.
    ///
    /// # Errors
    /// `Internal` if the channel directory is unusable; nothing is written.
    pub fn log(
        &self,
        records: Vec<LogRecord>,
        batch_timestamp: Timestamp,
    ) -> Result<RouteReport, StorageError> {
        let directory = self.directory.read().map_err(|_| {
            tracing::error!(count = records.len(), "Channel directory lock poisoned, dropping batch");
            directory_poisoned()
        })?;
        Ok(self.router.route(&directory, records, batch_timestamp))
    }

    /// Records of `channel_id` in `[start, end]`, ascending by timestamp.
    pub fn get_records(
        &self,
        channel_id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Record>, StorageError> {
        self.engine.get_records(channel_id, start, end)
    }

    /// Ids of the channels currently declared for logging.
    pub fn declared_channels(&self) -> Vec<String> {
        self.directory
            .read()
            .map(|d| d.ids().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Reaper activity, `None` when retention is disabled.
    pub fn retention_stats(&self) -> Option<ReaperStats> {
        self.reaper.as_ref().map(RetentionReaper::stats)
    }

    /// Shared handle to the engine.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Stop retention and release the store.
    pub fn shutdown(mut self) -> Result<(), StorageError> {
        tracing::info!("Stopping data logger");
        if let Some(reaper) = self.reaper.take() {
            reaper.stop()?;
        }
        self.engine.disconnect()
    }
}

fn directory_poisoned() -> StorageError {
    StorageError::Internal("channel directory lock poisoned".to_string())
}
