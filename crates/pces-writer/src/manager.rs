use crate::config::PcesConfig;
use bytesize::ByteSize;
use chrono::TimeDelta;
use pces_common::{RecycleBin, Time};
use pces_core::{AncientMode, PcesError, PcesFile, PcesMutableFile, Result};
use pces_registry::{PcesFileReader, PcesFileTracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Allocates new files and prunes old ones for a single stream directory.
pub struct PcesFileManager {
    root: PathBuf,
    tracker: PcesFileTracker,
    current_origin: i64,
    minimum_retention_period: Duration,
    total_file_size: u64,
    time: Arc<dyn Time>,
    recycle_bin: Arc<dyn RecycleBin>,
}

impl PcesFileManager {
    /// Creates a manager over an already recovered tracker.
    ///
    /// The origin continues from the last file, or starts at
    /// `starting_origin` for an empty stream.
    pub fn new(
        root: impl Into<PathBuf>,
        tracker: PcesFileTracker,
        starting_origin: i64,
        minimum_retention_period: Duration,
        time: Arc<dyn Time>,
        recycle_bin: Arc<dyn RecycleBin>,
    ) -> Self {
        let current_origin = tracker
            .last_file()
            .map_or(starting_origin, PcesFile::origin);
        let total_file_size = tracker.iter().map(PcesFile::size_on_disk).sum();

        Self {
            root: root.into(),
            tracker,
            current_origin,
            minimum_retention_period,
            total_file_size,
            time,
            recycle_bin,
        }
    }

    /// Recovers the stream below `root` and wraps it in a manager.
    pub fn recover(
        config: &PcesConfig,
        root: impl Into<PathBuf>,
        ancient_mode: AncientMode,
        starting_origin: i64,
        time: Arc<dyn Time>,
        recycle_bin: Arc<dyn RecycleBin>,
    ) -> Result<Self> {
        let root = root.into();
        let tracker = PcesFileReader::new(&root, ancient_mode, recycle_bin.clone())
            .with_permit_gaps(config.permit_gaps)
            .with_compact_last_file(config.compact_last_file_on_startup)
            .read_files(starting_origin)?;

        Ok(Self::new(
            root,
            tracker,
            starting_origin,
            config.minimum_retention_period,
            time,
            recycle_bin,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracker(&self) -> &PcesFileTracker {
        &self.tracker
    }

    pub fn ancient_mode(&self) -> AncientMode {
        self.tracker.ancient_mode()
    }

    pub fn current_origin(&self) -> i64 {
        self.current_origin
    }

    pub fn file_count(&self) -> usize {
        self.tracker.len()
    }

    /// Bytes held by the tracked files, excluding the file being written.
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    /// Allocates the descriptor of the next file and starts tracking it.
    ///
    /// Bounds never fall below those of the previous file and the timestamp
    /// is strictly later than the previous file's.
    pub fn get_next_file_descriptor(&mut self, lower_bound: i64, upper_bound: i64) -> Result<PcesFile> {
        let now = self.time.now();

        let (lower_bound, upper_bound, sequence_number, timestamp) = match self.tracker.last_file() {
            None => (lower_bound, upper_bound, 0, now),
            Some(last) => (
                lower_bound.max(last.lower_bound()),
                upper_bound.max(last.upper_bound()),
                last.sequence_number() + 1,
                now.max(last.timestamp() + TimeDelta::nanoseconds(1)),
            ),
        };

        let descriptor = PcesFile::new(
            self.tracker.ancient_mode(),
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            self.current_origin,
            &self.root,
        )?;
        self.tracker.add_file(descriptor.clone())?;

        tracing::debug!(
            file = descriptor.file_name(),
            sequence_number,
            lower_bound,
            upper_bound,
            "allocated file"
        );

        Ok(descriptor)
    }

    /// Seals the span of the file that was just closed.
    ///
    /// The upper bound is compressed to the highest indicator written, but
    /// never below the previous file's upper bound.
    pub fn finished_writing_file(&mut self, file: &mut PcesMutableFile) -> Result<()> {
        let index = match self.tracker.last_file() {
            Some(last) if last.sequence_number() == file.descriptor().sequence_number() => {
                self.tracker.len() - 1
            }
            _ => {
                return Err(PcesError::IllegalState(format!(
                    "{} is not the most recently allocated file",
                    file.descriptor().file_name()
                )));
            }
        };

        let previous_upper_bound = index
            .checked_sub(1)
            .and_then(|i| self.tracker.get(i))
            .map_or(file.descriptor().lower_bound(), PcesFile::upper_bound);
        let upper_bound = file.highest_ancient_indicator().max(previous_upper_bound);

        let compressed = file.compress_span(upper_bound)?;
        self.tracker.set_file(index, compressed)?;
        self.total_file_size += file.file_size();

        Ok(())
    }

    /// Recycles files that are both entirely below `ancient_threshold` and
    /// older than the minimum retention period.
    ///
    /// The last file is never removed.
    pub fn prune_old_files(&mut self, ancient_threshold: i64) -> Result<()> {
        let retention = TimeDelta::from_std(self.minimum_retention_period).unwrap_or(TimeDelta::MAX);
        let now = self.time.now();
        let mut pruned = 0usize;

        while let Some(first) = self.tracker.first_file() {
            if first.upper_bound() >= ancient_threshold {
                break;
            }
            if now.signed_duration_since(first.timestamp()) < retention {
                break;
            }
            if self.tracker.len() == 1 {
                tracing::error!(
                    file = first.file_name(),
                    ancient_threshold,
                    "refusing to prune the last remaining file"
                );
                break;
            }

            let Some(file) = self.tracker.remove_first_file() else {
                break;
            };
            let size = file.size_on_disk();
            file.delete_file(&self.root, self.recycle_bin.as_ref())?;
            self.total_file_size = self.total_file_size.saturating_sub(size);
            pruned += 1;
        }

        if pruned > 0 {
            tracing::info!(
                pruned,
                ancient_threshold,
                remaining = self.tracker.len(),
                total_size = %ByteSize(self.total_file_size),
                "pruned old files"
            );
        }

        Ok(())
    }

    /// Stamps files allocated from now on with `origin`.
    pub fn register_discontinuity(&mut self, origin: i64) -> Result<()> {
        if origin < self.current_origin {
            return Err(PcesError::IllegalState(format!(
                "discontinuity origin {origin} is below the current origin {}",
                self.current_origin
            )));
        }

        tracing::info!(from = self.current_origin, to = origin, "registered discontinuity");
        self.current_origin = origin;
        Ok(())
    }
}
