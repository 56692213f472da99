use super::descriptor::{PcesFile, sync_parent};
use super::record;
use crate::error::{PcesError, Result};
use crate::event::PcesEvent;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

pub(crate) const STAGING_EXTENSION: &str = "tmp";

/// Append handle onto exactly one descriptor's path.
///
/// The write cursor only moves forward. Once closed the file is read-only
/// for good; the only operation left is span compression.
pub struct PcesMutableFile {
    descriptor: PcesFile,
    writer: Option<BufWriter<File>>,
    staging_path: Option<PathBuf>,
    file_size: u64,
    highest_ancient_indicator: i64,
}

fn open(path: &std::path::Path, truncate_existing: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = File::options();
    options.write(true);
    if truncate_existing {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    Ok(options.open(path)?)
}

impl PcesMutableFile {
    pub(crate) fn create(descriptor: PcesFile) -> Result<Self> {
        let file = open(descriptor.path(), false)?;
        Self::with_file(descriptor, file, None)
    }

    pub(crate) fn create_staged(descriptor: PcesFile) -> Result<Self> {
        let mut staging_path = descriptor.path().as_os_str().to_owned();
        staging_path.push(".");
        staging_path.push(STAGING_EXTENSION);
        let staging_path = PathBuf::from(staging_path);

        // Leftovers from an interrupted attempt are overwritten.
        let file = open(&staging_path, true)?;
        Self::with_file(descriptor, file, Some(staging_path))
    }

    fn with_file(descriptor: PcesFile, file: File, staging_path: Option<PathBuf>) -> Result<Self> {
        let mut writer = BufWriter::new(file);
        let file_size = record::write_header(&mut writer)?;
        let highest_ancient_indicator = descriptor.lower_bound();

        Ok(Self {
            descriptor,
            writer: Some(writer),
            staging_path,
            file_size,
            highest_ancient_indicator,
        })
    }

    pub fn descriptor(&self) -> &PcesFile {
        &self.descriptor
    }

    pub fn can_contain(&self, ancient_indicator: i64) -> bool {
        self.descriptor.can_contain(ancient_indicator)
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Appends an event. The event's indicator must fall inside the span.
    pub fn write_event(&mut self, event: &PcesEvent) -> Result<()> {
        let ancient_indicator = event.ancient_indicator(self.descriptor.ancient_mode());
        if !self.can_contain(ancient_indicator) {
            return Err(PcesError::IllegalState(format!(
                "event with ancient indicator {ancient_indicator} does not fit in [{}, {}] of {}",
                self.descriptor.lower_bound(),
                self.descriptor.upper_bound(),
                self.descriptor.file_name()
            )));
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(PcesError::IllegalState(format!(
                "{} is closed",
                self.descriptor.file_name()
            )));
        };

        let body = event.encode()?;
        self.file_size += record::write_record(writer, &body)?;
        self.highest_ancient_indicator = self.highest_ancient_indicator.max(ancient_indicator);

        Ok(())
    }

    /// Pushes buffered records to the OS and waits until they are on stable storage.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flushes, fsyncs and seals the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        if let Some(staging_path) = self.staging_path.take() {
            std::fs::rename(&staging_path, self.descriptor.path())?;
            sync_parent(self.descriptor.path())?;
        }

        Ok(())
    }

    /// Bytes written so far, header included.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn highest_ancient_indicator(&self) -> i64 {
        self.highest_ancient_indicator
    }

    /// Distance between the lower bound and the highest indicator written.
    pub fn utilized_span(&self) -> i64 {
        self.highest_ancient_indicator - self.descriptor.lower_bound()
    }

    /// Shrinks the declared upper bound of a closed file by renaming it.
    ///
    /// The contents are untouched since the span lives in the file name.
    pub fn compress_span(&mut self, upper_bound: i64) -> Result<PcesFile> {
        if !self.is_closed() {
            return Err(PcesError::IllegalState(format!(
                "cannot compress the span of open file {}",
                self.descriptor.file_name()
            )));
        }

        if upper_bound < self.highest_ancient_indicator {
            return Err(PcesError::InvalidArgument(format!(
                "upper bound {upper_bound} is below the highest indicator written ({})",
                self.highest_ancient_indicator
            )));
        }

        if upper_bound == self.descriptor.upper_bound() {
            return Ok(self.descriptor.clone());
        }

        let compressed = self.descriptor.compress_span_on_disk(upper_bound)?;

        tracing::debug!(
            from = self.descriptor.file_name(),
            to = compressed.file_name(),
            "compressed file span"
        );

        self.descriptor = compressed.clone();
        Ok(compressed)
    }
}

impl Drop for PcesMutableFile {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                tracing::error!(
                    file = self.descriptor.file_name(),
                    error = %e,
                    "failed to close file on drop"
                );
            }
        }
    }
}
