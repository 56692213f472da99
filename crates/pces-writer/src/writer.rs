use crate::config::PcesConfig;
use crate::durability::DurabilityWatermark;
use crate::manager::PcesFileManager;
use pces_core::{
    AncientMode, NO_STREAM_SEQUENCE_NUMBER, PcesError, PcesEvent, PcesMutableFile, Result,
};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Not accepting events.
    Stopped,
    /// Events replayed from disk are acknowledged without being written again.
    Recovering,
    /// New events are written to disk.
    Streaming,
}

/// Rotation parameters taken from [`PcesConfig`].
#[derive(Debug, Clone, Copy)]
struct SpanPolicy {
    preferred_file_size: u64,
    bootstrap_span: i64,
    bootstrap_span_overlap_factor: f64,
    span_overlap_factor: f64,
}

/// Appends events to the stream and tracks their durability.
///
/// All mutation happens through `&mut self`, so the owner decides which
/// thread does the disk I/O. [`crate::AsyncPcesWriter`] moves the writer to
/// a dedicated thread.
pub struct PcesWriter {
    file_manager: PcesFileManager,
    policy: SpanPolicy,
    state: WriterState,

    current_file: Option<PcesMutableFile>,
    /// Utilized span of the last closed file.
    previous_span: i64,
    bootstrapping: bool,

    non_ancient_boundary: i64,
    minimum_ancient_identifier_to_store: i64,

    last_written: i64,
    last_flushed: i64,
    flush_requests: BTreeSet<i64>,
    watermark: DurabilityWatermark,
}

impl PcesWriter {
    pub fn new(config: &PcesConfig, file_manager: PcesFileManager) -> Self {
        let policy = SpanPolicy {
            preferred_file_size: config.preferred_file_size.as_u64(),
            bootstrap_span: i64::try_from(config.bootstrap_span).unwrap_or(i64::MAX),
            bootstrap_span_overlap_factor: config.bootstrap_span_overlap_factor,
            span_overlap_factor: config.span_overlap_factor,
        };

        Self {
            file_manager,
            policy,
            state: WriterState::Stopped,
            current_file: None,
            previous_span: 0,
            bootstrapping: true,
            non_ancient_boundary: 0,
            minimum_ancient_identifier_to_store: 0,
            last_written: NO_STREAM_SEQUENCE_NUMBER,
            last_flushed: NO_STREAM_SEQUENCE_NUMBER,
            flush_requests: BTreeSet::new(),
            watermark: DurabilityWatermark::default(),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn ancient_mode(&self) -> AncientMode {
        self.file_manager.ancient_mode()
    }

    pub fn file_manager(&self) -> &PcesFileManager {
        &self.file_manager
    }

    pub fn last_written_sequence_number(&self) -> i64 {
        self.last_written
    }

    pub fn latest_durable_sequence_number(&self) -> i64 {
        self.last_flushed
    }

    pub fn non_ancient_boundary(&self) -> i64 {
        self.non_ancient_boundary
    }

    /// Shared handle onto the durability watermark.
    pub fn watermark(&self) -> DurabilityWatermark {
        self.watermark.clone()
    }

    /// Starts accepting events, replayed ones first.
    pub fn start(&mut self) -> Result<()> {
        if self.state != WriterState::Stopped {
            return Err(PcesError::IllegalState(format!(
                "cannot start a writer that is {:?}",
                self.state
            )));
        }
        self.state = WriterState::Recovering;
        Ok(())
    }

    /// Switches from acknowledging replayed events to writing new ones.
    pub fn begin_streaming_new_events(&mut self) -> Result<()> {
        if self.state != WriterState::Recovering {
            return Err(PcesError::IllegalState(format!(
                "cannot begin streaming while {:?}",
                self.state
            )));
        }

        self.close_current_file()?;
        self.state = WriterState::Streaming;
        tracing::info!(
            last_written = self.last_written,
            "streaming new events"
        );
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state == WriterState::Stopped {
            return Err(PcesError::WriterStopped);
        }
        Ok(())
    }

    /// Writes an event that already carries a stream sequence number.
    ///
    /// Events below the non-ancient boundary are marked stale and dropped.
    /// Returns the new durable sequence number if the write made more
    /// events durable.
    pub fn write_event(&mut self, event: &PcesEvent) -> Result<Option<i64>> {
        self.ensure_running()?;

        let sequence_number = event.stream_sequence_number();
        if sequence_number < 0 {
            return Err(PcesError::IllegalState(format!(
                "event has no stream sequence number ({sequence_number})"
            )));
        }
        if sequence_number <= self.last_written {
            return Err(PcesError::IllegalState(format!(
                "stream sequence number {sequence_number} is not after {}",
                self.last_written
            )));
        }

        if self.state == WriterState::Recovering {
            // Replayed events were read from disk, they are durable already.
            self.last_written = sequence_number;
            self.mark_durable(sequence_number);
            return Ok(Some(sequence_number));
        }

        let ancient_indicator = event.ancient_indicator(self.ancient_mode());
        if ancient_indicator < self.non_ancient_boundary {
            event.mark_stale();
            return Ok(None);
        }

        let durable_before = self.last_flushed;
        self.prepare_output_stream(ancient_indicator)?;

        let Some(file) = self.current_file.as_mut() else {
            return Err(PcesError::IllegalState(String::from("no file to write to")));
        };
        file.write_event(event)?;
        self.last_written = sequence_number;

        self.process_flush_requests()?;
        Ok((self.last_flushed != durable_before).then_some(self.last_flushed))
    }

    /// Asks for every event up to `sequence_number` to be made durable.
    ///
    /// Targets that are already durable are ignored. Otherwise the request
    /// is satisfied as soon as the target has been written, possibly right
    /// away.
    pub fn submit_flush_request(&mut self, sequence_number: i64) -> Result<Option<i64>> {
        self.ensure_running()?;

        if sequence_number <= self.last_flushed {
            return Ok(None);
        }

        self.flush_requests.insert(sequence_number);
        let flushed = self.process_flush_requests()?;
        Ok(flushed.then_some(self.last_flushed))
    }

    /// Raises the non-ancient boundary. Lower values are ignored.
    pub fn update_non_ancient_event_boundary(&mut self, boundary: i64) {
        if boundary < self.non_ancient_boundary {
            tracing::debug!(
                boundary,
                current = self.non_ancient_boundary,
                "ignoring lower non-ancient boundary"
            );
            return;
        }
        self.non_ancient_boundary = boundary;
    }

    /// Sets the lowest indicator that must stay on disk and prunes the rest.
    pub fn set_minimum_ancient_identifier_to_store(&mut self, threshold: i64) -> Result<()> {
        self.minimum_ancient_identifier_to_store = threshold;
        if self.state == WriterState::Streaming {
            self.file_manager.prune_old_files(threshold)?;
        }
        Ok(())
    }

    /// Closes the current file so that the next one starts a new origin.
    pub fn register_discontinuity(&mut self, origin: i64) -> Result<Option<i64>> {
        self.ensure_running()?;

        let durable_before = self.last_flushed;
        self.close_current_file()?;
        self.file_manager.register_discontinuity(origin)?;

        Ok((self.last_flushed != durable_before).then_some(self.last_flushed))
    }

    pub fn is_event_durable(&self, event: &PcesEvent) -> bool {
        let sequence_number = event.stream_sequence_number();
        sequence_number >= 0 && sequence_number <= self.watermark.get()
    }

    pub fn wait_until_durable(&self, event: &PcesEvent, timeout: Duration) -> bool {
        let sequence_number = event.stream_sequence_number();
        sequence_number >= 0 && self.watermark.wait_for(sequence_number, timeout)
    }

    /// Makes everything written durable and closes the current file.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == WriterState::Stopped {
            return Ok(());
        }

        self.close_current_file()?;
        self.flush_requests.clear();
        self.state = WriterState::Stopped;

        tracing::info!(
            last_written = self.last_written,
            durable = self.last_flushed,
            "stopped writer"
        );
        Ok(())
    }

    fn mark_durable(&mut self, sequence_number: i64) {
        self.last_flushed = sequence_number;
        self.watermark.advance(sequence_number);
    }

    /// Drains satisfiable requests and flushes once if any of them is not
    /// durable yet.
    fn process_flush_requests(&mut self) -> Result<bool> {
        let mut flush_required = false;

        while let Some(&target) = self.flush_requests.first() {
            if target > self.last_written {
                break;
            }
            self.flush_requests.pop_first();
            flush_required |= target > self.last_flushed;
        }

        if flush_required {
            self.flush_current_file()?;
        }
        Ok(flush_required)
    }

    fn flush_current_file(&mut self) -> Result<()> {
        if let Some(file) = self.current_file.as_mut() {
            file.flush()?;
        }
        self.mark_durable(self.last_written);
        Ok(())
    }

    /// Span of a new file whose lower bound is `lower_bound` and which must
    /// hold `ancient_indicator`.
    fn compute_new_file_span(&self, lower_bound: i64, ancient_indicator: i64) -> i64 {
        let basis = if self.bootstrapping || self.previous_span == 0 {
            self.policy.bootstrap_span
        } else {
            self.previous_span
        };
        let overlap_factor = if self.bootstrapping {
            self.policy.bootstrap_span_overlap_factor
        } else {
            self.policy.span_overlap_factor
        };

        let desired_span = (basis as f64 * overlap_factor) as i64;
        let minimum_span = ancient_indicator.saturating_add(1).saturating_sub(lower_bound);
        desired_span.max(minimum_span)
    }

    /// Makes sure the current file can take an event with `ancient_indicator`.
    #[tracing::instrument(skip_all, fields(ancient_indicator = ancient_indicator))]
    fn prepare_output_stream(&mut self, ancient_indicator: i64) -> Result<()> {
        if let Some(file) = &self.current_file {
            let full = file.file_size() >= self.policy.preferred_file_size;
            if full || !file.can_contain(ancient_indicator) {
                tracing::debug!(
                    file = file.descriptor().file_name(),
                    full,
                    "rotating file"
                );
                self.close_current_file()?;
            }
        }

        if self.current_file.is_none() {
            let lower_bound = self.non_ancient_boundary;
            let upper_bound = lower_bound
                .saturating_add(self.compute_new_file_span(lower_bound, ancient_indicator));
            let descriptor = self
                .file_manager
                .get_next_file_descriptor(lower_bound, upper_bound)?;
            self.current_file = Some(descriptor.create_mutable_file()?);
        }

        Ok(())
    }

    /// Seals the current file. Closing fsyncs, so everything written so far
    /// becomes durable.
    fn close_current_file(&mut self) -> Result<()> {
        let Some(mut file) = self.current_file.take() else {
            return Ok(());
        };

        self.previous_span = file.utilized_span();
        self.bootstrapping = false;

        file.close()?;
        self.file_manager.finished_writing_file(&mut file)?;
        self.mark_durable(self.last_written);

        if self.state == WriterState::Streaming {
            self.file_manager
                .prune_old_files(self.minimum_ancient_identifier_to_store)?;
        }

        Ok(())
    }
}
