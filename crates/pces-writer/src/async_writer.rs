use crate::durability::DurabilityWatermark;
use crate::writer::PcesWriter;
use crossbeam_channel::{Receiver, Sender, bounded};
use pces_core::{PcesError, PcesEvent, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Work handed to the writer thread.
enum Command {
    BeginStreaming,
    Write(Arc<PcesEvent>),
    Flush(i64),
    UpdateNonAncientBoundary(i64),
    SetMinimumAncientIdentifierToStore(i64),
    RegisterDiscontinuity(i64),
}

/// Runs a [`PcesWriter`] on a dedicated thread fed by a bounded queue.
///
/// Callers only block when the queue is full or when they explicitly wait
/// for durability. The first error on the writer thread stops it; later
/// calls fail with [`PcesError::WriterStopped`] and [`AsyncPcesWriter::stop`]
/// returns the error.
pub struct AsyncPcesWriter {
    sender: Option<Sender<Command>>,
    handle: Option<JoinHandle<Result<()>>>,
    watermark: DurabilityWatermark,
}

impl AsyncPcesWriter {
    /// Starts `writer` and moves it to a new thread.
    pub fn spawn(mut writer: PcesWriter, queue_capacity: usize) -> Result<Self> {
        writer.start()?;

        let watermark = writer.watermark();
        let (sender, receiver) = bounded(queue_capacity);

        let handle = std::thread::Builder::new()
            .name(String::from("pces-writer"))
            .spawn(move || run(writer, receiver))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            watermark,
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        let Some(sender) = &self.sender else {
            return Err(PcesError::WriterStopped);
        };
        sender.send(command).map_err(|_| PcesError::WriterStopped)
    }

    pub fn begin_streaming_new_events(&self) -> Result<()> {
        self.send(Command::BeginStreaming)
    }

    /// Queues a sequenced event. The writer thread marks it stale if it is
    /// ancient by the time it gets written.
    pub fn write_event(&self, event: Arc<PcesEvent>) -> Result<()> {
        self.send(Command::Write(event))
    }

    pub fn submit_flush_request(&self, sequence_number: i64) -> Result<()> {
        self.send(Command::Flush(sequence_number))
    }

    pub fn update_non_ancient_event_boundary(&self, boundary: i64) -> Result<()> {
        self.send(Command::UpdateNonAncientBoundary(boundary))
    }

    pub fn set_minimum_ancient_identifier_to_store(&self, threshold: i64) -> Result<()> {
        self.send(Command::SetMinimumAncientIdentifierToStore(threshold))
    }

    pub fn register_discontinuity(&self, origin: i64) -> Result<()> {
        self.send(Command::RegisterDiscontinuity(origin))
    }

    pub fn latest_durable_sequence_number(&self) -> i64 {
        self.watermark.get()
    }

    pub fn is_event_durable(&self, event: &PcesEvent) -> bool {
        let sequence_number = event.stream_sequence_number();
        sequence_number >= 0 && sequence_number <= self.watermark.get()
    }

    pub fn wait_until_durable(&self, event: &PcesEvent, timeout: Duration) -> bool {
        let sequence_number = event.stream_sequence_number();
        sequence_number >= 0 && self.watermark.wait_for(sequence_number, timeout)
    }

    /// Drains the queue, makes every written event durable and joins the
    /// writer thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.sender.take());

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| PcesError::IllegalState(String::from("writer thread panicked")))?
    }
}

impl Drop for AsyncPcesWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "writer thread failed");
        }
    }
}

fn apply(writer: &mut PcesWriter, command: Command) -> Result<()> {
    match command {
        Command::BeginStreaming => writer.begin_streaming_new_events(),
        Command::Write(event) => writer.write_event(&event).map(|_| ()),
        Command::Flush(sequence_number) => writer.submit_flush_request(sequence_number).map(|_| ()),
        Command::UpdateNonAncientBoundary(boundary) => {
            writer.update_non_ancient_event_boundary(boundary);
            Ok(())
        }
        Command::SetMinimumAncientIdentifierToStore(threshold) => {
            writer.set_minimum_ancient_identifier_to_store(threshold)
        }
        Command::RegisterDiscontinuity(origin) => writer.register_discontinuity(origin).map(|_| ()),
    }
}

fn run(mut writer: PcesWriter, receiver: Receiver<Command>) -> Result<()> {
    for command in receiver.iter() {
        if let Err(e) = apply(&mut writer, command) {
            tracing::error!(error = %e, "stopping writer thread");
            if let Err(stop_error) = writer.stop() {
                tracing::error!(error = %stop_error, "failed to stop writer cleanly");
            }
            return Err(e);
        }
    }

    writer.stop()
}
