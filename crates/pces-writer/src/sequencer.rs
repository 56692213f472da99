use pces_core::{NO_STREAM_SEQUENCE_NUMBER, PcesError, PcesEvent, Result};
use std::sync::atomic::{AtomicI64, Ordering};

/// Hands out stream sequence numbers.
///
/// Safe to share between producer threads. Numbers are handed out in call
/// order without gaps, as long as no event is assigned twice.
#[derive(Debug, Default)]
pub struct PcesSequencer {
    next: AtomicI64,
}

impl PcesSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues a stream whose next sequence number is `next`.
    pub fn starting_at(next: i64) -> Self {
        Self {
            next: AtomicI64::new(next),
        }
    }

    pub fn assign_stream_sequence_number(&self, event: &PcesEvent) -> Result<i64> {
        let current = event.stream_sequence_number();
        if current != NO_STREAM_SEQUENCE_NUMBER {
            return Err(PcesError::IllegalState(format!(
                "event already has stream sequence number {current}"
            )));
        }

        let sequence_number = self.next.fetch_add(1, Ordering::SeqCst);
        event.set_stream_sequence_number(sequence_number)?;
        Ok(sequence_number)
    }
}
