use crate::ancient::AncientMode;
use crate::error::{PcesError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Stream position of an event that has not been sequenced yet.
pub const NO_STREAM_SEQUENCE_NUMBER: i64 = -1;

/// Stream position of an event that was rejected as ancient by the writer.
pub const STALE_EVENT_STREAM_SEQUENCE_NUMBER: i64 = -2;

/// An event as seen by the durability log.
///
/// The payload is opaque. Only the two ancient indicators take part in
/// indexing. The stream position is assigned in memory by the sequencer and
/// is never persisted.
#[derive(Debug)]
pub struct PcesEvent {
    generation: i64,
    birth_round: i64,
    payload: Vec<u8>,
    stream_sequence_number: AtomicI64,
}

#[derive(Serialize)]
struct EventRecordRef<'a> {
    generation: i64,
    birth_round: i64,
    payload: &'a [u8],
}

#[derive(Deserialize)]
struct EventRecord {
    generation: i64,
    birth_round: i64,
    payload: Vec<u8>,
}

impl PcesEvent {
    pub fn new(generation: i64, birth_round: i64, payload: Vec<u8>) -> Self {
        Self {
            generation,
            birth_round,
            payload,
            stream_sequence_number: AtomicI64::new(NO_STREAM_SEQUENCE_NUMBER),
        }
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn birth_round(&self) -> i64 {
        self.birth_round
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn ancient_indicator(&self, mode: AncientMode) -> i64 {
        match mode {
            AncientMode::Generation => self.generation,
            AncientMode::BirthRound => self.birth_round,
        }
    }

    /// Returns a copy whose birth round is replaced, used when migrating
    /// generation-indexed events into a birth-round stream.
    pub fn with_birth_round(mut self, birth_round: i64) -> Self {
        self.birth_round = birth_round;
        self
    }

    pub fn stream_sequence_number(&self) -> i64 {
        self.stream_sequence_number.load(Ordering::Acquire)
    }

    /// Assigns the stream position.
    ///
    /// Marking an event stale is always permitted. Any other value may only be
    /// assigned to an event that has no position yet.
    pub fn set_stream_sequence_number(&self, value: i64) -> Result<()> {
        if value == STALE_EVENT_STREAM_SEQUENCE_NUMBER {
            self.mark_stale();
            return Ok(());
        }

        self.stream_sequence_number
            .compare_exchange(
                NO_STREAM_SEQUENCE_NUMBER,
                value,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| {
                PcesError::IllegalState(format!(
                    "stream sequence number already set to {current}, refusing {value}"
                ))
            })
    }

    pub fn mark_stale(&self) {
        self.stream_sequence_number
            .store(STALE_EVENT_STREAM_SEQUENCE_NUMBER, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stream_sequence_number() == STALE_EVENT_STREAM_SEQUENCE_NUMBER
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let record = EventRecordRef {
            generation: self.generation,
            birth_round: self.birth_round,
            payload: &self.payload,
        };
        Ok(bincode::serialize(&record)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        let record: EventRecord = bincode::deserialize(bytes)?;
        Ok(Self::new(record.generation, record.birth_round, record.payload))
    }
}

impl Clone for PcesEvent {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            birth_round: self.birth_round,
            payload: self.payload.clone(),
            stream_sequence_number: AtomicI64::new(self.stream_sequence_number()),
        }
    }
}

/// Events compare by content. The in-memory stream position is not part of
/// an event's identity.
impl PartialEq for PcesEvent {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
            && self.birth_round == other.birth_round
            && self.payload == other.payload
    }
}

impl Eq for PcesEvent {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_sequence_number_assigned_once() {
        let event = PcesEvent::new(1, 1, vec![]);
        assert_eq!(event.stream_sequence_number(), NO_STREAM_SEQUENCE_NUMBER);

        event.set_stream_sequence_number(7).unwrap();
        assert_eq!(event.stream_sequence_number(), 7);

        assert!(matches!(
            event.set_stream_sequence_number(8),
            Err(PcesError::IllegalState(_))
        ));
        assert_eq!(event.stream_sequence_number(), 7);
    }

    #[test]
    fn test_stale_overrides_assigned_number() {
        let event = PcesEvent::new(1, 1, vec![]);
        event.set_stream_sequence_number(3).unwrap();
        event
            .set_stream_sequence_number(STALE_EVENT_STREAM_SEQUENCE_NUMBER)
            .unwrap();
        assert!(event.is_stale());
    }

    #[test]
    fn test_encode_decode_preserves_indexing_fields() {
        let event = PcesEvent::new(42, 7, b"hello".to_vec());
        let decoded = PcesEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.ancient_indicator(AncientMode::Generation), 42);
        assert_eq!(decoded.ancient_indicator(AncientMode::BirthRound), 7);
        assert_eq!(decoded.stream_sequence_number(), NO_STREAM_SEQUENCE_NUMBER);
    }
}
