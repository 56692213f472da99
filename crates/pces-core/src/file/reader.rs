use super::descriptor::PcesFile;
use super::record::{self, HeaderOutcome, ReadOutcome};
use crate::error::{PcesError, Result};
use crate::event::PcesEvent;
use std::fs::File;
use std::io::BufReader;

/// Sequential reader over the events of one file.
///
/// Events whose ancient indicator is below the lower bound are skipped. A
/// record cut short by EOF ends iteration without an error and is reported
/// through [`PcesFileIterator::has_partial_event`]. A complete record that
/// fails validation yields one error, after which the iterator is exhausted.
pub struct PcesFileIterator {
    descriptor: PcesFile,
    reader: Option<BufReader<File>>,
    lower_bound: i64,
    offset: u64,
    has_partial_event: bool,
}

impl PcesFileIterator {
    pub(crate) fn new(descriptor: &PcesFile, lower_bound: i64) -> Result<Self> {
        let mut reader = BufReader::new(File::open(descriptor.path())?);

        let mut iterator = Self {
            descriptor: descriptor.clone(),
            reader: None,
            lower_bound,
            offset: 0,
            has_partial_event: false,
        };

        match record::read_header(&mut reader, descriptor.path())? {
            HeaderOutcome::Valid => {
                iterator.offset = record::HEADER_SIZE;
                iterator.reader = Some(reader);
            }
            HeaderOutcome::Empty => {}
            HeaderOutcome::Partial => iterator.mark_partial(),
        }

        Ok(iterator)
    }

    pub fn file(&self) -> &PcesFile {
        &self.descriptor
    }

    /// Whether iteration stopped at an incomplete trailing record.
    pub fn has_partial_event(&self) -> bool {
        self.has_partial_event
    }

    fn mark_partial(&mut self) {
        self.has_partial_event = true;
        tracing::warn!(
            file = self.descriptor.file_name(),
            offset = self.offset,
            "file ends with a partial event, ignoring it"
        );
    }

    fn read_next(&mut self) -> Result<Option<PcesEvent>> {
        let mode = self.descriptor.ancient_mode();

        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };

            let body = match record::read_record(reader, self.descriptor.path(), self.offset)? {
                ReadOutcome::Record(body) => body,
                ReadOutcome::End => {
                    self.reader = None;
                    return Ok(None);
                }
                ReadOutcome::Partial => {
                    self.reader = None;
                    self.mark_partial();
                    return Ok(None);
                }
            };

            let event = PcesEvent::decode(&body).map_err(|e| PcesError::Corrupted {
                path: self.descriptor.path().to_path_buf(),
                offset: self.offset,
                reason: format!("undecodable event: {e}"),
            })?;
            self.offset += record::record_size(&body);

            if event.ancient_indicator(mode) >= self.lower_bound {
                return Ok(Some(event));
            }
        }
    }
}

impl Iterator for PcesFileIterator {
    type Item = Result<PcesEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for PcesFileIterator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancient::AncientMode;
    use crate::file::NO_LOWER_BOUND;
    use chrono::Utc;
    use tempfile::TempDir;

    fn write_file(root: &std::path::Path, mode: AncientMode, indicators: &[i64]) -> PcesFile {
        let descriptor = PcesFile::new(mode, Utc::now(), 0, 0, 100, 0, root).unwrap();
        let mut file = descriptor.create_mutable_file().unwrap();
        for (i, indicator) in indicators.iter().enumerate() {
            let event = match mode {
                AncientMode::Generation => PcesEvent::new(*indicator, 0, vec![i as u8]),
                AncientMode::BirthRound => PcesEvent::new(0, *indicator, vec![i as u8]),
            };
            file.write_event(&event).unwrap();
        }
        file.close().unwrap();
        descriptor
    }

    #[test]
    fn test_reads_events_in_write_order() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(temp_dir.path(), AncientMode::Generation, &[3, 1, 2]);

        let events: Vec<_> = file
            .event_iterator(NO_LOWER_BOUND)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(
            events.iter().map(|e| e.generation()).collect::<Vec<_>>(),
            vec![3, 1, 2]
        );
        assert_eq!(events[2].payload(), &[2]);
    }

    #[test]
    fn test_lower_bound_filters_by_mode_indicator() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(temp_dir.path(), AncientMode::BirthRound, &[5, 9, 7, 10, 2]);

        let rounds: Vec<_> = file
            .event_iterator(7)
            .unwrap()
            .map(|e| e.unwrap().birth_round())
            .collect();

        assert_eq!(rounds, vec![9, 7, 10]);
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(temp_dir.path(), AncientMode::Generation, &[]);
        let mut iterator = file.event_iterator(NO_LOWER_BOUND).unwrap();
        assert!(iterator.next().is_none());
        assert!(!iterator.has_partial_event());

        std::fs::write(file.path(), b"").unwrap();
        let mut iterator = file.event_iterator(NO_LOWER_BOUND).unwrap();
        assert!(iterator.next().is_none());
        assert!(!iterator.has_partial_event());
    }

    #[test]
    fn test_torn_header_is_partial() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(temp_dir.path(), AncientMode::Generation, &[]);
        std::fs::write(file.path(), b"PCE").unwrap();

        let mut iterator = file.event_iterator(NO_LOWER_BOUND).unwrap();
        assert!(iterator.next().is_none());
        assert!(iterator.has_partial_event());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let file = PcesFile::new(AncientMode::Generation, Utc::now(), 0, 0, 1, 0, temp_dir.path())
            .unwrap();
        assert!(matches!(
            file.event_iterator(NO_LOWER_BOUND),
            Err(PcesError::Io(_))
        ));
    }
}
