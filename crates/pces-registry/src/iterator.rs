use pces_core::{PcesEvent, PcesFile, PcesFileIterator, Result};
use std::collections::VecDeque;

/// Events of several files, in file order, filtered by ancient indicator.
///
/// Files are opened lazily. A partial trailing event in any file ends that
/// file only; iteration continues with the next one.
pub struct PcesMultiFileIterator {
    files: VecDeque<PcesFile>,
    current: Option<PcesFileIterator>,
    lower_bound: i64,
    has_partial_event: bool,
    failed: bool,
}

impl PcesMultiFileIterator {
    pub fn new(files: Vec<PcesFile>, lower_bound: i64) -> Self {
        Self {
            files: files.into(),
            current: None,
            lower_bound,
            has_partial_event: false,
            failed: false,
        }
    }

    /// Whether any file visited so far ended in a partial event.
    pub fn has_partial_event(&self) -> bool {
        self.has_partial_event
            || self
                .current
                .as_ref()
                .is_some_and(PcesFileIterator::has_partial_event)
    }

    /// The file currently being read.
    pub fn current_file(&self) -> Option<&PcesFile> {
        self.current.as_ref().map(PcesFileIterator::file)
    }

    fn read_next(&mut self) -> Result<Option<PcesEvent>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(event) = current.next() {
                    return event.map(Some);
                }
                self.has_partial_event |= current.has_partial_event();
                self.current = None;
            }

            let Some(file) = self.files.pop_front() else {
                return Ok(None);
            };
            self.current = Some(file.event_iterator(self.lower_bound)?);
        }
    }
}

impl Iterator for PcesMultiFileIterator {
    type Item = Result<PcesEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.read_next() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for PcesMultiFileIterator {}
