use crate::iterator::PcesMultiFileIterator;
use pces_core::{AncientMode, NO_LOWER_BOUND, PcesError, PcesFile, Result};
use std::collections::VecDeque;
use std::ops::Range;

/// Files of one stream, ordered by sequence number.
///
/// Consecutive files never decrease in lower bound, upper bound, timestamp
/// or origin. Sequence numbers are consecutive unless gaps are permitted,
/// in which case they only have to increase.
#[derive(Debug, Clone)]
pub struct PcesFileTracker {
    ancient_mode: AncientMode,
    permit_gaps: bool,
    files: VecDeque<PcesFile>,
}

impl PcesFileTracker {
    pub fn new(ancient_mode: AncientMode) -> Self {
        Self {
            ancient_mode,
            permit_gaps: false,
            files: VecDeque::new(),
        }
    }

    pub fn with_permit_gaps(mut self, permit_gaps: bool) -> Self {
        self.permit_gaps = permit_gaps;
        self
    }

    pub fn ancient_mode(&self) -> AncientMode {
        self.ancient_mode
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn first_file(&self) -> Option<&PcesFile> {
        self.files.front()
    }

    pub fn last_file(&self) -> Option<&PcesFile> {
        self.files.back()
    }

    pub fn get(&self, index: usize) -> Option<&PcesFile> {
        self.files.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PcesFile> + ExactSizeIterator {
        self.files.iter()
    }

    /// Checks that `file` may directly follow `previous`.
    fn check_order(&self, previous: &PcesFile, file: &PcesFile) -> Result<()> {
        let violation = if self.permit_gaps {
            file.sequence_number() <= previous.sequence_number()
        } else {
            previous.sequence_number().checked_add(1) != Some(file.sequence_number())
        };
        if violation {
            return Err(order_violation("sequence number", previous, file));
        }

        if file.lower_bound() < previous.lower_bound() {
            return Err(order_violation("lower bound", previous, file));
        }
        if file.upper_bound() < previous.upper_bound() {
            return Err(order_violation("upper bound", previous, file));
        }
        if file.timestamp() < previous.timestamp() {
            return Err(order_violation("timestamp", previous, file));
        }
        if file.origin() < previous.origin() {
            return Err(order_violation("origin", previous, file));
        }

        Ok(())
    }

    /// Appends a file after validating it against the current last file.
    pub fn add_file(&mut self, file: PcesFile) -> Result<()> {
        if file.ancient_mode() != self.ancient_mode {
            return Err(PcesError::IllegalState(format!(
                "{} uses {} mode, expected {}",
                file.file_name(),
                file.ancient_mode(),
                self.ancient_mode
            )));
        }

        if let Some(previous) = self.files.back() {
            self.check_order(previous, &file)?;
        }

        self.files.push_back(file);
        Ok(())
    }

    pub fn remove_first_file(&mut self) -> Option<PcesFile> {
        self.files.pop_front()
    }

    pub fn remove_last_file(&mut self) -> Option<PcesFile> {
        self.files.pop_back()
    }

    /// Replaces the file at `index`, used after span compression renamed it.
    pub fn set_file(&mut self, index: usize, file: PcesFile) -> Result<()> {
        let Some(current) = self.files.get(index) else {
            return Err(PcesError::InvalidArgument(format!(
                "no file at index {index} (tracking {})",
                self.files.len()
            )));
        };
        if current.sequence_number() != file.sequence_number() {
            return Err(PcesError::IllegalState(format!(
                "cannot replace {} with {}",
                current.file_name(),
                file.file_name()
            )));
        }

        if let Some(previous) = index.checked_sub(1).and_then(|i| self.files.get(i)) {
            self.check_order(previous, &file)?;
        }
        if let Some(next) = self.files.get(index + 1) {
            self.check_order(&file, next)?;
        }

        self.files[index] = file;
        Ok(())
    }

    /// Indices of the files reachable from a state at `starting_origin`.
    ///
    /// That is the run of files sharing the highest origin that does not
    /// exceed `starting_origin`. Files of a later origin follow a
    /// discontinuity the starting state never saw. Files of an earlier
    /// origin precede a discontinuity the starting state already crossed.
    pub fn relevant_range(&self, starting_origin: i64) -> Range<usize> {
        let mut start = 0;
        let mut end = 0;

        for (index, file) in self.files.iter().enumerate() {
            if file.origin() > starting_origin {
                break;
            }
            if index > 0 && file.origin() != self.files[index - 1].origin() {
                start = index;
            }
            end = index + 1;
        }

        start..end
    }

    /// Index of the first file that may hold indicators `>= lower_bound`.
    fn first_file_covering(&self, lower_bound: i64) -> usize {
        if lower_bound == NO_LOWER_BOUND {
            return 0;
        }
        self.files.partition_point(|f| f.upper_bound() < lower_bound)
    }

    /// Files that may contain events with an indicator `>= lower_bound` and
    /// that are reachable from `starting_origin`, in stream order.
    pub fn get_file_iterator(
        &self,
        lower_bound: i64,
        starting_origin: i64,
    ) -> impl Iterator<Item = &PcesFile> {
        let Range { start, end } = self.relevant_range(starting_origin);
        let start = start.max(self.first_file_covering(lower_bound));
        self.files.range(start..end.max(start))
    }

    /// Events with an indicator `>= lower_bound` from the files selected by
    /// [`PcesFileTracker::get_file_iterator`].
    pub fn get_event_iterator(&self, lower_bound: i64, starting_origin: i64) -> PcesMultiFileIterator {
        let files = self
            .get_file_iterator(lower_bound, starting_origin)
            .cloned()
            .collect();
        PcesMultiFileIterator::new(files, lower_bound)
    }
}

fn order_violation(field: &str, previous: &PcesFile, file: &PcesFile) -> PcesError {
    PcesError::IllegalState(format!(
        "{field} decreases or skips from {} to {}",
        previous.file_name(),
        file.file_name()
    ))
}
