use crate::tracker::PcesFileTracker;
use pces_common::RecycleBin;
use pces_core::{AncientMode, NO_LOWER_BOUND, PcesError, PcesFile, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Lists the files of one ancient mode below `root`, sorted by sequence number.
///
/// Files whose names cannot be parsed are logged and ignored. A missing
/// root is an empty stream.
pub fn list_pces_files(root: &Path, ancient_mode: AncientMode) -> Result<Vec<PcesFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        return Err(PcesError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() || !PcesFile::is_pces_file(entry.path()) {
            continue;
        }

        match PcesFile::from_path(entry.path()) {
            Ok(file) if file.ancient_mode() == ancient_mode => files.push(file),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "ignoring unparsable file");
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Rebuilds the view of a stream directory at startup.
///
/// Reading validates the order of the files, recycles the files that follow
/// a discontinuity the starting state cannot reach, and optionally shrinks
/// the span of the last file to what it actually holds.
pub struct PcesFileReader {
    root: PathBuf,
    ancient_mode: AncientMode,
    permit_gaps: bool,
    compact_last_file: bool,
    recycle_bin: Arc<dyn RecycleBin>,
}

impl PcesFileReader {
    pub fn new(
        root: impl Into<PathBuf>,
        ancient_mode: AncientMode,
        recycle_bin: Arc<dyn RecycleBin>,
    ) -> Self {
        Self {
            root: root.into(),
            ancient_mode,
            permit_gaps: false,
            compact_last_file: false,
            recycle_bin,
        }
    }

    /// Skip files that break the stream order instead of failing.
    pub fn with_permit_gaps(mut self, permit_gaps: bool) -> Self {
        self.permit_gaps = permit_gaps;
        self
    }

    pub fn with_compact_last_file(mut self, compact_last_file: bool) -> Self {
        self.compact_last_file = compact_last_file;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[tracing::instrument(skip_all, fields(root = %self.root.display(), starting_origin = starting_origin))]
    pub fn read_files(&self, starting_origin: i64) -> Result<PcesFileTracker> {
        let mut tracker = PcesFileTracker::new(self.ancient_mode).with_permit_gaps(self.permit_gaps);

        let files = list_pces_files(&self.root, self.ancient_mode)?;
        self.recycle_staged_leftovers()?;

        for file in files {
            let sequence_number = file.sequence_number();
            let path = file.path().to_path_buf();

            if let Err(e) = tracker.add_file(file) {
                if !self.permit_gaps {
                    return Err(e);
                }
                tracing::warn!(
                    path = %path.display(),
                    sequence_number,
                    error = %e,
                    "skipping file that breaks stream order"
                );
            }
        }

        self.resolve_discontinuities(&mut tracker, starting_origin)?;

        if self.compact_last_file {
            Self::compact_last_file(&mut tracker);
        }

        tracing::info!(
            files = tracker.len(),
            first = tracker.first_file().map(PcesFile::sequence_number),
            last = tracker.last_file().map(PcesFile::sequence_number),
            "read event stream files"
        );

        Ok(tracker)
    }

    /// Recycles `.pces.tmp` files of this mode that an interrupted staged
    /// write never installed.
    fn recycle_staged_leftovers(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Ok(());
        }

        let mut leftovers = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if PcesFile::from_staged_path(entry.path())
                .is_some_and(|target| target.ancient_mode() == self.ancient_mode)
            {
                leftovers.push(entry.into_path());
            }
        }

        for path in leftovers {
            tracing::warn!(path = %path.display(), "recycling staged file that was never installed");
            self.recycle_bin.recycle(&path)?;
        }

        Ok(())
    }

    /// Recycles every file after the last one reachable from `starting_origin`.
    ///
    /// Files are removed from the newest backwards so that a crash midway
    /// leaves a stream that is still ordered.
    fn resolve_discontinuities(&self, tracker: &mut PcesFileTracker, starting_origin: i64) -> Result<()> {
        let reachable = tracker.relevant_range(starting_origin);
        if reachable.end == tracker.len() {
            return Ok(());
        }

        tracing::info!(
            starting_origin,
            unreachable = tracker.len() - reachable.end,
            "recycling files after a discontinuity"
        );

        while tracker.len() > reachable.end {
            let Some(file) = tracker.remove_last_file() else {
                break;
            };
            tracing::debug!(path = %file.path().display(), origin = file.origin(), "recycling unreachable file");
            file.delete_file(&self.root, self.recycle_bin.as_ref())?;
        }

        Ok(())
    }

    /// Compresses the span of the last file to the highest indicator it holds.
    ///
    /// The new upper bound never drops below the previous file's upper bound.
    /// Failures are logged and leave the file as it was.
    pub fn compact_last_file(tracker: &mut PcesFileTracker) {
        let Some(last) = tracker.last_file().cloned() else {
            return;
        };

        let index = tracker.len() - 1;
        let previous_upper_bound = index
            .checked_sub(1)
            .and_then(|i| tracker.get(i))
            .map_or(last.lower_bound(), PcesFile::upper_bound);

        let highest = match highest_ancient_indicator(&last) {
            Ok(highest) => highest,
            Err(e) => {
                tracing::error!(
                    path = %last.path().display(),
                    error = %e,
                    "failed to read last file, leaving its span untouched"
                );
                return;
            }
        };

        let upper_bound = highest.max(previous_upper_bound).max(last.lower_bound());
        if upper_bound >= last.upper_bound() {
            return;
        }

        match last.compress_span_on_disk(upper_bound) {
            Ok(compacted) => {
                tracing::info!(
                    from = last.file_name(),
                    to = compacted.file_name(),
                    "compacted last file"
                );
                if let Err(e) = tracker.set_file(index, compacted) {
                    tracing::error!(error = %e, "compacted file no longer fits the stream");
                }
            }
            Err(e) => {
                tracing::error!(path = %last.path().display(), error = %e, "failed to compact last file");
            }
        }
    }
}

fn highest_ancient_indicator(file: &PcesFile) -> Result<i64> {
    let mode = file.ancient_mode();
    let mut highest = file.lower_bound();
    for event in file.event_iterator(NO_LOWER_BOUND)? {
        highest = highest.max(event?.ancient_indicator(mode));
    }
    Ok(highest)
}
