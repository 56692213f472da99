use super::mutable::{PcesMutableFile, STAGING_EXTENSION};
use super::name::{ParsedName, encode_file_name, parse_file_name};
use super::reader::PcesFileIterator;
use crate::ancient::AncientMode;
use crate::error::{PcesError, Result};
use chrono::{DateTime, Datelike, Utc};
use pces_common::RecycleBin;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Identifies the reconnect epoch a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lineage {
    /// Current format: the origin round of the stream segment.
    Origin(i64),
    /// Pre-origin format: only records whether a discontinuity starts here.
    Legacy { discontinuity: bool },
}

/// Immutable description of one file of the stream.
///
/// Descriptors are either allocated by the file manager or parsed from an
/// existing path. A descriptor never changes; compressing a file's span
/// produces a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PcesFile {
    timestamp: DateTime<Utc>,
    sequence_number: u64,
    lower_bound: i64,
    upper_bound: i64,
    lineage: Lineage,
    ancient_mode: AncientMode,
    path: PathBuf,
}

/// Directory holding the files created at `timestamp`: `root/yyyy/mm/dd`.
pub(crate) fn date_directory(root: &Path, timestamp: &DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", timestamp.month()))
        .join(format!("{:02}", timestamp.day()))
}

fn validate_span(lower_bound: i64, upper_bound: i64) -> Result<()> {
    if lower_bound < 0 {
        return Err(PcesError::InvalidArgument(format!(
            "lower bound {lower_bound} is negative"
        )));
    }
    if upper_bound < lower_bound {
        return Err(PcesError::InvalidArgument(format!(
            "upper bound {upper_bound} is below lower bound {lower_bound}"
        )));
    }
    Ok(())
}

impl PcesFile {
    /// Creates a descriptor for a new file below `root`.
    pub fn new(
        ancient_mode: AncientMode,
        timestamp: DateTime<Utc>,
        sequence_number: u64,
        lower_bound: i64,
        upper_bound: i64,
        origin: i64,
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        if origin < 0 {
            return Err(PcesError::InvalidArgument(format!(
                "origin {origin} is negative"
            )));
        }
        Self::with_lineage(
            ancient_mode,
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            Lineage::Origin(origin),
            root.as_ref(),
        )
    }

    /// Creates a descriptor in the pre-origin naming format.
    pub fn new_legacy(
        ancient_mode: AncientMode,
        timestamp: DateTime<Utc>,
        sequence_number: u64,
        lower_bound: i64,
        upper_bound: i64,
        discontinuity: bool,
        root: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::with_lineage(
            ancient_mode,
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            Lineage::Legacy { discontinuity },
            root.as_ref(),
        )
    }

    fn with_lineage(
        ancient_mode: AncientMode,
        timestamp: DateTime<Utc>,
        sequence_number: u64,
        lower_bound: i64,
        upper_bound: i64,
        lineage: Lineage,
        root: &Path,
    ) -> Result<Self> {
        validate_span(lower_bound, upper_bound)?;

        let name = encode_file_name(
            &timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            lineage,
            ancient_mode,
        );
        let path = date_directory(root, &timestamp).join(name);

        Ok(Self {
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            lineage,
            ancient_mode,
            path,
        })
    }

    /// Parses the descriptor of an existing file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PcesError::InvalidFileName {
                name: path.display().to_string(),
                reason: String::from("file name is missing or not UTF-8"),
            })?;

        let ParsedName {
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            lineage,
            ancient_mode,
        } = parse_file_name(name)?;

        Ok(Self {
            timestamp,
            sequence_number,
            lower_bound,
            upper_bound,
            lineage,
            ancient_mode,
            path: path.to_path_buf(),
        })
    }

    /// Check if a path looks like a stream file
    pub fn is_pces_file(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == super::EVENT_FILE_EXTENSION)
    }

    /// Descriptor a staged file would have been installed as, if `path` is
    /// a `<name>.pces.tmp` file left behind by an interrupted write.
    pub fn from_staged_path(path: &Path) -> Option<Self> {
        if path.extension().is_none_or(|ext| ext != STAGING_EXTENSION) {
            return None;
        }
        let target = path.with_extension("");
        if !Self::is_pces_file(&target) {
            return None;
        }
        Self::from_path(&target).ok()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    pub fn lineage(&self) -> Lineage {
        self.lineage
    }

    /// Origin of the stream segment. Legacy files all belong to origin 0.
    pub fn origin(&self) -> i64 {
        match self.lineage {
            Lineage::Origin(origin) => origin,
            Lineage::Legacy { .. } => 0,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self.lineage, Lineage::Legacy { .. })
    }

    /// Legacy files flag the start of a discontinuity explicitly.
    pub fn has_discontinuity(&self) -> bool {
        matches!(self.lineage, Lineage::Legacy { discontinuity: true })
    }

    pub fn ancient_mode(&self) -> AncientMode {
        self.ancient_mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn can_contain(&self, ancient_indicator: i64) -> bool {
        self.lower_bound <= ancient_indicator && ancient_indicator <= self.upper_bound
    }

    /// Builds the descriptor of this file with a smaller upper bound.
    ///
    /// Everything else, including the directory, stays the same.
    pub fn build_file_with_compressed_span(&self, upper_bound: i64) -> Result<Self> {
        if upper_bound > self.upper_bound {
            return Err(PcesError::InvalidArgument(format!(
                "compressed upper bound {upper_bound} exceeds current upper bound {}",
                self.upper_bound
            )));
        }
        validate_span(self.lower_bound, upper_bound)?;

        let name = encode_file_name(
            &self.timestamp,
            self.sequence_number,
            self.lower_bound,
            upper_bound,
            self.lineage,
            self.ancient_mode,
        );
        let path = match self.path.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        };

        Ok(Self {
            upper_bound,
            path,
            ..self.clone()
        })
    }

    /// Renames the file on disk to the descriptor with a smaller upper
    /// bound and makes the rename durable.
    pub fn compress_span_on_disk(&self, upper_bound: i64) -> Result<Self> {
        let compressed = self.build_file_with_compressed_span(upper_bound)?;
        std::fs::rename(&self.path, &compressed.path)?;
        sync_parent(&compressed.path)?;
        Ok(compressed)
    }

    /// Opens a new, empty file at this descriptor's path.
    pub fn create_mutable_file(&self) -> Result<PcesMutableFile> {
        PcesMutableFile::create(self.clone())
    }

    /// Opens a new file that only appears at this descriptor's path once it
    /// has been closed. Until then the data lives under a `.tmp` name that
    /// directory scans ignore.
    pub fn create_staged_mutable_file(&self) -> Result<PcesMutableFile> {
        PcesMutableFile::create_staged(self.clone())
    }

    /// Iterates the events of this file with an indicator of at least `lower_bound`.
    pub fn event_iterator(&self, lower_bound: i64) -> Result<PcesFileIterator> {
        PcesFileIterator::new(self, lower_bound)
    }

    /// Size of the file on disk, zero if it no longer exists.
    pub fn size_on_disk(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Hands the file to the recycle bin, then removes date directories
    /// below `root` that became empty.
    pub fn delete_file(&self, root: &Path, recycle_bin: &dyn RecycleBin) -> Result<()> {
        recycle_bin.recycle(&self.path)?;

        let mut target = self.path.parent();
        while let Some(directory) = target {
            if directory == root || !directory.starts_with(root) {
                break;
            }

            let is_empty = std::fs::read_dir(directory)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                break;
            }

            std::fs::remove_dir(directory)?;
            target = directory.parent();
        }

        Ok(())
    }
}

/// Fsyncs the directory holding `path` so that renames into it survive a crash.
pub(crate) fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::File::open(parent)?.sync_all()?;
    }
    Ok(())
}

impl Ord for PcesFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence_number
            .cmp(&other.sequence_number)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for PcesFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap()
    }

    #[test]
    fn test_path_is_partitioned_by_date() {
        let file = PcesFile::new(
            AncientMode::Generation,
            timestamp(),
            1,
            10,
            20,
            0,
            "/data/pces",
        )
        .unwrap();

        assert_eq!(
            file.path(),
            Path::new("/data/pces/2024/02/03/2024-02-03T04+05+06Z_seq1_ming10_maxg20_ori0.pces")
        );
    }

    #[test]
    fn test_new_rejects_invalid_bounds() {
        let root = Path::new("/data/pces");
        for (lower, upper, origin) in [(-1, 5, 0), (6, 5, 0), (1, 5, -3)] {
            let result = PcesFile::new(
                AncientMode::BirthRound,
                timestamp(),
                0,
                lower,
                upper,
                origin,
                root,
            );
            assert!(matches!(result, Err(PcesError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_can_contain() {
        let file =
            PcesFile::new(AncientMode::Generation, timestamp(), 1, 10, 20, 0, "/r").unwrap();
        assert!(!file.can_contain(9));
        assert!(file.can_contain(10));
        assert!(file.can_contain(20));
        assert!(!file.can_contain(21));
    }

    #[test]
    fn test_compressed_span() {
        let file =
            PcesFile::new(AncientMode::BirthRound, timestamp(), 4, 10, 20, 3, "/r").unwrap();
        let compressed = file.build_file_with_compressed_span(15).unwrap();

        assert_eq!(compressed.upper_bound(), 15);
        assert_eq!(compressed.lower_bound(), 10);
        assert_eq!(compressed.sequence_number(), 4);
        assert_eq!(compressed.origin(), 3);
        assert_eq!(compressed.timestamp(), file.timestamp());
        assert_eq!(compressed.path().parent(), file.path().parent());
        assert_eq!(PcesFile::from_path(compressed.path()).unwrap(), compressed);

        assert!(file.build_file_with_compressed_span(21).is_err());
        assert!(file.build_file_with_compressed_span(9).is_err());
        assert_eq!(file.build_file_with_compressed_span(10).unwrap().upper_bound(), 10);
    }

    #[test]
    fn test_from_staged_path() {
        let file =
            PcesFile::new(AncientMode::BirthRound, timestamp(), 0, 3, 3, 3, "/r").unwrap();
        let mut staged = file.path().as_os_str().to_owned();
        staged.push(".tmp");

        assert_eq!(PcesFile::from_staged_path(Path::new(&staged)), Some(file.clone()));
        assert_eq!(PcesFile::from_staged_path(file.path()), None);
        assert_eq!(PcesFile::from_staged_path(Path::new("/r/notes.tmp")), None);
    }

    #[test]
    fn test_compress_span_on_disk_renames_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file =
            PcesFile::new(AncientMode::BirthRound, timestamp(), 2, 5, 50, 1, temp_dir.path()).unwrap();
        file.create_mutable_file().unwrap().close().unwrap();

        let compressed = file.compress_span_on_disk(8).unwrap();

        assert!(!file.path().exists());
        assert!(compressed.path().exists());
        assert_eq!(PcesFile::from_path(compressed.path()).unwrap(), compressed);
        assert!(file.compress_span_on_disk(4).is_err());
    }

    #[test]
    fn test_delete_file_removes_empty_date_directories() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let root = temp_dir.path().join("db");
        let bin = pces_common::DirectoryRecycleBin::new(temp_dir.path().join("bin"));

        let file =
            PcesFile::new(AncientMode::Generation, timestamp(), 0, 0, 1, 0, &root).unwrap();
        let mut mutable = file.create_mutable_file().unwrap();
        mutable.close().unwrap();

        file.delete_file(&root, &bin).unwrap();

        assert!(!file.path().exists());
        assert!(root.exists());
        assert!(!root.join("2024").exists());
        assert!(bin.directory().join(file.file_name()).exists());
    }

    fn arb_mode() -> impl Strategy<Value = AncientMode> {
        prop_oneof![Just(AncientMode::Generation), Just(AncientMode::BirthRound)]
    }

    fn arb_lineage() -> impl Strategy<Value = Lineage> {
        prop_oneof![
            (0..i64::MAX).prop_map(Lineage::Origin),
            any::<bool>().prop_map(|discontinuity| Lineage::Legacy { discontinuity }),
        ]
    }

    proptest! {
        #[test]
        fn prop_parse_inverts_encode(
            mode in arb_mode(),
            lineage in arb_lineage(),
            seconds in 0i64..4_102_444_800,
            nanos in 0u32..1_000_000_000,
            sequence_number in any::<u64>(),
            lower in 0i64..i64::MAX / 2,
            span in 0i64..i64::MAX / 2,
        ) {
            let timestamp = DateTime::from_timestamp(seconds, nanos).unwrap();
            let file = PcesFile::with_lineage(
                mode,
                timestamp,
                sequence_number,
                lower,
                lower + span,
                lineage,
                Path::new("/db"),
            ).unwrap();

            let parsed = PcesFile::from_path(file.path()).unwrap();
            prop_assert_eq!(parsed, file);
        }
    }
}
