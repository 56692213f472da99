//! Files of the preconsensus event stream.
//!
//! - [`PcesFile`]: immutable descriptor of one file (identity, span, origin)
//! - [`PcesMutableFile`]: append handle onto one descriptor's path
//! - [`PcesFileIterator`]: sequential reader tolerant of a torn tail

mod descriptor;
mod mutable;
mod name;
mod reader;
mod record;

pub use descriptor::{Lineage, PcesFile};
pub use mutable::PcesMutableFile;
pub use name::{EVENT_FILE_EXTENSION, encode_file_name};
pub use reader::PcesFileIterator;
pub use record::MAX_RECORD_SIZE;

/// Lower bound that disables ancient-indicator filtering during iteration.
pub const NO_LOWER_BOUND: i64 = -1;
