//! Recovery-time view of a preconsensus event stream directory.
//!
//! - [`PcesFileTracker`]: ordered index of the files of one stream, with
//!   range queries that respect origins and discontinuities
//! - [`PcesFileReader`]: rebuilds a tracker from disk at startup
//! - [`PcesMultiFileIterator`]: iterates events across the files a range
//!   query selects
//! - [`copy_pces_files`]: best-effort snapshot of a live stream directory

mod copy;
mod iterator;
mod reader;
mod tracker;

pub use copy::copy_pces_files;
pub use iterator::PcesMultiFileIterator;
pub use reader::{PcesFileReader, list_pces_files};
pub use tracker::PcesFileTracker;
