//! On-disk building blocks of the preconsensus event stream (PCES).
//!
//! This crate provides:
//! - The event record and its stream position: [`event`]
//! - File descriptors, file naming and record framing: [`file`]
//! - The error type shared by every PCES crate: [`error`]
//!
//! # Examples
//!
//! ```no_run
//! use pces_core::{AncientMode, PcesEvent, PcesFile};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = PcesFile::new(
//!     AncientMode::BirthRound,
//!     chrono::Utc::now(),
//!     0,
//!     10,
//!     20,
//!     0,
//!     "/var/lib/node/preconsensus-events",
//! )?;
//!
//! let mut file = descriptor.create_mutable_file()?;
//! file.write_event(&PcesEvent::new(3, 12, b"payload".to_vec()))?;
//! file.close()?;
//! # Ok(())
//! # }
//! ```

pub mod ancient;
pub mod error;
pub mod event;
pub mod file;

pub use ancient::AncientMode;
pub use error::{PcesError, Result};
pub use event::{NO_STREAM_SEQUENCE_NUMBER, PcesEvent, STALE_EVENT_STREAM_SEQUENCE_NUMBER};
pub use file::{
    EVENT_FILE_EXTENSION, Lineage, NO_LOWER_BOUND, PcesFile, PcesFileIterator, PcesMutableFile,
};
