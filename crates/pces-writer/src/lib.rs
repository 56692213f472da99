//! Write path of the preconsensus event stream.
//!
//! - [`PcesFileManager`]: allocates new files and prunes old ones
//! - [`PcesWriter`]: appends events, rotates files and tracks durability
//! - [`AsyncPcesWriter`]: the same writer on a dedicated thread
//! - [`PcesSequencer`]: hands out stream sequence numbers
//! - [`PcesReplayer`]: feeds persisted events downstream after a restart
//! - [`migrate`]: one-shot conversion of a generation stream to birth rounds
//!
//! # Examples
//!
//! ```no_run
//! use pces_common::{DirectoryRecycleBin, WallTime};
//! use pces_core::{AncientMode, PcesEvent};
//! use pces_writer::{PcesConfig, PcesFileManager, PcesSequencer, PcesWriter};
//! use std::sync::Arc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PcesConfig::default();
//! let manager = PcesFileManager::recover(
//!     &config,
//!     config.node_directory(0),
//!     AncientMode::BirthRound,
//!     0,
//!     Arc::new(WallTime),
//!     Arc::new(DirectoryRecycleBin::new("recycle-bin")),
//! )?;
//!
//! let mut writer = PcesWriter::new(&config, manager);
//! writer.start()?;
//! writer.begin_streaming_new_events()?;
//!
//! let sequencer = PcesSequencer::new();
//! let event = PcesEvent::new(0, 12, b"payload".to_vec());
//! let sequence_number = sequencer.assign_stream_sequence_number(&event)?;
//! writer.write_event(&event)?;
//! writer.submit_flush_request(sequence_number)?;
//! assert!(writer.is_event_durable(&event));
//! # Ok(())
//! # }
//! ```

mod async_writer;
mod config;
mod durability;
mod manager;
mod migration;
mod replay;
mod sequencer;
mod writer;

pub use async_writer::AsyncPcesWriter;
pub use config::PcesConfig;
pub use durability::DurabilityWatermark;
pub use manager::PcesFileManager;
pub use migration::{MigrationOutcome, migrate};
pub use replay::{PcesReplayer, ReplayStats};
pub use sequencer::PcesSequencer;
pub use writer::{PcesWriter, WriterState};
