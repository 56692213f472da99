//! Capabilities shared across the preconsensus event stream crates.
//!
//! The stream crates never read the wall clock or delete files directly.
//! Both concerns are injected so that recovery, pruning and replay can be
//! driven deterministically from tests.

pub mod recycle;
pub mod time;

pub use recycle::{DirectoryRecycleBin, RecycleBin};
pub use time::{FakeTime, Time, WallTime};
