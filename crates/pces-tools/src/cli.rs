use clap::{Parser, Subcommand};
use pces_core::{AncientMode, NO_LOWER_BOUND};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pces")]
#[command(about = "Inspect and maintain preconsensus event stream directories")]
#[command(version)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ancient mode of the stream
    #[arg(long, global = true, default_value = "birth-round")]
    pub mode: AncientMode,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the files of a stream directory
    List { directory: PathBuf },

    /// Print one line per event
    Dump {
        directory: PathBuf,

        /// Skip events below this ancient indicator
        #[arg(long, default_value_t = NO_LOWER_BOUND, allow_negative_numbers = true)]
        lower_bound: i64,

        /// Origin of the state the stream is read from
        #[arg(long, default_value_t = i64::MAX)]
        origin: i64,
    },

    /// Shrink the span of the last file to its contents
    Compact { directory: PathBuf },

    /// Copy the files that may hold events at or above a lower bound
    Copy {
        directory: PathBuf,
        destination: PathBuf,

        #[arg(long, default_value_t = NO_LOWER_BOUND, allow_negative_numbers = true)]
        lower_bound: i64,
    },

    /// Convert a generation stream into a birth-round stream
    Migrate {
        /// Parent of the per-node stream directories
        root: PathBuf,
        self_id: u64,
        /// Birth round assigned to every migrated event
        round: i64,
        /// Lowest generation that is migrated
        generation: i64,

        /// Where replaced files are moved [default: <root>/recycle-bin]
        #[arg(long)]
        recycle_bin: Option<PathBuf>,
    },
}
