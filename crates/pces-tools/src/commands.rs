use anyhow::{Context, Result};
use bytesize::ByteSize;
use pces_common::{DirectoryRecycleBin, WallTime};
use pces_core::{AncientMode, PcesFile};
use pces_registry::{PcesFileReader, PcesFileTracker, copy_pces_files, list_pces_files};
use pces_writer::{MigrationOutcome, PcesConfig};
use std::path::{Path, PathBuf};

/// Builds a tracker without touching the directory.
fn read_only_tracker(config: &PcesConfig, directory: &Path, mode: AncientMode) -> Result<PcesFileTracker> {
    let mut tracker = PcesFileTracker::new(mode).with_permit_gaps(config.permit_gaps);

    let files = list_pces_files(directory, mode)
        .with_context(|| format!("Listing {}", directory.display()))?;
    for file in files {
        let name = file.file_name().to_owned();
        if let Err(e) = tracker.add_file(file) {
            if !config.permit_gaps {
                return Err(e).with_context(|| format!("Adding {name}"));
            }
            tracing::warn!(file = name, error = %e, "skipping file");
        }
    }

    Ok(tracker)
}

fn describe(file: &PcesFile) -> String {
    format!(
        "{:>6}  [{}, {}]  origin {:<6} {:>10}  {}",
        file.sequence_number(),
        file.lower_bound(),
        file.upper_bound(),
        file.origin(),
        ByteSize(file.size_on_disk()).to_string(),
        file.path().display()
    )
}

pub fn list(directory: &Path, mode: AncientMode) -> Result<()> {
    let files = list_pces_files(directory, mode)
        .with_context(|| format!("Listing {}", directory.display()))?;

    let total: u64 = files.iter().map(PcesFile::size_on_disk).sum();
    for file in &files {
        println!("{}", describe(file));
    }
    println!("{} {mode} files, {}", files.len(), ByteSize(total));

    Ok(())
}

pub fn dump(
    config: &PcesConfig,
    directory: &Path,
    mode: AncientMode,
    lower_bound: i64,
    origin: i64,
) -> Result<()> {
    let tracker = read_only_tracker(config, directory, mode)?;
    let mut events = tracker.get_event_iterator(lower_bound, origin);

    let mut count = 0u64;
    for event in events.by_ref() {
        let event = event.context("Reading events")?;
        println!(
            "generation {:<8} birth_round {:<8} payload {}",
            event.generation(),
            event.birth_round(),
            ByteSize(event.payload().len() as u64)
        );
        count += 1;
    }

    if events.has_partial_event() {
        println!("{count} events, last file ends with a partial event");
    } else {
        println!("{count} events");
    }

    Ok(())
}

pub fn compact(config: &PcesConfig, directory: &Path, mode: AncientMode) -> Result<()> {
    let mut tracker = read_only_tracker(config, directory, mode)?;
    let Some(before) = tracker.last_file().cloned() else {
        println!("no {mode} files in {}", directory.display());
        return Ok(());
    };

    PcesFileReader::compact_last_file(&mut tracker);

    match tracker.last_file() {
        Some(after) if after != &before => println!("{}\n  -> {}", before.file_name(), after.file_name()),
        _ => println!("{} is already compact", before.file_name()),
    }

    Ok(())
}

pub fn copy(directory: &Path, mode: AncientMode, lower_bound: i64, destination: &Path) -> Result<()> {
    let count = copy_pces_files(directory, mode, lower_bound, destination)
        .with_context(|| format!("Copying {} to {}", directory.display(), destination.display()))?;
    println!("copied {count} files to {}", destination.display());
    Ok(())
}

pub fn migrate(
    root: &Path,
    self_id: u64,
    round: i64,
    generation: i64,
    recycle_bin: Option<PathBuf>,
) -> Result<()> {
    let recycle_bin = DirectoryRecycleBin::new(recycle_bin.unwrap_or_else(|| root.join("recycle-bin")));

    let outcome = pces_writer::migrate(root, self_id, round, generation, &WallTime, &recycle_bin)
        .with_context(|| format!("Migrating node {self_id} below {}", root.display()))?;

    match outcome {
        MigrationOutcome::NotNeeded => println!("nothing to migrate"),
        MigrationOutcome::CleanedUp { recycled } => {
            println!("already migrated, recycled {recycled} leftover files")
        }
        MigrationOutcome::Migrated { events, file } => {
            println!("migrated {events} events into {}", file.path().display())
        }
    }

    Ok(())
}
