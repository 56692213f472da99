use pces_common::{RecycleBin, Time};
use pces_core::{AncientMode, NO_LOWER_BOUND, PcesError, PcesFile, Result};
use pces_registry::list_pces_files;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// There were no generation files to migrate.
    NotNeeded,
    /// A previous run had already written the birth-round file; the
    /// generation files it left behind were recycled.
    CleanedUp { recycled: usize },
    /// The non-ancient events were copied into a single birth-round file.
    Migrated { events: usize, file: PcesFile },
}

/// Index of the first file of the last continuous run.
fn last_continuous_run(files: &[PcesFile]) -> usize {
    files
        .iter()
        .enumerate()
        .rev()
        .find(|(index, file)| {
            file.has_discontinuity()
                || (*index > 0 && files[index - 1].origin() != file.origin())
        })
        .map_or(0, |(index, _)| index)
}

fn recycle_all(files: &[PcesFile], root: &Path, recycle_bin: &dyn RecycleBin) -> Result<()> {
    // Newest first so that an interrupted run leaves an ordered stream.
    for file in files.iter().rev() {
        file.delete_file(root, recycle_bin)?;
    }
    Ok(())
}

/// Converts the generation-indexed stream of node `self_id` into a
/// birth-round stream.
///
/// Every event with a generation of at least `cutover_generation` is
/// rewritten with birth round `cutover_round` into one file spanning
/// `[cutover_round, cutover_round]` with origin `cutover_round`. Running the
/// migration again, or after a crash at any point, converges to that single
/// file and no generation files.
#[tracing::instrument(skip_all, fields(self_id = self_id, cutover_round = cutover_round, cutover_generation = cutover_generation))]
pub fn migrate(
    root: &Path,
    self_id: u64,
    cutover_round: i64,
    cutover_generation: i64,
    time: &dyn Time,
    recycle_bin: &dyn RecycleBin,
) -> Result<MigrationOutcome> {
    let database = root.join(self_id.to_string());

    let generation_files = list_pces_files(&database, AncientMode::Generation)?;
    if generation_files.is_empty() {
        tracing::info!("no generation files, migration not needed");
        return Ok(MigrationOutcome::NotNeeded);
    }

    let birth_round_files = list_pces_files(&database, AncientMode::BirthRound)?;
    if !birth_round_files.is_empty() {
        tracing::warn!(
            leftover = generation_files.len(),
            "birth-round files already present, recycling leftover generation files"
        );
        recycle_all(&generation_files, &database, recycle_bin)?;
        return Ok(MigrationOutcome::CleanedUp {
            recycled: generation_files.len(),
        });
    }

    let start = last_continuous_run(&generation_files);
    if start > 0 {
        tracing::info!(
            skipped = start,
            "ignoring files before the last discontinuity"
        );
    }

    let target = PcesFile::new(
        AncientMode::BirthRound,
        time.now(),
        0,
        cutover_round,
        cutover_round,
        cutover_round,
        &database,
    )?;

    let mut output = target.create_staged_mutable_file()?;
    let mut written = 0usize;
    for file in &generation_files[start..] {
        for event in file.event_iterator(cutover_generation)? {
            let event = event?.with_birth_round(cutover_round);
            output.write_event(&event)?;
            written += 1;
        }
    }
    output.close()?;

    let read_back = target.event_iterator(NO_LOWER_BOUND)?.try_fold(0usize, |count, event| {
        event.map(|_| count + 1)
    });
    match read_back {
        Ok(count) if count == written => {}
        Ok(count) => {
            target.delete_file(&database, recycle_bin)?;
            return Err(PcesError::IllegalState(format!(
                "migrated file holds {count} events, expected {written}"
            )));
        }
        Err(e) => {
            target.delete_file(&database, recycle_bin)?;
            return Err(e);
        }
    }

    recycle_all(&generation_files, &database, recycle_bin)?;

    tracing::info!(
        events = written,
        recycled = generation_files.len(),
        file = target.file_name(),
        "migrated stream to birth rounds"
    );

    Ok(MigrationOutcome::Migrated {
        events: written,
        file: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use pces_common::{DirectoryRecycleBin, FakeTime};
    use pces_core::PcesEvent;
    use tempfile::TempDir;

    fn legacy_file(database: &Path, seq: u64, discontinuity: bool, generations: &[i64]) -> PcesFile {
        let timestamp = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap() + TimeDelta::seconds(seq as i64);
        let descriptor = PcesFile::new_legacy(
            AncientMode::Generation,
            timestamp,
            seq,
            0,
            1000,
            discontinuity,
            database,
        )
        .unwrap();
        let mut file = descriptor.create_mutable_file().unwrap();
        for generation in generations {
            file.write_event(&PcesEvent::new(*generation, 1, generation.to_le_bytes().to_vec()))
                .unwrap();
        }
        file.close().unwrap();
        descriptor
    }

    #[test]
    fn test_selects_events_after_last_discontinuity() {
        let temp_dir = TempDir::new().unwrap();
        let database = temp_dir.path().join("0");
        let bin = DirectoryRecycleBin::new(temp_dir.path().join("bin"));
        let time = FakeTime::default();

        legacy_file(&database, 0, false, &[100, 200]);
        legacy_file(&database, 1, true, &[5, 50, 60]);
        legacy_file(&database, 2, false, &[70, 10]);

        let outcome = migrate(temp_dir.path(), 0, 42, 50, &time, &bin).unwrap();
        let MigrationOutcome::Migrated { events, file } = outcome else {
            panic!("expected migration, got {outcome:?}");
        };

        assert_eq!(events, 3);
        assert_eq!(file.sequence_number(), 0);
        assert_eq!((file.lower_bound(), file.upper_bound(), file.origin()), (42, 42, 42));
        assert_eq!(file.timestamp(), time.now());

        let migrated: Vec<_> = file
            .event_iterator(NO_LOWER_BOUND)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(
            migrated.iter().map(PcesEvent::generation).collect::<Vec<_>>(),
            vec![50, 60, 70]
        );
        assert!(migrated.iter().all(|e| e.birth_round() == 42));
        assert_eq!(migrated[0].payload(), &50i64.to_le_bytes());

        assert!(list_pces_files(&database, AncientMode::Generation).unwrap().is_empty());
    }

    #[test]
    fn test_genesis_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let bin = DirectoryRecycleBin::new(temp_dir.path().join("bin"));
        let outcome = migrate(temp_dir.path(), 3, 1, 1, &FakeTime::default(), &bin).unwrap();
        assert_eq!(outcome, MigrationOutcome::NotNeeded);
    }

    #[test]
    fn test_stragglers_are_recycled() {
        let temp_dir = TempDir::new().unwrap();
        let database = temp_dir.path().join("0");
        let bin = DirectoryRecycleBin::new(temp_dir.path().join("bin"));
        let time = FakeTime::default();

        legacy_file(&database, 0, false, &[1, 2, 3]);
        migrate(temp_dir.path(), 0, 7, 0, &time, &bin).unwrap();

        // A restore brings an old generation file back.
        legacy_file(&database, 0, false, &[1, 2, 3]);

        let outcome = migrate(temp_dir.path(), 0, 7, 0, &time, &bin).unwrap();
        assert_eq!(outcome, MigrationOutcome::CleanedUp { recycled: 1 });
        assert!(list_pces_files(&database, AncientMode::Generation).unwrap().is_empty());
        assert_eq!(list_pces_files(&database, AncientMode::BirthRound).unwrap().len(), 1);
    }
}
