//! End-to-end scenarios: write through the writer, recover from disk, replay.

use bytesize::ByteSize;
use pces_common::{DirectoryRecycleBin, FakeTime, Time};
use pces_core::{AncientMode, NO_LOWER_BOUND, PcesEvent};
use pces_registry::PcesFileReader;
use pces_writer::{PcesConfig, PcesFileManager, PcesReplayer, PcesSequencer, PcesWriter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

struct Node {
    temp_dir: TempDir,
    time: Arc<FakeTime>,
    config: PcesConfig,
}

impl Node {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = PcesConfig::default()
            .with_database_directory(temp_dir.path().join("pces"))
            .with_preferred_file_size(ByteSize::kib(4))
            .with_bootstrap_span(20)
            .with_minimum_retention_period(Duration::ZERO);
        Self {
            temp_dir,
            time: Arc::new(FakeTime::default()),
            config,
        }
    }

    fn root(&self) -> PathBuf {
        self.config.node_directory(0)
    }

    fn recycle_bin(&self) -> Arc<DirectoryRecycleBin> {
        Arc::new(DirectoryRecycleBin::new(self.temp_dir.path().join("bin")))
    }

    fn writer(&self) -> PcesWriter {
        let manager = PcesFileManager::recover(
            &self.config,
            self.root(),
            AncientMode::Generation,
            0,
            self.time.clone(),
            self.recycle_bin(),
        )
        .unwrap();
        let mut writer = PcesWriter::new(&self.config, manager);
        writer.start().unwrap();
        writer
    }

    /// Payloads of every event on disk, in stream order.
    fn recovered_payloads(&self) -> Vec<u32> {
        PcesFileReader::new(self.root(), AncientMode::Generation, self.recycle_bin())
            .read_files(0)
            .unwrap()
            .get_event_iterator(NO_LOWER_BOUND, 0)
            .map(|e| payload_id(&e.unwrap()))
            .collect()
    }
}

fn event(id: u32, generation: i64) -> PcesEvent {
    PcesEvent::new(generation, 0, id.to_le_bytes().to_vec())
}

fn payload_id(event: &PcesEvent) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&event.payload()[..4]);
    u32::from_le_bytes(bytes)
}

#[test]
fn test_stale_events_never_become_durable() {
    let node = Node::new();
    let mut rng = StdRng::seed_from_u64(1000);
    let sequencer = PcesSequencer::new();
    let mut writer = node.writer();
    writer.begin_streaming_new_events().unwrap();

    let mut events = Vec::new();
    let mut max_generation = 0;
    for id in 0..1000u32 {
        let center = i64::from(id) / 2 + 50;
        let generation = rng.random_range(center - 60..=center + 10).max(0);
        let event = event(id, generation);
        let sequence_number = sequencer.assign_stream_sequence_number(&event).unwrap();

        writer.write_event(&event).unwrap();
        max_generation = max_generation.max(generation);
        writer.update_non_ancient_event_boundary(max_generation - 50);

        if rng.random_bool(0.1) {
            writer.submit_flush_request(sequence_number).unwrap();
        }
        node.time.tick(Duration::from_millis(10));
        events.push(event);
    }

    let stale = events.iter().filter(|e| e.is_stale()).count();
    assert!(stale > 0, "scenario must produce stale events");
    assert!(stale < events.len());

    for event in events.iter().filter(|e| e.is_stale()) {
        assert!(!writer.is_event_durable(event));
    }

    writer.stop().unwrap();

    for event in &events {
        assert_eq!(writer.is_event_durable(event), !event.is_stale());
    }

    let expected: Vec<u32> = events
        .iter()
        .filter(|e| !e.is_stale())
        .map(payload_id)
        .collect();
    assert_eq!(node.recovered_payloads(), expected);
    assert!(writer.file_manager().file_count() > 1, "rotation expected");
}

#[test]
fn test_restart_replays_then_continues_stream() {
    let node = Node::new();

    let sequencer = PcesSequencer::new();
    let mut writer = node.writer();
    writer.begin_streaming_new_events().unwrap();
    for id in 0..200u32 {
        let event = event(id, i64::from(id / 4));
        sequencer.assign_stream_sequence_number(&event).unwrap();
        writer.write_event(&event).unwrap();
    }
    writer.stop().unwrap();
    drop(writer);

    // Restart: recover, replay into a fresh writer, then stream new events.
    node.time.tick(Duration::from_secs(5));
    let mut writer = node.writer();
    let tracker = writer.file_manager().tracker().clone();
    let sequencer = PcesSequencer::new();

    let replayer = PcesReplayer::new(node.time.clone()).with_max_frequency(1000);
    let stats = replayer
        .replay(
            tracker.get_event_iterator(NO_LOWER_BOUND, 0),
            |event| {
                sequencer.assign_stream_sequence_number(&event)?;
                writer.write_event(&event)?;
                Ok(())
            },
            &mut [],
        )
        .unwrap();
    assert_eq!(stats.event_count, 200);
    assert_eq!(writer.latest_durable_sequence_number(), 199);

    writer.begin_streaming_new_events().unwrap();
    for id in 200..300u32 {
        let event = event(id, i64::from(id / 4));
        sequencer.assign_stream_sequence_number(&event).unwrap();
        writer.write_event(&event).unwrap();
    }
    writer.stop().unwrap();

    assert_eq!(node.recovered_payloads(), (0..300).collect::<Vec<_>>());
}

#[test]
fn test_pruning_respects_threshold_and_retention() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("db");
    let time = Arc::new(FakeTime::default());
    let retention = Duration::from_secs(300);
    let mut rng = StdRng::seed_from_u64(42);

    let mut manager = PcesFileManager::new(
        &root,
        pces_registry::PcesFileTracker::new(AncientMode::BirthRound),
        0,
        retention,
        time.clone(),
        Arc::new(DirectoryRecycleBin::new(temp_dir.path().join("bin"))),
    );

    let mut lower = 0;
    let mut threshold = 0;
    for _ in 0..200 {
        if rng.random_bool(0.6) {
            lower += rng.random_range(0..5);
            let descriptor = manager
                .get_next_file_descriptor(lower, lower + rng.random_range(0..20))
                .unwrap();
            let mut file = descriptor.create_mutable_file().unwrap();
            file.write_event(&PcesEvent::new(0, descriptor.lower_bound(), vec![]))
                .unwrap();
            file.close().unwrap();
            manager.finished_writing_file(&mut file).unwrap();
        }

        time.tick(Duration::from_secs(rng.random_range(0..60)));
        threshold += rng.random_range(0..4);

        let before: Vec<_> = manager.tracker().iter().cloned().collect();
        manager.prune_old_files(threshold).unwrap();
        let after: Vec<_> = manager.tracker().iter().cloned().collect();

        let removed = &before[..before.len() - after.len()];
        assert_eq!(&before[removed.len()..], &after[..]);

        let now = time.now();
        for file in removed {
            assert!(file.upper_bound() < threshold);
            assert!((now - file.timestamp()).to_std().unwrap() >= retention);
            assert!(!file.path().exists());
        }
        if !before.is_empty() {
            assert!(!after.is_empty(), "the last file is never pruned");
        }
    }
}

fn path_set(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .map(|entry| entry.unwrap().into_path())
        .collect();
    paths.sort();
    paths
}

#[test]
fn test_migration_twice_is_noop() {
    let node = Node::new();
    let sequencer = PcesSequencer::new();
    let mut writer = node.writer();
    writer.begin_streaming_new_events().unwrap();
    for id in 0..100u32 {
        let event = event(id, i64::from(id));
        sequencer.assign_stream_sequence_number(&event).unwrap();
        writer.write_event(&event).unwrap();
    }
    writer.stop().unwrap();

    let bin = node.recycle_bin();
    let root = &node.config.database_directory;

    let first = pces_writer::migrate(root, 0, 500, 80, node.time.as_ref(), bin.as_ref()).unwrap();
    assert!(matches!(first, pces_writer::MigrationOutcome::Migrated { events: 20, .. }));
    let after_first = path_set(root);

    let second = pces_writer::migrate(root, 0, 500, 80, node.time.as_ref(), bin.as_ref()).unwrap();
    assert_eq!(second, pces_writer::MigrationOutcome::NotNeeded);
    assert_eq!(path_set(root), after_first);

    let migrated: Vec<_> = PcesFileReader::new(node.root(), AncientMode::BirthRound, node.recycle_bin())
        .read_files(500)
        .unwrap()
        .get_event_iterator(NO_LOWER_BOUND, 500)
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(migrated.iter().map(payload_id).collect::<Vec<_>>(), (80..100).collect::<Vec<_>>());
    assert!(migrated.iter().all(|e| e.birth_round() == 500));
}
