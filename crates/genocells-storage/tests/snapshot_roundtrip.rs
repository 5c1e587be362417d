use genocells_core::{GenocellsConfig, NullPersistence, Tick, WorldState};
use genocells_storage::{SnapshotError, load_from_file, save_to_file};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_snapshot_path(prefix: &str) -> std::path::PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "{prefix}-{}-{timestamp}.gcel",
        std::process::id()
    ))
}

fn config() -> GenocellsConfig {
    GenocellsConfig {
        grid_width: 20,
        grid_height: 14,
        rng_seed: Some(99),
        genome_length: 24,
        ..GenocellsConfig::default()
    }
}

#[test]
fn saved_world_resumes_identically() {
    let path = temp_snapshot_path("genocells-resume");
    let mut world = WorldState::new(config()).expect("world");
    for _ in 0..10 {
        world.step();
    }
    save_to_file(world.grid(), world.tick(), &path).expect("save");

    let snapshot = load_from_file(&path).expect("load");
    assert_eq!(snapshot.tick, Tick(10));
    assert_eq!(&snapshot.grid, world.grid());

    let mut resumed = WorldState::from_grid(
        config(),
        snapshot.grid,
        snapshot.tick,
        Box::new(NullPersistence),
    )
    .expect("resume");
    assert_eq!(resumed.count_alive(), world.count_alive());
    let events = resumed.step();
    assert_eq!(events.tick, Tick(11));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_file_reports_io_error() {
    let path = temp_snapshot_path("genocells-missing");
    assert!(matches!(load_from_file(&path), Err(SnapshotError::Io(_))));
}
