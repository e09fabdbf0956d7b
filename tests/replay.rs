use std::path::PathBuf;

use ecocity::{
    city::CityState,
    replay::Replay,
    serial::SerialInputDecoder,
    snapshot::{CitySnapshot, SnapshotWriter},
};

fn capture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("captures/sustainable_board.txt")
}

#[test]
fn replaying_the_board_capture_builds_the_expected_city() {
    let mut city = CityState::new();
    let mut replay = Replay::new(SerialInputDecoder::new());
    let report = replay.run_file(&mut city, capture_path()).unwrap();

    assert_eq!(report.records, 20);
    assert_eq!(report.placed, 9);
    assert_eq!(report.rejected, 7, "budget runs dry before the houses");
    assert_eq!(report.dropped, 3);
    assert_eq!(report.cleared, 1);
    assert_eq!(report.turns, 0);

    let metrics = city.metrics();
    assert_eq!(metrics.budget, 10_000);
    assert_eq!(metrics.population, 500);
    assert_eq!(metrics.pollution, 30);
    assert_eq!(metrics.energy, -45);
    assert_eq!(metrics.income, 6_000);
    assert_eq!(metrics.happiness, 100);
    assert!(!metrics.game_over, "energy deficit keeps the game going");
    assert_eq!(city.occupied_cells().count(), 8);
}

#[test]
fn replay_ends_turns_and_writes_snapshots() {
    let temp = tempfile::tempdir().unwrap();
    let mut city = CityState::new();
    let mut replay = Replay::new(SerialInputDecoder::new())
        .with_end_turn_every(5)
        .with_snapshots(SnapshotWriter::new(temp.path(), 1));
    let report = replay.run_file(&mut city, capture_path()).unwrap();

    assert_eq!(report.turns, 4);
    assert_eq!(city.metrics().turn_count, 4);
    assert_eq!(city.metrics().budget, 20_000);
    assert_eq!(report.snapshots.len(), 4);

    let last = temp.path().join("turn_000004.json");
    assert_eq!(report.snapshots.last(), Some(&last));
    let data = std::fs::read_to_string(&last).unwrap();
    let snapshot: CitySnapshot = serde_json::from_str(&data).unwrap();
    assert_eq!(snapshot.turn, 4);
    assert_eq!(snapshot.metrics.population, 525);
    assert_eq!(snapshot.buildings.len(), 14);
    assert!(data.contains("\"kind\": \"gas_plant\""));
}

#[test]
fn replay_stops_once_the_game_is_over() {
    let mut city = CityState::new();
    let mut replay = Replay::new(SerialInputDecoder::new());
    let capture = "0,690\n1,690\n2,690\n3,690\n4,690\n5,690\n";
    let report = replay.run(&mut city, capture).unwrap();

    assert_eq!(report.records, 5);
    assert_eq!(report.placed, 5);
    assert_eq!(city.metrics().pollution, 100);
    assert!(city.metrics().game_over);
    assert!(!city.metrics().game_won);
}

#[test]
fn missing_capture_is_an_error() {
    let mut city = CityState::new();
    let mut replay = Replay::new(SerialInputDecoder::new());
    let err = replay
        .run_file(&mut city, "captures/does_not_exist.txt")
        .unwrap_err();
    assert!(err.to_string().contains("Failed to read capture"));
}

#[test]
fn unterminated_last_line_is_never_processed() {
    let mut city = CityState::new();
    let mut replay = Replay::new(SerialInputDecoder::new());
    let report = replay.run(&mut city, "12,300\n13,40").unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(city.occupied_cells().count(), 1);
}
