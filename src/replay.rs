use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::{
    city::CityState,
    serial::{RecordOutcome, SerialInputDecoder},
    snapshot::SnapshotWriter,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub records: u64,
    pub placed: u64,
    pub cleared: u64,
    pub already_empty: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub turns: u64,
    pub snapshots: Vec<PathBuf>,
}

impl ReplayReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.records += 1;
        match outcome {
            RecordOutcome::Placed { .. } => self.placed += 1,
            RecordOutcome::Cleared { .. } => self.cleared += 1,
            RecordOutcome::AlreadyEmpty { .. } => self.already_empty += 1,
            RecordOutcome::Rejected(_) => self.rejected += 1,
            RecordOutcome::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Plays a recorded serial capture into a city, as if the board had sent it.
pub struct Replay {
    decoder: SerialInputDecoder,
    end_turn_every: u64,
    snapshot_writer: Option<SnapshotWriter>,
}

impl Replay {
    pub fn new(decoder: SerialInputDecoder) -> Self {
        Self {
            decoder,
            end_turn_every: 0,
            snapshot_writer: None,
        }
    }

    /// Ends a turn after every `records` framed records; 0 never ends turns.
    pub fn with_end_turn_every(mut self, records: u64) -> Self {
        self.end_turn_every = records;
        self
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshot_writer = Some(writer);
        self
    }

    pub fn run_file(&mut self, city: &mut CityState, path: impl AsRef<Path>) -> Result<ReplayReport> {
        let path = path.as_ref();
        let capture = fs::read_to_string(path)
            .with_context(|| format!("Failed to read capture {}", path.display()))?;
        self.run(city, &capture)
    }

    pub fn run(&mut self, city: &mut CityState, capture: &str) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        self.decoder.open();
        for line in capture.split_inclusive('\n') {
            for outcome in self.decoder.feed(line, city) {
                report.record(&outcome);
                if self.end_turn_every > 0 && report.records % self.end_turn_every == 0 {
                    self.end_turn(city, &mut report)?;
                }
            }
            if city.metrics().game_over {
                break;
            }
        }
        self.decoder.close();

        if let Some(writer) = &self.snapshot_writer {
            let path = writer.write(city)?;
            if report.snapshots.last() != Some(&path) {
                report.snapshots.push(path);
            }
        }
        info!(
            records = report.records,
            placed = report.placed,
            dropped = report.dropped,
            game_over = city.metrics().game_over,
            "replay finished"
        );
        Ok(report)
    }

    fn end_turn(&self, city: &mut CityState, report: &mut ReplayReport) -> Result<()> {
        city.end_turn();
        report.turns += 1;
        if let Some(writer) = &self.snapshot_writer {
            if let Some(path) = writer.maybe_write(city)? {
                report.snapshots.push(path);
            }
        }
        Ok(())
    }
}
