use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    buildings::BuildingKind,
    city::{CityMetrics, CityState, Thresholds},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingSnapshot {
    pub x: usize,
    pub z: usize,
    pub kind: BuildingKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySnapshot {
    pub turn: u64,
    pub metrics: CityMetrics,
    pub thresholds: Thresholds,
    pub buildings: Vec<BuildingSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl CitySnapshot {
    pub fn capture(city: &CityState) -> Self {
        let buildings = city
            .occupied_cells()
            .map(|(x, z, building)| BuildingSnapshot {
                x,
                z,
                kind: building.kind,
                name: building.spec.name.to_string(),
            })
            .collect();
        Self {
            turn: city.metrics().turn_count,
            metrics: city.metrics().clone(),
            thresholds: *city.thresholds(),
            buildings,
            taken_at: Utc::now(),
        }
    }
}

pub struct SnapshotWriter {
    output_dir: PathBuf,
    interval_turns: u64,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl AsRef<Path>, interval_turns: u64) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            interval_turns,
        }
    }

    pub fn maybe_write(&self, city: &CityState) -> Result<Option<PathBuf>> {
        if self.interval_turns == 0 {
            return Ok(None);
        }
        let turn = city.metrics().turn_count;
        if turn % self.interval_turns != 0 {
            return Ok(None);
        }
        self.write(city).map(Some)
    }

    pub fn write(&self, city: &CityState) -> Result<PathBuf> {
        let snapshot = CitySnapshot::capture(city);
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create snapshot dir {}",
                self.output_dir.display()
            )
        })?;
        let path = self.output_dir.join(snapshot_file_name(snapshot.turn));
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        Ok(path)
    }
}

fn snapshot_file_name(turn: u64) -> String {
    format!("turn_{turn:06}.json")
}
