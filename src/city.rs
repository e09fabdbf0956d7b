use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::buildings::{BuildingKind, BuildingSpec};

pub const GRID_SIZE: usize = 5;
pub const INITIAL_BUDGET: i64 = 100_000;
pub const INITIAL_HAPPINESS: i64 = 100;
pub const MAX_HAPPINESS: i64 = 100;

/// Fraction of the placement cost returned when a building is removed.
pub const REFUND_RATE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CityError {
    #[error("unknown building type '{0}'")]
    InvalidBuildingType(String),
    #[error("coordinates ({x}, {z}) are outside the grid")]
    OutOfBounds { x: i32, z: i32 },
    #[error("cell ({x}, {z}) is already occupied")]
    CellOccupied { x: usize, z: usize },
    #[error("{kind} costs {cost} but the budget is {budget}")]
    InsufficientBudget {
        kind: BuildingKind,
        cost: i64,
        budget: i64,
    },
    #[error("no building at ({x}, {z})")]
    CellEmpty { x: usize, z: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityMetrics {
    pub budget: i64,
    pub pollution: i64,
    pub population: i64,
    pub happiness: i64,
    pub energy: i64,
    pub income: i64,
    pub turn_count: u64,
    pub game_over: bool,
    pub game_won: bool,
}

impl CityMetrics {
    pub fn initial() -> Self {
        Self {
            budget: INITIAL_BUDGET,
            pollution: 0,
            population: 0,
            happiness: INITIAL_HAPPINESS,
            energy: 0,
            income: 0,
            turn_count: 0,
            game_over: false,
            game_won: false,
        }
    }

    fn clamp(&mut self) {
        self.happiness = self.happiness.min(MAX_HAPPINESS);
        self.budget = self.budget.max(0);
        self.pollution = self.pollution.max(0);
        self.population = self.population.max(0);
    }
}

impl Default for CityMetrics {
    fn default() -> Self {
        Self::initial()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub pollution_max: i64,
    pub min_population: i64,
    pub min_happiness: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pollution_max: 100,
            min_population: 500,
            min_happiness: 70,
        }
    }
}

/// Signed adjustments for [`CityState::apply_delta`]. Fields left at zero change nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsDelta {
    pub budget: i64,
    pub population: i64,
    pub pollution: i64,
    pub energy: i64,
    pub income: i64,
    pub happiness: i64,
}

impl MetricsDelta {
    pub fn placing(spec: &BuildingSpec) -> Self {
        Self {
            budget: -spec.cost,
            population: spec.population,
            pollution: spec.pollution,
            energy: spec.energy,
            income: spec.income,
            happiness: spec.happiness,
        }
    }

    pub fn removing(spec: &BuildingSpec) -> Self {
        Self {
            budget: refund_for(spec),
            population: -spec.population,
            pollution: -spec.pollution,
            energy: -spec.energy,
            income: -spec.income,
            happiness: -spec.happiness,
        }
    }
}

pub fn refund_for(spec: &BuildingSpec) -> i64 {
    (spec.cost as f64 * REFUND_RATE).floor() as i64
}

/// A building standing on the grid. `spec` is copied at placement time so later
/// table changes never alter what removing it gives back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedBuilding {
    pub kind: BuildingKind,
    pub spec: BuildingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cell {
    #[default]
    Empty,
    Occupied(PlacedBuilding),
}

impl Cell {
    pub fn building(&self) -> Option<&PlacedBuilding> {
        match self {
            Cell::Empty => None,
            Cell::Occupied(building) => Some(building),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// Notification hooks for whatever draws the city. Called synchronously from
/// inside [`CityState`] operations, so implementations must not call back into it.
pub trait CityObserver: Send {
    fn on_building_placed(&mut self, _x: usize, _z: usize, _kind: BuildingKind) {}
    fn on_cell_cleared(&mut self, _x: usize, _z: usize) {}
    fn on_metrics_changed(&mut self, _metrics: &CityMetrics) {}
    fn on_game_ended(&mut self, _won: bool, _metrics: &CityMetrics) {}
}

pub struct CityState {
    grid: [[Cell; GRID_SIZE]; GRID_SIZE],
    metrics: CityMetrics,
    thresholds: Thresholds,
    observers: Vec<Box<dyn CityObserver>>,
}

impl CityState {
    pub fn new() -> Self {
        Self {
            grid: Default::default(),
            metrics: CityMetrics::initial(),
            thresholds: Thresholds::default(),
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl CityObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn add_observer(&mut self, observer: impl CityObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn metrics(&self) -> &CityMetrics {
        &self.metrics
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn cell(&self, x: usize, z: usize) -> Option<&Cell> {
        self.grid.get(z).and_then(|row| row.get(x))
    }

    /// Occupied cells as `(x, z, building)`, row by row.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (usize, usize, &PlacedBuilding)> + '_ {
        self.grid.iter().enumerate().flat_map(|(z, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(x, cell)| cell.building().map(|building| (x, z, building)))
        })
    }

    pub fn place_building_named(&mut self, x: i32, z: i32, kind: &str) -> Result<(), CityError> {
        let kind = kind.parse::<BuildingKind>().inspect_err(|err| warn!("{err}"))?;
        self.place_building(x, z, kind)
    }

    pub fn place_building(&mut self, x: i32, z: i32, kind: BuildingKind) -> Result<(), CityError> {
        let (cx, cz) = grid_position(x, z).inspect_err(|err| warn!("{err}"))?;
        let spec = kind.spec();
        if !self.grid[cz][cx].is_empty() {
            let err = CityError::CellOccupied { x: cx, z: cz };
            warn!("{err}");
            return Err(err);
        }
        if self.metrics.budget < spec.cost {
            let err = CityError::InsufficientBudget {
                kind,
                cost: spec.cost,
                budget: self.metrics.budget,
            };
            warn!("{err}");
            return Err(err);
        }

        self.grid[cz][cx] = Cell::Occupied(PlacedBuilding {
            kind,
            spec: spec.clone(),
        });
        info!(x = cx, z = cz, %kind, cost = spec.cost, "building placed");
        for observer in &mut self.observers {
            observer.on_building_placed(cx, cz, kind);
        }
        self.apply_delta(MetricsDelta::placing(spec));
        Ok(())
    }

    pub fn clear_cell(&mut self, x: i32, z: i32) -> Result<(), CityError> {
        let (cx, cz) = grid_position(x, z).inspect_err(|err| warn!("{err}"))?;
        let building = match std::mem::take(&mut self.grid[cz][cx]) {
            Cell::Occupied(building) => building,
            Cell::Empty => {
                let err = CityError::CellEmpty { x: cx, z: cz };
                warn!("{err}");
                return Err(err);
            }
        };

        let delta = MetricsDelta::removing(&building.spec);
        info!(x = cx, z = cz, kind = %building.kind, refund = delta.budget, "cell cleared");
        for observer in &mut self.observers {
            observer.on_cell_cleared(cx, cz);
        }
        self.apply_delta(delta);
        Ok(())
    }

    pub fn apply_delta(&mut self, changes: MetricsDelta) {
        let metrics = &mut self.metrics;
        metrics.budget = metrics.budget.saturating_add(changes.budget);
        metrics.population = metrics.population.saturating_add(changes.population);
        metrics.pollution = metrics.pollution.saturating_add(changes.pollution);
        metrics.energy = metrics.energy.saturating_add(changes.energy);
        metrics.income = metrics.income.saturating_add(changes.income);
        metrics.happiness = metrics.happiness.saturating_add(changes.happiness);
        metrics.clamp();

        for observer in &mut self.observers {
            observer.on_metrics_changed(&self.metrics);
        }
        self.evaluate_end_conditions();
    }

    pub fn end_turn(&mut self) {
        // Counted first so observers of the income delta see the new turn.
        self.metrics.turn_count += 1;
        self.apply_delta(MetricsDelta {
            budget: self.metrics.income,
            ..MetricsDelta::default()
        });
        info!(turn = self.metrics.turn_count, budget = self.metrics.budget, "turn ended");
    }

    pub fn reset_game_state(&mut self) {
        self.metrics = CityMetrics::initial();
        for z in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                if let Cell::Occupied(_) = std::mem::take(&mut self.grid[z][x]) {
                    for observer in &mut self.observers {
                        observer.on_cell_cleared(x, z);
                    }
                }
            }
        }
        info!("city reset");
        for observer in &mut self.observers {
            observer.on_metrics_changed(&self.metrics);
        }
    }

    /// Returns `Some(won)` when an end condition matches. The first matching rule wins.
    pub fn end_condition(&self) -> Option<bool> {
        let metrics = &self.metrics;
        let limits = &self.thresholds;
        if metrics.pollution >= limits.pollution_max {
            return Some(false);
        }
        if metrics.budget <= 0 && metrics.income <= 0 {
            return Some(false);
        }
        if metrics.population >= limits.min_population
            && metrics.energy >= 0
            && metrics.happiness >= limits.min_happiness
        {
            return Some(true);
        }
        None
    }

    fn evaluate_end_conditions(&mut self) {
        let Some(won) = self.end_condition() else {
            return;
        };
        if self.metrics.game_over && self.metrics.game_won == won {
            return;
        }
        self.metrics.game_over = true;
        self.metrics.game_won = won;
        if won {
            info!(population = self.metrics.population, "city is sustainable, game won");
        } else {
            info!(
                pollution = self.metrics.pollution,
                budget = self.metrics.budget,
                "game lost"
            );
        }
        for observer in &mut self.observers {
            observer.on_game_ended(won, &self.metrics);
        }
    }
}

impl Default for CityState {
    fn default() -> Self {
        Self::new()
    }
}

fn grid_position(x: i32, z: i32) -> Result<(usize, usize), CityError> {
    let size = GRID_SIZE as i32;
    if (0..size).contains(&x) && (0..size).contains(&z) {
        Ok((x as usize, z as usize))
    } else {
        Err(CityError::OutOfBounds { x, z })
    }
}
