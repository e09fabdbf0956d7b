use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::city::CityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    Residential,
    House,
    WindTurbine,
    Tree,
    GasPlant,
    Factory,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 6] = [
        BuildingKind::Residential,
        BuildingKind::House,
        BuildingKind::WindTurbine,
        BuildingKind::Tree,
        BuildingKind::GasPlant,
        BuildingKind::Factory,
    ];

    pub fn spec(self) -> &'static BuildingSpec {
        match self {
            BuildingKind::Residential => &RESIDENTIAL,
            BuildingKind::House => &HOUSE,
            BuildingKind::WindTurbine => &WIND_TURBINE,
            BuildingKind::Tree => &TREE,
            BuildingKind::GasPlant => &GAS_PLANT,
            BuildingKind::Factory => &FACTORY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildingKind::Residential => "residential",
            BuildingKind::House => "house",
            BuildingKind::WindTurbine => "wind_turbine",
            BuildingKind::Tree => "tree",
            BuildingKind::GasPlant => "gas_plant",
            BuildingKind::Factory => "factory",
        }
    }
}

impl fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildingKind {
    type Err = CityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        BuildingKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| CityError::InvalidBuildingType(wanted.to_string()))
    }
}

/// Placement cost and the effects a building applies to the city while it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildingSpec {
    pub name: &'static str,
    pub cost: i64,
    pub population: i64,
    pub pollution: i64,
    pub energy: i64,
    pub income: i64,
    pub happiness: i64,
}

const RESIDENTIAL: BuildingSpec = BuildingSpec {
    name: "Residential Complex",
    cost: 10_000,
    population: 100,
    pollution: 10,
    energy: -10,
    income: 0,
    happiness: 0,
};

const HOUSE: BuildingSpec = BuildingSpec {
    name: "House",
    cost: 1_000,
    population: 5,
    pollution: 2,
    energy: -2,
    income: 100,
    happiness: 10,
};

const WIND_TURBINE: BuildingSpec = BuildingSpec {
    name: "Wind Turbine",
    cost: 20_000,
    population: 0,
    pollution: 0,
    energy: 5,
    income: 5_000,
    happiness: -5,
};

const TREE: BuildingSpec = BuildingSpec {
    name: "Tree",
    cost: 5_000,
    population: 0,
    pollution: -10,
    energy: 0,
    income: 500,
    happiness: 15,
};

const GAS_PLANT: BuildingSpec = BuildingSpec {
    name: "Natural Gas Plant",
    cost: 15_000,
    population: 0,
    pollution: 20,
    energy: 5,
    income: 1_000,
    happiness: 5,
};

const FACTORY: BuildingSpec = BuildingSpec {
    name: "Factory",
    cost: 10_000,
    population: 0,
    pollution: 30,
    energy: 0,
    income: 2_000,
    happiness: -10,
};

/// Resistor value that marks a building kind on the breadboard, with an inclusive tolerance band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResistanceBand {
    pub kind: BuildingKind,
    pub target: f64,
    pub min: f64,
    pub max: f64,
}

impl ResistanceBand {
    pub fn contains(&self, ohms: f64) -> bool {
        ohms >= self.min && ohms <= self.max
    }
}

// Matched in declared order; the first band containing a reading wins.
// Factories have no marker resistor.
pub const RESISTANCE_BANDS: [ResistanceBand; 5] = [
    ResistanceBand {
        kind: BuildingKind::Residential,
        target: 20.0,
        min: 19.0,
        max: 21.0,
    },
    ResistanceBand {
        kind: BuildingKind::House,
        target: 40.0,
        min: 38.0,
        max: 42.0,
    },
    ResistanceBand {
        kind: BuildingKind::WindTurbine,
        target: 300.0,
        min: 285.0,
        max: 315.0,
    },
    ResistanceBand {
        kind: BuildingKind::Tree,
        target: 178.0,
        min: 170.0,
        max: 190.0,
    },
    ResistanceBand {
        kind: BuildingKind::GasPlant,
        target: 690.0,
        min: 655.0,
        max: 725.0,
    },
];
