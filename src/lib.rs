pub mod buildings;
pub mod city;
pub mod config;
pub mod replay;
pub mod serial;
pub mod snapshot;
pub mod web;

pub use buildings::BuildingKind;
pub use city::{CityError, CityMetrics, CityObserver, CityState, MetricsDelta, Thresholds};
pub use serial::{RecordOutcome, SerialInputDecoder};
