use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    buildings::BuildingKind,
    city::{CityMetrics, CityObserver},
};

/// Presentation notifications as they go out over `/api/events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CityEvent {
    BuildingPlaced {
        x: usize,
        z: usize,
        kind: BuildingKind,
    },
    CellCleared {
        x: usize,
        z: usize,
    },
    MetricsChanged {
        metrics: CityMetrics,
    },
    GameEnded {
        won: bool,
        metrics: CityMetrics,
    },
}

pub struct BroadcastObserver {
    tx: broadcast::Sender<String>,
}

impl BroadcastObserver {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    fn publish(&self, event: CityEvent) {
        if let Ok(payload) = serde_json::to_string(&event) {
            // No subscribers is fine; nobody is watching yet.
            let _ = self.tx.send(payload);
        }
    }
}

impl CityObserver for BroadcastObserver {
    fn on_building_placed(&mut self, x: usize, z: usize, kind: BuildingKind) {
        self.publish(CityEvent::BuildingPlaced { x, z, kind });
    }

    fn on_cell_cleared(&mut self, x: usize, z: usize) {
        self.publish(CityEvent::CellCleared { x, z });
    }

    fn on_metrics_changed(&mut self, metrics: &CityMetrics) {
        self.publish(CityEvent::MetricsChanged {
            metrics: metrics.clone(),
        });
    }

    fn on_game_ended(&mut self, won: bool, metrics: &CityMetrics) {
        self.publish(CityEvent::GameEnded {
            won,
            metrics: metrics.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::CityState;

    #[test]
    fn placement_is_published_before_the_metrics_refresh() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut city = CityState::new().with_observer(BroadcastObserver::new(tx));
        city.place_building(2, 2, BuildingKind::House).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            r#"{"event":"building_placed","x":2,"z":2,"kind":"house"}"#
        );
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second["event"], "metrics_changed");
        assert_eq!(second["metrics"]["budget"], 99_000);
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let mut city = CityState::new().with_observer(BroadcastObserver::new(tx));
        city.place_building(0, 0, BuildingKind::Tree).unwrap();
        city.clear_cell(0, 0).unwrap();
    }
}
