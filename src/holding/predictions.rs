// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::cache::{CacheWrite, ConcurrentCache};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArrivalPrediction {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub stop_id: CompactString,
    pub stop_path_index: u32,
    pub predicted_arrival_ms: i64,
    pub creation_time_ms: i64,
}

/// Current arrival predictions of vehicles heading to a stop.
pub trait ArrivalPredictions: Send + Sync {
    /// Every vehicle's latest prediction for the stop, soonest first.
    fn predictions_for_stop(&self, route_id: &str, stop_id: &str) -> Vec<ArrivalPrediction>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StopKey {
    route_id: CompactString,
    stop_id: CompactString,
}

/// In memory board of the latest prediction per vehicle per stop.
#[derive(Default)]
pub struct PredictionBoard {
    by_stop: ConcurrentCache<StopKey, AHashMap<CompactString, ArrivalPrediction>>,
}

impl PredictionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the vehicle's previous prediction for the same stop.
    pub fn publish(&self, prediction: ArrivalPrediction) {
        let key = StopKey {
            route_id: prediction.route_id.clone(),
            stop_id: prediction.stop_id.clone(),
        };

        self.by_stop.compute(key, move |current| {
            let mut by_vehicle = current.cloned().unwrap_or_default();
            by_vehicle.insert(prediction.vehicle_id.clone(), prediction);
            (CacheWrite::Put(by_vehicle), ())
        });
    }

    /// Drops the vehicle's prediction for a stop it has reached.
    pub fn clear(&self, route_id: &str, stop_id: &str, vehicle_id: &str) {
        let key = StopKey {
            route_id: route_id.into(),
            stop_id: stop_id.into(),
        };

        self.by_stop.compute(key, |current| match current {
            Some(by_vehicle) if by_vehicle.contains_key(vehicle_id) => {
                let mut by_vehicle = by_vehicle.clone();
                by_vehicle.remove(vehicle_id);

                match by_vehicle.is_empty() {
                    true => (CacheWrite::Remove, ()),
                    false => (CacheWrite::Put(by_vehicle), ()),
                }
            }
            _ => (CacheWrite::Keep, ()),
        });
    }

    /// Forgets predictions for arrivals more than `max_overdue_ms` in the
    /// past, left behind by vehicles that went out of service.
    pub fn prune(&self, now_ms: i64, max_overdue_ms: i64) {
        self.by_stop.retain(|_, by_vehicle| {
            by_vehicle
                .retain(|_, prediction| prediction.predicted_arrival_ms >= now_ms - max_overdue_ms);
            !by_vehicle.is_empty()
        });
    }
}

impl ArrivalPredictions for PredictionBoard {
    fn predictions_for_stop(&self, route_id: &str, stop_id: &str) -> Vec<ArrivalPrediction> {
        let key = StopKey {
            route_id: route_id.into(),
            stop_id: stop_id.into(),
        };

        let mut predictions = self
            .by_stop
            .read(&key, |by_vehicle| by_vehicle.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        predictions.sort_by(|a, b| {
            a.predicted_arrival_ms
                .cmp(&b.predicted_arrival_ms)
                .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
        });

        predictions
    }
}
