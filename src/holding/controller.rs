// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::formula::holding_time_ms;
use super::predictions::{ArrivalPrediction, ArrivalPredictions};
use super::{HoldingProvenance, HoldingTime};
use crate::cache::{BoundedCache, CacheWrite, ConcurrentCache, KeyValueCache};
use crate::config::HoldingConfig;
use crate::models::ArrivalDeparture;
use crate::sink::{RecordSink, store_holding_time_or_log};
use compact_str::CompactString;
use std::sync::Arc;

const DEPARTURES_KEPT_PER_STOP: usize = 8;

/// Where a vehicle stands with respect to holding at a control stop.
#[derive(Clone, Debug, PartialEq)]
pub enum VehicleHoldingState {
    NoDecision,
    Held(HoldingTime),
    Released(HoldingTime),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopDeparture {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub time_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct StopKey {
    route_id: CompactString,
    stop_id: CompactString,
}

/// The arrival a holding time is computed for.
struct HoldRequest<'a> {
    vehicle_id: &'a CompactString,
    trip_id: &'a CompactString,
    route_id: &'a CompactString,
    stop_id: &'a CompactString,
    arrival_time_ms: i64,
    creation_time_ms: i64,
    provenance: HoldingProvenance,
}

impl HoldRequest<'_> {
    fn stop_key(&self) -> StopKey {
        StopKey {
            route_id: self.route_id.clone(),
            stop_id: self.stop_id.clone(),
        }
    }
}

fn holds_at(holding_time: &HoldingTime, route_id: &str, stop_id: &str) -> bool {
    holding_time.route_id == route_id && holding_time.stop_id == stop_id
}

pub struct HoldingController {
    config: HoldingConfig,
    predictions: Arc<dyn ArrivalPredictions>,
    sink: Arc<dyn RecordSink>,
    vehicles: ConcurrentCache<CompactString, VehicleHoldingState>,
    recent_departures: BoundedCache<StopKey, Vec<StopDeparture>>,
}

impl HoldingController {
    pub fn new(
        config: HoldingConfig,
        predictions: Arc<dyn ArrivalPredictions>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let recent_departures = BoundedCache::with_capacity(config.recent_departures_capacity);

        Self {
            config,
            predictions,
            sink,
            vehicles: ConcurrentCache::new(),
            recent_departures,
        }
    }

    pub fn state(&self, vehicle_id: &str) -> VehicleHoldingState {
        self.vehicles
            .get(&CompactString::from(vehicle_id))
            .unwrap_or(VehicleHoldingState::NoDecision)
    }

    pub fn active_hold(&self, vehicle_id: &str) -> Option<HoldingTime> {
        match self.state(vehicle_id) {
            VehicleHoldingState::Held(holding_time) => Some(holding_time),
            _ => None,
        }
    }

    /// Computes and stores a hold for a vehicle observed arriving at a
    /// control stop. Returns `None` for any other stop.
    pub fn on_arrival(&self, arrival: &ArrivalDeparture) -> Option<HoldingTime> {
        if !arrival.is_arrival()
            || !self
                .config
                .is_control_stop(&arrival.stop_id, arrival.stop_path_index)
        {
            return None;
        }

        let holding_time = self.compute(&HoldRequest {
            vehicle_id: &arrival.vehicle_id,
            trip_id: &arrival.trip_id,
            route_id: &arrival.route_id,
            stop_id: &arrival.stop_id,
            arrival_time_ms: arrival.time_ms,
            creation_time_ms: arrival.time_ms,
            provenance: HoldingProvenance::Arrival,
        });

        let state = match holding_time.is_computed() {
            true => VehicleHoldingState::Held(holding_time.clone()),
            false => VehicleHoldingState::NoDecision,
        };
        self.vehicles.put(arrival.vehicle_id.clone(), state);

        store_holding_time_or_log(self.sink.as_ref(), &holding_time);

        Some(holding_time)
    }

    /// Computes a hold from a predicted arrival. A hold from an observed
    /// arrival for the same trip and stop is never replaced.
    pub fn on_arrival_prediction(&self, prediction: &ArrivalPrediction) -> Option<HoldingTime> {
        if !self.config.use_arrival_predictions
            || !self
                .config
                .is_control_stop(&prediction.stop_id, prediction.stop_path_index)
        {
            return None;
        }

        let already_there = match self.vehicles.get(&prediction.vehicle_id) {
            // a vehicle standing at a control stop keeps that hold until it departs
            Some(VehicleHoldingState::Held(holding_time))
                if holding_time.provenance == HoldingProvenance::Arrival =>
            {
                holding_time.trip_id == prediction.trip_id
                    || !holds_at(&holding_time, &prediction.route_id, &prediction.stop_id)
            }
            Some(VehicleHoldingState::Released(holding_time)) => {
                holding_time.trip_id == prediction.trip_id
                    && holding_time.stop_id == prediction.stop_id
            }
            _ => false,
        };

        if already_there {
            return None;
        }

        let holding_time = self.compute(&HoldRequest {
            vehicle_id: &prediction.vehicle_id,
            trip_id: &prediction.trip_id,
            route_id: &prediction.route_id,
            stop_id: &prediction.stop_id,
            arrival_time_ms: prediction.predicted_arrival_ms,
            creation_time_ms: prediction.creation_time_ms,
            provenance: HoldingProvenance::Prediction,
        });

        if holding_time.is_computed() {
            self.vehicles.put(
                prediction.vehicle_id.clone(),
                VehicleHoldingState::Held(holding_time.clone()),
            );
        }

        store_holding_time_or_log(self.sink.as_ref(), &holding_time);

        Some(holding_time)
    }

    /// Releases the departing vehicle and, when configured, recomputes the
    /// holds of every other vehicle still waiting at the stop. Returns the
    /// recomputed holds.
    pub fn on_departure(&self, departure: &ArrivalDeparture) -> Vec<HoldingTime> {
        if !departure.is_departure()
            || !self
                .config
                .is_control_stop(&departure.stop_id, departure.stop_path_index)
        {
            return vec![];
        }

        let stop_key = StopKey {
            route_id: departure.route_id.clone(),
            stop_id: departure.stop_id.clone(),
        };

        self.recent_departures.update(stop_key, Vec::new, |departures| {
            departures.push(StopDeparture {
                vehicle_id: departure.vehicle_id.clone(),
                trip_id: departure.trip_id.clone(),
                time_ms: departure.time_ms,
            });

            if departures.len() > DEPARTURES_KEPT_PER_STOP {
                departures.remove(0);
            }
        });

        let released = self
            .vehicles
            .compute(departure.vehicle_id.clone(), |current| match current {
                Some(VehicleHoldingState::Held(holding_time))
                    if holds_at(holding_time, &departure.route_id, &departure.stop_id) =>
                {
                    (
                        CacheWrite::Put(VehicleHoldingState::Released(holding_time.clone())),
                        true,
                    )
                }
                _ => (CacheWrite::Keep, false),
            });

        if released {
            tracing::debug!(
                vehicle_id = %departure.vehicle_id,
                stop_id = %departure.stop_id,
                "Vehicle released from control stop"
            );
        }

        if !self.config.regenerate_on_departure {
            return vec![];
        }

        self.regenerate(departure)
    }

    fn regenerate(&self, departure: &ArrivalDeparture) -> Vec<HoldingTime> {
        let mut waiting = self
            .vehicles
            .snapshot(|vehicle_id, state| match state {
                VehicleHoldingState::Held(holding_time) => {
                    *vehicle_id != departure.vehicle_id
                        && holds_at(holding_time, &departure.route_id, &departure.stop_id)
                }
                _ => false,
            })
            .into_iter()
            .filter_map(|(vehicle_id, state)| match state {
                VehicleHoldingState::Held(holding_time) => Some((vehicle_id, holding_time)),
                _ => None,
            })
            .collect::<Vec<_>>();

        // vehicles further ahead are refreshed first, later ones anchor on them
        waiting.sort_by(|a, b| {
            a.1.arrival_time_ms
                .cmp(&b.1.arrival_time_ms)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut regenerated = Vec::with_capacity(waiting.len());

        for (vehicle_id, previous) in waiting {
            let refreshed = self.compute(&HoldRequest {
                vehicle_id: &vehicle_id,
                trip_id: &previous.trip_id,
                route_id: &previous.route_id,
                stop_id: &previous.stop_id,
                arrival_time_ms: previous.arrival_time_ms,
                creation_time_ms: departure.time_ms,
                provenance: previous.provenance,
            });

            if !refreshed.is_computed() {
                continue;
            }

            // the vehicle's own stream may have moved on since the snapshot
            let applied = self.vehicles.compute(vehicle_id.clone(), |current| match current {
                Some(VehicleHoldingState::Held(holding_time))
                    if holding_time.trip_id == previous.trip_id
                        && holding_time.arrival_time_ms == previous.arrival_time_ms
                        && holds_at(holding_time, &previous.route_id, &previous.stop_id) =>
                {
                    (
                        CacheWrite::Put(VehicleHoldingState::Held(refreshed.clone())),
                        true,
                    )
                }
                _ => (CacheWrite::Keep, false),
            });

            if applied {
                tracing::debug!(
                    vehicle_id = %vehicle_id,
                    stop_id = %refreshed.stop_id,
                    previous_hold_until_ms = previous.hold_until_ms,
                    hold_until_ms = refreshed.hold_until_ms,
                    "Regenerated holding time after peer departure"
                );
                store_holding_time_or_log(self.sink.as_ref(), &refreshed);
                regenerated.push(refreshed);
            }
        }

        regenerated
    }

    /// Release time of the vehicle ahead: an active hold of another vehicle
    /// observed at the stop no later than this one, else the latest departure
    /// of another vehicle from the stop. Prediction based holds are for
    /// vehicles still on the road and never anchor others.
    fn last_departure_anchor(&self, request: &HoldRequest<'_>) -> Option<i64> {
        let active_hold = self
            .vehicles
            .snapshot(|vehicle_id, state| match state {
                VehicleHoldingState::Held(holding_time) => {
                    vehicle_id != request.vehicle_id
                        && holding_time.provenance == HoldingProvenance::Arrival
                        && holds_at(holding_time, request.route_id, request.stop_id)
                        && holding_time.arrival_time_ms <= request.arrival_time_ms
                }
                _ => false,
            })
            .into_iter()
            .filter_map(|(_, state)| match state {
                VehicleHoldingState::Held(holding_time) => Some(holding_time.hold_until_ms),
                _ => None,
            })
            .max();

        if active_hold.is_some() {
            return active_hold;
        }

        self.recent_departures
            .get(&request.stop_key())?
            .iter()
            .filter(|departure| departure.vehicle_id != *request.vehicle_id)
            .map(|departure| departure.time_ms)
            .max()
    }

    fn compute(&self, request: &HoldRequest<'_>) -> HoldingTime {
        let not_computed = || HoldingTime {
            vehicle_id: request.vehicle_id.clone(),
            stop_id: request.stop_id.clone(),
            trip_id: request.trip_id.clone(),
            route_id: request.route_id.clone(),
            creation_time_ms: request.creation_time_ms,
            arrival_time_ms: request.arrival_time_ms,
            hold_until_ms: request.arrival_time_ms,
            holding_ms: 0,
            provenance: HoldingProvenance::NotComputed,
            number_predictions_used: 0,
        };

        let Some(last_departure_ms) = self.last_departure_anchor(request) else {
            tracing::debug!(
                vehicle_id = %request.vehicle_id,
                stop_id = %request.stop_id,
                "No vehicle ahead to hold against"
            );
            return not_computed();
        };

        let followers_ms = self
            .predictions
            .predictions_for_stop(request.route_id, request.stop_id)
            .into_iter()
            .filter(|prediction| prediction.vehicle_id != *request.vehicle_id)
            .map(|prediction| prediction.predicted_arrival_ms)
            .collect::<Vec<_>>();

        let computed = holding_time_ms(
            request.arrival_time_ms,
            last_departure_ms,
            &followers_ms,
            self.config.max_predictions_for_holding,
            self.config.planned_headway_ms,
        );

        HoldingTime {
            hold_until_ms: request.arrival_time_ms + computed.holding_ms,
            holding_ms: computed.holding_ms,
            provenance: request.provenance,
            number_predictions_used: computed.predictions_used,
            ..not_computed()
        }
    }
}
