// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::holding::HoldingTime;
use crate::holding::controller::HoldingController;
use crate::holding::predictions::{ArrivalPrediction, PredictionBoard};
use crate::kalman::PredictionRequest;
use crate::kalman::history::SegmentHistory;
use crate::kalman::predictor::RealTimePredictor;
use crate::models::{ArrivalDeparture, PositionMatch, StopEventKind, TripMeta, service_date_for};
use crate::schedule::TripReference;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::sync::Arc;

const MAX_OVERDUE_PREDICTION_MS: i64 = 30 * 60 * 1000;

/// What one live event produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveOutcome {
    pub prediction: Option<ArrivalPrediction>,
    pub holding_times: Vec<HoldingTime>,
}

/// Feeds live arrivals, departures and position matches through segment
/// history, the predictor, the prediction board and the holding controller.
/// Events of one vehicle must arrive in order; different vehicles may be
/// processed from different threads.
pub struct LiveEventProcessor {
    reference: Arc<dyn TripReference>,
    history: Arc<SegmentHistory>,
    predictor: Arc<RealTimePredictor>,
    board: Arc<PredictionBoard>,
    controller: Arc<HoldingController>,
    timezone: Tz,
    service_day_start_hour: u32,
}

impl LiveEventProcessor {
    pub fn new(
        reference: Arc<dyn TripReference>,
        history: Arc<SegmentHistory>,
        predictor: Arc<RealTimePredictor>,
        board: Arc<PredictionBoard>,
        controller: Arc<HoldingController>,
        timezone: Tz,
        service_day_start_hour: u32,
    ) -> Self {
        Self {
            reference,
            history,
            predictor,
            board,
            controller,
            timezone,
            service_day_start_hour,
        }
    }

    pub fn controller(&self) -> &HoldingController {
        &self.controller
    }

    pub fn board(&self) -> &PredictionBoard {
        &self.board
    }

    fn service_date(&self, time_ms: i64) -> NaiveDate {
        service_date_for(time_ms, &self.timezone, self.service_day_start_hour)
    }

    pub fn on_arrival_departure(&self, event: &ArrivalDeparture) -> LiveOutcome {
        let mut outcome = LiveOutcome::default();

        let Some((trip, pattern)) = self.reference.pattern_for_trip(&event.trip_id) else {
            tracing::warn!(
                vehicle_id = %event.vehicle_id,
                trip_id = %event.trip_id,
                "Live event for unknown trip"
            );
            return outcome;
        };

        let service_date = self.service_date(event.time_ms);
        self.history.record_event(event, trip, service_date);

        match event.kind {
            StopEventKind::Arrival => {
                self.board
                    .clear(&trip.route_id, &event.stop_id, &event.vehicle_id);
                outcome
                    .holding_times
                    .extend(self.controller.on_arrival(event));
            }
            StopEventKind::Departure => {
                outcome
                    .holding_times
                    .extend(self.controller.on_departure(event));

                let next_index = event.stop_path_index + 1;

                if let Some(next_stop) = pattern.stop_path(next_index) {
                    let request = PredictionRequest {
                        vehicle_id: event.vehicle_id.clone(),
                        trip_id: event.trip_id.clone(),
                        stop_path_index: next_index,
                        distance_along_stop_path_m: 0.0,
                        time_ms: event.time_ms,
                        service_date: Some(service_date),
                    };

                    outcome.prediction = self.publish_prediction(&request, trip, &next_stop.stop_id);
                }
            }
        }

        self.hold_on_prediction(&mut outcome);

        outcome
    }

    pub fn on_position_match(&self, position_match: &PositionMatch) -> LiveOutcome {
        let mut outcome = LiveOutcome::default();

        let Some((trip, pattern)) = self.reference.pattern_for_trip(&position_match.trip_id) else {
            return outcome;
        };

        let Some(stop_path) = pattern.stop_path(position_match.stop_path_index) else {
            return outcome;
        };

        let request = PredictionRequest {
            vehicle_id: position_match.vehicle_id.clone(),
            trip_id: position_match.trip_id.clone(),
            stop_path_index: position_match.stop_path_index,
            distance_along_stop_path_m: position_match.distance_along_stop_path_m,
            time_ms: position_match.time_ms,
            service_date: Some(self.service_date(position_match.time_ms)),
        };

        outcome.prediction = self.publish_prediction(&request, trip, &stop_path.stop_id);
        self.hold_on_prediction(&mut outcome);

        outcome
    }

    pub fn prune(&self, now_ms: i64) {
        self.history.prune(now_ms);
        self.board.prune(now_ms, MAX_OVERDUE_PREDICTION_MS);
    }

    fn publish_prediction(
        &self,
        request: &PredictionRequest,
        trip: &TripMeta,
        stop_id: &str,
    ) -> Option<ArrivalPrediction> {
        let segment = self.predictor.predict(request)?;

        let prediction = ArrivalPrediction {
            vehicle_id: request.vehicle_id.clone(),
            trip_id: request.trip_id.clone(),
            route_id: trip.route_id.clone(),
            stop_id: stop_id.into(),
            stop_path_index: request.stop_path_index,
            predicted_arrival_ms: request.time_ms + segment.travel_time_ms,
            creation_time_ms: request.time_ms,
        };

        tracing::debug!(
            vehicle_id = %prediction.vehicle_id,
            stop_id = %prediction.stop_id,
            predicted_arrival_ms = prediction.predicted_arrival_ms,
            source = ?segment.source,
            "Published arrival prediction"
        );

        self.board.publish(prediction.clone());

        Some(prediction)
    }

    fn hold_on_prediction(&self, outcome: &mut LiveOutcome) {
        if let Some(prediction) = &outcome.prediction {
            outcome
                .holding_times
                .extend(self.controller.on_arrival_prediction(prediction));
        }
    }
}
