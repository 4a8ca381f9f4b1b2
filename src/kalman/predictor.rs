// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::estimator::{self, KalmanPrediction};
use super::{
    BaselinePredictor, HeadwaySource, HistoricalTravelTimes, HistoryQuery, KalmanError,
    PredictionRequest, TrafficSensor, Traversal,
};
use crate::cache::{CacheWrite, ConcurrentCache, KeyValueCache};
use crate::config::KalmanConfig;
use crate::models::{TripMeta, TripPattern};
use crate::schedule::TripReference;
use crate::sink::{DiagnosticEvent, PredictionDifferenceEvent, RecordSink, store_event_or_log};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stop path and coarse time of day the filter error is carried under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ErrorStateKey {
    pub trip_pattern_id: CompactString,
    pub stop_path_index: u32,
    pub bucket: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorState {
    pub error: f64,
    pub samples: u32,
    pub last_updated_ms: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Kalman,
    Baseline,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentPrediction {
    pub travel_time_ms: i64,
    pub source: PredictionSource,
}

/// Why the filter did not run. Everything but an estimator failure is an
/// ordinary gap in the data.
#[derive(Debug)]
enum Fallback {
    UnknownTrip,
    NoHeadway,
    InsufficientHistory { found: usize },
    Estimator(KalmanError),
}

pub struct RealTimePredictor {
    config: KalmanConfig,
    reference: Arc<dyn TripReference>,
    baseline: Arc<dyn BaselinePredictor>,
    headways: Arc<dyn HeadwaySource>,
    history: Arc<dyn HistoricalTravelTimes>,
    traffic: Option<Arc<dyn TrafficSensor>>,
    sink: Arc<dyn RecordSink>,
    error_state: ConcurrentCache<ErrorStateKey, ErrorState>,
}

impl RealTimePredictor {
    pub fn new(
        config: KalmanConfig,
        reference: Arc<dyn TripReference>,
        baseline: Arc<dyn BaselinePredictor>,
        headways: Arc<dyn HeadwaySource>,
        history: Arc<dyn HistoricalTravelTimes>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            reference,
            baseline,
            headways,
            history,
            traffic: None,
            sink,
            error_state: ConcurrentCache::new(),
        }
    }

    pub fn with_traffic_sensor(mut self, traffic: Arc<dyn TrafficSensor>) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn error_state_key(&self, trip: &TripMeta, stop_path_index: u32) -> ErrorStateKey {
        let bucket_secs = self.config.error_bucket_minutes.max(1) * 60;

        ErrorStateKey {
            trip_pattern_id: trip.trip_pattern_id.clone(),
            stop_path_index,
            bucket: trip.start_time_secs / bucket_secs,
        }
    }

    pub fn error_state(&self, key: &ErrorStateKey) -> Option<ErrorState> {
        self.error_state.get(key)
    }

    pub fn error_state_len(&self) -> usize {
        self.error_state.len()
    }

    /// Travel time left on the request's stop path. Falls back to the
    /// baseline, unchanged, whenever the filter cannot run. `None` only when
    /// the baseline has nothing either.
    pub fn predict(&self, request: &PredictionRequest) -> Option<SegmentPrediction> {
        match self.kalman_prediction(request) {
            Ok(prediction) => Some(prediction),
            Err(fallback) => {
                match &fallback {
                    Fallback::Estimator(e) => tracing::warn!(
                        vehicle_id = %request.vehicle_id,
                        trip_id = %request.trip_id,
                        stop_path_index = request.stop_path_index,
                        "Kalman estimator failed, using baseline: {}",
                        e
                    ),
                    other => tracing::debug!(
                        vehicle_id = %request.vehicle_id,
                        trip_id = %request.trip_id,
                        stop_path_index = request.stop_path_index,
                        reason = ?other,
                        "Using baseline prediction"
                    ),
                }

                self.baseline
                    .expected_travel_time_ms(request)
                    .map(|travel_time_ms| SegmentPrediction {
                        travel_time_ms,
                        source: PredictionSource::Baseline,
                    })
            }
        }
    }

    fn kalman_prediction(&self, request: &PredictionRequest) -> Result<SegmentPrediction, Fallback> {
        let (trip, pattern) = self
            .reference
            .pattern_for_trip(&request.trip_id)
            .ok_or(Fallback::UnknownTrip)?;

        let stop_path_index = request.stop_path_index;

        let headway = self
            .headways
            .last_vehicle_traversal(
                &trip.trip_pattern_id,
                stop_path_index,
                &request.vehicle_id,
                request.time_ms,
                self.config.headway_max_age_ms,
            )
            .ok_or(Fallback::NoHeadway)?;

        let service_date = request
            .service_date
            .unwrap_or(headway.other_traversal.service_date);

        let traversals = self.history.historical_traversals(&HistoryQuery {
            trip_pattern_id: &trip.trip_pattern_id,
            stop_path_index,
            service_date,
            trip_start_time_secs: trip.start_time_secs,
            schedule_start_window_secs: self.config.schedule_start_window_secs,
            max_days: self.config.max_kalman_days,
            max_days_to_search: self.config.max_kalman_days_to_search,
        });

        if traversals.len() < self.config.min_kalman_days {
            return Err(Fallback::InsufficientHistory {
                found: traversals.len(),
            });
        }

        let last_vehicle_ms = headway.other_traversal.travel_time_ms() as f64;
        let historical_ms = self.historical_samples(trip, stop_path_index, &traversals);

        let prediction = self.filter_step(
            self.error_state_key(trip, stop_path_index),
            last_vehicle_ms,
            &historical_ms,
            request.time_ms,
        )?;

        let full_path_ms = prediction.prediction_ms.round() as i64;

        self.check_against_baseline(request, full_path_ms);

        Ok(SegmentPrediction {
            travel_time_ms: scale_to_remaining(full_path_ms, pattern, request),
            source: PredictionSource::Kalman,
        })
    }

    /// Historical travel times, scaled by how today's traffic compares to the
    /// traffic on each of those days when a sensor is configured.
    fn historical_samples(
        &self,
        trip: &TripMeta,
        stop_path_index: u32,
        traversals: &[Traversal],
    ) -> Vec<f64> {
        let unadjusted = || {
            traversals
                .iter()
                .map(|traversal| traversal.travel_time_ms() as f64)
                .collect::<Vec<_>>()
        };

        let sensor = match (&self.traffic, self.config.use_traffic_sensor) {
            (Some(sensor), true) => sensor,
            _ => return unadjusted(),
        };

        let current_ms = match sensor.current_travel_time_ms(&trip.trip_pattern_id, stop_path_index)
        {
            Some(current_ms) if current_ms > 0 => current_ms as f64,
            _ => return unadjusted(),
        };

        traversals
            .iter()
            .map(|traversal| {
                let travel_ms = traversal.travel_time_ms() as f64;

                match sensor.historical_travel_time_ms(
                    &trip.trip_pattern_id,
                    stop_path_index,
                    traversal.service_date,
                    traversal.trip_start_time_secs,
                ) {
                    Some(historical_ms) if historical_ms > 0 => {
                        travel_ms * current_ms / historical_ms as f64
                    }
                    _ => travel_ms,
                }
            })
            .collect()
    }

    /// Runs the estimator inside the key's lock. Success replaces the carried
    /// error, an implausible result discards it.
    fn filter_step(
        &self,
        key: ErrorStateKey,
        last_vehicle_ms: f64,
        historical_ms: &[f64],
        now_ms: i64,
    ) -> Result<KalmanPrediction, Fallback> {
        let initial_error = self.config.initial_error_value;
        let reset_key = key.clone();

        let outcome = self.error_state.compute(key, |current| {
            let last_error = current.map_or(initial_error, |state| state.error);

            match estimator::predict(last_vehicle_ms, historical_ms, last_error) {
                Ok(prediction) => {
                    let state = ErrorState {
                        error: prediction.filter_error,
                        samples: current.map_or(0, |state| state.samples) + 1,
                        last_updated_ms: now_ms,
                    };
                    (CacheWrite::Put(state), Ok(prediction))
                }
                Err(e) => match current {
                    Some(_) => (CacheWrite::Remove, Err((e, true))),
                    None => (CacheWrite::Keep, Err((e, false))),
                },
            }
        });

        match outcome {
            Ok(prediction) => Ok(prediction),
            Err((e, was_reset)) => {
                if was_reset {
                    store_event_or_log(
                        self.sink.as_ref(),
                        &DiagnosticEvent::ErrorStateReset {
                            trip_pattern_id: reset_key.trip_pattern_id,
                            stop_path_index: reset_key.stop_path_index,
                            reason: e.to_string(),
                        },
                    );
                }
                Err(Fallback::Estimator(e))
            }
        }
    }

    fn check_against_baseline(&self, request: &PredictionRequest, kalman_ms: i64) {
        let Some(baseline_ms) = self
            .baseline
            .expected_travel_time_ms(&request.at_path_start())
        else {
            return;
        };

        let gap_ms = (kalman_ms - baseline_ms).abs();

        let difference_percentage = match baseline_ms {
            0 => f64::INFINITY,
            _ => gap_ms as f64 / baseline_ms.abs() as f64 * 100.0,
        };

        if difference_percentage > self.config.difference_event_percentage
            && gap_ms > self.config.difference_event_threshold_ms
        {
            store_event_or_log(
                self.sink.as_ref(),
                &DiagnosticEvent::PredictionDifference(PredictionDifferenceEvent {
                    vehicle_id: request.vehicle_id.clone(),
                    trip_id: request.trip_id.clone(),
                    stop_path_index: request.stop_path_index,
                    kalman_prediction_ms: kalman_ms,
                    baseline_prediction_ms: baseline_ms,
                    difference_percentage,
                    time_ms: request.time_ms,
                }),
            );
        }
    }
}

/// Share of a full stop path prediction still ahead of the vehicle.
fn scale_to_remaining(full_path_ms: i64, pattern: &TripPattern, request: &PredictionRequest) -> i64 {
    let length_m = pattern
        .stop_path(request.stop_path_index)
        .map_or(0.0, |stop_path| stop_path.length_m);

    if !(length_m > 0.0) || !(request.distance_along_stop_path_m > 0.0) {
        return full_path_ms;
    }

    let remaining = ((length_m - request.distance_along_stop_path_m) / length_m).clamp(0.0, 1.0);

    (full_path_ms as f64 * remaining).round() as i64
}
