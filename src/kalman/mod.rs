// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Real time travel time prediction. Historical traversals of a stop path
//! are blended with the traversal of the vehicle just ahead through a
//! scalar Kalman filter whose error is carried between predictions.

pub mod estimator;
pub mod history;
pub mod predictor;

#[cfg(test)]
mod test_predictor;

use chrono::NaiveDate;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KalmanError {
    #[error("no historical travel times to filter")]
    NoHistory,
    #[error("implausible prediction of {0} ms")]
    ImplausiblePrediction(f64),
    #[error("implausible filter error {0}")]
    ImplausibleError(f64),
}

/// A vehicle somewhere on a stop path, asking how long the rest of it takes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionRequest {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub stop_path_index: u32,
    pub distance_along_stop_path_m: f64,
    pub time_ms: i64,
    pub service_date: Option<NaiveDate>,
}

impl PredictionRequest {
    /// The same request for a vehicle standing at the start of the stop path.
    pub fn at_path_start(&self) -> Self {
        Self {
            distance_along_stop_path_m: 0.0,
            ..self.clone()
        }
    }
}

/// Non Kalman estimate of the travel time left on a stop path.
pub trait BaselinePredictor: Send + Sync {
    fn expected_travel_time_ms(&self, request: &PredictionRequest) -> Option<i64>;
}

/// Travel times over a stop path from an external traffic feed.
pub trait TrafficSensor: Send + Sync {
    fn current_travel_time_ms(&self, trip_pattern_id: &str, stop_path_index: u32) -> Option<i64>;

    fn historical_travel_time_ms(
        &self,
        trip_pattern_id: &str,
        stop_path_index: u32,
        service_date: NaiveDate,
        time_of_day_secs: u32,
    ) -> Option<i64>;
}

/// One completed traversal of a stop path by one vehicle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Traversal {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub service_date: NaiveDate,
    pub trip_start_time_secs: u32,
    pub departure_ms: i64,
    pub arrival_ms: i64,
}

impl Traversal {
    pub fn travel_time_ms(&self) -> i64 {
        self.arrival_ms - self.departure_ms
    }
}

/// The gap to the nearest vehicle ahead and what it took over the path.
#[derive(Clone, Debug, PartialEq)]
pub struct Headway {
    pub headway_ms: i64,
    pub other_vehicle_id: CompactString,
    pub other_traversal: Traversal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryQuery<'a> {
    pub trip_pattern_id: &'a str,
    pub stop_path_index: u32,
    pub service_date: NaiveDate,
    pub trip_start_time_secs: u32,
    pub schedule_start_window_secs: u32,
    pub max_days: usize,
    pub max_days_to_search: u32,
}

/// Source of the vehicle ahead on a stop path.
pub trait HeadwaySource: Send + Sync {
    fn last_vehicle_traversal(
        &self,
        trip_pattern_id: &str,
        stop_path_index: u32,
        vehicle_id: &str,
        now_ms: i64,
        max_age_ms: i64,
    ) -> Option<Headway>;
}

/// Source of earlier days' traversals of a stop path.
pub trait HistoricalTravelTimes: Send + Sync {
    /// At most `max_days` traversals, one per day, oldest first.
    fn historical_traversals(&self, query: &HistoryQuery<'_>) -> Vec<Traversal>;
}
