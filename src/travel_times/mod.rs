// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Historical travel and stop times per trip and stop path, and the index
//! used to find the best historical stand-in for a trip.

pub mod aggregator;
pub mod averaging;
pub mod index;
pub mod lookup;
pub mod subsegments;

#[cfg(test)]
mod test_aggregation;

use chrono::Weekday;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// How a TravelTimeInfo handed to a caller was obtained.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HowSet {
    /// Observed data for this very trip.
    Avl,
    /// Observed data for another trip of the same service class.
    ServiceClassDifferentTrip,
    /// Observed data from another service class.
    DifferentServiceClass,
    /// No observations at all, derived from the timetable.
    Schedule,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TravelTimeInfo {
    pub trip_id: CompactString,
    pub service_id: CompactString,
    pub trip_pattern_id: CompactString,
    pub trip_start_time_secs: u32,
    pub stop_path_index: u32,
    pub day_class: Option<Weekday>,
    pub stop_time_ms: Option<i64>,
    pub travel_times_ms: Vec<i64>,
    pub travel_time_segment_length_m: f64,
    pub how_set: HowSet,
}

impl TravelTimeInfo {
    pub fn with_how_set(&self, how_set: HowSet) -> Self {
        Self {
            how_set,
            ..self.clone()
        }
    }

    pub fn total_travel_time_ms(&self) -> i64 {
        self.travel_times_ms.iter().sum()
    }

    /// Travel time still ahead of a vehicle `distance_along_m` into the stop
    /// path: whole sub-segments not yet started plus the unfinished share of
    /// the current one.
    pub fn remaining_travel_time_ms(&self, distance_along_m: f64) -> i64 {
        if !(distance_along_m > 0.0) || !(self.travel_time_segment_length_m > 0.0) {
            return self.total_travel_time_ms();
        }

        let position = distance_along_m / self.travel_time_segment_length_m;
        let current = position.floor() as usize;

        if current >= self.travel_times_ms.len() {
            return 0;
        }

        let fraction_left = 1.0 - (position - current as f64);
        let current_remaining =
            (self.travel_times_ms[current] as f64 * fraction_left).round() as i64;

        current_remaining
            + self.travel_times_ms[current + 1..]
                .iter()
                .sum::<i64>()
    }
}
