// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::index::SharedTravelTimeIndex;
use super::subsegments::{subsegment_count, subsegment_length};
use super::{HowSet, TravelTimeInfo};
use crate::kalman::{BaselinePredictor, PredictionRequest};
use crate::models::{TripMeta, TripPattern};
use crate::schedule::TripReference;
use chrono::NaiveDate;
use std::sync::Arc;

/// Resolves travel times for live trips. Falls through the index's three
/// observed tiers, then the timetable, then gives up.
pub struct TravelTimeLookup {
    index: Arc<SharedTravelTimeIndex>,
    reference: Arc<dyn TripReference>,
    max_travel_time_segment_length_m: f64,
}

/// `total_ms` cut into `count` integer parts that add back up to it.
fn even_split(total_ms: i64, count: usize) -> Vec<i64> {
    let count_i64 = count.max(1) as i64;
    let base = total_ms / count_i64;
    let remainder = total_ms % count_i64;

    (0..count_i64)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

impl TravelTimeLookup {
    pub fn new(
        index: Arc<SharedTravelTimeIndex>,
        reference: Arc<dyn TripReference>,
        max_travel_time_segment_length_m: f64,
    ) -> Self {
        Self {
            index,
            reference,
            max_travel_time_segment_length_m,
        }
    }

    pub fn resolve(
        &self,
        trip_id: &str,
        stop_path_index: u32,
        service_date: Option<NaiveDate>,
    ) -> Option<TravelTimeInfo> {
        let (trip, pattern) = self.reference.pattern_for_trip(trip_id)?;

        let observed = self
            .index
            .current()
            .best_match(trip, stop_path_index, service_date);

        match observed {
            Some(info) => Some(info),
            None => self.from_schedule(trip, pattern, stop_path_index),
        }
    }

    fn from_schedule(
        &self,
        trip: &TripMeta,
        pattern: &TripPattern,
        stop_path_index: u32,
    ) -> Option<TravelTimeInfo> {
        let stop_path = pattern.stop_path(stop_path_index)?;

        let travel_secs = trip.scheduled_travel_secs(stop_path_index);
        let dwell_secs = trip.scheduled_dwell_secs(stop_path_index);

        if travel_secs.is_none() && dwell_secs.is_none() {
            return None;
        }

        let max_length = self.max_travel_time_segment_length_m;

        let travel_times_ms = travel_secs
            .map(|secs| {
                even_split(
                    i64::from(secs) * 1000,
                    subsegment_count(stop_path.length_m, max_length),
                )
            })
            .unwrap_or_default();

        tracing::debug!(
            trip_id = %trip.trip_id,
            stop_path_index,
            "No observed travel times, using schedule"
        );

        Some(TravelTimeInfo {
            trip_id: trip.trip_id.clone(),
            service_id: trip.service_id.clone(),
            trip_pattern_id: trip.trip_pattern_id.clone(),
            trip_start_time_secs: trip.start_time_secs,
            stop_path_index,
            day_class: None,
            stop_time_ms: dwell_secs.map(|secs| i64::from(secs) * 1000),
            travel_times_ms,
            travel_time_segment_length_m: subsegment_length(stop_path.length_m, max_length),
            how_set: HowSet::Schedule,
        })
    }
}

impl BaselinePredictor for TravelTimeLookup {
    fn expected_travel_time_ms(&self, request: &PredictionRequest) -> Option<i64> {
        let info = self.resolve(
            &request.trip_id,
            request.stop_path_index,
            request.service_date,
        )?;

        if info.travel_times_ms.is_empty() {
            return None;
        }

        Some(info.remaining_travel_time_ms(request.distance_along_stop_path_m))
    }
}
