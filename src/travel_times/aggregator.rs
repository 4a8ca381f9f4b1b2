// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::averaging::{average_travel_times, filtered_average};
use super::subsegments::{split_travel_time, subsegment_length};
use super::{HowSet, TravelTimeInfo};
use crate::config::TravelTimesConfig;
use crate::event_reader::TripOccurrence;
use crate::models::{ArrivalDeparture, TripMeta, TripPattern};
use crate::schedule::TripReference;
use ahash::AHashMap;
use chrono::Weekday;
use compact_str::CompactString;
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TravelTimeKey {
    pub trip_id: CompactString,
    pub stop_path_index: u32,
    pub day_class: Option<Weekday>,
}

/// Every sample collected for one (trip, stop path) during a run.
#[derive(Clone, Debug, Default)]
pub struct TravelTimeSamples {
    pub stop_times_ms: Vec<i64>,
    pub travel_times_ms: Vec<Vec<i64>>,
    pub travel_time_segment_length_m: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub occurrences_processed: usize,
    pub occurrences_skipped: usize,
    pub stop_time_samples: usize,
    pub travel_time_samples: usize,
    pub first_stop_outliers: usize,
    pub schedule_deviation_outliers: usize,
    pub speed_outliers: usize,
    pub degenerate_spans: usize,
    pub layover_dwells_skipped: usize,
}

#[derive(Clone, Debug)]
pub struct AggregationOutput {
    pub travel_times: Vec<TravelTimeInfo>,
    pub summary: AggregationSummary,
}

/// Accumulates samples over the occurrences of one aggregation run. A new
/// aggregator is built for every run so nothing leaks between runs.
pub struct TravelTimesAggregator<'a> {
    config: &'a TravelTimesConfig,
    reference: &'a dyn TripReference,
    samples: AHashMap<TravelTimeKey, TravelTimeSamples>,
    summary: AggregationSummary,
}

impl<'a> TravelTimesAggregator<'a> {
    pub fn new(config: &'a TravelTimesConfig, reference: &'a dyn TripReference) -> Self {
        Self {
            config,
            reference,
            samples: AHashMap::new(),
            summary: AggregationSummary::default(),
        }
    }

    pub fn samples(&self) -> &AHashMap<TravelTimeKey, TravelTimeSamples> {
        &self.samples
    }

    fn entry(
        &mut self,
        trip_id: &CompactString,
        stop_path_index: u32,
        day_class: Option<Weekday>,
    ) -> &mut TravelTimeSamples {
        self.samples
            .entry(TravelTimeKey {
                trip_id: trip_id.clone(),
                stop_path_index,
                day_class,
            })
            .or_default()
    }

    pub fn add_occurrences<'o>(&mut self, occurrences: impl IntoIterator<Item = &'o TripOccurrence>) {
        for occurrence in occurrences {
            self.add_occurrence(occurrence);
        }
    }

    pub fn add_occurrence(&mut self, occurrence: &TripOccurrence) {
        let key = &occurrence.key;
        let reference = self.reference;

        let (trip, pattern) = match reference.pattern_for_trip(&key.trip_id) {
            Some(found) => found,
            None => {
                tracing::warn!(
                    trip_id = %key.trip_id,
                    vehicle_id = %key.vehicle_id,
                    service_date = %key.service_date,
                    "No reference data for trip, skipping occurrence"
                );
                self.summary.occurrences_skipped += 1;
                return;
            }
        };

        if occurrence.arrival_departures.is_empty() {
            return;
        }

        self.summary.occurrences_processed += 1;

        self.add_first_stop_time(trip, &occurrence.arrival_departures, key.day_class);

        for pair in occurrence.arrival_departures.windows(2) {
            let (earlier, later) = (&pair[0], &pair[1]);

            if earlier.is_arrival()
                && later.is_departure()
                && earlier.stop_path_index == later.stop_path_index
            {
                self.add_stop_time(trip, pattern, earlier, later, key.day_class);
            } else if earlier.is_departure()
                && later.is_arrival()
                && later.stop_path_index == earlier.stop_path_index + 1
            {
                self.add_travel_time(trip, pattern, occurrence, earlier, later, key.day_class);
            }
        }
    }

    /// How late the vehicle left the first stop stands in for its stop time.
    fn add_first_stop_time(
        &mut self,
        trip: &TripMeta,
        events: &[ArrivalDeparture],
        day_class: Option<Weekday>,
    ) {
        let first_departure = events
            .iter()
            .find(|event| event.is_departure() && event.stop_path_index == 0);

        let deviation_ms = match first_departure.and_then(|event| event.schedule_deviation_ms()) {
            Some(deviation_ms) => deviation_ms,
            None => return,
        };

        if deviation_ms.abs() > self.config.max_first_stop_deviation_ms {
            tracing::debug!(
                trip_id = %trip.trip_id,
                deviation_ms,
                "First stop departure too far off schedule, discarding"
            );
            self.summary.first_stop_outliers += 1;
            return;
        }

        // leaving early does not make the terminal stop time negative
        self.entry(&trip.trip_id, 0, day_class)
            .stop_times_ms
            .push(deviation_ms.max(0));
        self.summary.stop_time_samples += 1;
    }

    fn add_stop_time(
        &mut self,
        trip: &TripMeta,
        pattern: &TripPattern,
        arrival: &ArrivalDeparture,
        departure: &ArrivalDeparture,
        day_class: Option<Weekday>,
    ) {
        // the first stop is covered by the schedule deviation sample
        if arrival.stop_path_index == 0 {
            return;
        }

        let is_layover = pattern
            .stop_path(arrival.stop_path_index)
            .is_some_and(|stop_path| stop_path.is_layover_stop);

        if is_layover {
            self.summary.layover_dwells_skipped += 1;
            return;
        }

        let stop_time_ms = departure.time_ms - arrival.time_ms;

        if stop_time_ms < 0 {
            self.summary.degenerate_spans += 1;
            return;
        }

        self.entry(&trip.trip_id, arrival.stop_path_index, day_class)
            .stop_times_ms
            .push(stop_time_ms);
        self.summary.stop_time_samples += 1;
    }

    fn add_travel_time(
        &mut self,
        trip: &TripMeta,
        pattern: &TripPattern,
        occurrence: &TripOccurrence,
        departure: &ArrivalDeparture,
        arrival: &ArrivalDeparture,
        day_class: Option<Weekday>,
    ) {
        // a big deviation usually means the AVL was matched to the wrong trip
        if let Some(deviation_ms) = arrival.schedule_deviation_ms() {
            if deviation_ms.abs() > self.config.max_schedule_deviation_ms {
                self.summary.schedule_deviation_outliers += 1;
                return;
            }
        }

        let elapsed_ms = arrival.time_ms - departure.time_ms;

        if elapsed_ms <= 0 {
            self.summary.degenerate_spans += 1;
            return;
        }

        let stop_path = match pattern.stop_path(arrival.stop_path_index) {
            Some(stop_path) => stop_path,
            None => {
                tracing::warn!(
                    trip_id = %trip.trip_id,
                    trip_pattern_id = %pattern.trip_pattern_id,
                    stop_path_index = arrival.stop_path_index,
                    "Stop path index beyond trip pattern"
                );
                return;
            }
        };

        let speed_mps = stop_path.length_m / (elapsed_ms as f64 / 1000.0);

        if speed_mps > self.config.max_segment_speed_mps {
            self.summary.speed_outliers += 1;
            return;
        }

        let max_length = self.config.max_travel_time_segment_length_m;

        let travel_times = split_travel_time(
            departure.time_ms,
            arrival.time_ms,
            stop_path.length_m,
            max_length,
            occurrence
                .matches_between(arrival.stop_path_index, departure.time_ms, arrival.time_ms)
                .map(|position_match| {
                    (
                        position_match.distance_along_stop_path_m,
                        position_match.time_ms,
                    )
                }),
        );

        let samples = self.entry(&trip.trip_id, arrival.stop_path_index, day_class);
        samples.travel_times_ms.push(travel_times);
        samples.travel_time_segment_length_m = subsegment_length(stop_path.length_m, max_length);

        self.summary.travel_time_samples += 1;
    }

    /// Averages every key and returns the run's TravelTimeInfo, ordered by
    /// pattern, stop path and trip so identical input gives identical output.
    pub fn finish(self) -> AggregationOutput {
        let fraction_limit = self.config.averaging_fraction_limit;
        let reference = self.reference;

        let mut travel_times = self
            .samples
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .filter_map(|(key, samples)| {
                let trip = reference.trip(&key.trip_id)?;

                let stop_time_ms = filtered_average(&samples.stop_times_ms, fraction_limit);
                let travel_times_ms =
                    average_travel_times(&samples.travel_times_ms, fraction_limit)
                        .unwrap_or_default();

                if stop_time_ms.is_none() && travel_times_ms.is_empty() {
                    return None;
                }

                Some(TravelTimeInfo {
                    trip_id: key.trip_id,
                    service_id: trip.service_id.clone(),
                    trip_pattern_id: trip.trip_pattern_id.clone(),
                    trip_start_time_secs: trip.start_time_secs,
                    stop_path_index: key.stop_path_index,
                    day_class: key.day_class,
                    stop_time_ms,
                    travel_times_ms,
                    travel_time_segment_length_m: samples.travel_time_segment_length_m,
                    how_set: HowSet::Avl,
                })
            })
            .collect::<Vec<_>>();

        travel_times.sort_by(|a, b| {
            (
                &a.trip_pattern_id,
                a.stop_path_index,
                &a.trip_id,
                a.day_class.map(|day| day.num_days_from_monday()),
            )
                .cmp(&(
                    &b.trip_pattern_id,
                    b.stop_path_index,
                    &b.trip_id,
                    b.day_class.map(|day| day.num_days_from_monday()),
                ))
        });

        tracing::info!(
            travel_times = travel_times.len(),
            occurrences_processed = self.summary.occurrences_processed,
            occurrences_skipped = self.summary.occurrences_skipped,
            stop_time_samples = self.summary.stop_time_samples,
            travel_time_samples = self.summary.travel_time_samples,
            first_stop_outliers = self.summary.first_stop_outliers,
            schedule_deviation_outliers = self.summary.schedule_deviation_outliers,
            speed_outliers = self.summary.speed_outliers,
            "Finished travel time aggregation"
        );

        AggregationOutput {
            travel_times,
            summary: self.summary,
        }
    }
}
