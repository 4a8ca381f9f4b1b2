// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::{Headway, HeadwaySource, HistoricalTravelTimes, HistoryQuery, Traversal};
use crate::cache::{CacheWrite, ConcurrentCache, KeyValueCache};
use crate::event_reader::TripOccurrence;
use crate::models::{ArrivalDeparture, TripMeta};
use crate::schedule::TripReference;
use ahash::AHashMap;
use chrono::NaiveDate;
use compact_str::CompactString;

const DAY_MS: i64 = 86_400_000;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub trip_pattern_id: CompactString,
    pub stop_path_index: u32,
}

#[derive(Clone, Debug)]
struct PendingDeparture {
    trip_id: CompactString,
    stop_path_index: u32,
    time_ms: i64,
}

/// Completed stop path traversals, today's and the previous days', built
/// from departure/arrival pairs of the same vehicle.
pub struct SegmentHistory {
    traversals: ConcurrentCache<SegmentKey, Vec<Traversal>>,
    pending_departures: ConcurrentCache<CompactString, PendingDeparture>,
    retention_ms: i64,
}

impl SegmentHistory {
    /// Keeps enough days to serve a search `max_days_to_search` back.
    pub fn new(max_days_to_search: u32) -> Self {
        Self {
            traversals: ConcurrentCache::new(),
            pending_departures: ConcurrentCache::new(),
            retention_ms: (i64::from(max_days_to_search) + 2) * DAY_MS,
        }
    }

    /// Feeds one arrival or departure. Returns the traversal an arrival
    /// completes, if any.
    pub fn record_event(
        &self,
        event: &ArrivalDeparture,
        trip: &TripMeta,
        service_date: NaiveDate,
    ) -> Option<Traversal> {
        if event.is_departure() {
            self.pending_departures.put(
                event.vehicle_id.clone(),
                PendingDeparture {
                    trip_id: event.trip_id.clone(),
                    stop_path_index: event.stop_path_index,
                    time_ms: event.time_ms,
                },
            );
            return None;
        }

        let pending = self.pending_departures.remove(&event.vehicle_id)?;

        if pending.trip_id != event.trip_id
            || pending.stop_path_index + 1 != event.stop_path_index
            || event.time_ms <= pending.time_ms
        {
            return None;
        }

        let traversal = Traversal {
            vehicle_id: event.vehicle_id.clone(),
            trip_id: event.trip_id.clone(),
            service_date,
            trip_start_time_secs: trip.start_time_secs,
            departure_ms: pending.time_ms,
            arrival_ms: event.time_ms,
        };

        let key = SegmentKey {
            trip_pattern_id: trip.trip_pattern_id.clone(),
            stop_path_index: event.stop_path_index,
        };

        let stored = traversal.clone();
        self.traversals.compute(key, move |current| {
            let mut traversals = current.cloned().unwrap_or_default();
            let position =
                traversals.partition_point(|existing| existing.departure_ms <= stored.departure_ms);
            traversals.insert(position, stored);
            (CacheWrite::Put(traversals), ())
        });

        Some(traversal)
    }

    /// Replays historical trip occurrences, e.g. the output of an
    /// `EventReader`, to seed earlier days.
    pub fn record_occurrences<'o>(
        &self,
        occurrences: impl IntoIterator<Item = &'o TripOccurrence>,
        reference: &dyn TripReference,
    ) -> usize {
        let mut completed = 0;

        for occurrence in occurrences {
            let Some(trip) = reference.trip(&occurrence.key.trip_id) else {
                continue;
            };

            for event in &occurrence.arrival_departures {
                if self
                    .record_event(event, trip, occurrence.key.service_date)
                    .is_some()
                {
                    completed += 1;
                }
            }
        }

        completed
    }

    pub fn traversal_count(&self, trip_pattern_id: &str, stop_path_index: u32) -> usize {
        self.traversals
            .read(
                &SegmentKey {
                    trip_pattern_id: trip_pattern_id.into(),
                    stop_path_index,
                },
                |traversals| traversals.len(),
            )
            .unwrap_or(0)
    }

    /// Forgets traversals and unmatched departures older than the search
    /// window.
    pub fn prune(&self, now_ms: i64) {
        let cutoff_ms = now_ms - self.retention_ms;

        self.traversals.retain(|_, traversals| {
            traversals.retain(|traversal| traversal.arrival_ms >= cutoff_ms);
            !traversals.is_empty()
        });

        self.pending_departures
            .retain(|_, pending| pending.time_ms >= now_ms - DAY_MS);
    }
}

impl HeadwaySource for SegmentHistory {
    fn last_vehicle_traversal(
        &self,
        trip_pattern_id: &str,
        stop_path_index: u32,
        vehicle_id: &str,
        now_ms: i64,
        max_age_ms: i64,
    ) -> Option<Headway> {
        let key = SegmentKey {
            trip_pattern_id: trip_pattern_id.into(),
            stop_path_index,
        };

        self.traversals
            .read(&key, |traversals| {
                traversals
                    .iter()
                    .rev()
                    .find(|traversal| {
                        traversal.vehicle_id != vehicle_id
                            && traversal.arrival_ms <= now_ms
                            && now_ms - traversal.arrival_ms <= max_age_ms
                    })
                    .map(|traversal| Headway {
                        headway_ms: now_ms - traversal.departure_ms,
                        other_vehicle_id: traversal.vehicle_id.clone(),
                        other_traversal: traversal.clone(),
                    })
            })
            .flatten()
    }
}

impl HistoricalTravelTimes for SegmentHistory {
    fn historical_traversals(&self, query: &HistoryQuery<'_>) -> Vec<Traversal> {
        let key = SegmentKey {
            trip_pattern_id: query.trip_pattern_id.into(),
            stop_path_index: query.stop_path_index,
        };

        self.traversals
            .read(&key, |traversals| {
                let mut closest_per_day: AHashMap<NaiveDate, (&Traversal, u32)> = AHashMap::new();

                for traversal in traversals {
                    let days_back = (query.service_date - traversal.service_date).num_days();

                    if days_back < 1 || days_back > i64::from(query.max_days_to_search) {
                        continue;
                    }

                    let difference = traversal
                        .trip_start_time_secs
                        .abs_diff(query.trip_start_time_secs);

                    if difference > query.schedule_start_window_secs {
                        continue;
                    }

                    closest_per_day
                        .entry(traversal.service_date)
                        .and_modify(|best| {
                            if difference < best.1 {
                                *best = (traversal, difference);
                            }
                        })
                        .or_insert((traversal, difference));
                }

                let mut days = closest_per_day
                    .into_values()
                    .map(|(traversal, _)| traversal.clone())
                    .collect::<Vec<_>>();
                days.sort_by_key(|traversal| traversal.service_date);

                let skip = days.len().saturating_sub(query.max_days);
                days.split_off(skip)
            })
            .unwrap_or_default()
    }
}
