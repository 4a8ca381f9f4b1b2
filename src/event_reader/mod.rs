// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Paged reads of historical arrival/departure and position match records,
//! grouped into one bundle per vehicle-trip occurrence.

pub mod csv_store;

use crate::config::ReaderConfig;
use crate::models::{ArrivalDeparture, PositionMatch, day_class_for, service_date_for};
use ahash::AHashMap;
use chrono::{NaiveDate, Weekday};
use chrono_tz::Tz;
use compact_str::CompactString;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("historical store failure: {0}")]
    Backend(String),
}

/// Half open interval `[start_ms, end_ms)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn contains(&self, time_ms: i64) -> bool {
        time_ms >= self.start_ms && time_ms < self.end_ms
    }
}

/// Persisted history, read page by page in time order.
pub trait HistoricalStore {
    fn arrival_departures(
        &self,
        range: TimeRange,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArrivalDeparture>, StoreError>;

    fn position_matches(
        &self,
        range: TimeRange,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PositionMatch>, StoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TripOccurrenceKey {
    pub trip_id: CompactString,
    pub service_id: CompactString,
    pub vehicle_id: CompactString,
    pub service_date: NaiveDate,
    pub day_class: Option<Weekday>,
}

/// Everything one vehicle did while running one trip on one service day,
/// in time order.
#[derive(Clone, Debug)]
pub struct TripOccurrence {
    pub key: TripOccurrenceKey,
    pub arrival_departures: Vec<ArrivalDeparture>,
    pub position_matches: Vec<PositionMatch>,
}

impl TripOccurrence {
    /// Matches on one stop path strictly between two instants.
    pub fn matches_between(
        &self,
        stop_path_index: u32,
        after_ms: i64,
        before_ms: i64,
    ) -> impl Iterator<Item = &PositionMatch> {
        self.position_matches.iter().filter(move |position_match| {
            position_match.stop_path_index == stop_path_index
                && position_match.time_ms > after_ms
                && position_match.time_ms < before_ms
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub arrival_departures: usize,
    pub position_matches: usize,
    pub orphaned_position_matches: usize,
    pub occurrences: usize,
}

pub struct EventReader<'a, S: HistoricalStore + ?Sized> {
    store: &'a S,
    config: &'a ReaderConfig,
    timezone: Tz,
}

impl<'a, S: HistoricalStore + ?Sized> EventReader<'a, S> {
    pub fn new(store: &'a S, config: &'a ReaderConfig, timezone: Tz) -> Self {
        Self {
            store,
            config,
            timezone,
        }
    }

    fn service_date(&self, time_ms: i64) -> NaiveDate {
        service_date_for(time_ms, &self.timezone, self.config.service_day_start_hour)
    }

    pub fn read_occurrences(
        &self,
        range: TimeRange,
    ) -> Result<(Vec<TripOccurrence>, ReadSummary), StoreError> {
        let mut summary = ReadSummary::default();
        let mut occurrences: AHashMap<TripOccurrenceKey, TripOccurrence> = AHashMap::new();
        // (vehicle, trip, service date) -> occurrence key, for attaching matches
        let mut match_lookup: AHashMap<(CompactString, CompactString, NaiveDate), TripOccurrenceKey> =
            AHashMap::new();

        summary.arrival_departures = read_all_pages(
            self.config.page_size,
            |offset, limit| self.store.arrival_departures(range, offset, limit),
            |arrival_departure| {
                let service_date = self.service_date(arrival_departure.time_ms);

                let key = TripOccurrenceKey {
                    trip_id: arrival_departure.trip_id.clone(),
                    service_id: arrival_departure.service_id.clone(),
                    vehicle_id: arrival_departure.vehicle_id.clone(),
                    service_date,
                    day_class: day_class_for(service_date, &self.config.special_days_of_week),
                };

                match_lookup
                    .entry((
                        arrival_departure.vehicle_id.clone(),
                        arrival_departure.trip_id.clone(),
                        service_date,
                    ))
                    .or_insert_with(|| key.clone());

                occurrences
                    .entry(key.clone())
                    .or_insert_with(|| TripOccurrence {
                        key,
                        arrival_departures: vec![],
                        position_matches: vec![],
                    })
                    .arrival_departures
                    .push(arrival_departure);
            },
        )?;

        let mut orphaned_position_matches = 0;

        summary.position_matches = read_all_pages(
            self.config.page_size,
            |offset, limit| self.store.position_matches(range, offset, limit),
            |position_match| {
                let lookup_key = (
                    position_match.vehicle_id.clone(),
                    position_match.trip_id.clone(),
                    self.service_date(position_match.time_ms),
                );

                match match_lookup
                    .get(&lookup_key)
                    .and_then(|key| occurrences.get_mut(key))
                {
                    Some(occurrence) => occurrence.position_matches.push(position_match),
                    None => orphaned_position_matches += 1,
                }
            },
        )?;

        summary.orphaned_position_matches = orphaned_position_matches;

        let mut occurrences = occurrences.into_values().collect::<Vec<_>>();

        for occurrence in occurrences.iter_mut() {
            occurrence
                .arrival_departures
                .sort_by_key(|event| (event.time_ms, event.stop_path_index, event.kind));
            occurrence
                .position_matches
                .sort_by_key(|position_match| position_match.time_ms);
        }

        occurrences.sort_by(|a, b| {
            (
                a.key.service_date,
                &a.key.trip_id,
                &a.key.vehicle_id,
                &a.key.service_id,
            )
                .cmp(&(
                    b.key.service_date,
                    &b.key.trip_id,
                    &b.key.vehicle_id,
                    &b.key.service_id,
                ))
        });

        summary.occurrences = occurrences.len();

        tracing::info!(
            arrival_departures = summary.arrival_departures,
            position_matches = summary.position_matches,
            orphaned_position_matches = summary.orphaned_position_matches,
            occurrences = summary.occurrences,
            "Read historical events"
        );

        Ok((occurrences, summary))
    }
}

/// Pulls fixed size pages until a short page comes back.
fn read_all_pages<T>(
    page_size: usize,
    mut fetch: impl FnMut(usize, usize) -> Result<Vec<T>, StoreError>,
    mut each: impl FnMut(T),
) -> Result<usize, StoreError> {
    let page_size = page_size.max(1);
    let mut offset = 0;

    loop {
        let page = fetch(offset, page_size)?;
        let page_len = page.len();

        tracing::debug!(offset, page_len, "Read page");

        for item in page {
            each(item);
        }

        offset += page_len;

        if page_len < page_size {
            break;
        }
    }

    Ok(offset)
}
