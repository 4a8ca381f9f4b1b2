// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use chrono::{Datelike, NaiveDate, TimeZone, Weekday};
use chrono_tz::Tz;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StopEventKind {
    Arrival,
    Departure,
}

/// A persisted arrival or departure of a vehicle at a stop of a trip.
/// `stop_path_index` is the position of the stop within the trip, so the
/// stop path with index `i` is the geometry leading up to stop `i`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArrivalDeparture {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub service_id: CompactString,
    pub route_id: CompactString,
    pub stop_id: CompactString,
    pub stop_path_index: u32,
    pub time_ms: i64,
    pub scheduled_time_ms: Option<i64>,
    pub kind: StopEventKind,
}

impl ArrivalDeparture {
    pub fn is_arrival(&self) -> bool {
        self.kind == StopEventKind::Arrival
    }

    pub fn is_departure(&self) -> bool {
        self.kind == StopEventKind::Departure
    }

    /// Positive when the vehicle is late.
    pub fn schedule_deviation_ms(&self) -> Option<i64> {
        self.scheduled_time_ms
            .map(|scheduled| self.time_ms - scheduled)
    }
}

/// A GPS fix resolved onto the stop path geometry of a trip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PositionMatch {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub stop_path_index: u32,
    pub distance_along_stop_path_m: f64,
    pub time_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StopPath {
    pub stop_id: CompactString,
    pub length_m: f64,
    #[serde(default)]
    pub is_layover_stop: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripPattern {
    pub trip_pattern_id: CompactString,
    pub route_id: CompactString,
    pub direction_id: Option<u8>,
    pub stop_paths: Vec<StopPath>,
}

impl TripPattern {
    pub fn stop_path(&self, stop_path_index: u32) -> Option<&StopPath> {
        self.stop_paths.get(stop_path_index as usize)
    }
}

/// Seconds after the start of the service day, as in a timetable.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledStopTime {
    pub arrival_secs: Option<u32>,
    pub departure_secs: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TripMeta {
    pub trip_id: CompactString,
    pub service_id: CompactString,
    pub route_id: CompactString,
    pub trip_pattern_id: CompactString,
    pub start_time_secs: u32,
    #[serde(default)]
    pub schedule: Vec<ScheduledStopTime>,
}

impl TripMeta {
    /// Scheduled running time over a stop path, from the departure at the
    /// previous stop to the arrival at this one.
    pub fn scheduled_travel_secs(&self, stop_path_index: u32) -> Option<u32> {
        if stop_path_index == 0 {
            return None;
        }

        let previous = self.schedule.get(stop_path_index as usize - 1)?;
        let current = self.schedule.get(stop_path_index as usize)?;

        let left = previous.departure_secs.or(previous.arrival_secs)?;
        let arrived = current.arrival_secs.or(current.departure_secs)?;

        arrived.checked_sub(left)
    }

    pub fn scheduled_dwell_secs(&self, stop_path_index: u32) -> Option<u32> {
        let stop_time = self.schedule.get(stop_path_index as usize)?;

        match (stop_time.arrival_secs, stop_time.departure_secs) {
            (Some(arrival), Some(departure)) => departure.checked_sub(arrival),
            _ => None,
        }
    }
}

/// Service day of an instant. Events before `day_start_hour` local time
/// belong to the previous service day, so late night trips stay whole.
pub fn service_date_for(time_ms: i64, timezone: &Tz, day_start_hour: u32) -> NaiveDate {
    let shifted_ms = time_ms - i64::from(day_start_hour) * 3_600_000;

    match timezone.timestamp_millis_opt(shifted_ms).single() {
        Some(local) => local.date_naive(),
        None => chrono::DateTime::from_timestamp_millis(shifted_ms)
            .map(|utc| utc.date_naive())
            .unwrap_or_default(),
    }
}

/// The weekday an occurrence is split out under, if that weekday is special.
pub fn day_class_for(service_date: NaiveDate, special_days: &[Weekday]) -> Option<Weekday> {
    let weekday = service_date.weekday();

    special_days.contains(&weekday).then_some(weekday)
}
