// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::models::{TripMeta, TripPattern};
use ahash::AHashMap;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read-only schedule reference data: trips, their patterns and stop paths.
pub trait TripReference: Send + Sync {
    fn trip(&self, trip_id: &str) -> Option<&TripMeta>;

    fn trip_pattern(&self, trip_pattern_id: &str) -> Option<&TripPattern>;

    fn pattern_for_trip(&self, trip_id: &str) -> Option<(&TripMeta, &TripPattern)> {
        let trip = self.trip(trip_id)?;
        let pattern = self.trip_pattern(&trip.trip_pattern_id)?;
        Some((trip, pattern))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ScheduleFile {
    trip_patterns: Vec<TripPattern>,
    trips: Vec<TripMeta>,
}

#[derive(Clone, Debug, Default)]
pub struct ScheduleData {
    trips: AHashMap<CompactString, TripMeta>,
    trip_patterns: AHashMap<CompactString, TripPattern>,
}

impl ScheduleData {
    pub fn new(trip_patterns: Vec<TripPattern>, trips: Vec<TripMeta>) -> Self {
        Self {
            trips: trips
                .into_iter()
                .map(|trip| (trip.trip_id.clone(), trip))
                .collect(),
            trip_patterns: trip_patterns
                .into_iter()
                .map(|pattern| (pattern.trip_pattern_id.clone(), pattern))
                .collect(),
        }
    }

    pub fn load_json(path: &Path) -> Result<Self, std::io::Error> {
        let reader = BufReader::new(File::open(path)?);
        let file: ScheduleFile = serde_json::from_reader(reader)?;

        Ok(Self::new(file.trip_patterns, file.trips))
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

impl TripReference for ScheduleData {
    fn trip(&self, trip_id: &str) -> Option<&TripMeta> {
        self.trips.get(trip_id)
    }

    fn trip_pattern(&self, trip_pattern_id: &str) -> Option<&TripPattern> {
        self.trip_patterns.get(trip_pattern_id)
    }
}
