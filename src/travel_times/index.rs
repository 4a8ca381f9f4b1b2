// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::{HowSet, TravelTimeInfo};
use crate::models::TripMeta;
use ahash::AHashMap;
use chrono::{Datelike, NaiveDate, Weekday};
use compact_str::CompactString;
use std::sync::{Arc, RwLock};

/// trip pattern -> stop path index -> one record per observed trip.
#[derive(Clone, Debug, Default)]
pub struct TravelTimeIndex {
    by_pattern: AHashMap<CompactString, AHashMap<u32, Vec<TravelTimeInfo>>>,
    len: usize,
}

/// The candidate with the start time closest to `target_start_secs`.
/// Stops scanning on an exact start time match.
fn closest_start<'a>(
    candidates: impl Iterator<Item = &'a TravelTimeInfo>,
    target_start_secs: u32,
) -> Option<(&'a TravelTimeInfo, u32)> {
    let mut best: Option<(&TravelTimeInfo, u32)> = None;

    for candidate in candidates {
        let difference = candidate.trip_start_time_secs.abs_diff(target_start_secs);

        if best.is_none_or(|(_, best_difference)| difference < best_difference) {
            best = Some((candidate, difference));

            if difference == 0 {
                break;
            }
        }
    }

    best
}

impl TravelTimeIndex {
    pub fn build(travel_times: impl IntoIterator<Item = TravelTimeInfo>) -> Self {
        let mut index = Self::default();

        for info in travel_times {
            index.insert(info);
        }

        index
    }

    pub fn insert(&mut self, info: TravelTimeInfo) {
        self.by_pattern
            .entry(info.trip_pattern_id.clone())
            .or_default()
            .entry(info.stop_path_index)
            .or_default()
            .push(info);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn candidates(&self, trip_pattern_id: &str, stop_path_index: u32) -> &[TravelTimeInfo] {
        self.by_pattern
            .get(trip_pattern_id)
            .and_then(|by_index| by_index.get(&stop_path_index))
            .map(|candidates| candidates.as_slice())
            .unwrap_or(&[])
    }

    /// Best historical record for a trip's stop path. Prefers the same
    /// service class, closest start time, and labels the result with how
    /// it was found. `None` only when nothing is indexed for the
    /// pattern and stop path.
    pub fn best_match(&self, target: &TripMeta, stop_path_index: u32) -> Option<TravelTimeInfo> {
        let candidates = self.candidates(&target.trip_pattern_id, stop_path_index);

        if candidates.is_empty() {
            return None;
        }

        let same_service = closest_start(
            candidates
                .iter()
                .filter(|candidate| candidate.service_id == target.service_id),
            target.start_time_secs,
        );

        if let Some((info, difference)) = same_service {
            let how_set = match difference {
                0 => HowSet::Avl,
                _ => HowSet::ServiceClassDifferentTrip,
            };
            return Some(info.with_how_set(how_set));
        }

        closest_start(candidates.iter(), target.start_time_secs)
            .map(|(info, _)| info.with_how_set(HowSet::DifferentServiceClass))
    }
}

/// One index for ordinary days plus one per special weekday.
#[derive(Clone, Debug, Default)]
pub struct TravelTimeIndexSet {
    generic: TravelTimeIndex,
    special: AHashMap<Weekday, TravelTimeIndex>,
}

impl TravelTimeIndexSet {
    pub fn build(travel_times: impl IntoIterator<Item = TravelTimeInfo>) -> Self {
        let mut set = Self::default();

        for info in travel_times {
            match info.day_class {
                None => set.generic.insert(info),
                Some(weekday) => set.special.entry(weekday).or_default().insert(info),
            }
        }

        set
    }

    pub fn len(&self) -> usize {
        self.generic.len() + self.special.values().map(|index| index.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generic(&self) -> &TravelTimeIndex {
        &self.generic
    }

    /// Looks in the special weekday index first when `service_date` falls on
    /// one, then in the generic index. A special day match from another
    /// service class only wins when the generic index has nothing better.
    pub fn best_match(
        &self,
        target: &TripMeta,
        stop_path_index: u32,
        service_date: Option<NaiveDate>,
    ) -> Option<TravelTimeInfo> {
        let special = service_date
            .and_then(|date| self.special.get(&date.weekday()))
            .and_then(|index| index.best_match(target, stop_path_index));

        if let Some(info) = &special {
            if info.how_set != HowSet::DifferentServiceClass {
                return special;
            }
        }

        match self.generic.best_match(target, stop_path_index) {
            Some(info) if info.how_set != HowSet::DifferentServiceClass => Some(info),
            generic => special.or(generic),
        }
    }
}

/// The index of the latest aggregation run. Readers hold an `Arc` to a whole
/// run while a new one is swapped in.
#[derive(Debug, Default)]
pub struct SharedTravelTimeIndex {
    current: RwLock<Arc<TravelTimeIndexSet>>,
}

impl SharedTravelTimeIndex {
    pub fn new(index: TravelTimeIndexSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn current(&self) -> Arc<TravelTimeIndexSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, index: TravelTimeIndexSet) {
        let index = Arc::new(index);

        match self.current.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
    }
}
