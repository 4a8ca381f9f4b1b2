// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::{HistoricalStore, StoreError, TimeRange};
use crate::models::{ArrivalDeparture, PositionMatch};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Historical store backed by CSV exports, loaded fully into memory.
///
/// arrival_departures: `vehicle_id,trip_id,service_id,route_id,stop_id,stop_path_index,time_ms,scheduled_time_ms,kind`
/// position_matches: `vehicle_id,trip_id,stop_path_index,distance_along_stop_path_m,time_ms`
#[derive(Clone, Debug, Default)]
pub struct CsvHistoricalStore {
    arrival_departures: Vec<ArrivalDeparture>,
    position_matches: Vec<PositionMatch>,
}

fn read_csv_rows<T: DeserializeOwned>(reader: impl Read) -> Result<Vec<T>, StoreError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = vec![];

    for row in csv_reader.deserialize() {
        rows.push(row?);
    }

    Ok(rows)
}

fn open(path: &Path) -> Result<File, StoreError> {
    File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl CsvHistoricalStore {
    pub fn new(
        mut arrival_departures: Vec<ArrivalDeparture>,
        mut position_matches: Vec<PositionMatch>,
    ) -> Self {
        arrival_departures.sort_by_key(|event| event.time_ms);
        position_matches.sort_by_key(|position_match| position_match.time_ms);

        Self {
            arrival_departures,
            position_matches,
        }
    }

    pub fn load(
        arrival_departures_path: &Path,
        position_matches_path: Option<&Path>,
    ) -> Result<Self, StoreError> {
        let arrival_departures = read_csv_rows(open(arrival_departures_path)?)?;

        let position_matches = match position_matches_path {
            Some(path) => read_csv_rows(open(path)?)?,
            None => vec![],
        };

        Ok(Self::new(arrival_departures, position_matches))
    }

    pub fn from_readers(
        arrival_departures: impl Read,
        position_matches: impl Read,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(
            read_csv_rows(arrival_departures)?,
            read_csv_rows(position_matches)?,
        ))
    }

    pub fn all_arrival_departures(&self) -> &[ArrivalDeparture] {
        &self.arrival_departures
    }

    pub fn all_position_matches(&self) -> &[PositionMatch] {
        &self.position_matches
    }
}

fn page_of<T: Clone>(
    rows: &[T],
    time_of: impl Fn(&T) -> i64,
    range: TimeRange,
    offset: usize,
    limit: usize,
) -> Vec<T> {
    let start = rows.partition_point(|row| time_of(row) < range.start_ms);
    let end = rows.partition_point(|row| time_of(row) < range.end_ms);

    rows[start..end.max(start)]
        .iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}

impl HistoricalStore for CsvHistoricalStore {
    fn arrival_departures(
        &self,
        range: TimeRange,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArrivalDeparture>, StoreError> {
        Ok(page_of(
            &self.arrival_departures,
            |event| event.time_ms,
            range,
            offset,
            limit,
        ))
    }

    fn position_matches(
        &self,
        range: TimeRange,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PositionMatch>, StoreError> {
        Ok(page_of(
            &self.position_matches,
            |position_match| position_match.time_ms,
            range,
            offset,
            limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StopEventKind;

    const ARRIVALS: &str = "\
vehicle_id,trip_id,service_id,route_id,stop_id,stop_path_index,time_ms,scheduled_time_ms,kind
v1,t1,weekday,r1,s1,1,5000,4000,arrival
v1,t1,weekday,r1,s0,0,1000,,departure
v1,t1,weekday,r1,s1,1,6000,6000,departure
";

    const MATCHES: &str = "\
vehicle_id,trip_id,stop_path_index,distance_along_stop_path_m,time_ms
v1,t1,1,120.5,3000
";

    #[test]
    fn test_parses_and_sorts_rows() {
        let store =
            CsvHistoricalStore::from_readers(ARRIVALS.as_bytes(), MATCHES.as_bytes()).unwrap();

        let all = store.all_arrival_departures();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].time_ms, 1000);
        assert_eq!(all[0].scheduled_time_ms, None);
        assert_eq!(all[0].kind, StopEventKind::Departure);
        assert_eq!(all[1].schedule_deviation_ms(), Some(1000));

        let matches = store
            .position_matches(
                TimeRange {
                    start_ms: 0,
                    end_ms: 10_000,
                },
                0,
                10,
            )
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].distance_along_stop_path_m, 120.5);
    }

    #[test]
    fn test_pages_respect_range_and_offset() {
        let store =
            CsvHistoricalStore::from_readers(ARRIVALS.as_bytes(), MATCHES.as_bytes()).unwrap();

        let range = TimeRange {
            start_ms: 2000,
            end_ms: 6000,
        };

        let page = store.arrival_departures(range, 0, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].time_ms, 5000);

        let empty = store.arrival_departures(range, 1, 10).unwrap();
        assert!(empty.is_empty());
    }
}
