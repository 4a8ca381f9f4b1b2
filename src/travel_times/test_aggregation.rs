// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::HowSet;
use super::aggregator::{TravelTimeKey, TravelTimesAggregator};
use super::index::TravelTimeIndexSet;
use crate::config::TravelTimesConfig;
use crate::event_reader::{TripOccurrence, TripOccurrenceKey};
use crate::models::{
    ArrivalDeparture, PositionMatch, StopEventKind, StopPath, TripMeta, TripPattern,
};
use crate::schedule::ScheduleData;
use chrono::{NaiveDate, Weekday};

const T0: i64 = 1_700_000_000_000;

fn schedule() -> ScheduleData {
    let stop_path = |stop_id: &str, length_m: f64| StopPath {
        stop_id: stop_id.into(),
        length_m,
        is_layover_stop: false,
    };

    let pattern = TripPattern {
        trip_pattern_id: "p1".into(),
        route_id: "r1".into(),
        direction_id: Some(0),
        stop_paths: vec![
            stop_path("a", 0.0),
            stop_path("b", 600.0),
            stop_path("c", 200.0),
        ],
    };

    let trip = TripMeta {
        trip_id: "t1".into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        trip_pattern_id: "p1".into(),
        start_time_secs: 8 * 3600,
        schedule: vec![],
    };

    ScheduleData::new(vec![pattern], vec![trip])
}

fn event(
    trip_id: &str,
    stop_path_index: u32,
    kind: StopEventKind,
    time_ms: i64,
    scheduled_time_ms: i64,
) -> ArrivalDeparture {
    ArrivalDeparture {
        vehicle_id: "v1".into(),
        trip_id: trip_id.into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        stop_id: ["a", "b", "c"][stop_path_index as usize].into(),
        stop_path_index,
        time_ms,
        scheduled_time_ms: Some(scheduled_time_ms),
        kind,
    }
}

/// Departs a, runs to b in `to_b_ms`, dwells `dwell_ms`, runs to c in 30 s.
fn occurrence(
    trip_id: &str,
    day: u32,
    first_departure_delay_ms: i64,
    to_b_ms: i64,
    dwell_ms: i64,
) -> TripOccurrence {
    let start = T0 + i64::from(day) * 86_400_000;
    let departed_a = start + first_departure_delay_ms;
    let arrived_b = departed_a + to_b_ms;
    let departed_b = arrived_b + dwell_ms;
    let arrived_c = departed_b + 30_000;

    TripOccurrence {
        key: TripOccurrenceKey {
            trip_id: trip_id.into(),
            service_id: "weekday".into(),
            vehicle_id: "v1".into(),
            service_date: NaiveDate::from_ymd_opt(2023, 11, 14 + day).unwrap(),
            day_class: None,
        },
        arrival_departures: vec![
            event(trip_id, 0, StopEventKind::Departure, departed_a, start),
            event(trip_id, 1, StopEventKind::Arrival, arrived_b, start + 100_000),
            event(trip_id, 1, StopEventKind::Departure, departed_b, start + 120_000),
            event(trip_id, 2, StopEventKind::Arrival, arrived_c, start + 160_000),
        ],
        position_matches: vec![],
    }
}

fn key(stop_path_index: u32) -> TravelTimeKey {
    TravelTimeKey {
        trip_id: "t1".into(),
        stop_path_index,
        day_class: None,
    }
}

#[test]
fn test_subsegment_samples_sum_to_observed_travel_time() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    let mut with_fixes = occurrence("t1", 0, 30_000, 97_531, 20_000);
    let departed_a = with_fixes.arrival_departures[0].time_ms;
    with_fixes.position_matches = [(150.0, 10_000), (310.0, 40_000), (520.0, 80_000)]
        .into_iter()
        .map(|(distance, offset_ms)| PositionMatch {
            vehicle_id: "v1".into(),
            trip_id: "t1".into(),
            stop_path_index: 1,
            distance_along_stop_path_m: distance,
            time_ms: departed_a + offset_ms,
        })
        .collect();

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrence(&with_fixes);

    let samples = aggregator.samples();

    let segment = &samples[&key(1)];
    assert_eq!(segment.travel_times_ms.len(), 1);
    assert_eq!(segment.travel_times_ms[0].len(), 3);
    assert_eq!(segment.travel_times_ms[0].iter().sum::<i64>(), 97_531);
    assert_eq!(segment.travel_time_segment_length_m, 200.0);
    assert_eq!(segment.stop_times_ms, vec![20_000]);

    // leaving the first stop 30 s late
    assert_eq!(samples[&key(0)].stop_times_ms, vec![30_000]);

    let short = &samples[&key(2)];
    assert_eq!(short.travel_times_ms, vec![vec![30_000]]);
}

#[test]
fn test_outlier_occurrence_excluded_from_average() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    let mut occurrences = (0..4)
        .map(|day| occurrence("t1", day, 0, 90_000, 20_000))
        .collect::<Vec<_>>();
    occurrences.push(occurrence("t1", 4, 0, 200_000, 20_000));

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrences(&occurrences);
    let output = aggregator.finish();

    let segment = output
        .travel_times
        .iter()
        .find(|info| info.stop_path_index == 1)
        .unwrap();

    assert_eq!(segment.travel_times_ms, vec![30_000, 30_000, 30_000]);
    assert_eq!(segment.stop_time_ms, Some(20_000));
    assert_eq!(segment.how_set, HowSet::Avl);
    assert_eq!(segment.trip_pattern_id, "p1");
    assert_eq!(output.summary.occurrences_processed, 5);
}

#[test]
fn test_unknown_trip_skipped_without_aborting_run() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    let occurrences = vec![
        occurrence("ghost", 0, 0, 90_000, 20_000),
        occurrence("t1", 1, 0, 90_000, 20_000),
    ];

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrences(&occurrences);
    let output = aggregator.finish();

    assert_eq!(output.summary.occurrences_skipped, 1);
    assert_eq!(output.summary.occurrences_processed, 1);
    assert!(output.travel_times.iter().all(|info| info.trip_id == "t1"));
    assert_eq!(output.travel_times.len(), 3);
}

#[test]
fn test_schedule_outliers_rejected() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    // 11 minutes late leaving the terminal
    let late_start = occurrence("t1", 0, 11 * 60_000, 90_000, 20_000);

    // arrival at b 31 minutes off schedule
    let mut wrong_trip = occurrence("t1", 1, 0, 90_000, 20_000);
    wrong_trip.arrival_departures[1].scheduled_time_ms = Some(
        wrong_trip.arrival_departures[1].time_ms - 31 * 60_000,
    );

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrences([&late_start, &wrong_trip]);

    let samples = aggregator.samples();

    assert_eq!(samples[&key(0)].stop_times_ms, vec![0]);
    assert_eq!(samples[&key(1)].travel_times_ms.len(), 1);

    let output = aggregator.finish();
    assert_eq!(output.summary.first_stop_outliers, 1);
    assert_eq!(output.summary.schedule_deviation_outliers, 1);
}

#[test]
fn test_degenerate_and_too_fast_spans_ignored() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    // 600 m in 5 s
    let too_fast = occurrence("t1", 0, 0, 5_000, 20_000);
    // arrival stamped before the departure
    let backwards = occurrence("t1", 1, 0, -1_000, 20_000);

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrences([&too_fast, &backwards]);

    assert!(
        aggregator
            .samples()
            .get(&key(1))
            .is_none_or(|samples| samples.travel_times_ms.is_empty())
    );

    let output = aggregator.finish();
    assert_eq!(output.summary.speed_outliers, 1);
    assert_eq!(output.summary.degenerate_spans, 1);
}

#[test]
fn test_layover_dwell_not_sampled() {
    let config = TravelTimesConfig::default();
    let mut pattern = TripPattern {
        trip_pattern_id: "p1".into(),
        route_id: "r1".into(),
        direction_id: None,
        stop_paths: vec![],
    };
    for (stop_id, length_m, is_layover_stop) in [("a", 0.0, false), ("b", 600.0, true), ("c", 200.0, false)] {
        pattern.stop_paths.push(StopPath {
            stop_id: stop_id.into(),
            length_m,
            is_layover_stop,
        });
    }
    let trip = TripMeta {
        trip_id: "t1".into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        trip_pattern_id: "p1".into(),
        start_time_secs: 8 * 3600,
        schedule: vec![],
    };
    let reference = ScheduleData::new(vec![pattern], vec![trip]);

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrence(&occurrence("t1", 0, 0, 90_000, 600_000));

    assert!(aggregator.samples()[&key(1)].stop_times_ms.is_empty());
    assert_eq!(aggregator.finish().summary.layover_dwells_skipped, 1);
}

#[test]
fn test_special_day_kept_apart_from_generic() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    let generic = occurrence("t1", 0, 0, 90_000, 20_000);
    let mut friday = occurrence("t1", 3, 0, 150_000, 20_000);
    friday.key.day_class = Some(Weekday::Fri);

    let mut aggregator = TravelTimesAggregator::new(&config, &reference);
    aggregator.add_occurrences([&generic, &friday]);
    let output = aggregator.finish();

    let set = TravelTimeIndexSet::build(output.travel_times);
    let trip = TripMeta {
        trip_id: "t1".into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        trip_pattern_id: "p1".into(),
        start_time_secs: 8 * 3600,
        schedule: vec![],
    };

    let a_friday = NaiveDate::from_ymd_opt(2023, 11, 17).unwrap();
    let a_monday = NaiveDate::from_ymd_opt(2023, 11, 20).unwrap();

    let on_friday = set.best_match(&trip, 1, Some(a_friday)).unwrap();
    assert_eq!(on_friday.total_travel_time_ms(), 150_000);

    let on_monday = set.best_match(&trip, 1, Some(a_monday)).unwrap();
    assert_eq!(on_monday.total_travel_time_ms(), 90_000);
}

#[test]
fn test_rerun_on_same_data_is_bit_identical() {
    let config = TravelTimesConfig::default();
    let reference = schedule();

    let occurrences = [
        occurrence("t1", 0, 12_000, 91_234, 17_000),
        occurrence("t1", 1, 4_000, 88_001, 23_500),
        occurrence("t1", 2, 0, 95_999, 19_999),
        occurrence("t1", 3, 61_000, 140_000, 18_000),
    ];

    let run = || {
        let mut aggregator = TravelTimesAggregator::new(&config, &reference);
        aggregator.add_occurrences(&occurrences);
        aggregator.finish()
    };

    let first = run();
    let second = run();

    assert_eq!(first.travel_times, second.travel_times);
    assert_eq!(first.summary, second.summary);

    for (a, b) in first.travel_times.iter().zip(second.travel_times.iter()) {
        assert_eq!(
            a.travel_time_segment_length_m.to_bits(),
            b.travel_time_segment_length_m.to_bits()
        );
    }
}
