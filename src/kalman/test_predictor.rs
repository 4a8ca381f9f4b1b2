// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::predictor::{PredictionSource, RealTimePredictor};
use super::{
    BaselinePredictor, Headway, HeadwaySource, HistoricalTravelTimes, HistoryQuery,
    PredictionRequest, TrafficSensor, Traversal,
};
use crate::config::KalmanConfig;
use crate::models::{StopPath, TripMeta, TripPattern};
use crate::schedule::ScheduleData;
use crate::sink::DiagnosticEvent;
use crate::sink::test_sink::MemorySink;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex};

struct FixedBaseline(i64);

impl BaselinePredictor for FixedBaseline {
    fn expected_travel_time_ms(&self, request: &PredictionRequest) -> Option<i64> {
        // 600 m stop path, linear
        let remaining = (600.0 - request.distance_along_stop_path_m).max(0.0) / 600.0;
        Some((self.0 as f64 * remaining).round() as i64)
    }
}

/// Fixed vehicle ahead and fixed earlier days, swappable between calls.
#[derive(Default)]
struct FixedHistory {
    last_vehicle_ms: Mutex<Option<i64>>,
    days_ms: Mutex<Vec<i64>>,
}

fn traversal(day: u32, travel_ms: i64) -> Traversal {
    Traversal {
        vehicle_id: "ahead".into(),
        trip_id: "t0".into(),
        service_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        trip_start_time_secs: 8 * 3600,
        departure_ms: 0,
        arrival_ms: travel_ms,
    }
}

impl FixedHistory {
    fn new(last_vehicle_ms: Option<i64>, days_ms: Vec<i64>) -> Self {
        Self {
            last_vehicle_ms: Mutex::new(last_vehicle_ms),
            days_ms: Mutex::new(days_ms),
        }
    }
}

impl HeadwaySource for FixedHistory {
    fn last_vehicle_traversal(
        &self,
        _trip_pattern_id: &str,
        _stop_path_index: u32,
        _vehicle_id: &str,
        now_ms: i64,
        _max_age_ms: i64,
    ) -> Option<Headway> {
        self.last_vehicle_ms
            .lock()
            .unwrap()
            .map(|travel_ms| Headway {
                headway_ms: now_ms,
                other_vehicle_id: "ahead".into(),
                other_traversal: traversal(20, travel_ms),
            })
    }
}

impl HistoricalTravelTimes for FixedHistory {
    fn historical_traversals(&self, query: &HistoryQuery<'_>) -> Vec<Traversal> {
        let days = self.days_ms.lock().unwrap();
        let skip = days.len().saturating_sub(query.max_days);

        days.iter()
            .enumerate()
            .skip(skip)
            .map(|(day, travel_ms)| traversal(day as u32 + 1, *travel_ms))
            .collect()
    }
}

/// Today twice as slow as every earlier day.
struct DoubleTraffic;

impl TrafficSensor for DoubleTraffic {
    fn current_travel_time_ms(&self, _trip_pattern_id: &str, _stop_path_index: u32) -> Option<i64> {
        Some(200_000)
    }

    fn historical_travel_time_ms(
        &self,
        _trip_pattern_id: &str,
        _stop_path_index: u32,
        _service_date: NaiveDate,
        _time_of_day_secs: u32,
    ) -> Option<i64> {
        Some(100_000)
    }
}

fn reference() -> Arc<ScheduleData> {
    let pattern = TripPattern {
        trip_pattern_id: "p1".into(),
        route_id: "r1".into(),
        direction_id: Some(1),
        stop_paths: vec![
            StopPath {
                stop_id: "a".into(),
                length_m: 0.0,
                is_layover_stop: false,
            },
            StopPath {
                stop_id: "b".into(),
                length_m: 600.0,
                is_layover_stop: false,
            },
        ],
    };

    let trip = TripMeta {
        trip_id: "t1".into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        trip_pattern_id: "p1".into(),
        start_time_secs: 8 * 3600 + 900,
        schedule: vec![],
    };

    Arc::new(ScheduleData::new(vec![pattern], vec![trip]))
}

fn request(trip_id: &str, distance_along_m: f64) -> PredictionRequest {
    PredictionRequest {
        vehicle_id: "v1".into(),
        trip_id: trip_id.into(),
        stop_path_index: 1,
        distance_along_stop_path_m: distance_along_m,
        time_ms: 1_000,
        service_date: NaiveDate::from_ymd_opt(2024, 5, 21),
    }
}

struct Fixture {
    predictor: RealTimePredictor,
    history: Arc<FixedHistory>,
    sink: Arc<MemorySink>,
}

fn fixture(config: KalmanConfig, history: FixedHistory, baseline_ms: i64) -> Fixture {
    let history = Arc::new(history);
    let sink = Arc::new(MemorySink::default());

    let predictor = RealTimePredictor::new(
        config,
        reference(),
        Arc::new(FixedBaseline(baseline_ms)),
        history.clone(),
        history.clone(),
        sink.clone(),
    );

    Fixture {
        predictor,
        history,
        sink,
    }
}

fn trip() -> TripMeta {
    TripMeta {
        trip_id: "t1".into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        trip_pattern_id: "p1".into(),
        start_time_secs: 8 * 3600 + 900,
        schedule: vec![],
    }
}

#[test]
fn test_too_few_days_returns_exact_baseline_and_leaves_state_alone() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(70_000), vec![60_000, 61_000]),
        83_333,
    );

    let prediction = f.predictor.predict(&request("t1", 0.0)).unwrap();

    assert_eq!(prediction.travel_time_ms, 83_333);
    assert_eq!(prediction.source, PredictionSource::Baseline);
    assert_eq!(f.predictor.error_state_len(), 0);
    assert!(f.sink.events.lock().unwrap().is_empty());
}

#[test]
fn test_no_vehicle_ahead_falls_back() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(None, vec![60_000, 60_000, 60_000]),
        90_000,
    );

    let prediction = f.predictor.predict(&request("t1", 0.0)).unwrap();

    assert_eq!(prediction.source, PredictionSource::Baseline);
    assert_eq!(prediction.travel_time_ms, 90_000);
    assert_eq!(f.predictor.error_state_len(), 0);
}

#[test]
fn test_unknown_trip_falls_back() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(60_000), vec![60_000, 60_000, 60_000]),
        90_000,
    );

    let prediction = f.predictor.predict(&request("nope", 0.0)).unwrap();
    assert_eq!(prediction.source, PredictionSource::Baseline);
}

#[test]
fn test_filter_prediction_updates_error_state() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(70_000), vec![50_000, 60_000, 70_000]),
        66_000,
    );

    let key = f.predictor.error_state_key(&trip(), 1);
    assert_eq!(key.bucket, 8);

    let first = f.predictor.predict(&request("t1", 0.0)).unwrap();
    assert_eq!(first.source, PredictionSource::Kalman);

    // gain (100 + v) / (100 + 2v) is a hair over one half
    assert!(first.travel_time_ms > 64_990 && first.travel_time_ms < 65_010);

    let state = f.predictor.error_state(&key).unwrap();
    assert_eq!(state.samples, 1);
    assert_eq!(state.last_updated_ms, 1_000);

    f.predictor.predict(&request("t1", 0.0)).unwrap();
    let state = f.predictor.error_state(&key).unwrap();
    assert_eq!(state.samples, 2);

    // within 50 % of the baseline, nothing to report
    assert!(f.sink.events.lock().unwrap().is_empty());
}

#[test]
fn test_partial_path_scales_filter_prediction() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(90_000), vec![60_000, 60_000, 60_000]),
        60_000,
    );

    let prediction = f.predictor.predict(&request("t1", 150.0)).unwrap();

    assert_eq!(prediction.source, PredictionSource::Kalman);
    assert_eq!(prediction.travel_time_ms, 45_000);
}

#[test]
fn test_large_disagreement_with_baseline_is_reported() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(60_000), vec![60_000, 60_000, 60_000]),
        200_000,
    );

    let prediction = f.predictor.predict(&request("t1", 300.0)).unwrap();
    assert_eq!(prediction.source, PredictionSource::Kalman);
    assert_eq!(prediction.travel_time_ms, 30_000);

    let events = f.sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);

    match &events[0] {
        DiagnosticEvent::PredictionDifference(event) => {
            assert_eq!(event.kalman_prediction_ms, 60_000);
            assert_eq!(event.baseline_prediction_ms, 200_000);
            assert!((event.difference_percentage - 70.0).abs() < 1e-9);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_small_absolute_gap_not_reported() {
    // over 50 % apart but only 35 s
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(30_000), vec![30_000, 30_000, 30_000]),
        65_000,
    );

    f.predictor.predict(&request("t1", 0.0)).unwrap();
    assert!(f.sink.events.lock().unwrap().is_empty());
}

#[test]
fn test_implausible_prediction_resets_state() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(60_000), vec![60_000, 60_000, 60_000]),
        75_000,
    );

    let key = f.predictor.error_state_key(&trip(), 1);

    f.predictor.predict(&request("t1", 0.0)).unwrap();
    assert!(f.predictor.error_state(&key).is_some());

    *f.history.last_vehicle_ms.lock().unwrap() = Some(0);
    *f.history.days_ms.lock().unwrap() = vec![0, 0, 0];

    let prediction = f.predictor.predict(&request("t1", 0.0)).unwrap();

    assert_eq!(prediction.source, PredictionSource::Baseline);
    assert_eq!(prediction.travel_time_ms, 75_000);
    assert!(f.predictor.error_state(&key).is_none());

    let events = f.sink.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(DiagnosticEvent::ErrorStateReset { stop_path_index: 1, .. })
    ));
}

#[test]
fn test_traffic_sensor_scales_history() {
    let config = KalmanConfig {
        use_traffic_sensor: true,
        ..KalmanConfig::default()
    };

    let history = Arc::new(FixedHistory::new(Some(120_000), vec![60_000, 60_000, 60_000]));
    let predictor = RealTimePredictor::new(
        config,
        reference(),
        Arc::new(FixedBaseline(120_000)),
        history.clone(),
        history,
        Arc::new(MemorySink::default()),
    )
    .with_traffic_sensor(Arc::new(DoubleTraffic));

    // every day doubled to 120 s, zero variance, prediction is the average
    let prediction = predictor.predict(&request("t1", 0.0)).unwrap();
    assert_eq!(prediction.source, PredictionSource::Kalman);
    assert_eq!(prediction.travel_time_ms, 120_000);
}

#[test]
fn test_concurrent_predictions_count_every_sample() {
    let f = fixture(
        KalmanConfig::default(),
        FixedHistory::new(Some(62_000), vec![58_000, 60_000, 61_000]),
        60_000,
    );
    let predictor = Arc::new(f.predictor);

    let handles = (0..4)
        .map(|_| {
            let predictor = predictor.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    predictor.predict(&request("t1", 0.0)).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let state = predictor.error_state(&predictor.error_state_key(&trip(), 1)).unwrap();
    assert_eq!(state.samples, 200);
}
