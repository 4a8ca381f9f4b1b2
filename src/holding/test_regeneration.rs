// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::controller::{HoldingController, VehicleHoldingState};
use super::predictions::PredictionBoard;
use super::HoldingProvenance;
use crate::config::{ControlStop, HoldingConfig};
use crate::models::{ArrivalDeparture, StopEventKind};
use crate::sink::test_sink::MemorySink;
use std::sync::Arc;

fn stop_event(vehicle_id: &str, kind: StopEventKind, time_ms: i64) -> ArrivalDeparture {
    ArrivalDeparture {
        vehicle_id: vehicle_id.into(),
        trip_id: format!("trip-{}", vehicle_id).into(),
        service_id: "weekday".into(),
        route_id: "r1".into(),
        stop_id: "control".into(),
        stop_path_index: 7,
        time_ms,
        scheduled_time_ms: None,
        kind,
    }
}

fn arrival(vehicle_id: &str, time_ms: i64) -> ArrivalDeparture {
    stop_event(vehicle_id, StopEventKind::Arrival, time_ms)
}

fn departure(vehicle_id: &str, time_ms: i64) -> ArrivalDeparture {
    stop_event(vehicle_id, StopEventKind::Departure, time_ms)
}

fn setup(regenerate_on_departure: bool) -> (HoldingController, Arc<MemorySink>) {
    let config = HoldingConfig {
        control_stops: vec![ControlStop {
            stop_id: "control".into(),
            stop_path_index: Some(7),
        }],
        regenerate_on_departure,
        ..HoldingConfig::default()
    };

    let sink = Arc::new(MemorySink::default());
    let controller = HoldingController::new(config, Arc::new(PredictionBoard::new()), sink.clone());

    (controller, sink)
}

/// v0 left at 0. v1 arrives at 100 s and is held to 540 s, v2 arrives at
/// 300 s and is held to 1080 s behind v1.
fn two_waiting(controller: &HoldingController) {
    controller.on_departure(&departure("v0", 0));
    controller.on_arrival(&arrival("v1", 100_000));
    controller.on_arrival(&arrival("v2", 300_000));
}

#[test]
fn test_early_release_pulls_follower_forward() {
    let (controller, sink) = setup(true);
    two_waiting(&controller);

    assert_eq!(
        controller.active_hold("v2").map(|hold| hold.hold_until_ms),
        Some(1_080_000)
    );

    // v1 leaves at 400 s instead of 540 s
    let regenerated = controller.on_departure(&departure("v1", 400_000));

    assert_eq!(regenerated.len(), 1);
    assert_eq!(regenerated[0].vehicle_id, "v2");
    assert_eq!(regenerated[0].provenance, HoldingProvenance::Arrival);
    assert_eq!(regenerated[0].creation_time_ms, 400_000);
    assert_eq!(regenerated[0].hold_until_ms, 940_000);
    assert_eq!(regenerated[0].holding_ms, 640_000);

    assert_eq!(controller.active_hold("v2"), Some(regenerated[0].clone()));
    assert!(matches!(controller.state("v1"), VehicleHoldingState::Released(_)));

    // initial decisions plus the regenerated one
    assert_eq!(sink.holding_times.lock().unwrap().len(), 3);
}

#[test]
fn test_without_regeneration_follower_keeps_snapshot() {
    let (controller, sink) = setup(false);
    two_waiting(&controller);

    let regenerated = controller.on_departure(&departure("v1", 400_000));

    assert!(regenerated.is_empty());
    assert_eq!(
        controller.active_hold("v2").map(|hold| hold.hold_until_ms),
        Some(1_080_000)
    );
    assert_eq!(sink.holding_times.lock().unwrap().len(), 2);
}

#[test]
fn test_regeneration_in_arrival_order() {
    let (controller, _) = setup(true);
    two_waiting(&controller);
    controller.on_arrival(&arrival("v3", 500_000));

    // v3 waits behind v2's hold: 1080 + 540 = 1620 s
    assert_eq!(
        controller.active_hold("v3").map(|hold| hold.hold_until_ms),
        Some(1_620_000)
    );

    let regenerated = controller.on_departure(&departure("v1", 400_000));

    let refreshed = regenerated
        .iter()
        .map(|hold| (hold.vehicle_id.to_string(), hold.hold_until_ms))
        .collect::<Vec<_>>();

    // v2 is refreshed first and v3 anchors on v2's new release time
    assert_eq!(
        refreshed,
        vec![
            (String::from("v2"), 940_000),
            (String::from("v3"), 1_480_000)
        ]
    );
}

#[test]
fn test_departed_vehicle_no_longer_anchors_others() {
    let (controller, _) = setup(true);
    two_waiting(&controller);

    controller.on_departure(&departure("v1", 540_000));
    controller.on_departure(&departure("v2", 1_080_000));

    let next = controller.on_arrival(&arrival("v4", 1_200_000)).unwrap();

    // anchored on v2's departure, 120 s already gone
    assert_eq!(next.holding_ms, 420_000);
    assert_eq!(next.hold_until_ms, 1_620_000);
}

#[test]
fn test_other_stops_unaffected() {
    let (controller, _) = setup(true);
    two_waiting(&controller);

    let mut elsewhere = departure("v9", 400_000);
    elsewhere.stop_id = "control".into();
    elsewhere.stop_path_index = 2;

    // same stop id but not at the configured stop path
    assert!(controller.on_departure(&elsewhere).is_empty());
    assert_eq!(
        controller.active_hold("v2").map(|hold| hold.hold_until_ms),
        Some(1_080_000)
    );
}

#[test]
fn test_concurrent_arrivals_at_different_stops() {
    let config = HoldingConfig {
        control_stops: (0..8)
            .map(|i| ControlStop {
                stop_id: format!("control-{}", i).into(),
                stop_path_index: None,
            })
            .collect(),
        ..HoldingConfig::default()
    };
    let controller = Arc::new(HoldingController::new(
        config,
        Arc::new(PredictionBoard::new()),
        Arc::new(MemorySink::default()),
    ));

    let handles = (0..8)
        .map(|i| {
            let controller = controller.clone();
            std::thread::spawn(move || {
                let stop_id = format!("control-{}", i);
                let mut leaving = departure(&format!("lead-{}", i), 0);
                leaving.stop_id = stop_id.as_str().into();
                let mut arriving = arrival(&format!("v-{}", i), 200_000);
                arriving.stop_id = stop_id.as_str().into();

                controller.on_departure(&leaving);
                controller.on_arrival(&arriving).unwrap()
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let hold = handle.join().unwrap();
        assert_eq!(hold.holding_ms, 340_000);
    }
}
