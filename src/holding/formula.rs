// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldingComputation {
    pub holding_ms: i64,
    pub predictions_used: usize,
}

/// How long a vehicle arriving at `arrival_ms` waits so that it and the
/// next followers are spread evenly behind the `last_departure_ms` anchor.
///
/// `followers_ms` are predicted arrivals of the other vehicles, ascending.
/// With at least two of them the closest `max_predictions` are used: the
/// i-th follower (from 0) asks the vehicle to leave at
/// `(followers_ms[i] - last_departure_ms) / (i + 2)` after the anchor. With
/// fewer the planned headway is used instead. Integer arithmetic throughout.
pub fn holding_time_ms(
    arrival_ms: i64,
    last_departure_ms: i64,
    followers_ms: &[i64],
    max_predictions: usize,
    planned_headway_ms: i64,
) -> HoldingComputation {
    let already_waited_ms = arrival_ms - last_departure_ms;

    if followers_ms.len() < 2 || max_predictions < 2 {
        return HoldingComputation {
            holding_ms: (planned_headway_ms - already_waited_ms).max(0),
            predictions_used: 0,
        };
    }

    let used = &followers_ms[..followers_ms.len().min(max_predictions)];

    let target_ms = used
        .iter()
        .enumerate()
        .map(|(i, predicted_ms)| (predicted_ms - last_departure_ms) / (i as i64 + 2))
        .max()
        .unwrap_or(0);

    HoldingComputation {
        holding_ms: (target_ms - already_waited_ms).max(0),
        predictions_used: used.len(),
    }
}
