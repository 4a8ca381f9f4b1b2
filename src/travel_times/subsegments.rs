// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Splitting one stop path traversal into equal length travel time
//! sub-segments.

/// Number of sub-segments a stop path is cut into. Paths no longer than
/// the maximum are a single sub-segment.
pub fn subsegment_count(length_m: f64, max_subsegment_length_m: f64) -> usize {
    if !(length_m > max_subsegment_length_m) || !(max_subsegment_length_m > 0.0) {
        return 1;
    }

    (length_m / max_subsegment_length_m).ceil() as usize
}

pub fn subsegment_length(length_m: f64, max_subsegment_length_m: f64) -> f64 {
    length_m / subsegment_count(length_m, max_subsegment_length_m) as f64
}

/// Time the vehicle passed `distance_m`, by linear interpolation between the
/// surrounding (distance, time) points. Points must be ordered by both.
fn crossing_time(points: &[(f64, f64)], distance_m: f64) -> f64 {
    for window in points.windows(2) {
        let (d0, t0) = window[0];
        let (d1, t1) = window[1];

        if distance_m <= d1 {
            if d1 <= d0 {
                return t0;
            }
            return t0 + (t1 - t0) * (distance_m - d0) / (d1 - d0);
        }
    }

    points.last().map(|(_, time)| *time).unwrap_or(0.0)
}

/// Sub-segment travel times for one traversal of a stop path. The boundary
/// crossing times come from the position matches recorded on the path; the
/// returned values always sum to `arrival_ms - departure_ms`.
pub fn split_travel_time(
    departure_ms: i64,
    arrival_ms: i64,
    length_m: f64,
    max_subsegment_length_m: f64,
    matches: impl IntoIterator<Item = (f64, i64)>,
) -> Vec<i64> {
    let count = subsegment_count(length_m, max_subsegment_length_m);

    if count == 1 {
        return vec![arrival_ms - departure_ms];
    }

    let mut points: Vec<(f64, f64)> = vec![(0.0, departure_ms as f64)];

    for (distance_m, time_ms) in matches {
        let (last_distance, last_time) = points[points.len() - 1];

        // GPS jitter can move a vehicle backwards, those fixes are unusable
        if distance_m > last_distance
            && distance_m < length_m
            && (time_ms as f64) > last_time
            && time_ms < arrival_ms
        {
            points.push((distance_m, time_ms as f64));
        }
    }

    points.push((length_m, arrival_ms as f64));

    let segment_length = length_m / count as f64;

    let mut crossings = Vec::with_capacity(count + 1);
    crossings.push(departure_ms);

    for boundary in 1..count {
        let crossing = crossing_time(&points, segment_length * boundary as f64).round() as i64;
        let previous = crossings[crossings.len() - 1];
        crossings.push(crossing.clamp(previous, arrival_ms));
    }

    crossings.push(arrival_ms);

    crossings
        .windows(2)
        .map(|window| window[1] - window[0])
        .collect()
}
