// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Mean of noisy samples after dropping values too far from the raw mean.

fn within_limits(value: f64, mean: f64, fraction_limit: f64) -> bool {
    value >= mean * (1.0 - fraction_limit) && value <= mean * (1.0 + fraction_limit)
}

fn mean_of(values: impl Iterator<Item = i64>) -> Option<f64> {
    let mut sum: i64 = 0;
    let mut count: usize = 0;

    for value in values {
        sum += value;
        count += 1;
    }

    match count {
        0 => None,
        _ => Some(sum as f64 / count as f64),
    }
}

/// Average after discarding samples outside
/// `[(1 - fraction_limit) * mean, (1 + fraction_limit) * mean]`.
/// A single sample is returned as is.
pub fn filtered_average(samples: &[i64], fraction_limit: f64) -> Option<i64> {
    if samples.len() == 1 {
        return Some(samples[0]);
    }

    let raw_mean = mean_of(samples.iter().copied())?;

    let filtered_mean = mean_of(
        samples
            .iter()
            .copied()
            .filter(|sample| within_limits(*sample as f64, raw_mean, fraction_limit)),
    );

    // everything filtered out only happens with pathological spreads
    Some(filtered_mean.unwrap_or(raw_mean).round() as i64)
}

/// Averages per-occurrence sub-segment vectors. Whole occurrences are
/// dropped when their total is an outlier, then each sub-segment column is
/// averaged over what is left.
pub fn average_travel_times(occurrences: &[Vec<i64>], fraction_limit: f64) -> Option<Vec<i64>> {
    let width = occurrences.first()?.len();

    if width == 0 {
        return None;
    }

    let same_width = occurrences
        .iter()
        .filter(|travel_times| travel_times.len() == width)
        .collect::<Vec<_>>();

    let totals = same_width
        .iter()
        .map(|travel_times| travel_times.iter().sum::<i64>())
        .collect::<Vec<_>>();

    let raw_mean = mean_of(totals.iter().copied())?;

    let mut kept = same_width
        .iter()
        .zip(totals.iter())
        .filter(|(_, total)| {
            same_width.len() == 1 || within_limits(**total as f64, raw_mean, fraction_limit)
        })
        .map(|(travel_times, _)| *travel_times)
        .collect::<Vec<_>>();

    if kept.is_empty() {
        kept = same_width;
    }

    let averaged = (0..width)
        .map(|column| {
            mean_of(kept.iter().map(|travel_times| travel_times[column]))
                .map(|mean| mean.round() as i64)
                .unwrap_or(0)
        })
        .collect();

    Some(averaged)
}
