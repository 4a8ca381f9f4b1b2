// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use super::KalmanError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanPrediction {
    pub prediction_ms: f64,
    /// Carried into the next prediction for the same stop path and bucket.
    pub filter_error: f64,
    pub gain: f64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64], mean: f64) -> f64 {
    values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / values.len() as f64
}

/// One step of the scalar filter.
///
/// The gain weighs the historical average against the last vehicle's travel
/// time. A wide historical spread pulls the gain towards one half, a large
/// carried error pulls it towards one.
pub fn predict(
    last_vehicle_ms: f64,
    historical_ms: &[f64],
    last_prediction_error: f64,
) -> Result<KalmanPrediction, KalmanError> {
    if historical_ms.is_empty() {
        return Err(KalmanError::NoHistory);
    }

    let average = mean(historical_ms);
    let variance = variance(historical_ms, average);

    let denominator = last_prediction_error + 2.0 * variance;
    let gain = if denominator > 0.0 {
        (last_prediction_error + variance) / denominator
    } else {
        0.5
    };

    let prediction_ms = (1.0 - gain) * last_vehicle_ms + gain * average;
    let filter_error = variance * gain;

    if !prediction_ms.is_finite() || prediction_ms <= 0.0 {
        return Err(KalmanError::ImplausiblePrediction(prediction_ms));
    }

    if !filter_error.is_finite() || filter_error < 0.0 {
        return Err(KalmanError::ImplausibleError(filter_error));
    }

    Ok(KalmanPrediction {
        prediction_ms,
        filter_error,
        gain,
    })
}
