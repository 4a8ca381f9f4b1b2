// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use chrono::Weekday;
use chrono_tz::Tz;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct JuniperConfig {
    pub reader: ReaderConfig,
    pub travel_times: TravelTimesConfig,
    pub kalman: KalmanConfig,
    pub holding: HoldingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReaderConfig {
    pub page_size: usize,
    pub timezone: String,
    // events before this local hour belong to the previous service day
    pub service_day_start_hour: u32,
    pub special_days_of_week: Vec<Weekday>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            page_size: 50_000,
            timezone: String::from("Etc/UTC"),
            service_day_start_hour: 3,
            special_days_of_week: vec![],
        }
    }
}

impl ReaderConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid {
                field: "reader.timezone",
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TravelTimesConfig {
    pub max_travel_time_segment_length_m: f64,
    pub max_first_stop_deviation_ms: i64,
    pub max_schedule_deviation_ms: i64,
    /// Samples further than this fraction from the mean are dropped.
    pub averaging_fraction_limit: f64,
    pub max_segment_speed_mps: f64,
}

impl Default for TravelTimesConfig {
    fn default() -> Self {
        Self {
            max_travel_time_segment_length_m: 250.0,
            max_first_stop_deviation_ms: 10 * 60 * 1000,
            max_schedule_deviation_ms: 30 * 60 * 1000,
            averaging_fraction_limit: 0.3,
            max_segment_speed_mps: 40.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct KalmanConfig {
    pub min_kalman_days: usize,
    pub max_kalman_days: usize,
    pub max_kalman_days_to_search: u32,
    pub initial_error_value: f64,
    pub schedule_start_window_secs: u32,
    pub headway_max_age_ms: i64,
    pub error_bucket_minutes: u32,
    pub difference_event_percentage: f64,
    pub difference_event_threshold_ms: i64,
    pub use_traffic_sensor: bool,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            min_kalman_days: 3,
            max_kalman_days: 3,
            max_kalman_days_to_search: 21,
            initial_error_value: 100.0,
            schedule_start_window_secs: 30 * 60,
            headway_max_age_ms: 60 * 60 * 1000,
            error_bucket_minutes: 60,
            difference_event_percentage: 50.0,
            difference_event_threshold_ms: 60_000,
            use_traffic_sensor: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ControlStop {
    pub stop_id: CompactString,
    #[serde(default)]
    pub stop_path_index: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HoldingConfig {
    pub control_stops: Vec<ControlStop>,
    pub planned_headway_ms: i64,
    pub max_predictions_for_holding: usize,
    pub regenerate_on_departure: bool,
    pub use_arrival_predictions: bool,
    pub recent_departures_capacity: usize,
}

impl Default for HoldingConfig {
    fn default() -> Self {
        Self {
            control_stops: vec![],
            planned_headway_ms: 9 * 60 * 1000,
            max_predictions_for_holding: 3,
            regenerate_on_departure: true,
            use_arrival_predictions: true,
            recent_departures_capacity: 4096,
        }
    }
}

impl HoldingConfig {
    pub fn is_control_stop(&self, stop_id: &str, stop_path_index: u32) -> bool {
        self.control_stops.iter().any(|control_stop| {
            control_stop.stop_id == stop_id
                && control_stop
                    .stop_path_index
                    .is_none_or(|index| index == stop_path_index)
        })
    }
}

impl JuniperConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => JuniperConfig::default(),
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;

                ron::from_str::<JuniperConfig>(&contents).map_err(|source| {
                    ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    }
                })?
            }
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.reader.page_size == 0 {
            return Err(invalid("reader.page_size", "must be at least 1"));
        }

        if self.reader.service_day_start_hour > 23 {
            return Err(invalid("reader.service_day_start_hour", "must be 0-23"));
        }

        self.reader.tz()?;

        let travel_times = &self.travel_times;

        if !(travel_times.max_travel_time_segment_length_m > 0.0) {
            return Err(invalid(
                "travel_times.max_travel_time_segment_length_m",
                "must be positive",
            ));
        }

        if travel_times.max_first_stop_deviation_ms < 0 || travel_times.max_schedule_deviation_ms < 0
        {
            return Err(invalid(
                "travel_times.max_schedule_deviation_ms",
                "deviation caps cannot be negative",
            ));
        }

        if !(0.0..1.0).contains(&travel_times.averaging_fraction_limit) {
            return Err(invalid(
                "travel_times.averaging_fraction_limit",
                "must be in [0, 1)",
            ));
        }

        if !(travel_times.max_segment_speed_mps > 0.0) {
            return Err(invalid(
                "travel_times.max_segment_speed_mps",
                "must be positive",
            ));
        }

        let kalman = &self.kalman;

        if kalman.min_kalman_days == 0 {
            return Err(invalid("kalman.min_kalman_days", "must be at least 1"));
        }

        if kalman.min_kalman_days > kalman.max_kalman_days {
            return Err(invalid(
                "kalman.min_kalman_days",
                format!(
                    "{} is larger than max_kalman_days {}",
                    kalman.min_kalman_days, kalman.max_kalman_days
                ),
            ));
        }

        if kalman.max_kalman_days > kalman.max_kalman_days_to_search as usize {
            return Err(invalid(
                "kalman.max_kalman_days",
                "cannot exceed max_kalman_days_to_search",
            ));
        }

        if !kalman.initial_error_value.is_finite() || kalman.initial_error_value < 0.0 {
            return Err(invalid(
                "kalman.initial_error_value",
                "must be finite and non-negative",
            ));
        }

        if kalman.error_bucket_minutes == 0 || kalman.error_bucket_minutes > 24 * 60 {
            return Err(invalid("kalman.error_bucket_minutes", "must be 1-1440"));
        }

        if self.holding.max_predictions_for_holding == 0 {
            return Err(invalid(
                "holding.max_predictions_for_holding",
                "must be at least 1",
            ));
        }

        if self.holding.planned_headway_ms < 0 {
            return Err(invalid("holding.planned_headway_ms", "cannot be negative"));
        }

        Ok(())
    }
}
