// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::holding::HoldingTime;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Raised when the recursive estimator and the baseline disagree by more
/// than the configured percentage and absolute gap.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionDifferenceEvent {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub stop_path_index: u32,
    pub kalman_prediction_ms: i64,
    pub baseline_prediction_ms: i64,
    pub difference_percentage: f64,
    pub time_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    PredictionDifference(PredictionDifferenceEvent),
    ErrorStateReset {
        trip_pattern_id: CompactString,
        stop_path_index: u32,
        reason: String,
    },
}

/// Destination for computed holding times and diagnostics. Callers treat
/// failures as non fatal.
pub trait RecordSink: Send + Sync {
    fn store_holding_time(&self, holding_time: &HoldingTime) -> Result<(), SinkError>;

    fn store_event(&self, event: &DiagnosticEvent) -> Result<(), SinkError>;
}

/// Writes every record to the tracing output as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn store_holding_time(&self, holding_time: &HoldingTime) -> Result<(), SinkError> {
        let json = serde_json::to_string(holding_time)?;
        tracing::info!(target: "juniper::holding", record = %json);
        Ok(())
    }

    fn store_event(&self, event: &DiagnosticEvent) -> Result<(), SinkError> {
        let json = serde_json::to_string(event)?;
        tracing::warn!(target: "juniper::diagnostics", record = %json);
        Ok(())
    }
}

/// Appends every record to a file as one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line(&self, json: &str) -> Result<(), SinkError> {
        let unavailable = |e: std::io::Error| {
            SinkError::Unavailable(format!("{}: {}", self.path.display(), e))
        };

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Unavailable(format!("{}: writer poisoned", self.path.display())))?;

        writeln!(writer, "{}", json).map_err(unavailable)?;
        writer.flush().map_err(unavailable)
    }
}

impl RecordSink for JsonLinesSink {
    fn store_holding_time(&self, holding_time: &HoldingTime) -> Result<(), SinkError> {
        self.write_line(&serde_json::to_string(holding_time)?)
    }

    fn store_event(&self, event: &DiagnosticEvent) -> Result<(), SinkError> {
        self.write_line(&serde_json::to_string(event)?)
    }
}

pub(crate) fn store_holding_time_or_log(sink: &dyn RecordSink, holding_time: &HoldingTime) {
    if let Err(e) = sink.store_holding_time(holding_time) {
        tracing::warn!(
            vehicle_id = %holding_time.vehicle_id,
            stop_id = %holding_time.stop_id,
            "Failed to store holding time: {}",
            e
        );
    }
}

pub(crate) fn store_event_or_log(sink: &dyn RecordSink, event: &DiagnosticEvent) {
    if let Err(e) = sink.store_event(event) {
        tracing::warn!("Failed to store diagnostic event: {}", e);
    }
}
