// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Holding vehicles at control stops to even out headways.

pub mod controller;
pub mod formula;
pub mod predictions;

#[cfg(test)]
mod test_regeneration;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoldingProvenance {
    /// Computed when the vehicle was observed arriving.
    Arrival,
    /// Computed from a prediction of the vehicle's arrival.
    Prediction,
    /// Nothing to space the vehicle against.
    NotComputed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HoldingTime {
    pub vehicle_id: CompactString,
    pub stop_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub creation_time_ms: i64,
    pub arrival_time_ms: i64,
    pub hold_until_ms: i64,
    pub holding_ms: i64,
    pub provenance: HoldingProvenance,
    pub number_predictions_used: usize,
}

impl HoldingTime {
    pub fn is_computed(&self) -> bool {
        self.provenance != HoldingProvenance::NotComputed
    }
}
