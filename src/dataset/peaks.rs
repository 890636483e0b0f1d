use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scheduler::RawDataId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    /// Retention time at the apex, in seconds
    pub rt: f64,
    pub height: f64,
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeakList {
    pub raw_data_id: RawDataId,
    pub peaks: Vec<Peak>,
}

impl PeakList {
    pub fn new(raw_data_id: RawDataId, peaks: Vec<Peak>) -> Self {
        Self { raw_data_id, peaks }
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// One aligned row: the peak each dataset contributes, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub mz: f64,
    pub rt: f64,
    pub peaks: BTreeMap<RawDataId, Peak>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub rows: Vec<AlignmentRow>,
}

/// A missing value in an alignment result that a gap filler should estimate
/// from the dataset's raw scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub mz: f64,
    pub rt: f64,
    pub mz_tolerance: f64,
    pub rt_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFill {
    pub height: f64,
    pub area: f64,
}
