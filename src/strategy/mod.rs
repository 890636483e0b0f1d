//! Pluggable processing algorithms.
//!
//! Every dataset-processing job names its algorithm through the `class` tag of
//! its [`AlgorithmParameters`]. The worker looks the tag up in a
//! [`StrategyRegistry`] built at startup; the node itself knows nothing about
//! individual algorithms.
//!
//! Strategies run on the worker thread and may block. They report progress
//! through a [`Progress`] sink and signal expected failures by returning a
//! [`StrategyError`]. A strategy that panics is caught by the worker's
//! firewall and reported as an internal error.

pub mod crop;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dataset::peaks::{AlignmentResult, Gap, GapFill, PeakList};
use crate::dataset::{DatasetMetadata, Scan};
use crate::error::StrategyError;
use crate::scheduler::RawDataId;

pub use crop::CropFilter;

/// Algorithm selector plus its free-form settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    pub class: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl AlgorithmParameters {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn f64_setting(&self, key: &str) -> Result<Option<f64>, StrategyError> {
        match self.settings.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| StrategyError::new(format!("setting '{}' must be a number", key))),
        }
    }

    pub fn usize_setting(&self, key: &str) -> Result<Option<usize>, StrategyError> {
        match self.settings.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(|v| Some(v as usize))
                .ok_or_else(|| {
                    StrategyError::new(format!("setting '{}' must be a non-negative integer", key))
                }),
        }
    }
}

/// Completion rate sink handed to strategies. Rates are in `[0, 1]`.
pub trait Progress {
    fn update(&mut self, rate: f64);
}

/// Transforms the scans of one dataset into a new set of scans.
pub trait RawDataFilter: Send + Sync {
    fn filter(
        &self,
        scans: Vec<Scan>,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<Vec<Scan>, StrategyError>;
}

pub trait PeakPicker: Send + Sync {
    fn find_peaks(
        &self,
        raw_data_id: RawDataId,
        scans: &[Scan],
        metadata: &DatasetMetadata,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<PeakList, StrategyError>;
}

/// Aligns peak lists of several datasets. Needs no raw data.
pub trait PeakListAligner: Send + Sync {
    fn align(
        &self,
        peak_lists: &BTreeMap<RawDataId, PeakList>,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<AlignmentResult, StrategyError>;
}

pub trait GapFiller: Send + Sync {
    fn fill_gaps(
        &self,
        scans: &[Scan],
        gaps: &BTreeMap<u32, Gap>,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<BTreeMap<u32, GapFill>, StrategyError>;
}

pub trait PeakListProcessor: Send + Sync {
    fn process(
        &self,
        scans: &[Scan],
        peak_list: &PeakList,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<PeakList, StrategyError>;
}

/// Strategy family names used in lookup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyFamily {
    Filter,
    PeakPicker,
    Aligner,
    GapFiller,
    PeakListProcessor,
}

impl fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyFamily::Filter => "raw data filter",
            StrategyFamily::PeakPicker => "peak picker",
            StrategyFamily::Aligner => "peak list aligner",
            StrategyFamily::GapFiller => "gap filler",
            StrategyFamily::PeakListProcessor => "peak list processor",
        };
        f.write_str(name)
    }
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    family: StrategyFamily,
    class: &str,
) -> Result<Arc<T>, StrategyError> {
    map.get(class).cloned().ok_or_else(|| {
        StrategyError::new(format!("No {} registered for class '{}'", family, class))
    })
}

/// Class tag to implementation, per family.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    filters: HashMap<String, Arc<dyn RawDataFilter>>,
    peak_pickers: HashMap<String, Arc<dyn PeakPicker>>,
    aligners: HashMap<String, Arc<dyn PeakListAligner>>,
    gap_fillers: HashMap<String, Arc<dyn GapFiller>>,
    processors: HashMap<String, Arc<dyn PeakListProcessor>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the strategies shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_filter(crop::CLASS, CropFilter);
        registry
    }

    pub fn register_filter(&mut self, class: &str, filter: impl RawDataFilter + 'static) {
        self.filters.insert(class.to_string(), Arc::new(filter));
    }

    pub fn register_peak_picker(&mut self, class: &str, picker: impl PeakPicker + 'static) {
        self.peak_pickers.insert(class.to_string(), Arc::new(picker));
    }

    pub fn register_aligner(&mut self, class: &str, aligner: impl PeakListAligner + 'static) {
        self.aligners.insert(class.to_string(), Arc::new(aligner));
    }

    pub fn register_gap_filler(&mut self, class: &str, filler: impl GapFiller + 'static) {
        self.gap_fillers.insert(class.to_string(), Arc::new(filler));
    }

    pub fn register_processor(&mut self, class: &str, processor: impl PeakListProcessor + 'static) {
        self.processors.insert(class.to_string(), Arc::new(processor));
    }

    pub fn filter(&self, class: &str) -> Result<Arc<dyn RawDataFilter>, StrategyError> {
        lookup(&self.filters, StrategyFamily::Filter, class)
    }

    pub fn peak_picker(&self, class: &str) -> Result<Arc<dyn PeakPicker>, StrategyError> {
        lookup(&self.peak_pickers, StrategyFamily::PeakPicker, class)
    }

    pub fn aligner(&self, class: &str) -> Result<Arc<dyn PeakListAligner>, StrategyError> {
        lookup(&self.aligners, StrategyFamily::Aligner, class)
    }

    pub fn gap_filler(&self, class: &str) -> Result<Arc<dyn GapFiller>, StrategyError> {
        lookup(&self.gap_fillers, StrategyFamily::GapFiller, class)
    }

    pub fn processor(&self, class: &str) -> Result<Arc<dyn PeakListProcessor>, StrategyError> {
        lookup(&self.processors, StrategyFamily::PeakListProcessor, class)
    }
}

fn sorted_keys<T: ?Sized>(map: &HashMap<String, Arc<T>>) -> Vec<&str> {
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("filters", &sorted_keys(&self.filters))
            .field("peak_pickers", &sorted_keys(&self.peak_pickers))
            .field("aligners", &sorted_keys(&self.aligners))
            .field("gap_fillers", &sorted_keys(&self.gap_fillers))
            .field("processors", &sorted_keys(&self.processors))
            .finish()
    }
}
