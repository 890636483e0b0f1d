//! Visualizer refresh calculations.
//!
//! A refresh request bundles up to three independent views of one dataset: a
//! chromatogram (TIC/XIC), a spectrum and a 2D intensity map. Each view asks
//! for its own scan window. [`RefreshRun`] computes the smallest window
//! covering all of them so the dataset is streamed once, and feeds each view
//! only the scans inside its own window.

use serde::{Deserialize, Serialize};

use crate::dataset::Scan;
use crate::scheduler::RawDataId;

/// Largest bin count accepted on any single axis
pub const MAX_RESOLUTION: usize = 16_384;
/// Largest 2D map, in cells
pub const MAX_TWOD_CELLS: usize = 4 * 1024 * 1024;

/// Inclusive range of zero-based scan indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub first: usize,
    pub last: usize,
}

impl ScanWindow {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.first && index <= self.last
    }

    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    fn union(self, other: ScanWindow) -> ScanWindow {
        ScanWindow {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

/// What changed on the controller side; echoed back untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    #[default]
    Initial,
    SelectionScan,
    SelectionMz,
    SelectionBoth,
    CursorPositionScan,
    CursorPositionMz,
    CursorPositionBoth,
    Peaks,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TicMode {
    /// Total ion chromatogram: every data point counts
    Tic,
    /// Extracted ion chromatogram over an m/z window
    Xic { mz_start: f64, mz_stop: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicRequest {
    pub scans: ScanWindow,
    pub mode: TicMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumRequest {
    pub scans: ScanWindow,
    pub mz_start: f64,
    pub mz_stop: f64,
    /// Number of bins used when several scans are combined
    pub x_resolution: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoDRequest {
    pub scans: ScanWindow,
    pub mz_start: f64,
    pub mz_stop: f64,
    pub x_resolution: usize,
    pub y_resolution: usize,
}

/// A view that does not need raw data for this refresh is simply absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub change_type: ChangeType,
    #[serde(default)]
    pub tic: Option<TicRequest>,
    #[serde(default)]
    pub spectrum: Option<SpectrumRequest>,
    #[serde(default)]
    pub twod: Option<TwoDRequest>,
}

impl RefreshRequest {
    /// Smallest scan window covering every requested view.
    pub fn scan_span(&self) -> Option<ScanWindow> {
        [
            self.tic.as_ref().map(|r| r.scans),
            self.spectrum.as_ref().map(|r| r.scans),
            self.twod.as_ref().map(|r| r.scans),
        ]
        .into_iter()
        .flatten()
        .reduce(ScanWindow::union)
    }

    pub fn validate(&self) -> Result<(), String> {
        let windows = [
            ("tic", self.tic.as_ref().map(|r| r.scans)),
            ("spectrum", self.spectrum.as_ref().map(|r| r.scans)),
            ("twod", self.twod.as_ref().map(|r| r.scans)),
        ];
        for (name, window) in windows {
            if let Some(window) = window {
                if window.is_empty() {
                    return Err(format!(
                        "{} scan window {}..={} is empty",
                        name, window.first, window.last
                    ));
                }
            }
        }
        if let Some(TicRequest {
            mode: TicMode::Xic { mz_start, mz_stop },
            ..
        }) = &self.tic
        {
            check_mz_window("tic", *mz_start, *mz_stop)?;
        }
        if let Some(spectrum) = &self.spectrum {
            check_mz_window("spectrum", spectrum.mz_start, spectrum.mz_stop)?;
            check_resolution("spectrum x_resolution", spectrum.x_resolution)?;
        }
        if let Some(twod) = &self.twod {
            check_mz_window("twod", twod.mz_start, twod.mz_stop)?;
            check_resolution("twod x_resolution", twod.x_resolution)?;
            check_resolution("twod y_resolution", twod.y_resolution)?;
            if twod.x_resolution * twod.y_resolution > MAX_TWOD_CELLS {
                return Err(format!(
                    "twod map of {}x{} exceeds {} cells",
                    twod.x_resolution, twod.y_resolution, MAX_TWOD_CELLS
                ));
            }
        }
        Ok(())
    }
}

fn check_resolution(name: &str, bins: usize) -> Result<(), String> {
    if bins == 0 || bins > MAX_RESOLUTION {
        return Err(format!(
            "{} {} is outside 1..={}",
            name, bins, MAX_RESOLUTION
        ));
    }
    Ok(())
}

fn check_mz_window(name: &str, start: f64, stop: f64) -> Result<(), String> {
    if !(start.is_finite() && stop.is_finite()) || stop < start {
        return Err(format!(
            "{} m/z window {}..{} is invalid",
            name, start, stop
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicResult {
    pub scan_numbers: Vec<usize>,
    pub intensities: Vec<f64>,
    pub max_intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumResult {
    pub mz_values: Vec<f64>,
    pub intensities: Vec<f64>,
    pub min_mz: f64,
    pub max_mz: f64,
    pub max_intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoDResult {
    pub width: usize,
    pub height: usize,
    /// `height` rows of `width` cells; row 0 is the lowest m/z band
    pub matrix: Vec<Vec<f64>>,
    pub min_intensity: f64,
    pub max_intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub raw_data_id: RawDataId,
    pub change_type: ChangeType,
    pub spectrum_combination: Option<ScanWindow>,
    pub tic: Option<TicResult>,
    pub spectrum: Option<SpectrumResult>,
    pub twod: Option<TwoDResult>,
    pub data_max_intensity: f64,
}

#[derive(Debug)]
struct TicCalculator {
    request: TicRequest,
    scan_numbers: Vec<usize>,
    intensities: Vec<f64>,
    max_intensity: f64,
}

impl TicCalculator {
    fn new(request: TicRequest) -> Self {
        Self {
            request,
            scan_numbers: Vec::new(),
            intensities: Vec::new(),
            max_intensity: 0.0,
        }
    }

    fn take_scan(&mut self, index: usize, scan: &Scan) {
        let intensity = match self.request.mode {
            TicMode::Tic => scan.total_intensity(),
            TicMode::Xic { mz_start, mz_stop } => scan.intensity_between(mz_start, mz_stop),
        };
        self.scan_numbers.push(index);
        self.intensities.push(intensity);
        self.max_intensity = self.max_intensity.max(intensity);
    }

    fn finish(self) -> TicResult {
        TicResult {
            scan_numbers: self.scan_numbers,
            intensities: self.intensities,
            max_intensity: self.max_intensity,
        }
    }
}

#[derive(Debug)]
struct SpectrumCalculator {
    request: SpectrumRequest,
    single: Vec<(f64, f64)>,
    bins: Vec<f64>,
}

impl SpectrumCalculator {
    fn new(request: SpectrumRequest) -> Self {
        let bins = vec![0.0; request.x_resolution];
        Self {
            request,
            single: Vec::new(),
            bins,
        }
    }

    fn is_single(&self) -> bool {
        self.request.scans.first == self.request.scans.last
    }

    fn take_scan(&mut self, scan: &Scan) {
        let (start, stop) = (self.request.mz_start, self.request.mz_stop);
        let in_window = scan.points().filter(|(mz, _)| *mz >= start && *mz <= stop);

        if self.is_single() {
            self.single.extend(in_window);
            return;
        }
        for (mz, intensity) in in_window {
            let bin = bin_index(mz, start, stop, self.bins.len());
            self.bins[bin] = self.bins[bin].max(intensity);
        }
    }

    fn finish(self) -> SpectrumResult {
        let (start, stop) = (self.request.mz_start, self.request.mz_stop);
        let (mz_values, intensities): (Vec<f64>, Vec<f64>) = if self.is_single() {
            self.single.into_iter().unzip()
        } else {
            let width = (stop - start) / self.bins.len() as f64;
            self.bins
                .iter()
                .enumerate()
                .map(|(i, intensity)| (start + width * (i as f64 + 0.5), *intensity))
                .unzip()
        };
        let max_intensity = intensities.iter().copied().fold(0.0, f64::max);
        SpectrumResult {
            mz_values,
            intensities,
            min_mz: start,
            max_mz: stop,
            max_intensity,
        }
    }
}

#[derive(Debug)]
struct TwoDCalculator {
    request: TwoDRequest,
    matrix: Vec<Vec<f64>>,
}

impl TwoDCalculator {
    fn new(request: TwoDRequest) -> Self {
        let matrix = vec![vec![0.0; request.x_resolution]; request.y_resolution];
        Self { request, matrix }
    }

    fn take_scan(&mut self, index: usize, scan: &Scan) {
        let window = self.request.scans;
        let x = (index - window.first) * self.request.x_resolution / window.len();
        let (start, stop) = (self.request.mz_start, self.request.mz_stop);
        for (mz, intensity) in scan.points() {
            if mz < start || mz > stop {
                continue;
            }
            let y = bin_index(mz, start, stop, self.request.y_resolution);
            let cell = &mut self.matrix[y][x];
            *cell = cell.max(intensity);
        }
    }

    fn finish(self) -> TwoDResult {
        let cells = self.matrix.iter().flatten().copied();
        let (min_intensity, max_intensity) = cells.fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        TwoDResult {
            width: self.request.x_resolution,
            height: self.request.y_resolution,
            matrix: self.matrix,
            min_intensity: if min_intensity.is_finite() {
                min_intensity
            } else {
                0.0
            },
            max_intensity,
        }
    }
}

fn bin_index(mz: f64, start: f64, stop: f64, bins: usize) -> usize {
    if stop <= start {
        return 0;
    }
    let position = ((mz - start) / (stop - start) * bins as f64) as usize;
    position.min(bins - 1)
}

/// One pass of scans feeding every requested view.
#[derive(Debug)]
pub struct RefreshRun {
    change_type: ChangeType,
    spectrum_combination: Option<ScanWindow>,
    span: Option<ScanWindow>,
    tic: Option<TicCalculator>,
    spectrum: Option<SpectrumCalculator>,
    twod: Option<TwoDCalculator>,
}

impl RefreshRun {
    pub fn new(request: RefreshRequest) -> Self {
        let span = request.scan_span();
        Self {
            change_type: request.change_type,
            spectrum_combination: request.spectrum.as_ref().map(|r| r.scans),
            span,
            tic: request.tic.map(TicCalculator::new),
            spectrum: request.spectrum.map(SpectrumCalculator::new),
            twod: request.twod.map(TwoDCalculator::new),
        }
    }

    /// Scan window to stream, `None` when no view needs raw data
    pub fn span(&self) -> Option<ScanWindow> {
        self.span
    }

    /// Hand one scan to the views whose window contains `index`.
    pub fn feed(&mut self, index: usize, scan: &Scan) {
        if let Some(tic) = self.tic.as_mut() {
            if tic.request.scans.contains(index) {
                tic.take_scan(index, scan);
            }
        }
        if let Some(spectrum) = self.spectrum.as_mut() {
            if spectrum.request.scans.contains(index) {
                spectrum.take_scan(scan);
            }
        }
        if let Some(twod) = self.twod.as_mut() {
            if twod.request.scans.contains(index) {
                twod.take_scan(index, scan);
            }
        }
    }

    pub fn finish(self, raw_data_id: RawDataId, data_max_intensity: f64) -> RefreshResult {
        RefreshResult {
            raw_data_id,
            change_type: self.change_type,
            spectrum_combination: self.spectrum_combination,
            tic: self.tic.map(TicCalculator::finish),
            spectrum: self.spectrum.map(SpectrumCalculator::finish),
            twod: self.twod.map(TwoDCalculator::finish),
            data_max_intensity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scans() -> Vec<Scan> {
        (0..10)
            .map(|i| {
                let i = i as f64;
                Scan::new(i, vec![100.0, 200.0, 300.0], vec![i, 2.0 * i, 3.0 * i])
            })
            .collect()
    }

    fn run_all(mut run: RefreshRun, scans: &[Scan]) -> (RefreshResult, Vec<usize>) {
        let mut streamed = Vec::new();
        if let Some(span) = run.span() {
            for index in span.first..=span.last {
                streamed.push(index);
                run.feed(index, &scans[index]);
            }
        }
        (run.finish(1, 27.0), streamed)
    }

    #[test]
    fn span_covers_all_requested_views() {
        let request = RefreshRequest {
            tic: Some(TicRequest {
                scans: ScanWindow::new(2, 4),
                mode: TicMode::Tic,
            }),
            twod: Some(TwoDRequest {
                scans: ScanWindow::new(6, 8),
                mz_start: 0.0,
                mz_stop: 400.0,
                x_resolution: 3,
                y_resolution: 2,
            }),
            ..Default::default()
        };
        assert_eq!(request.scan_span(), Some(ScanWindow::new(2, 8)));
        assert_eq!(RefreshRequest::default().scan_span(), None);
    }

    #[test]
    fn each_view_only_sees_its_own_window() {
        let request = RefreshRequest {
            change_type: ChangeType::SelectionScan,
            tic: Some(TicRequest {
                scans: ScanWindow::new(1, 3),
                mode: TicMode::Tic,
            }),
            spectrum: Some(SpectrumRequest {
                scans: ScanWindow::new(5, 5),
                mz_start: 150.0,
                mz_stop: 350.0,
                x_resolution: 4,
            }),
            twod: None,
        };
        let (result, streamed) = run_all(RefreshRun::new(request), &scans());

        assert_eq!(streamed, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.change_type, ChangeType::SelectionScan);
        assert_eq!(result.spectrum_combination, Some(ScanWindow::new(5, 5)));

        let tic = result.tic.unwrap();
        assert_eq!(tic.scan_numbers, vec![1, 2, 3]);
        assert_eq!(tic.intensities, vec![6.0, 12.0, 18.0]);
        assert_eq!(tic.max_intensity, 18.0);

        let spectrum = result.spectrum.unwrap();
        assert_eq!(spectrum.mz_values, vec![200.0, 300.0]);
        assert_eq!(spectrum.intensities, vec![10.0, 15.0]);
        assert_eq!(spectrum.max_intensity, 15.0);
        assert!(result.twod.is_none());
        assert_eq!(result.data_max_intensity, 27.0);
    }

    #[test]
    fn xic_sums_only_the_mz_window() {
        let request = RefreshRequest {
            tic: Some(TicRequest {
                scans: ScanWindow::new(2, 2),
                mode: TicMode::Xic {
                    mz_start: 150.0,
                    mz_stop: 250.0,
                },
            }),
            ..Default::default()
        };
        let (result, _) = run_all(RefreshRun::new(request), &scans());
        assert_eq!(result.tic.unwrap().intensities, vec![4.0]);
    }

    #[test]
    fn combined_spectrum_keeps_bin_maximum() {
        let request = RefreshRequest {
            spectrum: Some(SpectrumRequest {
                scans: ScanWindow::new(0, 9),
                mz_start: 0.0,
                mz_stop: 400.0,
                x_resolution: 4,
            }),
            ..Default::default()
        };
        let (result, _) = run_all(RefreshRun::new(request), &scans());
        let spectrum = result.spectrum.unwrap();
        assert_eq!(spectrum.mz_values, vec![50.0, 150.0, 250.0, 350.0]);
        assert_eq!(spectrum.intensities, vec![0.0, 9.0, 18.0, 27.0]);
    }

    #[test]
    fn twod_matrix_maps_scans_and_mz_to_cells() {
        let request = RefreshRequest {
            twod: Some(TwoDRequest {
                scans: ScanWindow::new(0, 9),
                mz_start: 0.0,
                mz_stop: 400.0,
                x_resolution: 2,
                y_resolution: 2,
            }),
            ..Default::default()
        };
        let (result, _) = run_all(RefreshRun::new(request), &scans());
        let twod = result.twod.unwrap();
        assert_eq!(twod.width, 2);
        assert_eq!(twod.height, 2);
        // Low m/z band holds m/z 100; high band holds 200 and 300.
        assert_eq!(twod.matrix[0], vec![4.0, 9.0]);
        assert_eq!(twod.matrix[1], vec![12.0, 27.0]);
        assert_eq!(twod.min_intensity, 4.0);
        assert_eq!(twod.max_intensity, 27.0);
    }

    #[test]
    fn empty_request_streams_nothing() {
        let (result, streamed) = run_all(RefreshRun::new(RefreshRequest::default()), &scans());
        assert!(streamed.is_empty());
        assert!(result.tic.is_none() && result.spectrum.is_none() && result.twod.is_none());
    }

    #[test]
    fn validate_rejects_bad_windows() {
        let request = RefreshRequest {
            spectrum: Some(SpectrumRequest {
                scans: ScanWindow::new(0, 1),
                mz_start: 300.0,
                mz_stop: 100.0,
                x_resolution: 4,
            }),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = RefreshRequest {
            twod: Some(TwoDRequest {
                scans: ScanWindow::new(0, 1),
                mz_start: 0.0,
                mz_stop: 1.0,
                x_resolution: 0,
                y_resolution: 1,
            }),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn validate_caps_resolutions() {
        let spectrum = |x_resolution| RefreshRequest {
            spectrum: Some(SpectrumRequest {
                scans: ScanWindow::new(0, 1),
                mz_start: 0.0,
                mz_stop: 1.0,
                x_resolution,
            }),
            ..Default::default()
        };
        assert!(spectrum(MAX_RESOLUTION).validate().is_ok());
        assert!(spectrum(MAX_RESOLUTION + 1).validate().is_err());
        assert!(spectrum(1 << 45).validate().is_err());

        let twod = |x_resolution, y_resolution| RefreshRequest {
            twod: Some(TwoDRequest {
                scans: ScanWindow::new(0, 1),
                mz_start: 0.0,
                mz_stop: 1.0,
                x_resolution,
                y_resolution,
            }),
            ..Default::default()
        };
        assert!(twod(2048, 2048).validate().is_ok());
        assert!(twod(4096, 2048).validate().is_err());
        assert!(twod(usize::MAX, usize::MAX).validate().is_err());
    }
}
