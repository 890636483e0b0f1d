//! Staged dataset access.
//!
//! A dataset is an ordered sequence of mass-spectrometry scans. The node only
//! ever touches datasets through a [`RawDataFormat`], which knows how to stream
//! scans out of a working copy, summarize it, and write a replacement.
//!
//! The built-in [`JsonLinesFormat`] stores one scan per line:
//!
//! ```text
//! {"rt": 12.5, "mz": [100.1, 101.2], "intensity": [340.0, 12.0]}
//! ```
//!
//! Blank lines are ignored, so files may be padded.

pub mod peaks;
pub mod refresh;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Retention time in seconds
    pub rt: f64,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl Scan {
    pub fn new(rt: f64, mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        Self { rt, mz, intensity }
    }

    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().sum()
    }

    /// Summed intensity of the data points with `lo <= mz <= hi`
    pub fn intensity_between(&self, lo: f64, hi: f64) -> f64 {
        self.points()
            .filter(|(mz, _)| *mz >= lo && *mz <= hi)
            .map(|(_, i)| i)
            .sum()
    }

    pub fn max_intensity(&self) -> f64 {
        self.intensity.iter().copied().fold(0.0, f64::max)
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.mz.iter().copied().zip(self.intensity.iter().copied())
    }
}

/// Summary gathered once when a working copy is staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub scan_count: usize,
    pub scan_times: Vec<f64>,
    pub data_points: usize,
    pub min_mz: f64,
    pub max_mz: f64,
    pub max_intensity: f64,
}

impl DatasetMetadata {
    fn empty() -> Self {
        Self {
            scan_count: 0,
            scan_times: Vec::new(),
            data_points: 0,
            min_mz: f64::INFINITY,
            max_mz: f64::NEG_INFINITY,
            max_intensity: 0.0,
        }
    }

    fn absorb(&mut self, scan: &Scan) {
        self.scan_count += 1;
        self.scan_times.push(scan.rt);
        self.data_points += scan.mz.len();
        for (mz, intensity) in scan.points() {
            self.min_mz = self.min_mz.min(mz);
            self.max_mz = self.max_mz.max(mz);
            self.max_intensity = self.max_intensity.max(intensity);
        }
    }
}

pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<Scan, DatasetError>> + 'a>;

/// Codec for a staged scan file.
pub trait RawDataFormat: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Stream every scan of the file in order.
    fn scans<'a>(&'a self, path: &Path) -> Result<ScanIter<'a>, DatasetError>;

    /// Replace the contents of `path` with `scans`.
    fn write_scans(&self, path: &Path, scans: &[Scan]) -> Result<(), DatasetError>;

    /// Read the whole file once and summarize it. An empty dataset fails.
    fn preload(&self, path: &Path) -> Result<DatasetMetadata, DatasetError> {
        let mut metadata = DatasetMetadata::empty();
        for scan in self.scans(path)? {
            metadata.absorb(&scan?);
        }
        if metadata.scan_count == 0 {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }
        if metadata.data_points == 0 {
            metadata.min_mz = 0.0;
            metadata.max_mz = 0.0;
        }
        Ok(metadata)
    }

    fn read_scans(&self, path: &Path) -> Result<Vec<Scan>, DatasetError> {
        self.scans(path)?.collect()
    }

    /// Stream scans `first..=last` (zero-based indices).
    fn scan_range<'a>(
        &'a self,
        path: &Path,
        first: usize,
        last: usize,
    ) -> Result<ScanIter<'a>, DatasetError> {
        Ok(Box::new(
            self.scans(path)?.skip(first).take(last.saturating_sub(first) + 1),
        ))
    }
}

/// One JSON object per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesFormat;

impl RawDataFormat for JsonLinesFormat {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn scans<'a>(&'a self, path: &Path) -> Result<ScanIter<'a>, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let path = path.to_path_buf();
        let lines = BufReader::new(file).lines().enumerate();

        Ok(Box::new(lines.filter_map(move |(index, line)| {
            let line = match line {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(DatasetError::Read {
                        path: path.clone(),
                        source,
                    }))
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(parse_scan(&path, index + 1, &line))
        })))
    }

    fn write_scans(&self, path: &Path, scans: &[Scan]) -> Result<(), DatasetError> {
        let write_err = |source| DatasetError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        for scan in scans {
            serde_json::to_writer(&mut writer, scan).map_err(|e| write_err(e.into()))?;
            writer.write_all(b"\n").map_err(write_err)?;
        }
        writer.flush().map_err(write_err)?;
        Ok(())
    }
}

fn parse_scan(path: &Path, line: usize, text: &str) -> Result<Scan, DatasetError> {
    let malformed = |message: String| DatasetError::Malformed {
        path: path.to_path_buf(),
        line,
        message,
    };
    let scan: Scan = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
    if scan.mz.len() != scan.intensity.len() {
        return Err(malformed(format!(
            "{} m/z values but {} intensities",
            scan.mz.len(),
            scan.intensity.len()
        )));
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_scans() -> Vec<Scan> {
        vec![
            Scan::new(1.0, vec![100.0, 200.0], vec![10.0, 20.0]),
            Scan::new(2.0, vec![150.0], vec![50.0]),
            Scan::new(3.0, vec![90.0, 210.0, 300.0], vec![1.0, 2.0, 3.0]),
        ]
    }

    #[test]
    fn preload_summarizes_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        JsonLinesFormat.write_scans(&path, &sample_scans()).unwrap();

        let meta = JsonLinesFormat.preload(&path).unwrap();
        assert_eq!(meta.scan_count, 3);
        assert_eq!(meta.scan_times, vec![1.0, 2.0, 3.0]);
        assert_eq!(meta.data_points, 6);
        assert_eq!(meta.min_mz, 90.0);
        assert_eq!(meta.max_mz, 300.0);
        assert_eq!(meta.max_intensity, 50.0);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.jsonl");
        std::fs::write(
            &path,
            "\n{\"rt\":1.0,\"mz\":[1.0],\"intensity\":[2.0]}\n   \n\n",
        )
        .unwrap();

        let scans = JsonLinesFormat.read_scans(&path).unwrap();
        assert_eq!(scans.len(), 1);
    }

    #[test]
    fn preload_rejects_empty_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.jsonl");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            JsonLinesFormat.preload(&empty),
            Err(DatasetError::Empty(_))
        ));

        let broken = dir.path().join("broken.jsonl");
        std::fs::write(&broken, "{\"rt\":1.0,\"mz\":[1.0, 2.0],\"intensity\":[2.0]}\n").unwrap();
        match JsonLinesFormat.preload(&broken) {
            Err(DatasetError::Malformed { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected malformed error, got {:?}", other),
        }

        let missing = dir.path().join("missing.jsonl");
        assert!(matches!(
            JsonLinesFormat.preload(&missing),
            Err(DatasetError::Read { .. })
        ));
    }

    #[test]
    fn scan_range_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        JsonLinesFormat.write_scans(&path, &sample_scans()).unwrap();

        let rts: Vec<f64> = JsonLinesFormat
            .scan_range(&path, 1, 2)
            .unwrap()
            .map(|s| s.unwrap().rt)
            .collect();
        assert_eq!(rts, vec![2.0, 3.0]);
    }

    #[test]
    fn scan_intensity_helpers() {
        let scan = Scan::new(0.0, vec![100.0, 200.0, 300.0], vec![1.0, 5.0, 2.0]);
        assert_eq!(scan.total_intensity(), 8.0);
        assert_eq!(scan.intensity_between(150.0, 300.0), 7.0);
        assert_eq!(scan.max_intensity(), 5.0);
    }
}
