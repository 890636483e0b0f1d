use crate::dataset::Scan;
use crate::error::StrategyError;
use crate::strategy::{AlgorithmParameters, Progress, RawDataFilter};

pub const CLASS: &str = "crop";

/// Keeps a window of scans and, inside each, a window of m/z values.
///
/// Settings (all optional): `first_scan`, `last_scan` (inclusive, zero-based),
/// `mz_start`, `mz_stop`. Missing bounds leave that side open.
#[derive(Debug, Clone, Copy, Default)]
pub struct CropFilter;

impl RawDataFilter for CropFilter {
    fn filter(
        &self,
        scans: Vec<Scan>,
        parameters: &AlgorithmParameters,
        progress: &mut dyn Progress,
    ) -> Result<Vec<Scan>, StrategyError> {
        let first = parameters.usize_setting("first_scan")?.unwrap_or(0);
        let last = parameters.usize_setting("last_scan")?.unwrap_or(usize::MAX);
        let mz_start = parameters.f64_setting("mz_start")?.unwrap_or(f64::NEG_INFINITY);
        let mz_stop = parameters.f64_setting("mz_stop")?.unwrap_or(f64::INFINITY);

        if last < first {
            return Err(StrategyError::new(format!(
                "last_scan {} is before first_scan {}",
                last, first
            )));
        }
        if mz_stop < mz_start {
            return Err(StrategyError::new(format!(
                "mz_stop {} is below mz_start {}",
                mz_stop, mz_start
            )));
        }

        let total = scans.len().max(1) as f64;
        let mut kept = Vec::new();
        for (index, scan) in scans.into_iter().enumerate() {
            if index >= first && index <= last {
                let (mz, intensity): (Vec<f64>, Vec<f64>) = scan
                    .points()
                    .filter(|(mz, _)| *mz >= mz_start && *mz <= mz_stop)
                    .unzip();
                kept.push(Scan::new(scan.rt, mz, intensity));
            }
            progress.update((index + 1) as f64 / total);
        }

        if kept.is_empty() {
            return Err(StrategyError::new("crop window contains no scans"));
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rates(Vec<f64>);

    impl Progress for Rates {
        fn update(&mut self, rate: f64) {
            self.0.push(rate);
        }
    }

    fn scans() -> Vec<Scan> {
        (0..4)
            .map(|i| Scan::new(i as f64, vec![100.0, 200.0, 300.0], vec![1.0, 2.0, 3.0]))
            .collect()
    }

    #[test]
    fn crops_scans_and_mz() {
        let params = AlgorithmParameters::new(CLASS)
            .with_setting("first_scan", 1)
            .with_setting("last_scan", 2)
            .with_setting("mz_start", 150.0)
            .with_setting("mz_stop", 250.0);
        let mut rates = Rates(Vec::new());

        let out = CropFilter.filter(scans(), &params, &mut rates).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rt, 1.0);
        assert_eq!(out[1].mz, vec![200.0]);
        assert_eq!(out[1].intensity, vec![2.0]);
        assert_eq!(rates.0.last(), Some(&1.0));
    }

    #[test]
    fn no_settings_keeps_everything() {
        let out = CropFilter
            .filter(scans(), &AlgorithmParameters::new(CLASS), &mut Rates(Vec::new()))
            .unwrap();
        assert_eq!(out, scans());
    }

    #[test]
    fn empty_window_fails() {
        let params = AlgorithmParameters::new(CLASS).with_setting("first_scan", 10);
        assert!(CropFilter
            .filter(scans(), &params, &mut Rates(Vec::new()))
            .is_err());

        let params = AlgorithmParameters::new(CLASS)
            .with_setting("mz_start", 5.0)
            .with_setting("mz_stop", 1.0);
        assert!(CropFilter
            .filter(scans(), &params, &mut Rates(Vec::new()))
            .is_err());
    }
}
