//! End-to-end evaluation of case folders: harmonize, resolve the extent,
//! classify every candidate and write the maps and the metrics table.

use crate::core::contingency::ContingencyClassifier;
use crate::core::extent::{ExtentInputs, ExtentStrategy};
use crate::core::harmonize::{HarmonizeParams, Harmonizer};
use crate::core::metrics::{MetricsTable, METRICS_DIR, METRICS_FILE};
use crate::core::water_bodies::WaterBodyMask;
use crate::io::case::{case_dirs, case_name, split_case};
use crate::io::raster::{file_stem, inspect, read_raster, write_raster};
use crate::types::{FimError, FimResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Sub-directory holding the clipped benchmark and candidates
pub const MASKED_DIR: &str = "MaskedFIMwithBoundary";

/// Sub-directory holding one contingency raster per candidate
pub const CONTINGENCY_DIR: &str = "ContingencyMaps";

/// Evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationParams {
    pub strategy: ExtentStrategy,
    pub harmonize: HarmonizeParams,
    /// Results land in `<output_dir>/<case>/<strategy>/`
    pub output_dir: PathBuf,
    /// Permanent water body polygons; without them nothing is excluded
    pub pwb_path: Option<PathBuf>,
    /// Keep the harmonized rasters after the case finishes
    pub keep_working_dir: bool,
}

impl EvaluationParams {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            strategy: ExtentStrategy::default(),
            harmonize: HarmonizeParams::default(),
            output_dir: output_dir.into(),
            pwb_path: None,
            keep_working_dir: false,
        }
    }
}

/// Files written for one case, and its metrics
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case: String,
    pub output_dir: PathBuf,
    pub extent_path: Option<PathBuf>,
    pub clipped_benchmark: PathBuf,
    pub clipped_candidates: Vec<PathBuf>,
    pub contingency_maps: Vec<PathBuf>,
    pub metrics_path: PathBuf,
    pub metrics: MetricsTable,
}

pub struct FimEvaluator {
    params: EvaluationParams,
    harmonizer: Harmonizer,
}

impl FimEvaluator {
    pub fn new(params: EvaluationParams) -> FimResult<Self> {
        let harmonizer = Harmonizer::new(params.harmonize.clone())?;
        Ok(Self { params, harmonizer })
    }

    pub fn params(&self) -> &EvaluationParams {
        &self.params
    }

    pub fn load_water_bodies(&self) -> FimResult<WaterBodyMask> {
        match &self.params.pwb_path {
            Some(path) => WaterBodyMask::from_file(path),
            None => {
                log::warn!("No permanent water body dataset given; no cells will be excluded");
                Ok(WaterBodyMask::none())
            }
        }
    }

    /// Evaluate every case under `main_dir`. The water bodies are loaded
    /// once and shared; each case reports its own result and a failed case
    /// does not stop the others.
    pub fn evaluate_directory(&self, main_dir: &Path) -> FimResult<Vec<FimResult<CaseReport>>> {
        let cases = case_dirs(main_dir)?;
        if cases.is_empty() {
            return Err(FimError::input(
                main_dir.display().to_string(),
                "no case folder with GeoTIFF files found",
            ));
        }
        log::info!("Evaluating {} case(s) under {}", cases.len(), main_dir.display());

        let water = self.load_water_bodies()?;

        #[cfg(feature = "parallel")]
        let results: Vec<FimResult<CaseReport>> = cases
            .par_iter()
            .map(|case_dir| self.evaluate_case_with(case_dir, &water))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<FimResult<CaseReport>> = cases
            .iter()
            .map(|case_dir| self.evaluate_case_with(case_dir, &water))
            .collect();

        for result in &results {
            match result {
                Ok(report) => log::info!("Case '{}' finished: {}", report.case, report.metrics_path.display()),
                Err(e) => log::error!("{}", e),
            }
        }
        Ok(results)
    }

    pub fn evaluate_case(&self, case_dir: &Path) -> FimResult<CaseReport> {
        let water = self.load_water_bodies()?;
        self.evaluate_case_with(case_dir, &water)
    }

    /// Evaluate one case folder against an already loaded water body mask
    pub fn evaluate_case_with(&self, case_dir: &Path, water: &WaterBodyMask) -> FimResult<CaseReport> {
        let case = case_name(case_dir);
        log::info!("**************** Evaluating case: {} ****************", case);

        let result = self.run_case(case_dir, &case, water);

        if !self.params.keep_working_dir {
            let working_dir = self.harmonizer.working_dir(case_dir);
            if working_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&working_dir) {
                    log::warn!("Unable to remove {}: {}", working_dir.display(), e);
                }
            }
        }

        result.map_err(|e| e.in_case(case))
    }

    fn run_case(&self, case_dir: &Path, case: &str, water: &WaterBodyMask) -> FimResult<CaseReport> {
        let harmonized = self.harmonizer.harmonize_dir(case_dir)?;
        let rasters = split_case(&harmonized, case)?;
        let benchmark_info = inspect(&rasters.benchmark)?;
        let candidate_infos = rasters
            .candidates
            .iter()
            .map(inspect)
            .collect::<FimResult<Vec<_>>>()?;

        let strategy = &self.params.strategy;
        let save_dir = self.params.output_dir.join(case).join(strategy.name());
        std::fs::create_dir_all(&save_dir)?;

        let extent = strategy.resolve(&ExtentInputs {
            benchmark: &benchmark_info,
            candidates: &candidate_infos,
            case_dir,
        })?;
        let extent_path = if strategy.persists_extent() {
            Some(extent.persist(&save_dir)?)
        } else {
            None
        };

        let benchmark_raw = read_raster(&benchmark_info.path)?;
        let classifier = ContingencyClassifier::new(&benchmark_raw, extent, water)?;

        let masked_dir = save_dir.join(MASKED_DIR);
        let clipped_benchmark = masked_dir.join(format!("{}_clipped.tif", benchmark_info.file_stem()));
        write_raster(classifier.benchmark().raster(), &clipped_benchmark)?;

        let mut table = MetricsTable::new();
        let mut clipped_candidates = Vec::with_capacity(candidate_infos.len());
        let mut contingency_maps = Vec::with_capacity(candidate_infos.len());

        for info in &candidate_infos {
            let stem = file_stem(&info.path);
            log::info!("Classifying candidate {}", stem);

            let candidate_raw = read_raster(&info.path)?;
            let classification = classifier.classify(&candidate_raw)?;

            let clipped_path = masked_dir.join(format!("{}_clipped.tif", stem));
            write_raster(classification.clipped_candidate.raster(), &clipped_path)?;

            let map_path = save_dir
                .join(CONTINGENCY_DIR)
                .join(format!("ContingencyMAP_{}.tif", stem));
            classification.contingency.write(&map_path)?;

            let counts = classification.contingency.counts();
            log::info!(
                "{}: TN={} FP={} FN={} TP={} water={} other={}",
                stem,
                counts.tn,
                counts.fp,
                counts.fn_,
                counts.tp,
                counts.permanent_water,
                counts.other
            );
            table.push(stem, counts.metrics());

            clipped_candidates.push(clipped_path);
            contingency_maps.push(map_path);
        }

        let metrics_path = save_dir.join(METRICS_DIR).join(METRICS_FILE);
        table.write_csv(&metrics_path)?;

        Ok(CaseReport {
            case: case.to_string(),
            output_dir: save_dir,
            extent_path,
            clipped_benchmark,
            clipped_candidates,
            contingency_maps,
            metrics_path,
            metrics: table,
        })
    }
}

/// Split a directory run into the reports of the cases that succeeded and
/// the errors of those that failed, both in case order
pub fn partition_outcomes(results: Vec<FimResult<CaseReport>>) -> (Vec<CaseReport>, Vec<FimError>) {
    let mut reports = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => failures.push(e),
        }
    }
    (reports, failures)
}
