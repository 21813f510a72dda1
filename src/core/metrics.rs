//! Confusion counts and accuracy statistics derived from a contingency raster

use crate::io::raster::read_contingency;
use crate::types::{codes, ClassRaster, FimResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Added to every denominator so empty classes give 0 instead of NaN
pub const EPSILON: f64 = 1e-8;

/// Sub-directory holding the metrics table
pub const METRICS_DIR: &str = "EvaluationMetrics";

/// File name of the metrics table
pub const METRICS_FILE: &str = "EvaluationMetrics.csv";

fn ratio(numerator: f64, denominator: f64) -> f64 {
    numerator / (denominator + EPSILON)
}

/// Cell counts per contingency class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tn: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub tp: u64,
    /// Cells inside a permanent water body
    pub permanent_water: u64,
    /// Everything else, including cells outside the comparison extent
    pub other: u64,
}

impl ConfusionCounts {
    pub fn from_classes<'a, I>(cells: I) -> Self
    where
        I: IntoIterator<Item = &'a u8>,
    {
        let mut counts = Self::default();
        for &cell in cells {
            match cell {
                codes::TRUE_NEGATIVE => counts.tn += 1,
                codes::FALSE_POSITIVE => counts.fp += 1,
                codes::FALSE_NEGATIVE => counts.fn_ += 1,
                codes::TRUE_POSITIVE => counts.tp += 1,
                codes::PERMANENT_WATER_BODY => counts.permanent_water += 1,
                _ => counts.other += 1,
            }
        }
        counts
    }

    pub fn from_raster(raster: &ClassRaster) -> Self {
        Self::from_classes(raster.data.iter())
    }

    /// Cells that take part in the accuracy statistics
    pub fn counted(&self) -> u64 {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn total(&self) -> u64 {
        self.counted() + self.permanent_water + self.other
    }

    pub fn metrics(&self) -> EvaluationMetrics {
        let (tn, fp, fn_, tp) = (self.tn as f64, self.fp as f64, self.fn_ as f64, self.tp as f64);
        let precision = ratio(tp, tp + fp);
        let sensitivity = ratio(tp, tp + fn_);
        EvaluationMetrics {
            counts: *self,
            tpr: ratio(tp, tp + fn_),
            fnr: ratio(fn_, tp + fn_),
            accuracy: ratio(tp + tn, tp + tn + fp + fn_),
            precision,
            sensitivity,
            f1: ratio(2.0 * precision * sensitivity, precision + sensitivity),
            csi: ratio(tp, tp + fn_ + fp),
            pod: ratio(tp, tp + fn_),
            fpr: ratio(fp, fp + tn),
            far: ratio(fp, tp + fp),
        }
    }

    /// Dice coefficient, 2TP / (2TP + FP + FN). Not part of the default table.
    pub fn dice(&self) -> f64 {
        let (fp, fn_, tp) = (self.fp as f64, self.fn_ as f64, self.tp as f64);
        ratio(2.0 * tp, 2.0 * tp + fp + fn_)
    }
}

/// Accuracy statistics of one candidate against its benchmark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub counts: ConfusionCounts,
    pub tpr: f64,
    pub fnr: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub sensitivity: f64,
    pub f1: f64,
    pub csi: f64,
    pub pod: f64,
    pub fpr: f64,
    pub far: f64,
}

impl EvaluationMetrics {
    pub const ROW_NAMES: [&'static str; 14] = [
        "TN",
        "FP",
        "FN",
        "TP",
        "TPR",
        "FNR",
        "Accuracy",
        "Precision",
        "Sensitivity",
        "F1_score",
        "CSI",
        "POD",
        "FPR",
        "FAR",
    ];

    /// Values in the order of [`Self::ROW_NAMES`]
    pub fn values(&self) -> [f64; 14] {
        let c = &self.counts;
        [
            c.tn as f64,
            c.fp as f64,
            c.fn_ as f64,
            c.tp as f64,
            self.tpr,
            self.fnr,
            self.accuracy,
            self.precision,
            self.sensitivity,
            self.f1,
            self.csi,
            self.pod,
            self.fpr,
            self.far,
        ]
    }

    pub fn rows(&self) -> impl Iterator<Item = (&'static str, f64)> {
        Self::ROW_NAMES.into_iter().zip(self.values())
    }
}

/// Metrics of every candidate of a case: one row per metric, one column
/// per candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsTable {
    columns: Vec<(String, EvaluationMetrics)>,
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: impl Into<String>, metrics: EvaluationMetrics) {
        self.columns.push((candidate.into(), metrics));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, EvaluationMetrics)] {
        &self.columns
    }

    pub fn get(&self, candidate: &str) -> Option<&EvaluationMetrics> {
        self.columns
            .iter()
            .find(|(name, _)| name == candidate)
            .map(|(_, metrics)| metrics)
    }

    pub fn to_csv_string(&self) -> String {
        let mut out = String::from("Metrics");
        for (name, _) in &self.columns {
            out.push(',');
            out.push_str(&csv_field(name));
        }
        out.push('\n');

        let values: Vec<[f64; 14]> = self.columns.iter().map(|(_, m)| m.values()).collect();
        for (row, name) in EvaluationMetrics::ROW_NAMES.iter().enumerate() {
            out.push_str(name);
            for column in &values {
                // Counts are whole numbers and print without a fraction
                out.push_str(&format!(",{}", column[row]));
            }
            out.push('\n');
        }
        out
    }

    /// Write the table as CSV, creating parent directories as needed
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> FimResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_csv_string())?;
        log::info!("Evaluation metrics saved to {}", path.display());
        Ok(())
    }
}

/// Recompute the metrics of a contingency raster persisted earlier
pub fn metrics_from_contingency_file<P: AsRef<Path>>(path: P) -> FimResult<EvaluationMetrics> {
    let raster = read_contingency(path)?;
    Ok(ConfusionCounts::from_raster(&raster).metrics())
}
