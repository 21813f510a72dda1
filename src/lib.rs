//! fimeval: Flood Inundation Map evaluation
//!
//! Compares candidate flood maps against a benchmark: rasters are brought
//! onto a common CRS and pixel size, a comparison extent is resolved, each
//! candidate is classified cell by cell into a contingency map and the
//! usual accuracy statistics (CSI, POD, FAR, ...) are derived from it.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{codes, ClassRaster, Crs, FimError, FimResult, GridSpec, Raster, ValueRaster};

pub use crate::core::{
    ConfusionCounts, ContingencyClassifier, EvaluationMetrics, EvaluationParams, ExtentStrategy,
    FimEvaluator, HarmonizeParams, Harmonizer, MetricsTable, WaterBodyMask,
};

#[cfg(feature = "python")]
mod python {
    use crate::core::metrics::metrics_from_contingency_file;
    use crate::core::{partition_outcomes, EvaluationParams, ExtentStrategy, FimEvaluator};
    use crate::io::read_contingency;
    use crate::FimError;
    use numpy::{IntoPyArray, PyArray2};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;
    use std::path::PathBuf;

    fn to_py_err(e: FimError) -> PyErr {
        match e {
            FimError::Configuration(_) => PyErr::new::<PyValueError, _>(format!("{}", e)),
            other => PyErr::new::<PyRuntimeError, _>(format!("{}", other)),
        }
    }

    /// Evaluate every case under `main_dir`. Returns the metrics CSV paths of
    /// the cases that succeeded and the error messages of those that failed;
    /// raises when no case succeeded.
    #[pyfunction]
    #[pyo3(signature = (main_dir, output_dir, method = "smallest_extent", aoi = None, pwb_path = None, target_crs = None, target_resolution = None))]
    fn evaluate_fim(
        main_dir: PathBuf,
        output_dir: PathBuf,
        method: &str,
        aoi: Option<PathBuf>,
        pwb_path: Option<PathBuf>,
        target_crs: Option<String>,
        target_resolution: Option<f64>,
    ) -> PyResult<(Vec<String>, Vec<String>)> {
        let mut params = EvaluationParams::new(output_dir);
        params.strategy = match method.parse::<ExtentStrategy>().map_err(to_py_err)? {
            ExtentStrategy::Aoi { .. } => ExtentStrategy::Aoi { path: aoi },
            other => other,
        };
        params.pwb_path = pwb_path;
        params.harmonize.target_crs = target_crs;
        params.harmonize.target_resolution = target_resolution;

        let evaluator = FimEvaluator::new(params).map_err(to_py_err)?;
        let results = evaluator.evaluate_directory(&main_dir).map_err(to_py_err)?;
        let (reports, failures) = partition_outcomes(results);
        let failures: Vec<String> = failures.iter().map(|e| e.to_string()).collect();
        if reports.is_empty() {
            return Err(PyErr::new::<PyRuntimeError, _>(format!(
                "every case failed:\n{}",
                failures.join("\n")
            )));
        }
        let paths = reports
            .iter()
            .map(|report| report.metrics_path.display().to_string())
            .collect();
        Ok((paths, failures))
    }

    #[pyfunction]
    fn read_contingency_map(py: Python<'_>, path: PathBuf) -> PyResult<&PyArray2<u8>> {
        let raster = read_contingency(&path).map_err(to_py_err)?;
        Ok(raster.data.into_pyarray(py))
    }

    #[pyfunction]
    fn metrics_from_file(py: Python<'_>, path: PathBuf) -> PyResult<&PyDict> {
        let metrics = metrics_from_contingency_file(&path).map_err(to_py_err)?;
        let dict = PyDict::new(py);
        for (name, value) in metrics.rows() {
            dict.set_item(name, value)?;
        }
        Ok(dict)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(evaluate_fim, m)?)?;
        m.add_function(wrap_pyfunction!(read_contingency_map, m)?)?;
        m.add_function(wrap_pyfunction!(metrics_from_file, m)?)?;
        Ok(())
    }
}
