use approx::assert_abs_diff_eq;
use fimeval::core::metrics::metrics_from_contingency_file;
use fimeval::io::{read_contingency, write_polygons, write_raster};
use fimeval::types::{BoundingBox, GeoTransform};
use fimeval::{codes, Crs, EvaluationParams, ExtentStrategy, FimEvaluator, GridSpec, Raster};
use ndarray::{array, Array2};
use std::path::Path;
use tempfile::TempDir;

const ORIGIN: (f64, f64) = (100_000.0, 2_000_000.0);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn albers_grid(rows: usize, cols: usize, resolution: f64) -> GridSpec {
    GridSpec::new(
        rows,
        cols,
        GeoTransform::from_origin(ORIGIN.0, ORIGIN.1, resolution, resolution),
        Crs::from_epsg(5070).unwrap(),
    )
}

fn write_fim(path: &Path, data: Array2<f32>) {
    let (rows, cols) = data.dim();
    let raster = Raster::new(data, albers_grid(rows, cols, 10.0), Some(-9999.0)).unwrap();
    write_raster(&raster, path).unwrap();
}

/// Benchmark and two candidates. Against the benchmark `model_a` has
/// TP=3 FP=1 FN=1 TN=5 and `model_b` predicts no flooding at all.
fn synthetic_case(root: &Path) -> std::path::PathBuf {
    let case = root.join("case_houston");
    std::fs::create_dir_all(&case).unwrap();
    write_fim(
        &case.join("benchmark_flood.tif"),
        array![[1.0, 1.0, 1.0, 1.0, 0.0], [0.0, 0.0, 0.0, 0.0, 0.0]],
    );
    write_fim(
        &case.join("model_a.tif"),
        array![[1.0, 1.0, 1.0, 0.0, 1.0], [0.0, -9999.0, 0.0, 0.0, 0.0]],
    );
    write_fim(&case.join("model_b.tif"), Array2::zeros((2, 5)));
    case
}

#[test]
fn test_smallest_extent_case_end_to_end() {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let case = synthetic_case(input.path());

    let evaluator = FimEvaluator::new(EvaluationParams::new(output.path())).unwrap();
    let report = evaluator.evaluate_case(&case).expect("case should evaluate");

    assert_eq!(report.case, "case_houston");
    assert_eq!(report.output_dir, output.path().join("case_houston").join("smallest_extent"));
    assert!(report.extent_path.as_ref().unwrap().ends_with("BoundaryforEvaluation/FIMEvaluatedExtent.shp"));
    assert!(report.extent_path.as_ref().unwrap().exists());
    assert!(report.clipped_benchmark.ends_with("MaskedFIMwithBoundary/benchmark_flood_clipped.tif"));
    assert!(report.metrics_path.ends_with("EvaluationMetrics/EvaluationMetrics.csv"));
    assert_eq!(report.contingency_maps.len(), 2);
    assert!(report.contingency_maps[0].ends_with("ContingencyMaps/ContingencyMAP_model_a.tif"));

    // The harmonization working directory is removed afterwards
    assert!(!case.join("processing").exists());

    let a = report.metrics.get("model_a").unwrap();
    assert_eq!((a.counts.tp, a.counts.fp, a.counts.fn_, a.counts.tn), (3, 1, 1, 5));
    assert_abs_diff_eq!(a.csi, 0.6, epsilon = 1e-6);
    assert_abs_diff_eq!(a.pod, 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(a.far, 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(a.accuracy, 0.8, epsilon = 1e-6);

    let b = report.metrics.get("model_b").unwrap();
    assert_eq!((b.counts.tp, b.counts.fp, b.counts.fn_, b.counts.tn), (0, 0, 4, 6));
    assert_eq!(b.csi, 0.0);
    assert_eq!(b.far, 0.0);

    let map = read_contingency(&report.contingency_maps[0]).unwrap();
    assert_eq!(
        map.data,
        array![[4u8, 4, 4, 3, 2], [1, 1, 1, 1, 1]]
    );
    assert_eq!(map.grid.transform, albers_grid(2, 5, 10.0).transform);

    let csv = std::fs::read_to_string(&report.metrics_path).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("Metrics,model_a,model_b"));
    assert_eq!(lines.next(), Some("TN,5,6"));
}

#[test]
fn test_metrics_recomputed_from_persisted_map() {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let case = synthetic_case(input.path());

    let evaluator = FimEvaluator::new(EvaluationParams::new(output.path())).unwrap();
    let report = evaluator.evaluate_case(&case).unwrap();

    let from_disk = metrics_from_contingency_file(&report.contingency_maps[0]).unwrap();
    assert_eq!(&from_disk, report.metrics.get("model_a").unwrap());
}

#[test]
fn test_permanent_water_bodies_are_excluded() {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let case = synthetic_case(input.path());

    // Covers the centres of the first column only
    let pwb = input.path().join("pwb").join("water_bodies.shp");
    let water = BoundingBox::new(ORIGIN.0 - 5.0, ORIGIN.1 - 25.0, ORIGIN.0 + 10.0, ORIGIN.1 + 5.0).to_polygon();
    write_polygons(&[water], &Crs::from_epsg(5070).unwrap(), &pwb, "pwb").unwrap();

    let mut params = EvaluationParams::new(output.path());
    params.pwb_path = Some(pwb);
    let report = FimEvaluator::new(params).unwrap().evaluate_case(&case).unwrap();

    let map = read_contingency(&report.contingency_maps[0]).unwrap();
    assert_eq!(map.data.column(0).to_vec(), vec![codes::PERMANENT_WATER_BODY; 2]);

    let a = report.metrics.get("model_a").unwrap();
    assert_eq!(a.counts.permanent_water, 2);
    assert_eq!((a.counts.tp, a.counts.fp, a.counts.fn_, a.counts.tn), (2, 1, 1, 4));
    assert_eq!(a.counts.total(), 10);
}

#[test]
fn test_water_body_over_whole_extent() {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let case = synthetic_case(input.path());

    let pwb = input.path().join("lake.geojson");
    let lake = BoundingBox::new(ORIGIN.0 - 100.0, ORIGIN.1 - 100.0, ORIGIN.0 + 100.0, ORIGIN.1 + 100.0).to_polygon();
    write_polygons(&[lake], &Crs::from_epsg(5070).unwrap(), &pwb, "lake").unwrap();

    let mut params = EvaluationParams::new(output.path());
    params.pwb_path = Some(pwb);
    let report = FimEvaluator::new(params).unwrap().evaluate_case(&case).unwrap();

    for (_, metrics) in report.metrics.columns() {
        assert_eq!(metrics.counts.counted(), 0);
        assert_eq!(metrics.counts.permanent_water, 10);
        assert_eq!(metrics.csi, 0.0);
    }
}

#[test]
fn test_convex_hull_strategy_limits_comparison() {
    init_logging();
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let case = input.path().join("hull_case");
    std::fs::create_dir_all(&case).unwrap();

    // Flooding on a 2x2 block in the middle of a 6x6 grid
    let mut flood = Array2::<f32>::zeros((6, 6));
    flood.slice_mut(ndarray::s![2..4, 2..4]).fill(1.0);
    write_fim(&case.join("BM_event.tif"), flood.clone());
    write_fim(&case.join("model.tif"), flood);

    let mut params = EvaluationParams::new(output.path());
    params.strategy = ExtentStrategy::ConvexHull;
    let report = FimEvaluator::new(params).unwrap().evaluate_case(&case).unwrap();

    assert!(report.output_dir.ends_with("hull_case/convex_hull"));
    let metrics = report.metrics.get("model").unwrap();
    assert_eq!(metrics.counts.tp, 4);
    assert_eq!(metrics.counts.fp + metrics.counts.fn_, 0);
    assert_abs_diff_eq!(metrics.csi, 1.0, epsilon = 1e-6);

    let map = read_contingency(&report.contingency_maps[0]).unwrap();
    assert_eq!(map.shape(), (2, 2));
}
