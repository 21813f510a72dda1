//! Per-cell confusion classification of a candidate against a benchmark.
//!
//! Each stage consumes the previous one and returns a new grid, so the order
//! encode -> reproject -> clip -> water-body override -> align -> merge is
//! fixed by the types:
//!
//! ```text
//! benchmark: ValueRaster -> MaskedBenchmark
//! candidate: ValueRaster -> EncodedCandidate -> ClippedCandidate
//!                        -> MaskedCandidate -> AlignedCandidate
//! MaskedBenchmark + AlignedCandidate -> ContingencyMap
//! ```

use crate::core::extent::Extent;
use crate::core::metrics::{ConfusionCounts, EvaluationMetrics};
use crate::core::rasterize::{clip, BurnRule};
use crate::core::reproject::{reproject_nearest, warp_nearest};
use crate::core::water_bodies::WaterBodyMask;
use crate::io::raster::write_raster;
use crate::types::{codes, ClassRaster, Crs, FimError, FimResult, ValueRaster};
use ndarray::Zip;
use std::path::Path;

fn is_flooded(raster: &ValueRaster, value: f32) -> bool {
    !raster.is_nodata(value) && value.is_finite() && value > 0.0
}

/// Benchmark clipped to the extent and encoded as 0/2, with permanent
/// water bodies forced to dry. Its grid is the reference grid of the case.
#[derive(Debug, Clone)]
pub struct MaskedBenchmark {
    raster: ClassRaster,
}

impl MaskedBenchmark {
    pub fn new(raw: &ValueRaster, extent: &Extent, water: &WaterBodyMask) -> FimResult<Self> {
        let clipped = clip(raw, extent.polygons(), BurnRule::AllTouched)?;
        let source = &clipped.raster;
        let mut data = source.data.mapv(|v| {
            if is_flooded(source, v) {
                codes::BENCHMARK_FLOODED
            } else {
                codes::BENCHMARK_DRY
            }
        });
        Zip::from(&mut data)
            .and(&clipped.inside)
            .for_each(|cell, &inside| {
                if !inside {
                    *cell = codes::BENCHMARK_DRY;
                }
            });

        let water_cells = water.cells(&source.grid)?;
        Zip::from(&mut data).and(&water_cells).for_each(|cell, &wet| {
            if wet && *cell == codes::BENCHMARK_FLOODED {
                *cell = codes::BENCHMARK_DRY;
            }
        });

        Ok(Self {
            raster: ClassRaster::new(data, source.grid.clone(), None)?,
        })
    }

    pub fn raster(&self) -> &ClassRaster {
        &self.raster
    }

    /// Cell-wise sum with an aligned candidate
    pub fn merge(&self, candidate: &AlignedCandidate) -> FimResult<ContingencyMap> {
        let (b, c) = (&self.raster, &candidate.raster);
        if b.shape() != c.shape() || b.grid.transform != c.grid.transform {
            return Err(FimError::UnexpectedShape(format!(
                "candidate grid {:?} does not match benchmark grid {:?}",
                c.shape(),
                b.shape()
            )));
        }
        let merged = Zip::from(&b.data)
            .and(&c.data)
            .map_collect(|&b, &c| b.saturating_add(c));
        Ok(ContingencyMap {
            raster: ClassRaster::new(merged, b.grid.clone(), None)?,
        })
    }
}

/// Candidate encoded as 1 (dry) / 2 (flooded) on its own grid. Nodata
/// counts as dry.
#[derive(Debug, Clone)]
pub struct EncodedCandidate {
    raster: ClassRaster,
}

impl EncodedCandidate {
    pub fn encode(raw: &ValueRaster) -> Self {
        let raster = raw.map(None, |v| {
            if is_flooded(raw, v) {
                codes::CANDIDATE_FLOODED
            } else {
                codes::CANDIDATE_DRY
            }
        });
        Self { raster }
    }

    /// Nearest-neighbour reprojection of the encoded grid. Cells the source
    /// does not cover become no-data.
    pub fn reproject_to(self, crs: &Crs) -> FimResult<Self> {
        let raster = reproject_nearest(&self.raster, crs, codes::CANDIDATE_NO_DATA)?;
        Ok(Self { raster })
    }

    pub fn clip(self, extent: &Extent) -> FimResult<ClippedCandidate> {
        if !extent.crs().is_same(&self.raster.grid.crs) {
            return Err(FimError::Processing(format!(
                "extent is in {} but the candidate is in {}",
                extent.crs().label(),
                self.raster.grid.crs.label()
            )));
        }
        let clipped = clip(&self.raster, extent.polygons(), BurnRule::AllTouched)?;
        let mut data = clipped.raster.data;
        Zip::from(&mut data)
            .and(&clipped.inside)
            .for_each(|cell, &inside| {
                if !inside {
                    *cell = codes::CANDIDATE_NO_DATA;
                }
            });
        Ok(ClippedCandidate {
            raster: ClassRaster::new(data, clipped.raster.grid, None)?,
        })
    }
}

/// Encoded candidate cropped to the extent; 0 outside it
#[derive(Debug, Clone)]
pub struct ClippedCandidate {
    raster: ClassRaster,
}

impl ClippedCandidate {
    pub fn raster(&self) -> &ClassRaster {
        &self.raster
    }

    /// Every cell inside a water body becomes 5, whatever it held before.
    /// Cells outside the extent stay no-data.
    pub fn mask_water(self, water: &WaterBodyMask) -> FimResult<MaskedCandidate> {
        let water_cells = water.cells(&self.raster.grid)?;
        let mut raster = self.raster;
        Zip::from(&mut raster.data)
            .and(&water_cells)
            .for_each(|cell, &wet| {
                if wet && *cell != codes::CANDIDATE_NO_DATA {
                    *cell = codes::CANDIDATE_WATER_BODY;
                }
            });
        Ok(MaskedCandidate { raster })
    }
}

#[derive(Debug, Clone)]
pub struct MaskedCandidate {
    raster: ClassRaster,
}

impl MaskedCandidate {
    /// Resample onto the exact grid of the benchmark
    pub fn align_to(self, benchmark: &MaskedBenchmark) -> FimResult<AlignedCandidate> {
        let raster = warp_nearest(&self.raster, &benchmark.raster.grid, codes::CANDIDATE_NO_DATA)?;
        Ok(AlignedCandidate { raster })
    }
}

/// Candidate on the benchmark's grid, ready to merge
#[derive(Debug, Clone)]
pub struct AlignedCandidate {
    raster: ClassRaster,
}

impl AlignedCandidate {
    pub fn raster(&self) -> &ClassRaster {
        &self.raster
    }
}

/// Merged benchmark + candidate classes on the clipped benchmark grid
#[derive(Debug, Clone)]
pub struct ContingencyMap {
    raster: ClassRaster,
}

impl ContingencyMap {
    pub fn raster(&self) -> &ClassRaster {
        &self.raster
    }

    pub fn into_raster(self) -> ClassRaster {
        self.raster
    }

    pub fn counts(&self) -> ConfusionCounts {
        ConfusionCounts::from_raster(&self.raster)
    }

    pub fn metrics(&self) -> EvaluationMetrics {
        self.counts().metrics()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> FimResult<()> {
        write_raster(&self.raster, path)
    }
}

/// Result of classifying one candidate
#[derive(Debug, Clone)]
pub struct Classification {
    pub clipped_candidate: ClippedCandidate,
    pub contingency: ContingencyMap,
}

/// Classifies candidates of one case against a benchmark prepared once
pub struct ContingencyClassifier {
    benchmark: MaskedBenchmark,
    extent: Extent,
    water: WaterBodyMask,
}

impl ContingencyClassifier {
    /// `extent` must be in the benchmark's CRS; `water` may be in any CRS
    pub fn new(benchmark_raw: &ValueRaster, extent: Extent, water: &WaterBodyMask) -> FimResult<Self> {
        let crs = &benchmark_raw.grid.crs;
        let extent = extent.reprojected_to(crs)?;
        let water = water.reprojected_within(crs, &benchmark_raw.grid.bounds())?;
        let benchmark = MaskedBenchmark::new(benchmark_raw, &extent, &water)?;

        let (rows, cols) = benchmark.raster.shape();
        log::debug!("Benchmark clipped to {}x{} px", cols, rows);
        Ok(Self { benchmark, extent, water })
    }

    pub fn benchmark(&self) -> &MaskedBenchmark {
        &self.benchmark
    }

    pub fn classify(&self, candidate_raw: &ValueRaster) -> FimResult<Classification> {
        let clipped_candidate = EncodedCandidate::encode(candidate_raw)
            .reproject_to(&self.benchmark.raster.grid.crs)?
            .clip(&self.extent)?;
        let aligned = clipped_candidate
            .clone()
            .mask_water(&self.water)?
            .align_to(&self.benchmark)?;
        let contingency = self.benchmark.merge(&aligned)?;
        Ok(Classification {
            clipped_candidate,
            contingency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reproject::Reprojector;
    use crate::types::{BoundingBox, GeoTransform, GridSpec, Raster};
    use approx::assert_abs_diff_eq;
    use geo::polygon;
    use ndarray::{array, Array2};

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::from_origin(0.0, rows as f64 * 10.0, 10.0, 10.0),
            Crs::from_epsg(5070).unwrap(),
        )
    }

    fn raster(data: Array2<f32>) -> ValueRaster {
        let (rows, cols) = data.dim();
        Raster::new(data, grid(rows, cols), Some(-9999.0)).unwrap()
    }

    fn full_extent(r: &ValueRaster) -> Extent {
        Extent::new(vec![r.grid.bounds().to_polygon()], r.grid.crs.clone()).unwrap()
    }

    fn classify(benchmark: &ValueRaster, candidate: &ValueRaster, water: &WaterBodyMask) -> ClassRaster {
        let classifier = ContingencyClassifier::new(benchmark, full_extent(benchmark), water).unwrap();
        classifier.classify(candidate).unwrap().contingency.into_raster()
    }

    #[test]
    fn test_all_dry_is_true_negative() {
        let benchmark = raster(Array2::zeros((4, 4)));
        let candidate = raster(Array2::zeros((4, 4)));
        let map = classify(&benchmark, &candidate, &WaterBodyMask::none());
        assert!(map.data.iter().all(|&c| c == codes::TRUE_NEGATIVE));
    }

    #[test]
    fn test_all_flooded_is_true_positive() {
        let benchmark = raster(Array2::from_elem((3, 5), 1.0));
        let candidate = raster(Array2::from_elem((3, 5), 7.0));
        let map = classify(&benchmark, &candidate, &WaterBodyMask::none());
        assert!(map.data.iter().all(|&c| c == codes::TRUE_POSITIVE));

        let metrics = ConfusionCounts::from_raster(&map).metrics();
        assert_eq!(metrics.counts.tp, 15);
        assert_abs_diff_eq!(metrics.accuracy, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(metrics.csi, 1.0, epsilon = 1e-6);
        assert_eq!(metrics.far, 0.0);
    }

    #[test]
    fn test_mixed_classes_and_nodata() {
        let benchmark = raster(array![[1.0, 1.0], [0.0, -9999.0]]);
        let candidate = raster(array![[1.0, -9999.0], [1.0, 0.0]]);
        let map = classify(&benchmark, &candidate, &WaterBodyMask::none());
        assert_eq!(
            map.data,
            array![
                [codes::TRUE_POSITIVE, codes::FALSE_NEGATIVE],
                [codes::FALSE_POSITIVE, codes::TRUE_NEGATIVE]
            ]
        );
    }

    #[test]
    fn test_water_body_covering_extent_excludes_everything() {
        let benchmark = raster(array![[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
        let candidate = raster(array![[0.0, 1.0, 1.0], [0.0, 0.0, 1.0]]);
        let water = WaterBodyMask::from_polygons(
            vec![BoundingBox::new(-5.0, -5.0, 100.0, 100.0).to_polygon()],
            benchmark.grid.crs.clone(),
        );

        let map = classify(&benchmark, &candidate, &water);
        assert!(map.data.iter().all(|&c| c == codes::PERMANENT_WATER_BODY));
        let counts = ConfusionCounts::from_raster(&map);
        assert_eq!(counts.counted(), 0);
        assert_eq!(counts.permanent_water, 6);
    }

    #[test]
    fn test_water_body_overrides_only_cells_it_covers() {
        let benchmark = raster(Array2::from_elem((2, 4), 1.0));
        let candidate = raster(Array2::from_elem((2, 4), 1.0));
        // Covers the centres of the left two columns
        let water = WaterBodyMask::from_polygons(
            vec![BoundingBox::new(0.0, 0.0, 20.0, 20.0).to_polygon()],
            benchmark.grid.crs.clone(),
        );

        let map = classify(&benchmark, &candidate, &water);
        assert_eq!(
            map.data,
            array![[5u8, 5, 4, 4], [5, 5, 4, 4]]
        );
    }

    #[test]
    fn test_cells_outside_extent_are_no_data() {
        let benchmark = raster(Array2::from_elem((4, 4), 1.0));
        let candidate = raster(Array2::from_elem((4, 4), 1.0));
        // Triangle over the lower-left half, aligned to cell corners
        let triangle = geo::polygon![
            (x: 0.0, y: 0.0),
            (x: 40.0, y: 0.0),
            (x: 0.0, y: 40.0),
            (x: 0.0, y: 0.0),
        ];
        let extent = Extent::new(vec![triangle], benchmark.grid.crs.clone()).unwrap();
        let classifier = ContingencyClassifier::new(&benchmark, extent, &WaterBodyMask::none()).unwrap();
        let map = classifier.classify(&candidate).unwrap().contingency.into_raster();

        assert_eq!(map.data[[3, 0]], codes::TRUE_POSITIVE);
        assert_eq!(map.data[[0, 3]], codes::NO_DATA);
        let counts = ConfusionCounts::from_raster(&map);
        assert_eq!(counts.total(), 16);
        assert!(counts.other > 0);
    }

    #[test]
    fn test_candidate_on_coarser_grid_is_aligned() {
        let benchmark = raster(Array2::from_elem((4, 4), 1.0));
        let candidate = Raster::new(
            array![[1.0f32, 0.0], [0.0, 1.0]],
            GridSpec::new(
                2,
                2,
                GeoTransform::from_origin(0.0, 40.0, 20.0, 20.0),
                benchmark.grid.crs.clone(),
            ),
            None,
        )
        .unwrap();

        let map = classify(&benchmark, &candidate, &WaterBodyMask::none());
        assert_eq!(map.shape(), (4, 4));
        assert_eq!(map.data[[0, 0]], codes::TRUE_POSITIVE);
        assert_eq!(map.data[[0, 3]], codes::FALSE_NEGATIVE);
        assert_eq!(map.data[[3, 3]], codes::TRUE_POSITIVE);
    }

    #[test]
    fn test_candidate_in_another_crs_is_classified_first() {
        // 6x6 benchmark at 30 m in CONUS Albers, flooded on the west half
        let albers = GridSpec::new(
            6,
            6,
            GeoTransform::from_origin(100_000.0, 2_000_000.0, 30.0, 30.0),
            Crs::from_epsg(5070).unwrap(),
        );
        let mut flood = Array2::<f32>::zeros((6, 6));
        flood.slice_mut(ndarray::s![.., ..3]).fill(1.0);
        let benchmark = Raster::new(flood, albers.clone(), Some(-9999.0)).unwrap();

        // Candidate in UTM 15N, flooded everywhere, with a margin around the
        // benchmark footprint
        let utm = Crs::from_epsg(32615).unwrap();
        let footprint = Reprojector::new(&albers.crs, &utm)
            .unwrap()
            .transform_bounds(&albers.bounds())
            .unwrap();
        let cover = BoundingBox::new(
            footprint.min_x - 100.0,
            footprint.min_y - 100.0,
            footprint.max_x + 100.0,
            footprint.max_y + 100.0,
        );
        let cols = (cover.width() / 30.0).ceil() as usize;
        let rows = (cover.height() / 30.0).ceil() as usize;
        let candidate = Raster::new(
            Array2::from_elem((rows, cols), 1.0f32),
            GridSpec::new(
                rows,
                cols,
                GeoTransform::from_origin(cover.min_x, cover.max_y, 30.0, 30.0),
                utm.clone(),
            ),
            None,
        )
        .unwrap();

        // Extent handed over in the candidate's CRS
        let extent = Extent::new(vec![cover.to_polygon()], utm).unwrap();
        let classifier = ContingencyClassifier::new(&benchmark, extent, &WaterBodyMask::none()).unwrap();
        let classification = classifier.classify(&candidate).unwrap();
        assert!(classification.clipped_candidate.raster().grid.crs.is_same(&albers.crs));

        let map = classification.contingency.into_raster();
        assert_eq!(map.shape(), (6, 6));
        assert_eq!(map.grid.transform, albers.transform);
        for row in map.data.rows() {
            assert_eq!(row.to_vec(), vec![4u8, 4, 4, 2, 2, 2]);
        }

        // Water bodies given in geographic coordinates
        let lon_lat = Reprojector::new(&albers.crs, &Crs::from_epsg(4326).unwrap())
            .unwrap()
            .transform_bounds(&albers.bounds())
            .unwrap();
        let lake = BoundingBox::new(
            lon_lat.min_x - 0.01,
            lon_lat.min_y - 0.01,
            lon_lat.max_x + 0.01,
            lon_lat.max_y + 0.01,
        );
        let water = WaterBodyMask::from_polygons(vec![lake.to_polygon()], Crs::from_epsg(4326).unwrap());
        let map = classify(&benchmark, &candidate, &water);
        let counts = ConfusionCounts::from_raster(&map);
        assert_eq!(counts.permanent_water, 36);
        assert_eq!(counts.counted(), 0);
    }
}
