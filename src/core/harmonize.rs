//! Brings the rasters of one case onto a common CRS and pixel size

use crate::core::reproject::{grid_at_resolution, reproject_nearest, warp_nearest, Reprojector};
use crate::io::case::list_rasters;
use crate::io::raster::{copy_compressed, inspect, read_raster, write_raster, RasterInfo};
use crate::types::{BoundingBox, Crs, FimError, FimResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Working sub-directory created inside a case folder
pub const DEFAULT_WORKING_DIR: &str = "processing";

/// Conterminous United States in EPSG:4326 (lon/lat)
pub const CONUS_BOUNDS: BoundingBox = BoundingBox {
    min_x: -125.0,
    min_y: 24.0,
    max_x: -66.5,
    max_y: 49.5,
};

/// CRS used when every raster lies inside [`CONUS_BOUNDS`]
pub const CONUS_CRS: &str = "EPSG:5070";

/// Relative tolerance when comparing pixel sizes
const RESOLUTION_TOLERANCE: f64 = 1e-9;

/// Harmonization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonizeParams {
    /// Any CRS definition GDAL accepts, e.g. `EPSG:32615`
    pub target_crs: Option<String>,
    /// Pixel size in the linear unit of the final CRS
    pub target_resolution: Option<f64>,
    pub working_dir_name: String,
}

impl Default for HarmonizeParams {
    fn default() -> Self {
        Self {
            target_crs: None,
            target_resolution: None,
            working_dir_name: DEFAULT_WORKING_DIR.to_string(),
        }
    }
}

impl HarmonizeParams {
    pub fn validate(&self) -> FimResult<()> {
        if let Some(resolution) = self.target_resolution {
            if !(resolution.is_finite() && resolution > 0.0) {
                return Err(FimError::Configuration(format!(
                    "target resolution must be a positive number, got {}",
                    resolution
                )));
            }
        }
        if self.working_dir_name.trim().is_empty() {
            return Err(FimError::Configuration(
                "working directory name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of the CRS step
#[derive(Debug, Clone)]
pub enum CrsDecision {
    /// All rasters share one projected CRS
    CopyThrough,
    Reproject(Crs),
}

/// Outcome of the resolution step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolutionDecision {
    Unchanged,
    Resample { x: f64, y: f64 },
}

fn same_resolution(a: (f64, f64), b: (f64, f64)) -> bool {
    let close = |p: f64, q: f64| (p - q).abs() <= RESOLUTION_TOLERANCE * p.abs().max(q.abs());
    close(a.0, b.0) && close(a.1, b.1)
}

/// True when the raster's bounds, expressed in lon/lat, fall inside CONUS
pub fn is_within_conus(info: &RasterInfo) -> FimResult<bool> {
    let wgs84 = Crs::from_epsg(4326)?;
    let bounds = Reprojector::new(&info.grid.crs, &wgs84)?.transform_bounds(&info.grid.bounds())?;
    Ok(CONUS_BOUNDS.contains(&bounds))
}

#[derive(Debug, Clone)]
pub struct Harmonizer {
    params: HarmonizeParams,
}

impl Harmonizer {
    pub fn new(params: HarmonizeParams) -> FimResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Harmonizer without target CRS or resolution
    pub fn standard() -> Self {
        Self {
            params: HarmonizeParams::default(),
        }
    }

    pub fn params(&self) -> &HarmonizeParams {
        &self.params
    }

    pub fn working_dir(&self, case_dir: &Path) -> PathBuf {
        case_dir.join(&self.params.working_dir_name)
    }

    /// Harmonize every GeoTIFF directly inside `case_dir` into its working
    /// sub-directory. Returns the harmonized paths, sorted.
    pub fn harmonize_dir(&self, case_dir: &Path) -> FimResult<Vec<PathBuf>> {
        let rasters = list_rasters(case_dir)?;
        self.harmonize(&rasters, &self.working_dir(case_dir))
    }

    /// Write harmonized copies of `rasters` into `working_dir`. The
    /// originals are never modified.
    pub fn harmonize(&self, rasters: &[PathBuf], working_dir: &Path) -> FimResult<Vec<PathBuf>> {
        if rasters.is_empty() {
            return Err(FimError::input(
                working_dir.display().to_string(),
                "no GeoTIFF files found to harmonize",
            ));
        }
        std::fs::create_dir_all(working_dir)?;

        let infos = rasters.iter().map(inspect).collect::<FimResult<Vec<_>>>()?;
        let mut outputs = Vec::with_capacity(infos.len());

        match self.choose_crs(&infos)? {
            CrsDecision::CopyThrough => {
                log::info!("All rasters are in the same projected CRS, copying to {}", working_dir.display());
                for info in &infos {
                    let destination = output_path(working_dir, &info.path)?;
                    copy_compressed(&info.path, &destination)?;
                    outputs.push(destination);
                }
            }
            CrsDecision::Reproject(target) => {
                log::info!("Reprojecting all rasters to {}", target.label());
                for info in &infos {
                    let destination = output_path(working_dir, &info.path)?;
                    if info.grid.crs.is_same(&target) {
                        log::debug!("{} is already in {}", info.path.display(), target.label());
                        copy_compressed(&info.path, &destination)?;
                    } else {
                        reproject_file(&info.path, &target, &destination)?;
                    }
                    outputs.push(destination);
                }
            }
        }

        let resolutions = outputs
            .iter()
            .map(|p| inspect(p).map(|info| info.grid.resolution()))
            .collect::<FimResult<Vec<_>>>()?;

        match self.choose_resolution(&resolutions) {
            ResolutionDecision::Unchanged => {
                log::info!("All rasters already have the same resolution, no resampling needed");
            }
            ResolutionDecision::Resample { x, y } => {
                log::info!("Resampling all rasters to X={} Y={}", x, y);
                for path in &outputs {
                    resample_in_place(path, x, y)?;
                }
            }
        }

        outputs.sort();
        Ok(outputs)
    }

    /// CRS step: copy through a uniform projected set, otherwise reproject
    /// to the caller's CRS or, inside CONUS, to [`CONUS_CRS`].
    pub fn choose_crs(&self, infos: &[RasterInfo]) -> FimResult<CrsDecision> {
        let all_projected = infos.iter().all(|i| i.grid.crs.is_projected());
        let all_same = infos
            .windows(2)
            .all(|pair| pair[0].grid.crs.is_same(&pair[1].grid.crs));
        if all_projected && all_same {
            return Ok(CrsDecision::CopyThrough);
        }

        if let Some(definition) = &self.params.target_crs {
            return Ok(CrsDecision::Reproject(Crs::from_user_input(definition)?));
        }

        let mut inside = true;
        for info in infos {
            // Bounds that cannot be expressed in lon/lat are treated as outside
            inside &= is_within_conus(info).unwrap_or(false);
        }
        if inside {
            log::info!("Defaulting to CONUS CRS: {}", CONUS_CRS);
            return Ok(CrsDecision::Reproject(Crs::from_user_input(CONUS_CRS)?));
        }

        Err(FimError::Configuration(
            "Mixed or non-projected CRS detected outside CONUS. Please provide a valid target CRS."
                .to_string(),
        ))
    }

    /// Resolution step: the caller's resolution, else the coarsest pixel
    /// size in X and Y when the rasters disagree
    pub fn choose_resolution(&self, resolutions: &[(f64, f64)]) -> ResolutionDecision {
        if let Some(resolution) = self.params.target_resolution {
            return ResolutionDecision::Resample {
                x: resolution,
                y: resolution,
            };
        }
        let Some(&first) = resolutions.first() else {
            return ResolutionDecision::Unchanged;
        };
        if resolutions.iter().all(|&r| same_resolution(r, first)) {
            return ResolutionDecision::Unchanged;
        }
        let x = resolutions.iter().map(|r| r.0).fold(f64::MIN, f64::max);
        let y = resolutions.iter().map(|r| r.1).fold(f64::MIN, f64::max);
        ResolutionDecision::Resample { x, y }
    }
}

fn output_path(working_dir: &Path, source: &Path) -> FimResult<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        FimError::input(source.display().to_string(), "raster path has no file name")
    })?;
    Ok(working_dir.join(name))
}

fn fill_value(nodata: Option<f64>) -> f32 {
    nodata.map(|v| v as f32).unwrap_or(0.0)
}

fn reproject_file(source: &Path, target: &Crs, destination: &Path) -> FimResult<()> {
    let raster = read_raster(source)?;
    let reprojected = reproject_nearest(&raster, target, fill_value(raster.nodata))?;
    log::debug!(
        "{}: {}x{} px -> {}x{} px in {}",
        source.display(),
        raster.grid.cols,
        raster.grid.rows,
        reprojected.grid.cols,
        reprojected.grid.rows,
        target.label()
    );
    write_raster(&reprojected, destination)
}

/// Replace `path` with a copy resampled to the given pixel size, anchored
/// at its own top-left corner
fn resample_in_place(path: &Path, x_resolution: f64, y_resolution: f64) -> FimResult<()> {
    let raster = read_raster(path)?;
    let grid = grid_at_resolution(&raster.grid, x_resolution, y_resolution);
    let resampled = warp_nearest(&raster, &grid, fill_value(raster.nodata))?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{}_resampled.tif", stem));
    write_raster(&resampled, &temp_path)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
