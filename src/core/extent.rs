use crate::core::reproject::Reprojector;
use crate::io::case::find_aoi_file;
use crate::io::raster::{read_raster, RasterInfo};
use crate::io::vector::{read_polygons, write_polygons};
use crate::types::{BoundingBox, Crs, FimError, FimResult};
use geo::{Area, BoundingRect, ConvexHull, Coord, MultiPoint, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sub-directory holding the persisted comparison extent
pub const EXTENT_DIR: &str = "BoundaryforEvaluation";

/// File name of the persisted comparison extent
pub const EXTENT_FILE: &str = "FIMEvaluatedExtent.shp";

/// How the comparison extent of a case is determined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtentStrategy {
    /// Bounding rectangle of the raster with the fewest pixels
    SmallestExtent,
    /// Convex hull of the positive cells of the raster with the fewest pixels
    ConvexHull,
    /// Caller-supplied polygons; when `path` is `None` the first vector
    /// file found in the case folder is used
    Aoi { path: Option<PathBuf> },
}

impl Default for ExtentStrategy {
    fn default() -> Self {
        ExtentStrategy::SmallestExtent
    }
}

impl FromStr for ExtentStrategy {
    type Err = FimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smallest_extent" => Ok(ExtentStrategy::SmallestExtent),
            "convex_hull" => Ok(ExtentStrategy::ConvexHull),
            "aoi" => Ok(ExtentStrategy::Aoi { path: None }),
            other => Err(FimError::Configuration(format!(
                "Unknown extent method '{}'; expected smallest_extent, convex_hull or AOI",
                other
            ))),
        }
    }
}

/// Rasters of one (already harmonized) case
#[derive(Debug, Clone, Copy)]
pub struct ExtentInputs<'a> {
    pub benchmark: &'a RasterInfo,
    pub candidates: &'a [RasterInfo],
    pub case_dir: &'a Path,
}

impl<'a> ExtentInputs<'a> {
    pub fn rasters(&self) -> impl Iterator<Item = &'a RasterInfo> {
        std::iter::once(self.benchmark).chain(self.candidates.iter())
    }
}

impl ExtentStrategy {
    /// Label used for output directories
    pub fn name(&self) -> &'static str {
        match self {
            ExtentStrategy::SmallestExtent => "smallest_extent",
            ExtentStrategy::ConvexHull => "convex_hull",
            ExtentStrategy::Aoi { .. } => "AOI",
        }
    }

    /// Derived extents are written out for reuse; an AOI already exists on disk
    pub fn persists_extent(&self) -> bool {
        !matches!(self, ExtentStrategy::Aoi { .. })
    }

    /// Comparison polygons in the benchmark's CRS
    pub fn resolve(&self, inputs: &ExtentInputs) -> FimResult<Extent> {
        let target_crs = &inputs.benchmark.grid.crs;
        log::info!("--- {} is processing ---", self.name());

        let extent = match self {
            ExtentStrategy::SmallestExtent => {
                let smallest = smallest_of(inputs)?;
                Extent::new(vec![smallest.grid.bounds().to_polygon()], smallest.grid.crs.clone())?
            }
            ExtentStrategy::ConvexHull => {
                let smallest = smallest_of(inputs)?;
                Extent::new(vec![convex_hull_of_raster(smallest)?], smallest.grid.crs.clone())?
            }
            ExtentStrategy::Aoi { path } => {
                let path = match path {
                    Some(path) => path.clone(),
                    None => find_aoi_file(inputs.case_dir)?.ok_or_else(|| {
                        FimError::input(
                            inputs.case_dir.display().to_string(),
                            "No shapefile (.shp, .gpkg, .geojson, .kml) found in the folder and none provided",
                        )
                    })?,
                };
                let layer = read_polygons(&path)?;
                let crs = layer.crs.unwrap_or_else(|| {
                    log::warn!(
                        "{} has no CRS; assuming the benchmark CRS {}",
                        path.display(),
                        target_crs.label()
                    );
                    target_crs.clone()
                });
                Extent::new(layer.polygons, crs).map_err(|e| match e {
                    FimError::EmptyExtent(message) => {
                        FimError::input(path.display().to_string(), message)
                    }
                    other => other,
                })?
            }
        };

        extent.reprojected_to(target_crs)
    }
}

/// Raster with the fewest pixels. Ties go to the lexicographically smallest
/// path so the choice does not depend on input order.
pub fn smallest_raster<'a, I>(rasters: I) -> Option<&'a RasterInfo>
where
    I: IntoIterator<Item = &'a RasterInfo>,
{
    rasters
        .into_iter()
        .min_by(|a, b| {
            a.grid
                .pixel_count()
                .cmp(&b.grid.pixel_count())
                .then_with(|| a.path.cmp(&b.path))
        })
}

fn smallest_of<'a>(inputs: &ExtentInputs<'a>) -> FimResult<&'a RasterInfo> {
    let smallest = smallest_raster(inputs.rasters())
        .ok_or_else(|| FimError::Processing("no rasters to derive an extent from".to_string()))?;
    log::info!(
        "Smallest raster: {} ({} px)",
        smallest.path.display(),
        smallest.grid.pixel_count()
    );
    Ok(smallest)
}

/// Convex hull of every positive, valid cell. Only the outer corners of the
/// first and last positive cell of each row can be hull vertices, so those
/// are the only points collected.
fn convex_hull_of_raster(info: &RasterInfo) -> FimResult<Polygon<f64>> {
    let raster = read_raster(&info.path)?;
    let transform = raster.grid.transform;
    let mut points: Vec<Point<f64>> = Vec::new();

    for (row, values) in raster.data.outer_iter().enumerate() {
        let flooded = |v: &f32| !raster.is_nodata(*v) && *v > 0.0;
        let (Some(first), Some(last)) = (values.iter().position(flooded), values.iter().rposition(flooded))
        else {
            continue;
        };
        for (col, row_edge) in [
            (first as f64, row as f64),
            (first as f64, (row + 1) as f64),
            ((last + 1) as f64, row as f64),
            ((last + 1) as f64, (row + 1) as f64),
        ] {
            let (x, y) = transform.pixel_to_map(col, row_edge);
            points.push(Point(Coord { x, y }));
        }
    }

    if points.is_empty() {
        return Err(FimError::EmptyExtent(format!(
            "{} has no positive cells to build a convex hull from",
            info.path.display()
        )));
    }
    Ok(MultiPoint(points).convex_hull())
}

/// Polygons, in one CRS, over which benchmark and candidates are compared.
/// Never empty.
#[derive(Debug, Clone)]
pub struct Extent {
    polygons: Vec<Polygon<f64>>,
    crs: Crs,
}

impl Extent {
    pub fn new(polygons: Vec<Polygon<f64>>, crs: Crs) -> FimResult<Self> {
        let polygons: Vec<Polygon<f64>> = polygons
            .into_iter()
            .filter(|p| p.unsigned_area() > 0.0)
            .collect();
        if polygons.is_empty() {
            return Err(FimError::EmptyExtent(
                "no polygon with a non-zero area".to_string(),
            ));
        }
        Ok(Self { polygons, crs })
    }

    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.polygons
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for rect in self.polygons.iter().filter_map(|p| p.bounding_rect()) {
            bbox.min_x = bbox.min_x.min(rect.min().x);
            bbox.min_y = bbox.min_y.min(rect.min().y);
            bbox.max_x = bbox.max_x.max(rect.max().x);
            bbox.max_y = bbox.max_y.max(rect.max().y);
        }
        bbox
    }

    pub fn reprojected_to(&self, target: &Crs) -> FimResult<Self> {
        let reprojector = Reprojector::new(&self.crs, target)?;
        if reprojector.is_identity() {
            return Ok(Self {
                polygons: self.polygons.clone(),
                crs: target.clone(),
            });
        }
        let polygons = self
            .polygons
            .iter()
            .map(|p| reprojector.transform_polygon(p))
            .collect::<FimResult<Vec<_>>>()?;
        Self::new(polygons, target.clone())
    }

    /// Write the extent to `<save_dir>/BoundaryforEvaluation/FIMEvaluatedExtent.shp`
    pub fn persist(&self, save_dir: &Path) -> FimResult<PathBuf> {
        let path = save_dir.join(EXTENT_DIR).join(EXTENT_FILE);
        write_polygons(&self.polygons, &self.crs, &path, "FIMEvaluatedExtent")?;
        log::info!("Evaluated extent saved to {}", path.display());
        Ok(path)
    }
}
