use crate::core::rasterize::{rasterize, BurnRule};
use crate::core::reproject::Reprojector;
use crate::io::vector::read_polygons;
use crate::types::{BoundingBox, Crs, FimError, FimResult, GridSpec};
use geo::{BoundingRect, Polygon};
use ndarray::Array2;
use std::path::Path;

/// Permanent water body polygons. Read-only once loaded; cells inside them
/// count neither as a model error nor as a benchmark error.
#[derive(Debug, Clone)]
pub struct WaterBodyMask {
    polygons: Vec<Polygon<f64>>,
    crs: Option<Crs>,
}

impl WaterBodyMask {
    /// Load the polygons of a vector dataset in any CRS GDAL understands
    pub fn from_file<P: AsRef<Path>>(path: P) -> FimResult<Self> {
        let path = path.as_ref();
        log::info!("Loading permanent water bodies: {}", path.display());

        let layer = read_polygons(path)?;
        if layer.polygons.is_empty() {
            return Err(FimError::input(
                path.display().to_string(),
                "permanent water body dataset contains no polygons",
            ));
        }
        if layer.crs.is_none() {
            log::warn!(
                "{} has no CRS; assuming it matches each raster under test",
                path.display()
            );
        }
        Ok(Self {
            polygons: layer.polygons,
            crs: layer.crs,
        })
    }

    pub fn from_polygons(polygons: Vec<Polygon<f64>>, crs: Crs) -> Self {
        Self {
            polygons,
            crs: Some(crs),
        }
    }

    /// A mask that excludes nothing
    pub fn none() -> Self {
        Self {
            polygons: Vec::new(),
            crs: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn polygons(&self) -> &[Polygon<f64>] {
        &self.polygons
    }

    /// Copy of the mask expressed in `target`, keeping only the polygons
    /// that reach `bounds` (given in `target`). Polygons that cannot be
    /// transformed into `target` are skipped.
    pub fn reprojected_within(&self, target: &Crs, bounds: &BoundingBox) -> FimResult<Self> {
        let Some(source) = self.crs.as_ref().filter(|_| !self.polygons.is_empty()) else {
            return Ok(Self {
                polygons: self.polygons.clone(),
                crs: Some(target.clone()),
            });
        };

        let local_bounds = Reprojector::new(target, source)?.transform_bounds(bounds)?;
        let reprojector = Reprojector::new(source, target)?;
        let mut polygons = Vec::new();
        for polygon in &self.polygons {
            let Some(rect) = polygon.bounding_rect() else {
                continue;
            };
            let rect = BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
            if !rect.intersects(&local_bounds) {
                continue;
            }
            match reprojector.transform_polygon(polygon) {
                Ok(moved) => polygons.push(moved),
                Err(e) => log::debug!("Skipping water body at {:?}: {}", rect, e),
            }
        }

        log::debug!(
            "{} of {} water bodies reach the raster in {}",
            polygons.len(),
            self.polygons.len(),
            target.label()
        );
        Ok(Self {
            polygons,
            crs: Some(target.clone()),
        })
    }

    /// Cells of `grid` whose centre lies inside a water body. The mask must
    /// already be in the grid's CRS.
    pub fn cells(&self, grid: &GridSpec) -> FimResult<Array2<bool>> {
        if let Some(crs) = &self.crs {
            if !self.polygons.is_empty() && !crs.is_same(&grid.crs) {
                return Err(FimError::Processing(format!(
                    "water body mask is in {} but the grid is in {}",
                    crs.label(),
                    grid.crs.label()
                )));
            }
        }
        rasterize(&self.polygons, grid, BurnRule::CellCenter)
    }
}
