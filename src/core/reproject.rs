use crate::types::{BoundingBox, Crs, FimError, FimResult, GeoTransform, GridSpec, Raster};
use gdal::spatial_ref::CoordTransform;
use geo::{Coord, LineString, Polygon};
use ndarray::Array2;

/// Points sampled along each bounding box edge when transforming bounds
const EDGE_SAMPLES: usize = 21;

/// Coordinate transformation between two CRSs. Identity when both CRSs
/// are the same, so no PROJ round-off is introduced in that case.
pub struct Reprojector {
    transform: Option<CoordTransform>,
}

impl Reprojector {
    pub fn new(source: &Crs, target: &Crs) -> FimResult<Self> {
        if source.is_same(target) {
            return Ok(Self { transform: None });
        }
        let transform = CoordTransform::new(&source.to_spatial_ref()?, &target.to_spatial_ref()?)?;
        Ok(Self {
            transform: Some(transform),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }

    /// Transform coordinates in place. Points that cannot be transformed
    /// are set to NaN instead of failing the whole batch.
    pub fn transform_points(&self, xs: &mut [f64], ys: &mut [f64]) -> FimResult<()> {
        let Some(transform) = &self.transform else {
            return Ok(());
        };
        let mut zs = vec![0.0; xs.len()];
        let (x_backup, y_backup) = (xs.to_vec(), ys.to_vec());
        if transform.transform_coords(xs, ys, &mut zs).is_ok() {
            return Ok(());
        }

        // Batch rejected: at least one point is outside the projection domain
        for i in 0..xs.len() {
            let mut x = [x_backup[i]];
            let mut y = [y_backup[i]];
            let mut z = [0.0];
            match transform.transform_coords(&mut x, &mut y, &mut z) {
                Ok(()) => {
                    xs[i] = x[0];
                    ys[i] = y[0];
                }
                Err(_) => {
                    xs[i] = f64::NAN;
                    ys[i] = f64::NAN;
                }
            }
        }
        Ok(())
    }

    /// Bounds of the transformed box, densified along its edges
    pub fn transform_bounds(&self, bbox: &BoundingBox) -> FimResult<BoundingBox> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
        let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
        for i in 0..EDGE_SAMPLES {
            let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            xs.extend([x, x, bbox.min_x, bbox.max_x]);
            ys.extend([bbox.min_y, bbox.max_y, y, y]);
        }
        self.transform_points(&mut xs, &mut ys)?;

        let mut out = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x.is_finite() && y.is_finite() {
                out.min_x = out.min_x.min(x);
                out.min_y = out.min_y.min(y);
                out.max_x = out.max_x.max(x);
                out.max_y = out.max_y.max(y);
            }
        }
        if out.min_x > out.max_x || out.min_y > out.max_y {
            return Err(FimError::Processing(format!(
                "bounds {:?} could not be transformed to the target CRS",
                bbox
            )));
        }
        Ok(out)
    }

    fn transform_ring(&self, ring: &LineString<f64>) -> FimResult<LineString<f64>> {
        let mut xs: Vec<f64> = ring.0.iter().map(|c| c.x).collect();
        let mut ys: Vec<f64> = ring.0.iter().map(|c| c.y).collect();
        self.transform_points(&mut xs, &mut ys)?;
        if xs.iter().chain(&ys).any(|v| !v.is_finite()) {
            return Err(FimError::Processing(
                "polygon vertex falls outside the target CRS domain".to_string(),
            ));
        }
        Ok(LineString(
            xs.into_iter().zip(ys).map(|(x, y)| Coord { x, y }).collect(),
        ))
    }

    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> FimResult<Polygon<f64>> {
        if self.is_identity() {
            return Ok(polygon.clone());
        }
        let exterior = self.transform_ring(polygon.exterior())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| self.transform_ring(ring))
            .collect::<FimResult<Vec<_>>>()?;
        Ok(Polygon::new(exterior, interiors))
    }
}

/// Output grid for reprojecting `source` into `target_crs`, following
/// GDAL's suggested-warp-output rule: the transformed extent is covered
/// with square pixels that keep the pixel count along the diagonal.
pub fn default_output_grid(source: &GridSpec, target_crs: &Crs) -> FimResult<GridSpec> {
    let reprojector = Reprojector::new(&source.crs, target_crs)?;
    if reprojector.is_identity() {
        let mut grid = source.clone();
        grid.crs = target_crs.clone();
        return Ok(grid);
    }

    let bounds = reprojector.transform_bounds(&source.bounds())?;
    let source_diagonal = ((source.cols * source.cols + source.rows * source.rows) as f64).sqrt();
    let target_diagonal = bounds.width().hypot(bounds.height());
    let pixel_size = target_diagonal / source_diagonal;
    if !(pixel_size.is_finite() && pixel_size > 0.0) {
        return Err(FimError::Processing(format!(
            "degenerate output grid for {} -> {}",
            source.crs.label(),
            target_crs.label()
        )));
    }

    let cols = ((bounds.width() / pixel_size).round() as usize).max(1);
    let rows = ((bounds.height() / pixel_size).round() as usize).max(1);
    let transform = GeoTransform::from_origin(bounds.min_x, bounds.max_y, pixel_size, pixel_size);

    log::debug!(
        "Suggested output grid in {}: {}x{} px at {:.4}",
        target_crs.label(),
        cols,
        rows,
        pixel_size
    );
    Ok(GridSpec::new(rows, cols, transform, target_crs.clone()))
}

/// Grid with the requested pixel size, anchored at the top-left corner of
/// `source`. Partial pixels at the right and bottom edges are dropped.
pub fn grid_at_resolution(source: &GridSpec, x_resolution: f64, y_resolution: f64) -> GridSpec {
    let bounds = source.bounds();
    // Tolerance keeps an exact multiple from truncating one pixel short
    let cols = ((bounds.width() / x_resolution + 1e-9) as usize).max(1);
    let rows = ((bounds.height() / y_resolution + 1e-9) as usize).max(1);
    let transform = GeoTransform::from_origin(bounds.min_x, bounds.max_y, x_resolution, y_resolution);
    GridSpec::new(rows, cols, transform, source.crs.clone())
}

/// Nearest-neighbour warp of `source` onto `target`. Each target cell takes
/// the value of the source cell containing its centre; cells that map
/// outside the source take `fill`.
pub fn warp_nearest<T: Copy>(source: &Raster<T>, target: &GridSpec, fill: T) -> FimResult<Raster<T>> {
    let reprojector = Reprojector::new(&target.crs, &source.grid.crs)?;
    let (src_rows, src_cols) = source.shape();
    let mut output = Array2::from_elem((target.rows, target.cols), fill);
    let mut xs = vec![0.0; target.cols];
    let mut ys = vec![0.0; target.cols];

    for row in 0..target.rows {
        for col in 0..target.cols {
            let (x, y) = target.transform.cell_center(row, col);
            xs[col] = x;
            ys[col] = y;
        }
        reprojector.transform_points(&mut xs, &mut ys)?;

        for col in 0..target.cols {
            let (src_col, src_row) = source.grid.transform.map_to_pixel(xs[col], ys[col]);
            if !(src_col.is_finite() && src_row.is_finite()) || src_col < 0.0 || src_row < 0.0 {
                continue;
            }
            let (src_row, src_col) = (src_row.floor() as usize, src_col.floor() as usize);
            if src_row < src_rows && src_col < src_cols {
                output[[row, col]] = source.data[[src_row, src_col]];
            }
        }
    }

    Raster::new(output, target.clone(), source.nodata)
}

/// Reproject `source` into `target_crs` on its default output grid
pub fn reproject_nearest<T: Copy>(source: &Raster<T>, target_crs: &Crs, fill: T) -> FimResult<Raster<T>> {
    let grid = default_output_grid(&source.grid, target_crs)?;
    if Reprojector::new(&source.grid.crs, target_crs)?.is_identity() {
        return Raster::new(source.data.clone(), grid, source.nodata);
    }
    log::debug!(
        "Reprojecting {}x{} raster {} -> {}",
        source.grid.cols,
        source.grid.rows,
        source.grid.crs.label(),
        target_crs.label()
    );
    warp_nearest(source, &grid, fill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid(rows: usize, cols: usize, res: f64) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::from_origin(0.0, 40.0, res, res),
            Crs::from_epsg(5070).unwrap(),
        )
    }

    #[test]
    fn test_resample_to_coarser_grid() {
        let source = Raster::new(
            array![
                [1u8, 1, 2, 2],
                [1, 1, 2, 2],
                [3, 3, 4, 4],
                [3, 3, 4, 4]
            ],
            grid(4, 4, 10.0),
            None,
        )
        .unwrap();

        let target = grid_at_resolution(&source.grid, 20.0, 20.0);
        assert_eq!((target.rows, target.cols), (2, 2));

        let resampled = warp_nearest(&source, &target, 0).unwrap();
        assert_eq!(resampled.data, array![[1u8, 2], [3, 4]]);
    }

    #[test]
    fn test_grid_at_resolution_truncates_partial_pixels() {
        let target = grid_at_resolution(&grid(4, 4, 10.0), 15.0, 15.0);
        assert_eq!((target.rows, target.cols), (2, 2));
        assert_eq!(target.transform.top_left_x, 0.0);
        assert_eq!(target.transform.top_left_y, 40.0);
    }

    #[test]
    fn test_warp_fills_uncovered_cells() {
        let source = Raster::new(array![[7u8, 7], [7, 7]], grid(2, 2, 10.0), None).unwrap();
        let target = GridSpec::new(
            2,
            3,
            GeoTransform::from_origin(10.0, 40.0, 10.0, 10.0),
            source.grid.crs.clone(),
        );
        let warped = warp_nearest(&source, &target, 0).unwrap();
        assert_eq!(warped.data, array![[7u8, 0, 0], [7, 0, 0]]);
    }

    #[test]
    fn test_identity_reprojection_keeps_grid() {
        let source = Raster::new(array![[1u8, 2], [3, 4]], grid(2, 2, 10.0), None).unwrap();
        let same = reproject_nearest(&source, &source.grid.crs, 0).unwrap();
        assert_eq!(same.data, source.data);
        assert_eq!(same.grid.transform, source.grid.transform);
    }

    #[test]
    fn test_geographic_to_projected_bounds() {
        let wgs84 = Crs::from_epsg(4326).unwrap();
        let albers = Crs::from_epsg(5070).unwrap();
        let reprojector = Reprojector::new(&wgs84, &albers).unwrap();
        assert!(!reprojector.is_identity());

        let bounds = reprojector
            .transform_bounds(&BoundingBox::new(-96.0, 23.0, -95.0, 24.0))
            .unwrap();
        // EPSG:5070 is centred on -96 degrees longitude
        assert!(bounds.min_x.abs() < 10.0);
        assert!(bounds.max_x > 90_000.0 && bounds.max_x < 110_000.0);
        assert!(bounds.height() > 100_000.0);
    }
}
