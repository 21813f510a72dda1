//! Polygon burning and polygon clipping on raster grids

use crate::types::{FimError, FimResult, GridSpec, Raster};
use gdal::raster::RasterizeOptions;
use gdal::vector::ToGdal;
use gdal::DriverManager;
use geo::Polygon;
use ndarray::{s, Array2};

/// Tolerance, in pixels, for extent bounds that fall exactly on cell edges
const PIXEL_EPSILON: f64 = 1e-9;

/// Which cells a polygon claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnRule {
    /// Cells whose centre lies inside the polygon
    CellCenter,
    /// Every cell the polygon or its outline touches (GDAL `ALL_TOUCHED`)
    AllTouched,
}

type Ring = Vec<(f64, f64)>;

/// Rings of a polygon in fractional (col, row) pixel coordinates
fn pixel_rings(polygon: &Polygon<f64>, grid: &GridSpec) -> Vec<Ring> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| {
            ring.0
                .iter()
                .map(|c| grid.transform.map_to_pixel(c.x, c.y))
                .collect()
        })
        .collect()
}

/// Boolean mask of the cells claimed by any of `polygons`. The polygons are
/// burned by GDAL into an in-memory byte band laid over `grid`; they must be
/// in the grid's CRS.
pub fn rasterize(
    polygons: &[Polygon<f64>],
    grid: &GridSpec,
    rule: BurnRule,
) -> FimResult<Array2<bool>> {
    let (rows, cols) = (grid.rows, grid.cols);
    if rows == 0 || cols == 0 || polygons.is_empty() {
        return Ok(Array2::from_elem((rows, cols), false));
    }

    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<u8, _>("", cols as isize, rows as isize, 1)?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    dataset.set_projection(grid.crs.wkt())?;

    let geometries = polygons
        .iter()
        .map(|p| p.to_gdal())
        .collect::<Result<Vec<_>, _>>()?;
    let burn_values = vec![1.0; geometries.len()];
    let options = RasterizeOptions {
        all_touched: rule == BurnRule::AllTouched,
        ..Default::default()
    };
    gdal::raster::rasterize(&mut dataset, &[1], &geometries, &burn_values, Some(options))?;

    let burned = dataset
        .rasterband(1)?
        .read_as::<u8>((0, 0), (cols, rows), (cols, rows), None)?;
    Ok(Array2::from_shape_vec((rows, cols), burned.data)?.mapv(|v| v != 0))
}

/// Pixel window (row_offset, col_offset, rows, cols) of `grid` covering the
/// bounds of `polygons`, rounded outwards and limited to the grid
pub fn extent_window(
    polygons: &[Polygon<f64>],
    grid: &GridSpec,
) -> Option<(usize, usize, usize, usize)> {
    let mut min = (f64::MAX, f64::MAX);
    let mut max = (f64::MIN, f64::MIN);
    for polygon in polygons {
        for (col, row) in pixel_rings(polygon, grid).into_iter().flatten() {
            min = (min.0.min(col), min.1.min(row));
            max = (max.0.max(col), max.1.max(row));
        }
    }

    let col_start = (min.0 + PIXEL_EPSILON).floor().max(0.0);
    let row_start = (min.1 + PIXEL_EPSILON).floor().max(0.0);
    let col_end = (max.0 - PIXEL_EPSILON).ceil().min(grid.cols as f64);
    let row_end = (max.1 - PIXEL_EPSILON).ceil().min(grid.rows as f64);
    if !(col_start < col_end && row_start < row_end) {
        return None;
    }
    Some((
        row_start as usize,
        col_start as usize,
        (row_end - row_start) as usize,
        (col_end - col_start) as usize,
    ))
}

/// A raster cropped to a polygon set, with the cells the polygons claim
#[derive(Debug, Clone)]
pub struct Clipped<T> {
    pub raster: Raster<T>,
    pub inside: Array2<bool>,
}

/// Crop `raster` to the bounding window of `polygons` and mark the cells
/// they claim under `rule`. Fails when the polygons miss the raster.
pub fn clip<T: Copy>(
    raster: &Raster<T>,
    polygons: &[Polygon<f64>],
    rule: BurnRule,
) -> FimResult<Clipped<T>> {
    let (row_off, col_off, rows, cols) = extent_window(polygons, &raster.grid).ok_or_else(|| {
        FimError::EmptyExtent("comparison extent does not overlap the raster".to_string())
    })?;

    let data = raster
        .data
        .slice(s![row_off..row_off + rows, col_off..col_off + cols])
        .to_owned();
    let grid = GridSpec::new(
        rows,
        cols,
        raster.grid.transform.offset(row_off, col_off),
        raster.grid.crs.clone(),
    );
    let inside = rasterize(polygons, &grid, rule)?;
    if !inside.iter().any(|&claimed| claimed) {
        return Err(FimError::EmptyExtent(
            "comparison extent covers no raster cell".to_string(),
        ));
    }

    Ok(Clipped {
        raster: Raster::new(data, grid, raster.nodata)?,
        inside,
    })
}
