use crate::types::{
    squeeze_to_2d, ClassRaster, Crs, FimError, FimResult, GeoTransform, GridSpec, Raster,
    ValueRaster,
};
use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

/// Lossless compression applied to every GeoTIFF this crate writes
const COMPRESSION: [RasterCreationOption<'static>; 1] = [RasterCreationOption {
    key: "COMPRESS",
    value: "LZW",
}];

/// Georeferencing of a raster file, read without touching pixel data
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub path: PathBuf,
    pub grid: GridSpec,
    pub nodata: Option<f64>,
    pub band_count: usize,
}

impl RasterInfo {
    pub fn file_stem(&self) -> String {
        file_stem(&self.path)
    }
}

/// File name without directory or extension, as used in output names
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn open(path: &Path) -> FimResult<Dataset> {
    Dataset::open(path).map_err(|e| {
        FimError::input(path.display().to_string(), format!("unable to open raster: {}", e))
    })
}

fn grid_of(dataset: &Dataset, path: &Path) -> FimResult<GridSpec> {
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let wkt = dataset.projection();
    if wkt.trim().is_empty() {
        return Err(FimError::input(
            path.display().to_string(),
            "raster has no coordinate reference system",
        ));
    }
    let crs = Crs::from_user_input(&wkt)?;
    Ok(GridSpec::new(height, width, transform, crs))
}

/// Read CRS, transform, size and nodata of a raster
pub fn inspect<P: AsRef<Path>>(path: P) -> FimResult<RasterInfo> {
    let path = path.as_ref();
    let dataset = open(path)?;
    let grid = grid_of(&dataset, path)?;
    let band_count = dataset.raster_count().max(0) as usize;
    if band_count == 0 {
        return Err(FimError::input(path.display().to_string(), "raster has no bands"));
    }
    let nodata = dataset.rasterband(1)?.no_data_value();

    log::debug!(
        "{}: {}x{} px, resolution {:?}, {}",
        path.display(),
        grid.cols,
        grid.rows,
        grid.resolution(),
        grid.crs.label()
    );

    Ok(RasterInfo {
        path: path.to_path_buf(),
        grid,
        nodata,
        band_count,
    })
}

/// Read band 1 of a raster as `f32`
pub fn read_raster<P: AsRef<Path>>(path: P) -> FimResult<ValueRaster> {
    let path = path.as_ref();
    log::debug!("Reading raster: {}", path.display());

    let dataset = open(path)?;
    let grid = grid_of(&dataset, path)?;
    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let (width, height) = (grid.cols, grid.rows);
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), band_data.data)?;
    Raster::new(data, grid, nodata)
}

/// Read a persisted contingency raster. Every band is loaded so that a
/// stacked file is rejected unless it collapses to one 2-D grid.
pub fn read_contingency<P: AsRef<Path>>(path: P) -> FimResult<ClassRaster> {
    let path = path.as_ref();
    let dataset = open(path)?;
    let grid = grid_of(&dataset, path)?;
    let (width, height) = (grid.cols, grid.rows);
    let band_count = dataset.raster_count().max(0) as usize;

    let mut stack = Vec::with_capacity(band_count * width * height);
    for band_index in 1..=dataset.raster_count() {
        let band = dataset.rasterband(band_index)?;
        let values = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        stack.extend(values.data.into_iter().map(|v| {
            if v.is_finite() {
                v.round().clamp(0.0, u8::MAX as f64) as u8
            } else {
                0
            }
        }));
    }

    let stack = Array3::from_shape_vec((band_count, height, width), stack)?;
    let data = squeeze_to_2d(stack.into_dyn())?;
    Raster::new(data, grid, None)
}

/// Write a single-band, LZW-compressed GeoTIFF
pub fn write_raster<T, P>(raster: &Raster<T>, output_path: P) -> FimResult<()>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let output_path = output_path.as_ref();
    log::debug!("Writing GeoTIFF: {}", output_path.display());

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.shape();

    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        output_path,
        width as isize,
        height as isize,
        1,
        &COMPRESSION,
    )?;

    dataset.set_geo_transform(&raster.grid.transform.to_gdal())?;
    dataset.set_projection(raster.grid.crs.wkt())?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<T> = raster.data.iter().copied().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if raster.nodata.is_some() {
        rasterband.set_no_data_value(raster.nodata)?;
    }

    Ok(())
}

/// Copy a raster unchanged apart from LZW compression. Pixel type, nodata
/// and georeferencing are preserved by GDAL's CreateCopy.
pub fn copy_compressed<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q) -> FimResult<()> {
    let source = source.as_ref();
    let destination = destination.as_ref();
    log::debug!("Copying {} -> {}", source.display(), destination.display());

    let dataset = open(source)?;
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    dataset.create_copy(&driver, destination, &COMPRESSION)?;
    Ok(())
}
