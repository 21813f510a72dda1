use gdal::spatial_ref::SpatialRef;
use geo::{LineString, Polygon};
use ndarray::{Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};

/// Classification alphabet shared by every stage that reads or writes a
/// classification grid. No other cell values are produced by this crate
/// apart from the arithmetic pass-through described on [`codes::NO_DATA`].
pub mod codes {
    /// Benchmark cell that is dry, outside the extent, or inside a permanent water body
    pub const BENCHMARK_DRY: u8 = 0;
    /// Benchmark cell that is flooded and outside any permanent water body
    pub const BENCHMARK_FLOODED: u8 = 2;

    /// Candidate cell outside the comparison extent (or not covered after resampling)
    pub const CANDIDATE_NO_DATA: u8 = 0;
    /// Candidate cell that is dry and outside any permanent water body
    pub const CANDIDATE_DRY: u8 = 1;
    /// Candidate cell that is flooded and outside any permanent water body
    pub const CANDIDATE_FLOODED: u8 = 2;
    /// Candidate cell inside a permanent water body, whatever its original value
    pub const CANDIDATE_WATER_BODY: u8 = 5;

    /// Contingency cell outside the comparison extent on both layers
    pub const NO_DATA: u8 = 0;
    pub const TRUE_NEGATIVE: u8 = 1;
    pub const FALSE_POSITIVE: u8 = 2;
    pub const FALSE_NEGATIVE: u8 = 3;
    pub const TRUE_POSITIVE: u8 = 4;
    /// Permanent water body, excluded from every accuracy count
    pub const PERMANENT_WATER_BODY: u8 = 5;

    const _: () = assert!(BENCHMARK_DRY + CANDIDATE_DRY == TRUE_NEGATIVE);
    const _: () = assert!(BENCHMARK_DRY + CANDIDATE_FLOODED == FALSE_POSITIVE);
    const _: () = assert!(BENCHMARK_FLOODED + CANDIDATE_DRY == FALSE_NEGATIVE);
    const _: () = assert!(BENCHMARK_FLOODED + CANDIDATE_FLOODED == TRUE_POSITIVE);
    const _: () = assert!(BENCHMARK_DRY + CANDIDATE_WATER_BODY == PERMANENT_WATER_BODY);

    /// Human readable label of a contingency class
    pub fn class_name(code: u8) -> &'static str {
        match code {
            NO_DATA => "No data",
            TRUE_NEGATIVE => "True negative",
            FALSE_POSITIVE => "False positive",
            FALSE_NEGATIVE => "False negative",
            TRUE_POSITIVE => "True positive",
            PERMANENT_WATER_BODY => "Permanent water bodies",
            _ => "Unclassified",
        }
    }
}

/// Axis-aligned bounding box in the map units of its CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when `other` lies entirely inside this box
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// True when the two boxes share any point
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }
}

/// Affine pixel-to-map transformation, in GDAL coefficient order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up transform anchored at the top-left corner `(x, y)`
    pub fn from_origin(x: f64, y: f64, x_resolution: f64, y_resolution: f64) -> Self {
        Self {
            top_left_x: x,
            pixel_width: x_resolution,
            rotation_x: 0.0,
            top_left_y: y,
            rotation_y: 0.0,
            pixel_height: -y_resolution,
        }
    }

    /// Map coordinates of a fractional pixel position (col, row)
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Map coordinates of the centre of cell (row, col)
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional pixel position (col, row) of a map coordinate.
    /// Returns NaNs for a degenerate transform.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < 1e-15 {
            return (f64::NAN, f64::NAN);
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        (col, row)
    }

    /// Absolute pixel size (x, y)
    pub fn resolution(&self) -> (f64, f64) {
        (
            self.pixel_width.hypot(self.rotation_y),
            self.pixel_height.hypot(self.rotation_x),
        )
    }

    /// Transform of the sub-window starting at (row_offset, col_offset)
    pub fn offset(&self, row_offset: usize, col_offset: usize) -> Self {
        let (x, y) = self.pixel_to_map(col_offset as f64, row_offset as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }
}

/// Coordinate reference system, carried as WKT so it can be cloned and
/// sent across threads freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crs {
    wkt: String,
}

impl Crs {
    /// Parse any definition GDAL accepts: `EPSG:5070`, a PROJ string or WKT
    pub fn from_user_input(definition: &str) -> FimResult<Self> {
        let srs = SpatialRef::from_definition(definition).map_err(|e| {
            FimError::Configuration(format!("Unrecognised CRS '{}': {}", definition, e))
        })?;
        Self::from_spatial_ref(&srs)
    }

    pub fn from_epsg(code: u32) -> FimResult<Self> {
        Self::from_spatial_ref(&SpatialRef::from_epsg(code)?)
    }

    pub fn from_spatial_ref(srs: &SpatialRef) -> FimResult<Self> {
        Ok(Self { wkt: srs.to_wkt()? })
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    /// GDAL spatial reference with x/y (easting/longitude first) axis order
    pub fn to_spatial_ref(&self) -> FimResult<SpatialRef> {
        let srs = SpatialRef::from_wkt(&self.wkt)?;
        srs.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        Ok(srs)
    }

    pub fn is_projected(&self) -> bool {
        self.to_spatial_ref()
            .map(|srs| srs.is_projected())
            .unwrap_or(false)
    }

    /// Semantic equality (GDAL `OSRIsSame`), not textual WKT equality
    pub fn is_same(&self, other: &Crs) -> bool {
        if self.wkt == other.wkt {
            return true;
        }
        match (self.to_spatial_ref(), other.to_spatial_ref()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    /// Short label such as `EPSG:5070` for log messages
    pub fn label(&self) -> String {
        if let Ok(srs) = self.to_spatial_ref() {
            if let (Ok(name), Ok(code)) = (srs.auth_name(), srs.auth_code()) {
                return format!("{}:{}", name, code);
            }
        }
        self.wkt.chars().take(48).collect()
    }
}

/// Shape, placement and CRS of a raster grid
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: Crs) -> Self {
        Self { rows, cols, transform, crs }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    /// Map-space bounds of the full grid
    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.pixel_to_map(0.0, 0.0),
            self.transform.pixel_to_map(self.cols as f64, 0.0),
            self.transform.pixel_to_map(0.0, self.rows as f64),
            self.transform.pixel_to_map(self.cols as f64, self.rows as f64),
        ];
        let mut bbox = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

/// Single-band raster held in memory
#[derive(Debug, Clone)]
pub struct Raster<T> {
    pub data: Array2<T>,
    pub grid: GridSpec,
    pub nodata: Option<f64>,
}

/// Raw values as read from disk
pub type ValueRaster = Raster<f32>;

/// Cells drawn from the [`codes`] alphabet
pub type ClassRaster = Raster<u8>;

impl<T: Copy> Raster<T> {
    pub fn new(data: Array2<T>, grid: GridSpec, nodata: Option<f64>) -> FimResult<Self> {
        if data.dim() != (grid.rows, grid.cols) {
            return Err(FimError::UnexpectedShape(format!(
                "data is {:?} but grid declares {}x{}",
                data.dim(),
                grid.rows,
                grid.cols
            )));
        }
        Ok(Self { data, grid, nodata })
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn map<U, F>(&self, nodata: Option<f64>, f: F) -> Raster<U>
    where
        F: Fn(T) -> U,
    {
        Raster {
            data: self.data.mapv(f),
            grid: self.grid.clone(),
            nodata,
        }
    }
}

impl ValueRaster {
    pub fn is_nodata(&self, value: f32) -> bool {
        match self.nodata {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => value == nd as f32,
            None => false,
        }
    }
}

/// Collapse a raster array to two dimensions. Accepts 2-D arrays and 3-D
/// arrays whose leading (band) axis has length one; anything else means an
/// upstream stage produced a layout this crate does not support.
pub fn squeeze_to_2d<T>(array: ArrayD<T>) -> FimResult<Array2<T>> {
    let shape = array.shape().to_vec();
    match shape.len() {
        2 => Ok(array.into_dimensionality::<Ix2>()?),
        3 if shape[0] == 1 => Ok(array.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?),
        _ => Err(FimError::UnexpectedShape(format!(
            "expected a 2-D grid or a single-band 3-D stack, found shape {:?}",
            shape
        ))),
    }
}

/// Error types for flood map evaluation
#[derive(Debug, thiserror::Error)]
pub enum FimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Input error ({artifact}): {message}")]
    Input { artifact: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Empty comparison extent: {0}")]
    EmptyExtent(String),

    #[error("Unexpected raster shape: {0}")]
    UnexpectedShape(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Case '{case}' failed: {source}")]
    Case {
        case: String,
        #[source]
        source: Box<FimError>,
    },
}

impl FimError {
    pub fn input(artifact: impl Into<String>, message: impl Into<String>) -> Self {
        FimError::Input {
            artifact: artifact.into(),
            message: message.into(),
        }
    }

    /// Attach the name of the case this error aborted
    pub fn in_case(self, case: impl Into<String>) -> Self {
        match self {
            already @ FimError::Case { .. } => already,
            other => FimError::Case {
                case: case.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type for evaluation operations
pub type FimResult<T> = Result<T, FimError>;
