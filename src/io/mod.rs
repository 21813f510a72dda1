//! GDAL-backed I/O: rasters, polygon layers and case folders

pub mod case;
pub mod raster;
pub mod vector;

pub use case::{case_dirs, find_aoi_file, is_benchmark, split_case, CaseRasters};
pub use raster::{inspect, read_contingency, read_raster, write_raster, RasterInfo};
pub use vector::{read_polygons, write_polygons, PolygonLayer};
