//! Polygon layers: permanent water bodies and areas of interest in,
//! evaluated extent out.

use crate::types::{Crs, FimError, FimResult};
use gdal::vector::{LayerAccess, ToGdal};
use gdal::LayerOptions;
use gdal::{Dataset, DriverManager};
use geo::{Geometry, Polygon};
use std::path::Path;

/// Every polygon of a vector dataset, with the CRS of its first layer
#[derive(Debug, Clone)]
pub struct PolygonLayer {
    pub polygons: Vec<Polygon<f64>>,
    pub crs: Option<Crs>,
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(polygon) => out.push(polygon),
        Geometry::MultiPolygon(multi) => out.extend(multi.0),
        Geometry::Rect(rect) => out.push(rect.to_polygon()),
        Geometry::Triangle(triangle) => out.push(triangle.to_polygon()),
        Geometry::GeometryCollection(collection) => {
            for member in collection.0 {
                collect_polygons(member, out);
            }
        }
        // Points and lines carry no area to compare over
        _ => {}
    }
}

/// Read all polygonal features of a vector file (shapefile, GeoPackage,
/// GeoJSON, KML, ...). Non-polygonal and empty geometries are skipped.
pub fn read_polygons<P: AsRef<Path>>(path: P) -> FimResult<PolygonLayer> {
    let path = path.as_ref();
    log::debug!("Reading polygons from: {}", path.display());

    let dataset = Dataset::open(path).map_err(|e| {
        FimError::input(path.display().to_string(), format!("unable to open vector file: {}", e))
    })?;

    let mut polygons = Vec::new();
    let mut crs = None;
    for mut layer in dataset.layers() {
        if crs.is_none() {
            if let Some(srs) = layer.spatial_ref() {
                crs = Some(Crs::from_spatial_ref(&srs)?);
            }
        }
        for feature in layer.features() {
            if let Some(geometry) = feature.geometry() {
                if geometry.is_empty() {
                    continue;
                }
                collect_polygons(geometry.to_geo()?, &mut polygons);
            }
        }
    }

    log::debug!("Read {} polygons from {}", polygons.len(), path.display());
    Ok(PolygonLayer { polygons, crs })
}

fn driver_name(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("gpkg") => "GPKG",
        Some("geojson") | Some("json") => "GeoJSON",
        _ => "ESRI Shapefile",
    }
}

/// Remove a previously written vector file, including shapefile sidecars
fn remove_existing(path: &Path) -> FimResult<()> {
    let sidecars: &[&str] = if driver_name(path) == "ESRI Shapefile" {
        &["shp", "shx", "dbf", "prj", "cpg"]
    } else {
        &[]
    };
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    for extension in sidecars {
        let sidecar = path.with_extension(extension);
        if sidecar.exists() {
            std::fs::remove_file(sidecar)?;
        }
    }
    Ok(())
}

/// Write polygons as a single polygon layer, replacing any existing file
pub fn write_polygons<P: AsRef<Path>>(
    polygons: &[Polygon<f64>],
    crs: &Crs,
    path: P,
    layer_name: &str,
) -> FimResult<()> {
    let path = path.as_ref();
    log::debug!("Writing {} polygons to: {}", polygons.len(), path.display());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    remove_existing(path)?;

    let driver = DriverManager::get_driver_by_name(driver_name(path))?;
    let mut dataset = driver.create_vector_only(path)?;
    let srs = crs.to_spatial_ref()?;
    let mut layer = dataset.create_layer(LayerOptions {
        name: layer_name,
        srs: Some(&srs),
        ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
        ..Default::default()
    })?;

    for polygon in polygons {
        layer.create_feature(polygon.to_gdal()?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use tempfile::TempDir;

    #[test]
    fn test_polygon_layer_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("extent.shp");
        let crs = Crs::from_epsg(5070).unwrap();
        let square = BoundingBox::new(0.0, 0.0, 100.0, 50.0).to_polygon();

        write_polygons(&[square.clone()], &crs, &path, "extent").unwrap();
        // Overwriting must not fail on the existing sidecar files
        write_polygons(&[square], &crs, &path, "extent").unwrap();

        let layer = read_polygons(&path).unwrap();
        assert_eq!(layer.polygons.len(), 1);
        assert_eq!(layer.polygons[0].exterior().0.len(), 5);
        assert!(layer.crs.unwrap().is_projected());
    }

    #[test]
    fn test_missing_vector_is_input_error() {
        let err = read_polygons("/nonexistent/pwb.shp").unwrap_err();
        assert!(matches!(err, FimError::Input { .. }));
    }
}
