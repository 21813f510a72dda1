//! Discovery of evaluation cases on disk

use crate::types::{FimError, FimResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Vector formats accepted as an area of interest, in search order
pub const AOI_EXTENSIONS: [&str; 4] = ["shp", "gpkg", "geojson", "kml"];

fn benchmark_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i:benchmark)|BM").expect("static regex"))
}

/// Benchmark and candidate rasters of one case
#[derive(Debug, Clone)]
pub struct CaseRasters {
    pub benchmark: PathBuf,
    pub candidates: Vec<PathBuf>,
}

/// A raster is a benchmark when its file name contains `benchmark` (any
/// case) or the upper-case tag `BM`.
pub fn is_benchmark(path: &Path) -> bool {
    path.file_name()
        .map(|name| benchmark_pattern().is_match(&name.to_string_lossy()))
        .unwrap_or(false)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> FimResult<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| FimError::input(dir.display().to_string(), format!("unable to list directory: {}", e)))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

/// GeoTIFF files directly inside `dir`, sorted by path
pub fn list_rasters(dir: &Path) -> FimResult<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file() && has_extension(p, "tif"))
        .collect())
}

/// Separate the benchmark from the candidates
pub fn split_case(rasters: &[PathBuf], case: &str) -> FimResult<CaseRasters> {
    let (benchmarks, candidates): (Vec<PathBuf>, Vec<PathBuf>) =
        rasters.iter().cloned().partition(|p| is_benchmark(p));

    let benchmark = match benchmarks.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(FimError::input(
                case,
                "no benchmark raster found (file name must contain 'benchmark' or 'BM')",
            ))
        }
        many => {
            return Err(FimError::input(
                case,
                format!("{} rasters look like a benchmark: {:?}", many.len(), many),
            ))
        }
    };

    if candidates.is_empty() {
        return Err(FimError::input(case, "no candidate rasters found"));
    }

    Ok(CaseRasters { benchmark, candidates })
}

/// First vector file in `dir` usable as an area of interest. Extensions are
/// tried in the order of [`AOI_EXTENSIONS`].
pub fn find_aoi_file(dir: &Path) -> FimResult<Option<PathBuf>> {
    let entries = sorted_entries(dir)?;
    for extension in AOI_EXTENSIONS {
        if let Some(found) = entries
            .iter()
            .find(|p| p.is_file() && has_extension(p, extension))
        {
            log::info!("Auto-detected area of interest: {}", found.display());
            return Ok(Some(found.clone()));
        }
    }
    Ok(None)
}

/// Case folders under `main_dir`: the directory itself when it holds
/// rasters, otherwise each sub-directory that does.
pub fn case_dirs(main_dir: &Path) -> FimResult<Vec<PathBuf>> {
    if !list_rasters(main_dir)?.is_empty() {
        return Ok(vec![main_dir.to_path_buf()]);
    }

    let mut cases = Vec::new();
    for entry in sorted_entries(main_dir)? {
        if !entry.is_dir() {
            continue;
        }
        if list_rasters(&entry)?.is_empty() {
            log::info!("Skipping {} as it doesn't contain any tif files", entry.display());
        } else {
            cases.push(entry);
        }
    }
    Ok(cases)
}

/// Display name of a case folder
pub fn case_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_benchmark_detection() {
        assert!(is_benchmark(Path::new("/data/case1/Benchmark_flood.tif")));
        assert!(is_benchmark(Path::new("HWM_BM.tif")));
        assert!(is_benchmark(Path::new("BENCHMARK.tif")));
        assert!(!is_benchmark(Path::new("owp_hand_fim.tif")));
        // `BM` is matched case-sensitively
        assert!(!is_benchmark(Path::new("bm_lower.tif")));
    }

    #[test]
    fn test_split_case() {
        let rasters = vec![
            PathBuf::from("a_candidate.tif"),
            PathBuf::from("benchmark.tif"),
            PathBuf::from("b_candidate.tif"),
        ];
        let case = split_case(&rasters, "case1").unwrap();
        assert_eq!(case.benchmark, PathBuf::from("benchmark.tif"));
        assert_eq!(case.candidates.len(), 2);

        let no_candidates = split_case(&rasters[1..2], "case1");
        assert!(matches!(no_candidates, Err(FimError::Input { .. })));

        let no_benchmark = split_case(&rasters[..1], "case1");
        assert!(matches!(no_benchmark, Err(FimError::Input { .. })));
    }

    #[test]
    fn test_aoi_search_order_and_case_dirs() {
        let root = TempDir::new().unwrap();
        let case = root.path().join("case_a");
        std::fs::create_dir(&case).unwrap();
        std::fs::create_dir(root.path().join("empty_case")).unwrap();
        std::fs::write(case.join("benchmark.tif"), b"").unwrap();
        std::fs::write(case.join("zone.geojson"), b"{}").unwrap();
        std::fs::write(case.join("zone.shp"), b"").unwrap();

        assert_eq!(find_aoi_file(&case).unwrap(), Some(case.join("zone.shp")));
        assert_eq!(find_aoi_file(root.path()).unwrap(), None);

        assert_eq!(case_dirs(root.path()).unwrap(), vec![case.clone()]);
        assert_eq!(case_dirs(&case).unwrap(), vec![case.clone()]);
        assert_eq!(case_name(&case), "case_a");
    }
}
