use std::path::{Path, PathBuf};

use super::config::Config;
use super::error::SweepError;

/// Everything needed to convert one recorded cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellPaths {
    pub cell_id: String,
    pub group: String,
    pub path_raw: PathBuf,
    pub path_processed: PathBuf,
    pub path_calibration: Option<PathBuf>,
    pub paths_tiff: Vec<PathBuf>,
    pub paths_tiff_lowzoom: Vec<PathBuf>,
    pub path_output: PathBuf,
}

/// All files under dir (recursively) whose name matches `<prefix>*<suffix>`, sorted
fn find_recursive(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>, SweepError> {
    let pattern = format!(
        "{}/**/{}*{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(prefix),
        suffix
    );
    let mut found = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry?;
        if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn require_dir(dir: &Path) -> Result<(), SweepError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(SweepError::BadDirectory(dir.to_path_buf()))
    }
}

fn parent_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Sweep the calibration layout: one cell per `*medium.h5` quality file in the calibration
/// directory, matched by cell id against the processed and raw trees
fn sweep_calibration(config: &Config, calibration: &Path) -> Result<Vec<CellPaths>, SweepError> {
    require_dir(calibration)?;
    require_dir(&config.raw_path)?;
    require_dir(&config.processed_path)?;
    let output = config.get_output_directory()?;

    let mut calibration_files = Vec::new();
    for entry in glob::glob(&format!(
        "{}/*medium.h5",
        glob::Pattern::escape(&calibration.to_string_lossy())
    ))? {
        calibration_files.push(entry?);
    }
    calibration_files.sort();

    let mut cells = Vec::new();
    for path_calibration in calibration_files {
        let file_name = path_calibration
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let cell_id = match file_name.split('_').next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };

        let path_processed = match find_recursive(&config.processed_path, &cell_id, ".h5")?
            .into_iter()
            .next()
        {
            Some(p) => p,
            None => continue,
        };
        let path_raw = match find_recursive(&config.raw_path, &cell_id, ".h5")?
            .into_iter()
            .next()
        {
            Some(p) => p,
            None => {
                log::warn!("No raw data found for cell {}. Skipping it...", cell_id);
                continue;
            }
        };
        let paths_tiff = find_recursive(&config.raw_path, &cell_id, "_2.tif")?;
        let paths_tiff_lowzoom = match config.zoom_pairs.get(&cell_id) {
            Some(lowzoom_id) => find_recursive(&config.raw_path, lowzoom_id, "_2.tif")?,
            None => Vec::new(),
        };

        cells.push(CellPaths {
            group: parent_name(&path_raw),
            path_output: output.join(format!("{cell_id}.nwb")),
            cell_id,
            path_raw,
            path_processed,
            path_calibration: Some(path_calibration),
            paths_tiff,
            paths_tiff_lowzoom,
        });
    }
    Ok(cells)
}

/// Sweep the raw layout: one cell per `.h5` file of the raw tree, grouped by its parent directory
fn sweep_raw(config: &Config) -> Result<Vec<CellPaths>, SweepError> {
    require_dir(&config.raw_path)?;
    require_dir(&config.processed_path)?;
    let output = config.get_output_directory()?;

    let all_processed = find_recursive(&config.processed_path, "", ".h5")?;
    let mut cells = Vec::new();
    for path_raw in find_recursive(&config.raw_path, "", ".h5")? {
        let stem = match path_raw.file_stem() {
            Some(s) => s.to_string_lossy().to_string(),
            None => continue,
        };
        let group = parent_name(&path_raw);
        let path_processed = match all_processed.iter().find(|p| {
            p.strip_prefix(&config.processed_path)
                .unwrap_or(p)
                .to_string_lossy()
                .contains(&stem)
        }) {
            Some(p) => p.clone(),
            None => {
                log::warn!("No processed data found for {}. Skipping it...", path_raw.display());
                continue;
            }
        };

        let mut paths_tiff = Vec::new();
        if let Some(parent) = path_raw.parent() {
            let pattern = format!(
                "{}/{}*.tif",
                glob::Pattern::escape(&parent.to_string_lossy()),
                glob::Pattern::escape(&stem)
            );
            for entry in glob::glob(&pattern)? {
                paths_tiff.push(entry?);
            }
            paths_tiff.sort();
        }

        let group_output = output.join(&group);
        if !group_output.exists() {
            std::fs::create_dir_all(&group_output)?;
        }
        cells.push(CellPaths {
            cell_id: stem.clone(),
            group,
            path_raw,
            path_processed,
            path_calibration: None,
            paths_tiff,
            paths_tiff_lowzoom: Vec::new(),
            path_output: group_output.join(format!("{stem}.nwb")),
        });
    }
    Ok(cells)
}

/// Find every cell described by the configuration
pub fn sweep_cells(config: &Config) -> Result<Vec<CellPaths>, SweepError> {
    let cells = match &config.calibration_path {
        Some(calibration) => sweep_calibration(config, calibration)?,
        None => sweep_raw(config)?,
    };
    log::info!("Found {} cells to convert.", cells.len());
    Ok(cells)
}

/// Restrict the cells to the given positions in the sweep
pub fn select(cells: Vec<CellPaths>, ids: Option<&[usize]>) -> Vec<CellPaths> {
    let ids = match ids {
        Some(ids) => ids,
        None => return cells,
    };
    let mut selected = Vec::with_capacity(ids.len());
    for id in ids {
        match cells.get(*id) {
            Some(cell) => selected.push(cell.clone()),
            None => log::warn!(
                "Cell index {} is out of range ({} cells found). Skipping it...",
                id,
                cells.len()
            ),
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_raw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw_data");
        let processed = dir.path().join("processed_data");
        touch(&raw.join("group_a").join("101.h5"));
        touch(&raw.join("group_a").join("101_0.tif"));
        touch(&raw.join("group_a").join("101_1.tif"));
        touch(&raw.join("group_b").join("202.h5"));
        touch(&processed.join("x").join("101_processed.h5"));

        let config = Config {
            raw_path: raw.clone(),
            processed_path: processed.clone(),
            ..Default::default()
        };
        let cells = sweep_cells(&config).unwrap();
        // 202 has no processed file
        assert_eq!(cells.len(), 1);
        let cell = &cells[0];
        assert_eq!(cell.cell_id, "101");
        assert_eq!(cell.group, "group_a");
        assert_eq!(cell.paths_tiff.len(), 2);
        assert_eq!(
            cell.path_processed,
            processed.join("x").join("101_processed.h5")
        );
        assert_eq!(
            cell.path_output,
            dir.path().join("nwb_converted").join("group_a").join("101.nwb")
        );
        assert!(dir.path().join("nwb_converted").join("group_a").is_dir());
    }

    #[test]
    fn test_calibration_layout() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        let processed = dir.path().join("processed");
        let calibration = dir.path().join("calibration");
        touch(&calibration.join("101_cal_medium.h5"));
        touch(&calibration.join("202_cal_medium.h5"));
        touch(&calibration.join("303_cal_high.h5"));
        touch(&processed.join("101_proc.h5"));
        touch(&processed.join("202_proc.h5"));
        touch(&raw.join("g1").join("101_raw.h5"));
        touch(&raw.join("g1").join("101_b_2.tif"));
        touch(&raw.join("g1").join("101_a_2.tif"));
        touch(&raw.join("g1").join("101_a_1.tif"));
        touch(&raw.join("g1").join("150_a_2.tif"));

        let mut config = Config {
            raw_path: raw.clone(),
            processed_path: processed,
            calibration_path: Some(calibration.clone()),
            ..Default::default()
        };
        config
            .zoom_pairs
            .insert(String::from("101"), String::from("150"));
        let cells = sweep_cells(&config).unwrap();
        // 202 has no raw data, 303 is not a medium quality file
        assert_eq!(cells.len(), 1);
        let cell = &cells[0];
        assert_eq!(cell.group, "g1");
        assert_eq!(
            cell.paths_tiff,
            vec![
                raw.join("g1").join("101_a_2.tif"),
                raw.join("g1").join("101_b_2.tif")
            ]
        );
        assert_eq!(cell.paths_tiff_lowzoom, vec![raw.join("g1").join("150_a_2.tif")]);
        assert_eq!(
            cell.path_output,
            calibration.join("nwb_converted").join("101.nwb")
        );
    }

    #[test]
    fn test_select() {
        let cell = |id: &str| CellPaths {
            cell_id: id.to_string(),
            group: String::new(),
            path_raw: PathBuf::new(),
            path_processed: PathBuf::new(),
            path_calibration: None,
            paths_tiff: vec![],
            paths_tiff_lowzoom: vec![],
            path_output: PathBuf::new(),
        };
        let cells = vec![cell("a"), cell("b"), cell("c")];
        let selected = select(cells.clone(), Some(&[2, 0, 7][..]));
        assert_eq!(
            selected.iter().map(|c| c.cell_id.as_str()).collect::<Vec<_>>(),
            vec!["c", "a"]
        );
        assert_eq!(select(cells, None).len(), 3);
    }

    #[test]
    fn test_missing_directory() {
        let config = Config {
            raw_path: PathBuf::from("/definitely/not/here"),
            processed_path: PathBuf::from("/definitely/not/here"),
            output_path: Some(std::env::temp_dir()),
            ..Default::default()
        };
        assert!(matches!(
            sweep_cells(&config),
            Err(SweepError::BadDirectory(_))
        ));
    }
}
