use serde_yaml::Value;
use std::sync::mpsc::Sender;

use super::config::Config;
use super::converter::{conversion_steps, OephysConverter};
use super::error::ProcessorError;
use super::metadata::Metadata;
use super::subjects::SubjectsTable;
use super::sweep::{select, sweep_cells, CellPaths};
use super::worker_status::{Stage, WorkerStatus};

fn send_progress(
    tx: &Sender<WorkerStatus>,
    cell: &CellPaths,
    worker_id: usize,
    progress: f32,
    stage: Stage,
) -> Result<(), ProcessorError> {
    tx.send(WorkerStatus::new(progress, &cell.cell_id, worker_id, stage))?;
    Ok(())
}

/// Convert one cell, in the order processed ophys, raw ophys, spikes, voltage traces, trials.
///
/// Progress is reported over tx as the steps enabled in the config complete. Steps with missing
/// data are skipped, see [`OephysConverter::run_conversion`].
pub fn convert_cell(
    config: &Config,
    cell: &CellPaths,
    subjects: &SubjectsTable,
    overlay: Option<&Value>,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    log::info!("Converting group {}, cell {}...", cell.group, cell.cell_id);
    tx.send(WorkerStatus::new(0.0, &cell.cell_id, *worker_id, Stage::Converting))?;

    let mut converter = OephysConverter::new(cell, overlay, subjects)?;
    if !converter.valid() {
        log::warn!("Cell {} is not valid, skipping...", cell.cell_id);
        tx.send(WorkerStatus::new(1.0, &cell.cell_id, *worker_id, Stage::Converting))?;
        return Ok(());
    }

    let options = config.conversion_options();
    let n_steps = conversion_steps(&options).len() + 1;
    converter.run_conversion(&options, |done, _| {
        send_progress(tx, cell, *worker_id, done as f32 / n_steps as f32, Stage::Converting)
    })?;

    let converted = (n_steps - 1) as f32 / n_steps as f32;
    send_progress(tx, cell, *worker_id, converted, Stage::Writing)?;
    converter.save(&cell.path_output, false)?;
    if options.read_check {
        send_progress(tx, cell, *worker_id, converted, Stage::Checking)?;
        converter.read_check(&cell.path_output)?;
    }
    send_progress(tx, cell, *worker_id, 1.0, Stage::Writing)?;
    log::info!("Wrote {}", cell.path_output.display());
    Ok(())
}

/// Load the shared inputs of a set of conversions: the subjects table and the metadata overlay
fn load_shared(config: &Config) -> Result<(SubjectsTable, Option<Value>), ProcessorError> {
    let subjects = SubjectsTable::new(config.subjects_path.as_deref())?;
    let overlay = match &config.metadata_path {
        Some(path) => Some(Metadata::read_overlay(path)?),
        None => None,
    };
    Ok((subjects, overlay))
}

/// Sweep the configured directories and return the cells selected by the config ids
pub fn find_cells(config: &Config) -> Result<Vec<CellPaths>, ProcessorError> {
    let cells = sweep_cells(config)?;
    Ok(select(cells, config.ids.as_deref()))
}

/// The main loop of oephys_nwb.
///
/// This takes in a config (and progress monitor) and converts every selected cell on the calling
/// thread.
pub fn process(config: Config, tx: Sender<WorkerStatus>) -> Result<(), ProcessorError> {
    tx.send(WorkerStatus::new(0.0, "", 0, Stage::Sweeping))?;
    let cells = find_cells(&config)?;
    process_subset(config, tx, 0, cells)
}

/// Convert a subset of cells.
///
/// A cell that fails is logged and the worker moves on to the next one. Failed cells are counted
/// in the returned error once the whole subset has been tried.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<CellPaths>,
) -> Result<(), ProcessorError> {
    let (subjects, overlay) = load_shared(&config)?;
    let mut n_failed = 0;
    for cell in subset.iter() {
        match convert_cell(&config, cell, &subjects, overlay.as_ref(), &tx, &worker_id) {
            Ok(()) => log::info!("Finished cell {}.", cell.cell_id),
            // Nobody is listening anymore
            Err(ProcessorError::SendError(e)) => return Err(e.into()),
            Err(e) => {
                log::error!("Cell {} failed with error: {e}. Skipping it...", cell.cell_id);
                n_failed += 1;
            }
        }
    }
    if n_failed > 0 {
        return Err(ProcessorError::FailedCells(n_failed));
    }
    Ok(())
}

/// Divide the cells in to a set of subsets (per thread/worker)
pub fn create_subsets(cells: Vec<CellPaths>, n_threads: usize) -> Vec<Vec<CellPaths>> {
    let mut subsets: Vec<Vec<CellPaths>> = vec![Vec::new(); n_threads.max(1)];
    let n_subsets = subsets.len();

    for (idx, cell) in cells.into_iter().enumerate() {
        subsets[idx % n_subsets].push(cell)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwb_reader::NwbReader;
    use crate::source::tests::write_session_files;
    use crate::tiff_stack::tests::write_tiff;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::mpsc::channel;

    fn dummy_cell(id: &str) -> CellPaths {
        CellPaths {
            cell_id: id.to_string(),
            group: String::new(),
            path_raw: PathBuf::new(),
            path_processed: PathBuf::new(),
            path_calibration: None,
            paths_tiff: vec![],
            paths_tiff_lowzoom: vec![],
            path_output: PathBuf::new(),
        }
    }

    #[test]
    fn test_create_subsets() {
        let cells: Vec<CellPaths> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| dummy_cell(id))
            .collect();
        let subsets = create_subsets(cells, 2);
        assert_eq!(subsets.len(), 2);
        let ids: Vec<Vec<&str>> = subsets
            .iter()
            .map(|s| s.iter().map(|c| c.cell_id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["a", "c", "e"], vec!["b", "d"]]);
        assert_eq!(create_subsets(vec![dummy_cell("a")], 0).len(), 1);
    }

    #[test]
    fn test_process_raw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let (raw, processed) = write_session_files(&scratch, "101");

        let raw_dir = dir.path().join("raw_data").join("group_a");
        let processed_dir = dir.path().join("processed_data");
        fs::create_dir_all(&raw_dir).unwrap();
        fs::create_dir_all(&processed_dir).unwrap();
        fs::rename(&raw, raw_dir.join("101.h5")).unwrap();
        fs::rename(&processed, processed_dir.join("101_processed.h5")).unwrap();
        write_tiff(&raw_dir.join("101_0.tif"), 3, 4, 4, 0);

        let metadata_path = dir.path().join("metafile.yml");
        fs::write(&metadata_path, "NWBFile:\n  lab: Allen\n").unwrap();

        let config = Config {
            raw_path: dir.path().join("raw_data"),
            processed_path: processed_dir,
            metadata_path: Some(metadata_path),
            ..Default::default()
        };
        let (tx, rx) = channel();
        process(config, tx).unwrap();

        let statuses: Vec<WorkerStatus> = rx.iter().collect();
        assert_eq!(statuses.first().unwrap().stage, Stage::Sweeping);
        let last = statuses.last().unwrap();
        assert_eq!(last.cell_id, "101");
        assert!((last.progress - 1.0).abs() < 1e-6);

        let output = dir
            .path()
            .join("nwb_converted")
            .join("group_a")
            .join("101.nwb");
        let reader = NwbReader::open(&output).unwrap();
        let summary = reader.summary().unwrap();
        assert_eq!(summary.identifier, "1234");
        assert_eq!(summary.n_units, 1);
        assert_eq!(summary.n_trials, 2);
        assert_eq!(
            reader.external_files("/acquisition/raw_ophys").unwrap(),
            vec![String::from("../../raw_data/group_a/101_0.tif")]
        );
        let dff = reader
            .time_series("/processing/ophys/fluorescence/roi_response_series")
            .unwrap();
        assert_eq!(dff.data, vec![0.5, 1.5, 1.0]);
        assert!((dff.rate - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_cells_do_not_stop_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let raw_dir = dir.path().join("raw_data").join("group_a");
        let processed_dir = dir.path().join("processed_data");
        for d in [&scratch, &raw_dir, &processed_dir] {
            fs::create_dir_all(d).unwrap();
        }
        for id in ["100", "101", "102"] {
            let (raw, processed) = write_session_files(&scratch, id);
            fs::rename(&raw, raw_dir.join(format!("{id}.h5"))).unwrap();
            fs::rename(&processed, processed_dir.join(format!("{id}_processed.h5"))).unwrap();
        }
        // 100 cannot be opened at all, 101 lacks imaging and spike data
        fs::write(processed_dir.join("100_processed.h5"), "not hdf5").unwrap();
        let processed = hdf5::File::open_rw(processed_dir.join("101_processed.h5")).unwrap();
        processed.unlink(crate::source::OPHYS_DT_NAME).unwrap();
        processed.unlink(crate::source::SPIKES_NAME).unwrap();
        drop(processed);
        write_tiff(&raw_dir.join("102_0.tif"), 3, 4, 4, 0);

        let config = Config {
            raw_path: dir.path().join("raw_data"),
            processed_path: processed_dir,
            ..Default::default()
        };
        let (tx, rx) = channel();
        let result = process(config, tx);
        assert!(matches!(result, Err(ProcessorError::FailedCells(1))));
        let statuses: Vec<WorkerStatus> = rx.iter().collect();
        assert_eq!(statuses.last().unwrap().cell_id, "102");

        let output = dir.path().join("nwb_converted").join("group_a");
        assert!(!output.join("100.nwb").exists());
        let partial = NwbReader::open(&output.join("101.nwb")).unwrap().summary().unwrap();
        assert_eq!(partial.n_units, 0);
        assert_eq!(partial.n_trials, 2);
        assert!(!partial.acquisition.contains(&String::from("raw_ophys")));
        let full = NwbReader::open(&output.join("102.nwb")).unwrap().summary().unwrap();
        assert_eq!(full.n_units, 1);
        assert!(full.acquisition.contains(&String::from("raw_ophys")));
    }
}
