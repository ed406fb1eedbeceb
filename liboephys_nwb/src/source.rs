use hdf5::File;
use ndarray::Array2;
use std::path::{Path, PathBuf};

use super::error::SourceError;

pub const VOLTAGE_NAME: &str = "Voltage";
pub const EPHYS_DT_NAME: &str = "dte";
pub const FILTERED_VOLTAGE_NAME: &str = "Vmfd";
pub const ANIMAL_ID_NAME: &str = "aid";
pub const TRACE_ID_NAME: &str = "tid";
pub const FRAME_SYNC_NAME: &str = "iFrames";
pub const FLUORESCENCE_NAME: &str = "f_cell";
pub const OPHYS_DT_NAME: &str = "dto";
pub const PIXEL_LIST_NAME: &str = "pixel_list";
pub const SPIKES_NAME: &str = "spk";
pub const STIM_ON_NAME: &str = "iStimOn";
pub const STIM_OFF_NAME: &str = "iStimOff";
pub const SWEEP_ORDER_NAME: &str = "sweep_order";
pub const SWEEP_TABLE_NAME: &str = "sweep_table";
pub const LINES_PER_FRAME_NAME: &str = "linesPerFrame";
pub const PIXELS_PER_LINE_NAME: &str = "pixelsPerLine";

/// Time of a 1-based ephys sample index. Indices in the recording files (`iFrames`, `spk`,
/// `iStimOn`, `iStimOff`) all count samples of the voltage trace from 1; sample 1 is at t = 0.
pub fn sample_time(sample: f64, dt: f64) -> f64 {
    ((sample - 1.0) * dt).max(0.0)
}

/// A read-only HDF5 recording file.
///
/// The recording files store everything as plain numeric datasets at the root, usually written
/// from MATLAB, so vectors may come as `(1, n)` or `(n, 1)`. All reads are flattened.
#[derive(Debug)]
pub struct H5Source {
    file: File,
    path: PathBuf,
}

impl H5Source {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, name: &str) -> bool {
        self.file.link_exists(name)
    }

    /// Read a dataset as a flat vector (the equivalent of numpy's squeeze for vectors)
    pub fn read_vec(&self, name: &str) -> Result<Vec<f64>, SourceError> {
        Ok(self.file.dataset(name)?.read_raw::<f64>()?)
    }

    /// Read the first element of a dataset
    pub fn read_first(&self, name: &str) -> Result<f64, SourceError> {
        self.read_vec(name)?
            .first()
            .copied()
            .ok_or_else(|| SourceError::EmptyDataset(name.to_string()))
    }

    /// Read a dataset as a matrix. 1-D datasets become a single row
    pub fn read_matrix(&self, name: &str) -> Result<Array2<f64>, SourceError> {
        let dataset = self.file.dataset(name)?;
        let shape = dataset.shape();
        let data = dataset.read_raw::<f64>()?;
        let (rows, cols) = match shape.as_slice() {
            [] => (1, 1),
            [n] => (1, *n),
            [r, c] => (*r, *c),
            _ => return Err(SourceError::BadShape(name.to_string(), shape.len())),
        };
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|_| SourceError::BadShape(name.to_string(), shape.len()))
    }
}

/// Frame geometry of the two-photon images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub lines_per_frame: usize,
    pub pixels_per_line: usize,
}

/// The set of files recorded for one cell.
///
/// Datasets are looked up in the calibration file first, then the processed file, then the raw
/// file, so that the quality selected data takes precedence when a key appears in more than one.
#[derive(Debug)]
pub struct SessionSources {
    pub raw: H5Source,
    pub processed: H5Source,
    pub calibration: Option<H5Source>,
}

impl SessionSources {
    pub fn open(
        path_raw: &Path,
        path_processed: &Path,
        path_calibration: Option<&Path>,
    ) -> Result<Self, SourceError> {
        let calibration = match path_calibration {
            Some(p) => Some(H5Source::open(p)?),
            None => None,
        };
        Ok(Self {
            raw: H5Source::open(path_raw)?,
            processed: H5Source::open(path_processed)?,
            calibration,
        })
    }

    /// Find the first source that contains the named dataset
    pub fn find(&self, name: &str) -> Option<&H5Source> {
        self.calibration
            .iter()
            .chain([&self.processed, &self.raw])
            .find(|src| src.has(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn require(&self, name: &str) -> Result<&H5Source, SourceError> {
        self.find(name)
            .ok_or_else(|| SourceError::MissingDataset(name.to_string()))
    }

    pub fn read_vec(&self, name: &str) -> Result<Vec<f64>, SourceError> {
        self.require(name)?.read_vec(name)
    }

    pub fn read_first(&self, name: &str) -> Result<f64, SourceError> {
        self.require(name)?.read_first(name)
    }

    pub fn read_matrix(&self, name: &str) -> Result<Array2<f64>, SourceError> {
        self.require(name)?.read_matrix(name)
    }

    /// The session identifier is the trace id stored in the processed data
    pub fn session_id(&self) -> Result<String, SourceError> {
        Ok(format!("{}", self.read_first(TRACE_ID_NAME)? as i64))
    }

    /// The animal id, or None if the data has no (or a NaN) `aid`
    pub fn subject_id(&self) -> Result<Option<String>, SourceError> {
        if !self.has(ANIMAL_ID_NAME) {
            return Ok(None);
        }
        let aid = self.read_first(ANIMAL_ID_NAME)?;
        if aid.is_nan() {
            Ok(None)
        } else {
            Ok(Some(format!("{}", aid as i64)))
        }
    }

    pub fn ephys_dt(&self) -> Result<f64, SourceError> {
        self.read_first(EPHYS_DT_NAME)
    }

    pub fn ophys_dt(&self) -> Result<f64, SourceError> {
        self.read_first(OPHYS_DT_NAME)
    }

    pub fn frame_geometry(&self) -> Result<FrameGeometry, SourceError> {
        Ok(FrameGeometry {
            lines_per_frame: self.read_first(LINES_PER_FRAME_NAME)? as usize,
            pixels_per_line: self.read_first(PIXELS_PER_LINE_NAME)? as usize,
        })
    }

    /// The (1-based) ephys sample index at which the first imaging frame was acquired
    pub fn first_frame_sample(&self) -> Result<Option<f64>, SourceError> {
        if !self.has(FRAME_SYNC_NAME) {
            return Ok(None);
        }
        Ok(Some(self.read_first(FRAME_SYNC_NAME)?))
    }

    /// Start time of the imaging data relative to the ephys recording
    pub fn ophys_starting_time(&self) -> Result<f64, SourceError> {
        match self.first_frame_sample()? {
            Some(sample) if sample.is_finite() => Ok(sample_time(sample, self.ephys_dt()?)),
            _ => Ok(0.0),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::array;

    /// Write a minimal raw + processed pair into dir, returning (raw, processed)
    pub(crate) fn write_session_files(dir: &Path, cell_id: &str) -> (PathBuf, PathBuf) {
        let raw_path = dir.join(format!("{cell_id}.h5"));
        let raw = File::create(&raw_path).unwrap();
        raw.new_dataset_builder()
            .with_data(&array![[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]])
            .create(VOLTAGE_NAME)
            .unwrap();
        raw.new_dataset_builder()
            .with_data(&[0.001])
            .create(EPHYS_DT_NAME)
            .unwrap();

        let processed_path = dir.join(format!("{cell_id}_processed.h5"));
        let processed = File::create(&processed_path).unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[0.001])
            .create(EPHYS_DT_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1])
            .create(FILTERED_VOLTAGE_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[300049.0])
            .create(ANIMAL_ID_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[1234.0])
            .create(TRACE_ID_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[3.0, 5.0, 7.0])
            .create(FRAME_SYNC_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[0.5, 1.5, 1.0])
            .create(FLUORESCENCE_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[0.002])
            .create(OPHYS_DT_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[0.0, 5.0, 6.0])
            .create(PIXEL_LIST_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[4.0])
            .create(LINES_PER_FRAME_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&array![[4.0]])
            .create(PIXELS_PER_LINE_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[2.0, 6.0])
            .create(SPIKES_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[1.0, 5.0])
            .create(STIM_ON_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[4.0, 9.0])
            .create(STIM_OFF_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&[1.0, -1.0])
            .create(SWEEP_ORDER_NAME)
            .unwrap();
        processed
            .new_dataset_builder()
            .with_data(&array![[0.0, 0.04], [90.0, 0.08]])
            .create(SWEEP_TABLE_NAME)
            .unwrap();

        (raw_path, processed_path)
    }

    #[test]
    fn test_lookup_order_and_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let sources = SessionSources::open(&raw, &processed, None).unwrap();

        assert_eq!(sources.find(VOLTAGE_NAME).unwrap().path(), raw.as_path());
        assert_eq!(
            sources.find(EPHYS_DT_NAME).unwrap().path(),
            processed.as_path()
        );
        assert_eq!(sources.session_id().unwrap(), "1234");
        assert_eq!(sources.subject_id().unwrap().as_deref(), Some("300049"));
        assert_eq!(
            sources.frame_geometry().unwrap(),
            FrameGeometry {
                lines_per_frame: 4,
                pixels_per_line: 4
            }
        );
        // iFrames[0] = 3 (1-based) at dt = 1 ms
        assert!((sources.ophys_starting_time().unwrap() - 0.002).abs() < 1e-12);
        assert_eq!(sources.read_vec(VOLTAGE_NAME).unwrap().len(), 10);
        assert_eq!(sources.read_matrix(SWEEP_TABLE_NAME).unwrap().dim(), (2, 2));
        assert!(matches!(
            sources.read_vec("nope"),
            Err(SourceError::MissingDataset(_))
        ));
    }

    #[test]
    fn test_calibration_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let calibration = dir.path().join("101_calibration.h5");
        let file = File::create(&calibration).unwrap();
        file.new_dataset_builder()
            .with_data(&[0.0005])
            .create(EPHYS_DT_NAME)
            .unwrap();
        file.new_dataset_builder()
            .with_data(&[5678.0])
            .create(TRACE_ID_NAME)
            .unwrap();
        drop(file);

        let sources = SessionSources::open(&raw, &processed, Some(&calibration)).unwrap();
        assert_eq!(
            sources.find(EPHYS_DT_NAME).unwrap().path(),
            calibration.as_path()
        );
        assert_eq!(sources.ephys_dt().unwrap(), 0.0005);
        assert_eq!(sources.session_id().unwrap(), "5678");
        // Keys the calibration file lacks still come from processed, then raw
        assert_eq!(sources.find(SPIKES_NAME).unwrap().path(), processed.as_path());
        assert_eq!(sources.find(VOLTAGE_NAME).unwrap().path(), raw.as_path());
        // iFrames[0] = 3 is now read with the calibrated dt
        assert!((sources.ophys_starting_time().unwrap() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_sample_time() {
        assert_eq!(sample_time(1.0, 0.5), 0.0);
        assert_eq!(sample_time(5.0, 0.5), 2.0);
        assert_eq!(sample_time(0.0, 0.5), 0.0);
    }

    #[test]
    fn test_nan_subject_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nan.h5");
        let file = File::create(&path).unwrap();
        file.new_dataset_builder()
            .with_data(&[f64::NAN])
            .create(ANIMAL_ID_NAME)
            .unwrap();
        drop(file);
        let sources = SessionSources::open(&path, &path, None).unwrap();
        assert_eq!(sources.subject_id().unwrap(), None);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            H5Source::open(Path::new("/nowhere/at/all.h5")),
            Err(SourceError::BadFilePath(_))
        ));
    }
}
