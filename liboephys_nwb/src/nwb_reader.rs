use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use std::path::{Path, PathBuf};

use super::error::NwbReaderError;
use super::nwb_writer::{PixelMaskRow, ACQUISITION_NAME, PROCESSING_NAME, TRIALS_PATH, UNITS_NAME};
use super::roi::{PixelMask, PixelMaskEntry};
use super::timeseries::TimeSeriesData;

/// Names and counts of the top level objects of an NWB file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NwbSummary {
    pub identifier: String,
    pub nwb_version: String,
    pub acquisition: Vec<String>,
    /// Processing module names with the names of their data interfaces
    pub processing: Vec<(String, Vec<String>)>,
    pub n_units: usize,
    pub n_trials: usize,
}

/// Read access to NWB files written by the converter
///
/// Only the subset of the layout needed by the read check and the dashboard is exposed. Every
/// accessor takes the absolute HDF5 path of the object it reads.
#[derive(Debug)]
pub struct NwbReader {
    file: File,
    path: PathBuf,
    nwb_version: String,
}

fn read_str(group: &Group, name: &str) -> Result<String, NwbReaderError> {
    let value = group.dataset(name)?.read_scalar::<VarLenUnicode>()?;
    Ok(value.as_str().to_string())
}

fn read_str_attr(location: &hdf5::Location, name: &str) -> Option<String> {
    location
        .attr(name)
        .and_then(|a| a.read_scalar::<VarLenUnicode>())
        .map(|s| s.as_str().to_string())
        .ok()
}

/// Split a flat ragged column into rows using its VectorIndex
fn split_ragged<T: Clone>(flat: &[T], ends: &[u64]) -> Vec<Vec<T>> {
    let mut rows = Vec::with_capacity(ends.len());
    let mut start = 0;
    for end in ends.iter().map(|e| (*e as usize).min(flat.len())) {
        rows.push(flat[start.min(end)..end].to_vec());
        start = end;
    }
    rows
}

impl NwbReader {
    pub fn open(path: &Path) -> Result<Self, NwbReaderError> {
        if !path.exists() {
            return Err(NwbReaderError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let nwb_version = read_str_attr(&file, "nwb_version")
            .ok_or_else(|| NwbReaderError::NotNwb(path.to_path_buf()))?;
        log::info!("Opened {} with NWB version {}", path.display(), nwb_version);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            nwb_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has(&self, object_path: &str) -> bool {
        self.file.link_exists(object_path)
    }

    fn group(&self, object_path: &str) -> Result<Group, NwbReaderError> {
        if !self.has(object_path) {
            return Err(NwbReaderError::MissingObject(object_path.to_string()));
        }
        Ok(self.file.group(object_path)?)
    }

    pub fn identifier(&self) -> Result<String, NwbReaderError> {
        read_str(&self.file, "identifier")
    }

    pub fn session_start_time(&self) -> Result<String, NwbReaderError> {
        read_str(&self.file, "session_start_time")
    }

    fn member_names(&self, object_path: &str) -> Result<Vec<String>, NwbReaderError> {
        if !self.has(object_path) {
            return Ok(Vec::new());
        }
        let mut names = self.file.group(object_path)?.member_names()?;
        names.sort();
        Ok(names)
    }

    fn table_rows(&self, object_path: &str) -> Result<usize, NwbReaderError> {
        let id_path = format!("{object_path}/id");
        if !self.has(&id_path) {
            return Ok(0);
        }
        Ok(self.file.dataset(&id_path)?.size())
    }

    pub fn summary(&self) -> Result<NwbSummary, NwbReaderError> {
        let mut processing = Vec::new();
        for module in self.member_names(PROCESSING_NAME)? {
            let interfaces = self.member_names(&format!("{PROCESSING_NAME}/{module}"))?;
            processing.push((module, interfaces));
        }
        Ok(NwbSummary {
            identifier: self.identifier()?,
            nwb_version: self.nwb_version.clone(),
            acquisition: self.member_names(ACQUISITION_NAME)?,
            processing,
            n_units: self.table_rows(UNITS_NAME)?,
            n_trials: self.table_rows(TRIALS_PATH)?,
        })
    }

    /// Read a regularly sampled series (data plus starting_time and rate)
    pub fn time_series(&self, object_path: &str) -> Result<TimeSeriesData, NwbReaderError> {
        let group = self.group(object_path)?;
        let data = group.dataset("data")?;
        let unit = read_str_attr(&data, "unit").unwrap_or_else(|| String::from("unknown"));
        let conversion = data
            .attr("conversion")
            .and_then(|a| a.read_scalar::<f64>())
            .unwrap_or(1.0);
        let values: Vec<f64> = data
            .read_raw::<f64>()?
            .into_iter()
            .map(|v| v * conversion)
            .collect();
        let starting = group.dataset("starting_time")?;
        let starting_time = starting.read_scalar::<f64>()?;
        let rate = starting.attr("rate")?.read_scalar::<f64>()?;
        Ok(TimeSeriesData {
            data: values,
            starting_time,
            rate,
            unit,
        })
    }

    pub fn series_rate(&self, object_path: &str) -> Result<f64, NwbReaderError> {
        let group = self.group(object_path)?;
        Ok(group
            .dataset("starting_time")?
            .attr("rate")?
            .read_scalar::<f64>()?)
    }

    pub fn series_starting_time(&self, object_path: &str) -> Result<f64, NwbReaderError> {
        let group = self.group(object_path)?;
        Ok(group.dataset("starting_time")?.read_scalar::<f64>()?)
    }

    /// Spike times of one unit of the units table
    pub fn spike_times(&self, unit: usize) -> Result<Vec<f64>, NwbReaderError> {
        let group = self.group(UNITS_NAME)?;
        let flat = group.dataset("spike_times")?.read_raw::<f64>()?;
        let ends = group.dataset("spike_times_index")?.read_raw::<u64>()?;
        split_ragged(&flat, &ends)
            .into_iter()
            .nth(unit)
            .ok_or_else(|| NwbReaderError::MissingObject(format!("{UNITS_NAME}[{unit}]")))
    }

    /// Pixel mask of one ROI of a plane segmentation
    pub fn pixel_mask(&self, object_path: &str, roi: usize) -> Result<PixelMask, NwbReaderError> {
        let group = self.group(object_path)?;
        let rows = group.dataset("pixel_mask")?.read_raw::<PixelMaskRow>()?;
        let ends = group.dataset("pixel_mask_index")?.read_raw::<u64>()?;
        let pixels = split_ragged(&rows, &ends)
            .into_iter()
            .nth(roi)
            .ok_or_else(|| NwbReaderError::MissingObject(format!("{object_path}[{roi}]")))?;
        Ok(PixelMask {
            pixels: pixels
                .into_iter()
                .map(|r| PixelMaskEntry {
                    x: r.x,
                    y: r.y,
                    weight: r.weight,
                })
                .collect(),
        })
    }

    /// Linked files of an image series, empty when the frames are stored in the file
    pub fn external_files(&self, object_path: &str) -> Result<Vec<String>, NwbReaderError> {
        let group = self.group(object_path)?;
        if !group.link_exists("external_file") {
            return Ok(Vec::new());
        }
        Ok(group
            .dataset("external_file")?
            .read_raw::<VarLenUnicode>()?
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect())
    }

    pub fn starting_frames(&self, object_path: &str) -> Result<Vec<u64>, NwbReaderError> {
        let group = self.group(object_path)?;
        if !group.link_exists("external_file") {
            return Ok(Vec::new());
        }
        Ok(group
            .dataset("external_file")?
            .attr("starting_frame")?
            .read_raw::<u64>()?)
    }

    /// Number of frames and (rows, cols) of an image series stored in the file
    pub fn stored_frame_shape(
        &self,
        object_path: &str,
    ) -> Result<Option<(usize, usize, usize)>, NwbReaderError> {
        let group = self.group(object_path)?;
        let shape = group.dataset("data")?.shape();
        match shape.as_slice() {
            [n, rows, cols] if *n > 0 => Ok(Some((*n, *rows, *cols))),
            _ => Ok(None),
        }
    }

    /// One frame of an image series stored in the file
    pub fn stored_frame(
        &self,
        object_path: &str,
        index: usize,
    ) -> Result<ndarray::Array2<u16>, NwbReaderError> {
        let group = self.group(object_path)?;
        let frame = group
            .dataset("data")?
            .read_slice_2d::<u16, _>(ndarray::s![index, .., ..])?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwb::{
        Acquisition, DataInterface, Device, ElectricalSeries, Electrode, ElectrodeGroup, NwbFile,
        PlaneSegmentation, RoiResponseSeries, Timing, Trials, Units,
    };
    use crate::nwb_writer::NwbWriter;
    use crate::roi::pixel_mask_from_list;

    fn sample_file() -> NwbFile {
        let mut nwb = NwbFile::new("1234", "session description", "1900-01-01T00:00:00Z");
        nwb.add_device(Device {
            name: String::from("Device_ecephys"),
            description: None,
        })
        .unwrap();
        nwb.create_electrode_group(ElectrodeGroup {
            name: String::from("ElectrodeGroup"),
            description: String::from("no description"),
            location: String::from("unknown"),
            device: String::from("Device_ecephys"),
        })
        .unwrap();
        nwb.add_electrode(Electrode {
            id: 0,
            x: f64::NAN,
            y: f64::NAN,
            z: f64::NAN,
            imp: f64::NAN,
            location: String::from("location"),
            filtering: String::from("none"),
            group: String::from("ElectrodeGroup"),
        })
        .unwrap();
        let electrodes = nwb.create_electrode_table_region(&[0], "electrode").unwrap();
        nwb.add_acquisition(Acquisition::Electrical(ElectricalSeries {
            name: String::from("raw_membrane_voltage"),
            description: String::from("raw"),
            data: vec![0.1, 0.2, 0.3, 0.4],
            electrodes,
            timing: Timing {
                starting_time: 0.0,
                rate: 1000.0,
            },
        }))
        .unwrap();

        let mut ps = PlaneSegmentation::new("plane_segmentation", "segmentation", "ImagingPlane");
        ps.add_roi(pixel_mask_from_list(&[0.0, 5.0, 6.0], 4));
        let rois = ps.create_roi_table_region("roi", &[0]).unwrap();
        let module = nwb.processing_module("ophys", "optical physiology");
        module
            .add(DataInterface::ImageSegmentation {
                name: String::from("image_segmentation"),
                plane_segmentations: vec![ps],
            })
            .unwrap();
        module
            .add(DataInterface::Fluorescence {
                name: String::from("fluorescence"),
                series: vec![RoiResponseSeries {
                    name: String::from("roi_response_series"),
                    unit: String::from("dF/F"),
                    data: vec![0.5, 1.5, 1.0],
                    rois,
                    plane_segmentation: String::from("plane_segmentation"),
                    timing: Timing {
                        starting_time: 0.002,
                        rate: 500.0,
                    },
                }],
            })
            .unwrap();

        let mut units = Units {
            description: String::from("spikes"),
            ..Default::default()
        };
        units.add_unit(vec![0.006, 0.002]);
        nwb.set_units(units);

        let mut trials = Trials::new(vec![String::from("orientation")]);
        trials.add_trial(0.001, 0.004, vec![0.0]).unwrap();
        trials.add_trial(0.005, 0.009, vec![f64::NAN]).unwrap();
        nwb.set_trials(trials);
        nwb
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.nwb");
        NwbWriter::write(&sample_file(), &path).unwrap();

        let reader = NwbReader::open(&path).unwrap();
        let summary = reader.summary().unwrap();
        assert_eq!(summary.identifier, "1234");
        assert_eq!(summary.acquisition, vec![String::from("raw_membrane_voltage")]);
        assert_eq!(
            summary.processing,
            vec![(
                String::from("ophys"),
                vec![
                    String::from("fluorescence"),
                    String::from("image_segmentation")
                ]
            )]
        );
        assert_eq!(summary.n_units, 1);
        assert_eq!(summary.n_trials, 2);

        let series = reader.time_series("/acquisition/raw_membrane_voltage").unwrap();
        assert_eq!(series.data, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(series.rate, 1000.0);
        assert_eq!(series.unit, "volts");

        let dff = reader
            .time_series("/processing/ophys/fluorescence/roi_response_series")
            .unwrap();
        assert_eq!(dff.starting_time, 0.002);
        assert_eq!(dff.unit, "dF/F");

        assert_eq!(reader.spike_times(0).unwrap(), vec![0.002, 0.006]);
        assert!(reader.spike_times(1).is_err());

        let mask = reader
            .pixel_mask("/processing/ophys/image_segmentation/plane_segmentation", 0)
            .unwrap();
        assert_eq!(mask.len(), 3);
        assert_eq!((mask.pixels[1].x, mask.pixels[1].y), (1, 1));
    }

    #[test]
    fn test_region_points_to_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.nwb");
        NwbWriter::write(&sample_file(), &path).unwrap();
        let file = File::open(&path).unwrap();
        let rois = file
            .dataset("/processing/ophys/fluorescence/roi_response_series/rois")
            .unwrap();
        let table = rois
            .attr("table")
            .unwrap()
            .read_scalar::<VarLenUnicode>()
            .unwrap();
        assert_eq!(
            table.as_str(),
            "/processing/ophys/image_segmentation/plane_segmentation"
        );
        assert_eq!(rois.read_raw::<u64>().unwrap(), vec![0]);
    }

    #[test]
    fn test_rejects_non_nwb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.h5");
        File::create(&path).unwrap();
        assert!(matches!(
            NwbReader::open(&path),
            Err(NwbReaderError::NotNwb(_))
        ));
        assert!(matches!(
            NwbReader::open(&dir.path().join("missing.nwb")),
            Err(NwbReaderError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_split_ragged() {
        let rows = split_ragged(&[1, 2, 3, 4], &[1, 1, 4]);
        assert_eq!(rows, vec![vec![1], vec![], vec![2, 3, 4]]);
    }
}
