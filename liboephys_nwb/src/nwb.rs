//! In-memory model of the NWB objects written by the converter.
//!
//! This mirrors the subset of the NWB core schema used for the oephys data: a session container
//! with devices, an electrode table, imaging planes, acquired and processed time series, a units
//! table and a trials table. Nothing touches disk until the model is handed to the
//! [`NwbWriter`](crate::nwb_writer::NwbWriter).
use std::path::PathBuf;

use super::error::NwbError;
use super::roi::PixelMask;

/// Regular sampling of a time series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub starting_time: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub subject_id: String,
    pub genotype: Option<String>,
    pub age: Option<String>,
    pub species: Option<String>,
    pub sex: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeGroup {
    pub name: String,
    pub description: String,
    pub location: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Electrode {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub imp: f64,
    pub location: String,
    pub filtering: String,
    pub group: String,
}

/// Rows of a table referenced by a series
#[derive(Debug, Clone, PartialEq)]
pub struct TableRegion {
    pub indices: Vec<u64>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpticalChannel {
    pub name: String,
    pub description: String,
    pub emission_lambda: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagingPlane {
    pub name: String,
    pub description: String,
    pub indicator: String,
    pub device: String,
    pub excitation_lambda: f64,
    pub location: String,
    pub imaging_rate: f64,
    pub optical_channels: Vec<OpticalChannel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectricalSeries {
    pub name: String,
    pub description: String,
    pub data: Vec<f64>,
    pub electrodes: TableRegion,
    pub timing: Timing,
}

/// Raw imaging data is either linked to the TIFF files or copied into the NWB file.
/// Linked files are stored relative to the directory of the written NWB file
#[derive(Debug, Clone, PartialEq)]
pub enum TwoPhotonData {
    External {
        files: Vec<PathBuf>,
        starting_frame: Vec<u64>,
    },
    Stored {
        files: Vec<PathBuf>,
        n_frames: usize,
        dimensions: (usize, usize),
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwoPhotonSeries {
    pub name: String,
    pub description: String,
    pub imaging_plane: String,
    pub data: TwoPhotonData,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Electrical(ElectricalSeries),
    TwoPhoton(TwoPhotonSeries),
}

impl Acquisition {
    pub fn name(&self) -> &str {
        match self {
            Self::Electrical(s) => &s.name,
            Self::TwoPhoton(s) => &s.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSegmentation {
    pub name: String,
    pub description: String,
    pub imaging_plane: String,
    pub rois: Vec<PixelMask>,
}

impl PlaneSegmentation {
    pub fn new(name: &str, description: &str, imaging_plane: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            imaging_plane: imaging_plane.to_string(),
            rois: Vec::new(),
        }
    }

    /// Add a region of interest, returning its row index
    pub fn add_roi(&mut self, pixel_mask: PixelMask) -> usize {
        self.rois.push(pixel_mask);
        self.rois.len() - 1
    }

    pub fn create_roi_table_region(
        &self,
        description: &str,
        region: &[usize],
    ) -> Result<TableRegion, NwbError> {
        region_of(region, self.rois.len(), description)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoiResponseSeries {
    pub name: String,
    pub unit: String,
    pub data: Vec<f64>,
    pub rois: TableRegion,
    pub plane_segmentation: String,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataInterface {
    Electrical(ElectricalSeries),
    Fluorescence {
        name: String,
        series: Vec<RoiResponseSeries>,
    },
    ImageSegmentation {
        name: String,
        plane_segmentations: Vec<PlaneSegmentation>,
    },
}

impl DataInterface {
    pub fn name(&self) -> &str {
        match self {
            Self::Electrical(s) => &s.name,
            Self::Fluorescence { name, .. } => name,
            Self::ImageSegmentation { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub interfaces: Vec<DataInterface>,
}

impl ProcessingModule {
    pub fn add(&mut self, interface: DataInterface) -> Result<(), NwbError> {
        if self.get(interface.name()).is_some() {
            return Err(NwbError::Duplicate(
                "data interface",
                interface.name().to_string(),
            ));
        }
        self.interfaces.push(interface);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DataInterface> {
        self.interfaces.iter().find(|i| i.name() == name)
    }
}

/// Sorted units with ragged spike times
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Units {
    pub description: String,
    pub spike_times: Vec<Vec<f64>>,
}

impl Units {
    pub fn add_unit(&mut self, mut spike_times: Vec<f64>) -> usize {
        spike_times.sort_by(|a, b| a.total_cmp(b));
        self.spike_times.push(spike_times);
        self.spike_times.len() - 1
    }
}

/// Trials table: start/stop times plus float parameter columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trials {
    pub columns: Vec<String>,
    pub start_time: Vec<f64>,
    pub stop_time: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

impl Trials {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    pub fn add_trial(
        &mut self,
        start_time: f64,
        stop_time: f64,
        values: Vec<f64>,
    ) -> Result<(), NwbError> {
        if stop_time < start_time {
            return Err(NwbError::BadTrial(start_time, stop_time));
        }
        if values.len() != self.columns.len() {
            return Err(NwbError::BadTrialArity(values.len(), self.columns.len()));
        }
        self.start_time.push(start_time);
        self.stop_time.push(stop_time);
        self.values.push(values);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.start_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start_time.is_empty()
    }

    /// All values of one parameter column
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.values.iter().map(|row| row[index]).collect()
    }
}

fn region_of(region: &[usize], n_rows: usize, description: &str) -> Result<TableRegion, NwbError> {
    if let Some(bad) = region.iter().find(|idx| **idx >= n_rows) {
        return Err(NwbError::BadRegion(*bad, n_rows));
    }
    Ok(TableRegion {
        indices: region.iter().map(|idx| *idx as u64).collect(),
        description: description.to_string(),
    })
}

/// The session container
#[derive(Debug, Clone, PartialEq)]
pub struct NwbFile {
    pub identifier: String,
    pub session_description: String,
    pub session_start_time: String,
    pub institution: Option<String>,
    pub lab: Option<String>,
    pub experimenter: Option<Vec<String>>,
    pub pharmacology: Option<String>,
    pub subject: Option<Subject>,
    pub devices: Vec<Device>,
    pub electrode_groups: Vec<ElectrodeGroup>,
    pub electrodes: Vec<Electrode>,
    pub imaging_planes: Vec<ImagingPlane>,
    pub acquisition: Vec<Acquisition>,
    pub processing: Vec<ProcessingModule>,
    pub units: Option<Units>,
    pub trials: Option<Trials>,
}

impl NwbFile {
    pub fn new(identifier: &str, session_description: &str, session_start_time: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            session_description: session_description.to_string(),
            session_start_time: session_start_time.to_string(),
            institution: None,
            lab: None,
            experimenter: None,
            pharmacology: None,
            subject: None,
            devices: Vec::new(),
            electrode_groups: Vec::new(),
            electrodes: Vec::new(),
            imaging_planes: Vec::new(),
            acquisition: Vec::new(),
            processing: Vec::new(),
            units: None,
            trials: None,
        }
    }

    pub fn add_device(&mut self, device: Device) -> Result<(), NwbError> {
        if self.device(&device.name).is_some() {
            return Err(NwbError::Duplicate("device", device.name));
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Create an electrode group. An existing group of the same name is kept as is
    pub fn create_electrode_group(&mut self, group: ElectrodeGroup) -> Result<(), NwbError> {
        if self.electrode_group(&group.name).is_some() {
            log::warn!("{} already exists in current NWBFile.", group.name);
            return Ok(());
        }
        if self.device(&group.device).is_none() {
            return Err(NwbError::MissingDevice(group.device));
        }
        self.electrode_groups.push(group);
        Ok(())
    }

    pub fn electrode_group(&self, name: &str) -> Option<&ElectrodeGroup> {
        self.electrode_groups.iter().find(|g| g.name == name)
    }

    pub fn add_electrode(&mut self, electrode: Electrode) -> Result<(), NwbError> {
        if self.electrode_group(&electrode.group).is_none() {
            return Err(NwbError::MissingElectrodeGroup(electrode.group));
        }
        if self.electrodes.iter().any(|e| e.id == electrode.id) {
            return Err(NwbError::Duplicate("electrode", electrode.id.to_string()));
        }
        self.electrodes.push(electrode);
        Ok(())
    }

    pub fn create_electrode_table_region(
        &self,
        region: &[usize],
        description: &str,
    ) -> Result<TableRegion, NwbError> {
        region_of(region, self.electrodes.len(), description)
    }

    /// Create an imaging plane, or return the existing plane with the same name
    pub fn create_imaging_plane(&mut self, plane: ImagingPlane) -> Result<&ImagingPlane, NwbError> {
        if let Some(idx) = self.imaging_planes.iter().position(|p| p.name == plane.name) {
            return Ok(&self.imaging_planes[idx]);
        }
        if self.device(&plane.device).is_none() {
            return Err(NwbError::MissingDevice(plane.device));
        }
        self.imaging_planes.push(plane);
        Ok(&self.imaging_planes[self.imaging_planes.len() - 1])
    }

    pub fn imaging_plane(&self, name: &str) -> Option<&ImagingPlane> {
        self.imaging_planes.iter().find(|p| p.name == name)
    }

    pub fn add_acquisition(&mut self, acquisition: Acquisition) -> Result<(), NwbError> {
        if self.acquisition(acquisition.name()).is_some() {
            return Err(NwbError::Duplicate(
                "acquisition",
                acquisition.name().to_string(),
            ));
        }
        if let Acquisition::TwoPhoton(series) = &acquisition {
            if self.imaging_plane(&series.imaging_plane).is_none() {
                return Err(NwbError::MissingImagingPlane(series.imaging_plane.clone()));
            }
        }
        self.acquisition.push(acquisition);
        Ok(())
    }

    pub fn acquisition(&self, name: &str) -> Option<&Acquisition> {
        self.acquisition.iter().find(|a| a.name() == name)
    }

    /// Get a processing module, creating it when it does not exist
    pub fn processing_module(&mut self, name: &str, description: &str) -> &mut ProcessingModule {
        let idx = match self.processing.iter().position(|m| m.name == name) {
            Some(idx) => idx,
            None => {
                self.processing.push(ProcessingModule {
                    name: name.to_string(),
                    description: description.to_string(),
                    interfaces: Vec::new(),
                });
                self.processing.len() - 1
            }
        };
        &mut self.processing[idx]
    }

    pub fn get_processing_module(&self, name: &str) -> Option<&ProcessingModule> {
        self.processing.iter().find(|m| m.name == name)
    }

    pub fn set_units(&mut self, units: Units) {
        self.units = Some(units);
    }

    pub fn set_trials(&mut self, trials: Trials) {
        self.trials = Some(trials);
    }
}
