use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, H5Type, Location};
use ndarray::s;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::error::NwbWriterError;
use super::nwb::{
    Acquisition, DataInterface, ElectricalSeries, NwbFile, PlaneSegmentation, ProcessingModule,
    RoiResponseSeries, TableRegion, Timing, Trials, TwoPhotonData, TwoPhotonSeries, Units,
};
use super::paths::relative_to;
use super::tiff_stack::TiffStack;

/// This is the version of the NWB schema the layout follows
pub const NWB_VERSION: &str = "2.2.5";
const NAMESPACE: &str = "core";

pub const ACQUISITION_NAME: &str = "acquisition";
pub const PROCESSING_NAME: &str = "processing";
pub const GENERAL_NAME: &str = "general";
pub const DEVICES_PATH: &str = "/general/devices";
pub const ECEPHYS_PATH: &str = "/general/extracellular_ephys";
pub const ELECTRODES_PATH: &str = "/general/extracellular_ephys/electrodes";
pub const OPHYS_PATH: &str = "/general/optophysiology";
pub const UNITS_NAME: &str = "units";
pub const TRIALS_PATH: &str = "/intervals/trials";

/// Row of the pixel_mask column of a PlaneSegmentation
#[derive(H5Type, Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct PixelMaskRow {
    pub x: u32,
    pub y: u32,
    pub weight: f32,
}

fn vlu(value: &str) -> Result<VarLenUnicode, NwbWriterError> {
    Ok(VarLenUnicode::from_str(value)?)
}

fn set_str_attr(loc: &Location, name: &str, value: &str) -> Result<(), NwbWriterError> {
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&vlu(value)?)?;
    Ok(())
}

fn set_f64_attr(loc: &Location, name: &str, value: f64) -> Result<(), NwbWriterError> {
    loc.new_attr::<f64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

fn set_str_array_attr(loc: &Location, name: &str, values: &[String]) -> Result<(), NwbWriterError> {
    let encoded = values
        .iter()
        .map(|v| vlu(v))
        .collect::<Result<Vec<_>, _>>()?;
    loc.new_attr_builder()
        .with_data(encoded.as_slice())
        .create(name)?;
    Ok(())
}

/// Tag an object with its NWB type
fn set_neurodata_type(loc: &Location, neurodata_type: &str) -> Result<(), NwbWriterError> {
    set_str_attr(loc, "namespace", NAMESPACE)?;
    set_str_attr(loc, "neurodata_type", neurodata_type)?;
    set_str_attr(loc, "object_id", &uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn write_str(group: &Group, name: &str, value: &str) -> Result<(), NwbWriterError> {
    group
        .new_dataset::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&vlu(value)?)?;
    Ok(())
}

fn write_opt_str(group: &Group, name: &str, value: &Option<String>) -> Result<(), NwbWriterError> {
    if let Some(v) = value {
        write_str(group, name, v)?;
    }
    Ok(())
}

fn write_f64(group: &Group, name: &str, value: f64) -> Result<hdf5::Dataset, NwbWriterError> {
    let dataset = group.new_dataset::<f64>().create(name)?;
    dataset.write_scalar(&value)?;
    Ok(dataset)
}

fn write_str_vec(
    group: &Group,
    name: &str,
    values: &[String],
) -> Result<hdf5::Dataset, NwbWriterError> {
    let encoded = values
        .iter()
        .map(|v| vlu(v))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(group
        .new_dataset_builder()
        .with_data(encoded.as_slice())
        .create(name)?)
}

/// Write the data of a time series, with its unit and conversion attributes
fn write_series_data(group: &Group, data: &[f64], unit: &str) -> Result<(), NwbWriterError> {
    let dataset = group.new_dataset_builder().with_data(data).create("data")?;
    set_f64_attr(&dataset, "conversion", 1.0)?;
    set_f64_attr(&dataset, "resolution", -1.0)?;
    set_str_attr(&dataset, "unit", unit)?;
    Ok(())
}

fn write_timing(group: &Group, timing: &Timing) -> Result<(), NwbWriterError> {
    let dataset = write_f64(group, "starting_time", timing.starting_time)?;
    set_f64_attr(&dataset, "rate", timing.rate)?;
    set_str_attr(&dataset, "unit", "seconds")?;
    Ok(())
}

/// A DynamicTableRegion is written as row indices plus the path of the table it points into
fn write_region(
    group: &Group,
    name: &str,
    region: &TableRegion,
    table_path: &str,
) -> Result<(), NwbWriterError> {
    let dataset = group
        .new_dataset_builder()
        .with_data(region.indices.as_slice())
        .create(name)?;
    set_neurodata_type(&dataset, "DynamicTableRegion")?;
    set_str_attr(&dataset, "description", &region.description)?;
    set_str_attr(&dataset, "table", table_path)?;
    Ok(())
}

/// Write the attributes and id column shared by every DynamicTable
fn begin_table(
    group: &Group,
    neurodata_type: &str,
    description: &str,
    colnames: &[String],
    ids: &[i64],
) -> Result<(), NwbWriterError> {
    set_neurodata_type(group, neurodata_type)?;
    set_str_attr(group, "description", description)?;
    set_str_array_attr(group, "colnames", colnames)?;
    let id = group
        .new_dataset_builder()
        .with_data(ids)
        .create("id")?;
    set_neurodata_type(&id, "ElementIdentifiers")?;
    Ok(())
}

fn row_ids(n_rows: usize) -> Vec<i64> {
    (0..n_rows as i64).collect()
}

fn write_column(
    group: &Group,
    name: &str,
    data: &[f64],
    description: &str,
) -> Result<(), NwbWriterError> {
    let dataset = group.new_dataset_builder().with_data(data).create(name)?;
    set_neurodata_type(&dataset, "VectorData")?;
    set_str_attr(&dataset, "description", description)?;
    Ok(())
}

fn write_str_column(
    group: &Group,
    name: &str,
    data: &[String],
    description: &str,
) -> Result<(), NwbWriterError> {
    let dataset = write_str_vec(group, name, data)?;
    set_neurodata_type(&dataset, "VectorData")?;
    set_str_attr(&dataset, "description", description)?;
    Ok(())
}

/// Write the index of a ragged column: the end offset of every row
fn write_index(
    group: &Group,
    name: &str,
    lengths: impl Iterator<Item = usize>,
    target: &str,
) -> Result<(), NwbWriterError> {
    let mut ends = Vec::new();
    let mut total: u64 = 0;
    for len in lengths {
        total += len as u64;
        ends.push(total);
    }
    let dataset = group
        .new_dataset_builder()
        .with_data(ends.as_slice())
        .create(name)?;
    set_neurodata_type(&dataset, "VectorIndex")?;
    set_str_attr(&dataset, "description", &format!("Index for VectorData '{target}'"))?;
    set_str_attr(&dataset, "target", target)?;
    Ok(())
}

/// Path of a plane segmentation, looked up in the image segmentations of the same module
fn plane_segmentation_path(module: &ProcessingModule, plane_segmentation: &str) -> String {
    let container = module
        .interfaces
        .iter()
        .find_map(|interface| match interface {
            DataInterface::ImageSegmentation {
                name,
                plane_segmentations,
            } if plane_segmentations.iter().any(|ps| ps.name == plane_segmentation) => {
                Some(name.as_str())
            }
            _ => None,
        })
        .unwrap_or("image_segmentation");
    format!(
        "/{PROCESSING_NAME}/{}/{container}/{plane_segmentation}",
        module.name
    )
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens an HDF5 file and writes an [`NwbFile`] into it using the NWB 2.x group layout.
/// Object references of the schema (devices, imaging planes, electrode groups) are written as
/// soft links, and table regions as indices with the path of the target table.
#[derive(Debug)]
pub struct NwbWriter {
    file_handle: File,
    path: PathBuf,
    n_objects: usize,
}
// Structure
// / - nwb_version, namespace, neurodata_type, object_id
// |---- identifier, session_description, session_start_time, timestamps_reference_time, file_create_date
// |---- acquisition
// |    |---- <ElectricalSeries | TwoPhotonSeries>
// |---- analysis
// |---- processing
// |    |---- ecephys/<ElectricalSeries>
// |    |---- ophys/<Fluorescence>/<RoiResponseSeries>, ophys/<ImageSegmentation>/<PlaneSegmentation>
// |---- stimulus/presentation, stimulus/templates
// |---- general
// |    |---- devices/<Device>, subject, extracellular_ephys/<ElectrodeGroup>, extracellular_ephys/electrodes
// |    |---- optophysiology/<ImagingPlane>/<OpticalChannel>
// |---- intervals/trials
// |---- units

impl NwbWriter {
    /// Create the writer, opening a file at path
    pub fn new(path: &Path) -> Result<Self, NwbWriterError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file_handle = File::create(path)?;
        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
            n_objects: 0,
        })
    }

    /// Write the whole session container
    pub fn write_file(&mut self, nwb: &NwbFile) -> Result<(), NwbWriterError> {
        self.write_root(nwb)?;
        self.write_general(nwb)?;

        let acquisition = self.file_handle.create_group(ACQUISITION_NAME)?;
        for item in nwb.acquisition.iter() {
            match item {
                Acquisition::Electrical(series) => {
                    self.write_electrical_series(&acquisition, series)?
                }
                Acquisition::TwoPhoton(series) => {
                    self.write_two_photon_series(&acquisition, series)?
                }
            }
        }

        let processing = self.file_handle.create_group(PROCESSING_NAME)?;
        for module in nwb.processing.iter() {
            let module_group = processing.create_group(&module.name)?;
            set_neurodata_type(&module_group, "ProcessingModule")?;
            set_str_attr(&module_group, "description", &module.description)?;
            for interface in module.interfaces.iter() {
                self.write_interface(&module_group, module, interface)?;
            }
        }

        self.file_handle.create_group("analysis")?;
        let stimulus = self.file_handle.create_group("stimulus")?;
        stimulus.create_group("presentation")?;
        stimulus.create_group("templates")?;

        let intervals = self.file_handle.create_group("intervals")?;
        if let Some(trials) = &nwb.trials {
            self.write_trials(&intervals, trials)?;
        }
        if let Some(units) = &nwb.units {
            self.write_units(units)?;
        }
        Ok(())
    }

    fn write_root(&mut self, nwb: &NwbFile) -> Result<(), NwbWriterError> {
        let root: &Group = &self.file_handle;
        set_str_attr(root, "nwb_version", NWB_VERSION)?;
        set_neurodata_type(root, "NWBFile")?;
        write_str(root, "identifier", &nwb.identifier)?;
        write_str(root, "session_description", &nwb.session_description)?;
        write_str(root, "session_start_time", &nwb.session_start_time)?;
        write_str(root, "timestamps_reference_time", &nwb.session_start_time)?;
        let created = OffsetDateTime::now_utc().format(&Rfc3339)?;
        write_str_vec(root, "file_create_date", &[created])?;
        Ok(())
    }

    fn write_general(&mut self, nwb: &NwbFile) -> Result<(), NwbWriterError> {
        let general = self.file_handle.create_group(GENERAL_NAME)?;
        write_opt_str(&general, "institution", &nwb.institution)?;
        write_opt_str(&general, "lab", &nwb.lab)?;
        write_opt_str(&general, "pharmacology", &nwb.pharmacology)?;
        if let Some(experimenter) = &nwb.experimenter {
            write_str_vec(&general, "experimenter", experimenter)?;
        }

        let devices = general.create_group("devices")?;
        for device in nwb.devices.iter() {
            let group = devices.create_group(&device.name)?;
            set_neurodata_type(&group, "Device")?;
            if let Some(description) = &device.description {
                set_str_attr(&group, "description", description)?;
            }
            self.n_objects += 1;
        }

        if let Some(subject) = &nwb.subject {
            let group = general.create_group("subject")?;
            set_neurodata_type(&group, "Subject")?;
            write_str(&group, "subject_id", &subject.subject_id)?;
            write_opt_str(&group, "genotype", &subject.genotype)?;
            write_opt_str(&group, "age", &subject.age)?;
            write_opt_str(&group, "species", &subject.species)?;
            write_opt_str(&group, "sex", &subject.sex)?;
            write_opt_str(&group, "description", &subject.description)?;
        }

        if !nwb.electrode_groups.is_empty() || !nwb.electrodes.is_empty() {
            let ecephys = general.create_group("extracellular_ephys")?;
            for eg in nwb.electrode_groups.iter() {
                let group = ecephys.create_group(&eg.name)?;
                set_neurodata_type(&group, "ElectrodeGroup")?;
                set_str_attr(&group, "description", &eg.description)?;
                set_str_attr(&group, "location", &eg.location)?;
                group.link_soft(&format!("{DEVICES_PATH}/{}", eg.device), "device")?;
            }
            self.write_electrodes(&ecephys, nwb)?;
        }

        if !nwb.imaging_planes.is_empty() {
            let ophys = general.create_group("optophysiology")?;
            for plane in nwb.imaging_planes.iter() {
                let group = ophys.create_group(&plane.name)?;
                set_neurodata_type(&group, "ImagingPlane")?;
                write_str(&group, "description", &plane.description)?;
                write_str(&group, "indicator", &plane.indicator)?;
                write_str(&group, "location", &plane.location)?;
                write_f64(&group, "excitation_lambda", plane.excitation_lambda)?;
                write_f64(&group, "imaging_rate", plane.imaging_rate)?;
                group.link_soft(&format!("{DEVICES_PATH}/{}", plane.device), "device")?;
                for channel in plane.optical_channels.iter() {
                    let ch_group = group.create_group(&channel.name)?;
                    set_neurodata_type(&ch_group, "OpticalChannel")?;
                    write_str(&ch_group, "description", &channel.description)?;
                    write_f64(&ch_group, "emission_lambda", channel.emission_lambda)?;
                }
                self.n_objects += 1;
            }
        }
        Ok(())
    }

    fn write_electrodes(&mut self, ecephys: &Group, nwb: &NwbFile) -> Result<(), NwbWriterError> {
        let table = ecephys.create_group("electrodes")?;
        let colnames: Vec<String> = ["x", "y", "z", "imp", "location", "filtering", "group_name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ids: Vec<i64> = nwb.electrodes.iter().map(|e| e.id as i64).collect();
        begin_table(
            &table,
            "DynamicTable",
            "metadata about extracellular electrodes",
            &colnames,
            &ids,
        )?;

        let x: Vec<f64> = nwb.electrodes.iter().map(|e| e.x).collect();
        let y: Vec<f64> = nwb.electrodes.iter().map(|e| e.y).collect();
        let z: Vec<f64> = nwb.electrodes.iter().map(|e| e.z).collect();
        let imp: Vec<f64> = nwb.electrodes.iter().map(|e| e.imp).collect();
        write_column(&table, "x", &x, "the x coordinate of the channel location")?;
        write_column(&table, "y", &y, "the y coordinate of the channel location")?;
        write_column(&table, "z", &z, "the z coordinate of the channel location")?;
        write_column(&table, "imp", &imp, "the impedance of the channel")?;

        let location: Vec<String> = nwb.electrodes.iter().map(|e| e.location.clone()).collect();
        let filtering: Vec<String> = nwb.electrodes.iter().map(|e| e.filtering.clone()).collect();
        let group_name: Vec<String> = nwb.electrodes.iter().map(|e| e.group.clone()).collect();
        write_str_column(
            &table,
            "location",
            &location,
            "the location of channel within the subject e.g. brain region",
        )?;
        write_str_column(&table, "filtering", &filtering, "description of hardware filtering")?;
        write_str_column(
            &table,
            "group_name",
            &group_name,
            "the name of the ElectrodeGroup this electrode is a part of",
        )?;
        Ok(())
    }

    fn write_electrical_series(
        &mut self,
        parent: &Group,
        series: &ElectricalSeries,
    ) -> Result<(), NwbWriterError> {
        let group = parent.create_group(&series.name)?;
        set_neurodata_type(&group, "ElectricalSeries")?;
        set_str_attr(&group, "description", &series.description)?;
        set_str_attr(&group, "comments", "no comments")?;
        write_series_data(&group, &series.data, "volts")?;
        write_timing(&group, &series.timing)?;
        write_region(&group, "electrodes", &series.electrodes, ELECTRODES_PATH)?;
        self.n_objects += 1;
        Ok(())
    }

    fn write_two_photon_series(
        &mut self,
        parent: &Group,
        series: &TwoPhotonSeries,
    ) -> Result<(), NwbWriterError> {
        let group = parent.create_group(&series.name)?;
        set_neurodata_type(&group, "TwoPhotonSeries")?;
        set_str_attr(&group, "description", &series.description)?;
        set_str_attr(&group, "comments", "no comments")?;
        write_timing(&group, &series.timing)?;
        group.link_soft(
            &format!("{OPHYS_PATH}/{}", series.imaging_plane),
            "imaging_plane",
        )?;
        match &series.data {
            TwoPhotonData::External {
                files,
                starting_frame,
            } => {
                write_series_data(&group, &[], "no unit")?;
                write_str(&group, "format", "tiff")?;
                let files: Vec<String> = files
                    .iter()
                    .map(|f| self.link_path(f).to_string_lossy().to_string())
                    .collect();
                let external = write_str_vec(&group, "external_file", &files)?;
                external
                    .new_attr_builder()
                    .with_data(starting_frame.as_slice())
                    .create("starting_frame")?;
            }
            TwoPhotonData::Stored {
                files,
                n_frames,
                dimensions,
            } => {
                write_str(&group, "format", "raw")?;
                let (rows, cols) = *dimensions;
                let dataset = group
                    .new_dataset::<u16>()
                    .shape([*n_frames, rows, cols])
                    .create("data")?;
                set_f64_attr(&dataset, "conversion", 1.0)?;
                set_f64_attr(&dataset, "resolution", -1.0)?;
                set_str_attr(&dataset, "unit", "no unit")?;
                let stack = TiffStack::new(files)?;
                for (idx, frame) in stack.frames().enumerate().take(*n_frames) {
                    let frame = frame?;
                    dataset.write_slice(&frame, s![idx, .., ..])?;
                }
                log::info!(
                    "Stored {} raw imaging frames of {}x{} in {}",
                    n_frames,
                    rows,
                    cols,
                    series.name
                );
            }
        }
        self.n_objects += 1;
        Ok(())
    }

    fn write_interface(
        &mut self,
        module_group: &Group,
        module: &ProcessingModule,
        interface: &DataInterface,
    ) -> Result<(), NwbWriterError> {
        match interface {
            DataInterface::Electrical(series) => self.write_electrical_series(module_group, series),
            DataInterface::Fluorescence { name, series } => {
                let group = module_group.create_group(name)?;
                set_neurodata_type(&group, "Fluorescence")?;
                for rrs in series.iter() {
                    self.write_roi_response_series(&group, module, rrs)?;
                }
                Ok(())
            }
            DataInterface::ImageSegmentation {
                name,
                plane_segmentations,
            } => {
                let group = module_group.create_group(name)?;
                set_neurodata_type(&group, "ImageSegmentation")?;
                for ps in plane_segmentations.iter() {
                    self.write_plane_segmentation(&group, ps)?;
                }
                Ok(())
            }
        }
    }

    fn write_roi_response_series(
        &mut self,
        parent: &Group,
        module: &ProcessingModule,
        series: &RoiResponseSeries,
    ) -> Result<(), NwbWriterError> {
        let group = parent.create_group(&series.name)?;
        set_neurodata_type(&group, "RoiResponseSeries")?;
        set_str_attr(&group, "description", "mean soma fluorescence")?;
        set_str_attr(&group, "comments", "no comments")?;
        write_series_data(&group, &series.data, &series.unit)?;
        write_timing(&group, &series.timing)?;
        let table_path = plane_segmentation_path(module, &series.plane_segmentation);
        write_region(&group, "rois", &series.rois, &table_path)?;
        self.n_objects += 1;
        Ok(())
    }

    fn write_plane_segmentation(
        &mut self,
        parent: &Group,
        ps: &PlaneSegmentation,
    ) -> Result<(), NwbWriterError> {
        let group = parent.create_group(&ps.name)?;
        begin_table(
            &group,
            "PlaneSegmentation",
            &ps.description,
            &[String::from("pixel_mask")],
            &row_ids(ps.rois.len()),
        )?;
        group.link_soft(&format!("{OPHYS_PATH}/{}", ps.imaging_plane), "imaging_plane")?;
        let rows: Vec<PixelMaskRow> = ps
            .rois
            .iter()
            .flat_map(|roi| roi.pixels.iter())
            .map(|px| PixelMaskRow {
                x: px.x,
                y: px.y,
                weight: px.weight,
            })
            .collect();
        let mask = group
            .new_dataset_builder()
            .with_data(rows.as_slice())
            .create("pixel_mask")?;
        set_neurodata_type(&mask, "VectorData")?;
        set_str_attr(&mask, "description", "Pixel masks for each ROI")?;
        write_index(&group, "pixel_mask_index", ps.rois.iter().map(|r| r.len()), "pixel_mask")?;
        self.n_objects += 1;
        Ok(())
    }

    fn write_units(&mut self, units: &Units) -> Result<(), NwbWriterError> {
        let group = self.file_handle.create_group(UNITS_NAME)?;
        begin_table(
            &group,
            "Units",
            &units.description,
            &[String::from("spike_times")],
            &row_ids(units.spike_times.len()),
        )?;
        let flat: Vec<f64> = units.spike_times.iter().flatten().copied().collect();
        write_column(&group, "spike_times", &flat, "the spike times for each unit")?;
        write_index(
            &group,
            "spike_times_index",
            units.spike_times.iter().map(|s| s.len()),
            "spike_times",
        )?;
        self.n_objects += 1;
        Ok(())
    }

    fn write_trials(&mut self, intervals: &Group, trials: &Trials) -> Result<(), NwbWriterError> {
        let group = intervals.create_group("trials")?;
        let mut colnames = vec![String::from("start_time"), String::from("stop_time")];
        colnames.extend(trials.columns.iter().cloned());
        begin_table(
            &group,
            "TimeIntervals",
            "experimental trials",
            &colnames,
            &row_ids(trials.len()),
        )?;
        write_column(&group, "start_time", &trials.start_time, "Start time of epoch, in seconds")?;
        write_column(&group, "stop_time", &trials.stop_time, "Stop time of epoch, in seconds")?;
        for (idx, name) in trials.columns.iter().enumerate() {
            write_column(&group, name, &trials.column(idx), "sweep parameter")?;
        }
        self.n_objects += 1;
        Ok(())
    }

    /// Path of a linked file as stored in the NWB file, relative to the NWB file directory
    fn link_path(&self, file: &Path) -> PathBuf {
        let base = self.path.parent().unwrap_or(Path::new(""));
        let base = std::fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
        let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
        relative_to(&file, &base)
    }

    /// Write an NwbFile to path in one go
    pub fn write(nwb: &NwbFile, path: &Path) -> Result<(), NwbWriterError> {
        let mut writer = Self::new(path)?;
        writer.write_file(nwb)?;
        writer.close()
    }

    /// Flush the file, consume the writer
    pub fn close(self) -> Result<(), NwbWriterError> {
        self.file_handle.flush()?;
        log::info!(
            "{} NWB objects written to {}.",
            self.n_objects,
            self.path.display()
        );
        Ok(())
    }
}

