use serde_yaml::Value;
use std::path::Path;

use super::config::ConversionOptions;
use super::ecephys::EcephysInterface;
use super::error::{ConverterError, InterfaceError};
use super::interfaces::DataInterface;
use super::metadata::{basic_metadata, parse_session_start_time, Metadata};
use super::nwb::{NwbFile, Subject};
use super::nwb_reader::NwbReader;
use super::nwb_writer::NwbWriter;
use super::ophys::OphysInterface;
use super::source::{SessionSources, EPHYS_DT_NAME, OPHYS_DT_NAME, TRACE_ID_NAME};
use super::subjects::SubjectsTable;
use super::sweep::CellPaths;

/// Datasets without which a cell cannot be converted
const REQUIRED_DATASETS: [&str; 2] = [TRACE_ID_NAME, EPHYS_DT_NAME];

/// Voltage traces of the patched cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    /// Raw membrane voltage, stored as acquisition
    Raw,
    /// Filtered membrane voltage, stored as processed data
    Filtered,
}

/// One step of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    OphysProcessed,
    OphysAcquisition,
    SpikingData,
    Voltage(Trace),
    Trials,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OphysProcessed => write!(f, "processed ophys"),
            Self::OphysAcquisition => write!(f, "raw ophys"),
            Self::SpikingData => write!(f, "spiking data"),
            Self::Voltage(Trace::Raw) => write!(f, "raw membrane voltage"),
            Self::Voltage(Trace::Filtered) => write!(f, "filtered membrane voltage"),
            Self::Trials => write!(f, "trials"),
        }
    }
}

/// The steps enabled in options: processed ophys, raw ophys, spikes, voltage traces, trials
pub fn conversion_steps(options: &ConversionOptions) -> Vec<Step> {
    [
        (options.add_ophys_processed, Step::OphysProcessed),
        (options.add_ophys_acquisition, Step::OphysAcquisition),
        (options.add_spiking_data, Step::SpikingData),
        (options.add_ecephys_raw, Step::Voltage(Trace::Raw)),
        (options.add_ecephys_filtered, Step::Voltage(Trace::Filtered)),
        (options.add_trials, Step::Trials),
    ]
    .into_iter()
    .filter_map(|(enabled, step)| enabled.then_some(step))
    .collect()
}

/// Converts the data of one cell into an NWB file.
///
/// The converter opens the source files, builds the metadata (auto-filled values from the files
/// and the subjects table, then each interface's section, then the YAML overlay) and holds the
/// in-memory file. Data is added step by step with the `add_*` methods and written by
/// [`save`](OephysConverter::save).
#[derive(Debug)]
pub struct OephysConverter {
    sources: SessionSources,
    paths_tiff: Vec<std::path::PathBuf>,
    paths_tiff_lowzoom: Vec<std::path::PathBuf>,
    indicator: Option<String>,
    metadata: Metadata,
    nwb: NwbFile,
    valid: bool,
}

impl OephysConverter {
    pub fn new(
        paths: &CellPaths,
        overlay: Option<&Value>,
        subjects: &SubjectsTable,
    ) -> Result<Self, ConverterError> {
        let sources = SessionSources::open(
            &paths.path_raw,
            &paths.path_processed,
            paths.path_calibration.as_deref(),
        )?;

        let missing: Vec<&str> = REQUIRED_DATASETS
            .iter()
            .copied()
            .filter(|name| !sources.has(name))
            .collect();
        let valid = missing.is_empty();
        if !valid {
            log::warn!(
                "Cell {} is missing required data {:?}. It will not be converted.",
                paths.cell_id,
                missing
            );
        }

        let indicator = match sources.subject_id()? {
            Some(id) => subjects.get(&id).and_then(|info| info.indicator.clone()),
            None => None,
        };

        let mut converter = Self {
            sources,
            paths_tiff: paths.paths_tiff.clone(),
            paths_tiff_lowzoom: paths.paths_tiff_lowzoom.clone(),
            indicator,
            metadata: Metadata::default(),
            nwb: NwbFile::new("", "", ""),
            valid,
        };
        if !converter.valid {
            return Ok(converter);
        }

        let mut metadata = basic_metadata(&converter.sources, subjects)?;
        metadata = converter.ecephys().get_metadata(metadata)?;
        if converter.sources.has(OPHYS_DT_NAME) {
            metadata = converter.ophys().get_metadata(metadata)?;
        } else {
            log::warn!(
                "Cell {} has no '{}' key. Skipping ophys metadata...",
                paths.cell_id,
                OPHYS_DT_NAME
            );
        }
        if let Some(overlay) = overlay {
            metadata.merge_yaml(overlay.clone())?;
        }
        converter.nwb = create_nwb_file(&metadata)?;
        converter.metadata = metadata;
        Ok(converter)
    }

    fn ecephys(&self) -> EcephysInterface<'_> {
        EcephysInterface::new(&self.sources)
    }

    fn ophys(&self) -> OphysInterface<'_> {
        OphysInterface::new(
            &self.sources,
            self.paths_tiff.clone(),
            self.paths_tiff_lowzoom.clone(),
            self.indicator.clone(),
        )
    }

    /// False when the source files lack the data needed for a conversion
    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn nwb(&self) -> &NwbFile {
        &self.nwb
    }

    pub fn add_ophys_processed(&mut self) -> Result<(), ConverterError> {
        let ophys = OphysInterface::new(
            &self.sources,
            Vec::new(),
            Vec::new(),
            self.indicator.clone(),
        );
        ophys.add_processed(&mut self.nwb, &self.metadata)?;
        Ok(())
    }

    /// Add the raw imaging data, linking to the TIFF files or storing the frames
    pub fn add_ophys_acquisition(&mut self, link: bool) -> Result<(), ConverterError> {
        let ophys = OphysInterface::new(
            &self.sources,
            self.paths_tiff.clone(),
            self.paths_tiff_lowzoom.clone(),
            self.indicator.clone(),
        );
        match ophys.add_acquisition(&mut self.nwb, &self.metadata, link) {
            Ok(()) => Ok(()),
            Err(InterfaceError::NoTiffFiles) => {
                log::warn!(
                    "No TIFF files for {}. Skipping raw ophys...",
                    self.nwb.identifier
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn add_spiking_data(&mut self) -> Result<(), ConverterError> {
        EcephysInterface::new(&self.sources).add_spiking_data(&mut self.nwb)?;
        Ok(())
    }

    /// Add voltage traces. Raw traces go to acquisition, filtered ones to processing
    pub fn add_ecephys_acquisition(&mut self, traces: &[Trace]) -> Result<(), ConverterError> {
        let ecephys = EcephysInterface::new(&self.sources);
        for trace in traces {
            match trace {
                Trace::Raw => ecephys.add_raw(&mut self.nwb, &self.metadata)?,
                Trace::Filtered => ecephys.add_filtered(&mut self.nwb, &self.metadata)?,
            }
        }
        Ok(())
    }

    pub fn add_ecephys_processed(&mut self) -> Result<(), ConverterError> {
        self.add_ecephys_acquisition(&[Trace::Filtered])
    }

    pub fn add_trials(&mut self) -> Result<(), ConverterError> {
        EcephysInterface::new(&self.sources).add_trials(&mut self.nwb, &self.metadata)?;
        Ok(())
    }

    fn run_step(&mut self, step: Step, options: &ConversionOptions) -> Result<(), ConverterError> {
        match step {
            Step::OphysProcessed => self.add_ophys_processed(),
            Step::OphysAcquisition => self.add_ophys_acquisition(options.link_raw_ophys),
            Step::SpikingData => self.add_spiking_data(),
            Step::Voltage(trace) => self.add_ecephys_acquisition(&[trace]),
            Step::Trials => self.add_trials(),
        }
    }

    /// Run every step enabled in options, in the order of [`conversion_steps`].
    ///
    /// A step whose data is missing or malformed is logged and skipped, the rest of the file is
    /// still converted. After each step on_step receives the number of finished steps and the
    /// total.
    pub fn run_conversion<E, F>(
        &mut self,
        options: &ConversionOptions,
        mut on_step: F,
    ) -> Result<(), E>
    where
        E: From<ConverterError>,
        F: FnMut(usize, usize) -> Result<(), E>,
    {
        let steps = conversion_steps(options);
        for (idx, step) in steps.iter().enumerate() {
            match self.run_step(*step, options) {
                Ok(()) => (),
                Err(e) if e.is_skippable() => log::warn!(
                    "Could not add {} to {}: {}. Skipping it...",
                    step,
                    self.nwb.identifier,
                    e
                ),
                Err(e) => return Err(e.into()),
            }
            on_step(idx + 1, steps.len())?;
        }
        Ok(())
    }

    /// Write the file. With read_check the written file is opened again and compared with the
    /// in-memory container
    pub fn save(&self, path: &Path, read_check: bool) -> Result<(), ConverterError> {
        NwbWriter::write(&self.nwb, path)?;
        if read_check {
            self.read_check(path)?;
        }
        Ok(())
    }

    /// Compare a written file with the in-memory container: identifier, acquisition names and
    /// processing module names must match
    pub fn read_check(&self, path: &Path) -> Result<(), ConverterError> {
        let fail = |reason: String| ConverterError::ReadCheckFailed {
            path: path.to_path_buf(),
            reason,
        };
        let summary = NwbReader::open(path)?.summary()?;
        if summary.identifier != self.nwb.identifier {
            return Err(fail(format!(
                "identifier is '{}', expected '{}'",
                summary.identifier, self.nwb.identifier
            )));
        }
        let mut acquisition: Vec<String> =
            self.nwb.acquisition.iter().map(|a| a.name().to_string()).collect();
        acquisition.sort();
        if summary.acquisition != acquisition {
            return Err(fail(format!(
                "acquisition is {:?}, expected {:?}",
                summary.acquisition, acquisition
            )));
        }
        let mut modules: Vec<&str> = self.nwb.processing.iter().map(|m| m.name.as_str()).collect();
        modules.sort();
        let written: Vec<&str> = summary.processing.iter().map(|(m, _)| m.as_str()).collect();
        if written != modules {
            return Err(fail(format!(
                "processing modules are {written:?}, expected {modules:?}"
            )));
        }
        log::info!("Read check passed for {}", path.display());
        Ok(())
    }
}

/// Create the container from the file and subject sections of the metadata
fn create_nwb_file(metadata: &Metadata) -> Result<NwbFile, ConverterError> {
    let file_meta = &metadata.nwbfile;
    let start = parse_session_start_time(&file_meta.session_start_time)?;
    let mut nwb = NwbFile::new(&file_meta.identifier, &file_meta.session_description, &start);
    nwb.institution = file_meta.institution.clone();
    nwb.lab = file_meta.lab.clone();
    nwb.experimenter = file_meta.experimenter.clone();
    nwb.pharmacology = file_meta.pharmacology.clone();
    nwb.subject = metadata.subject.as_ref().map(|s| Subject {
        subject_id: s.subject_id.clone(),
        genotype: s.genotype.clone(),
        age: s.age.clone(),
        species: s.species.clone(),
        sex: s.sex.clone(),
        description: s.description.clone(),
    });
    Ok(nwb)
}
