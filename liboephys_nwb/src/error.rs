use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source file failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Could not open source file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Dataset '{0}' was not found in any of the source files")]
    MissingDataset(String),
    #[error("Dataset '{0}' is empty")]
    EmptyDataset(String),
    #[error("Dataset '{0}' has {1} dimensions; expected at most 2")]
    BadShape(String, usize),
}

impl SourceError {
    /// The data is absent or malformed, as opposed to the file being unreadable
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            Self::MissingDataset(_) | Self::EmptyDataset(_) | Self::BadShape(..)
        )
    }
}

#[derive(Debug, Error)]
pub enum SubjectsError {
    #[error("SubjectsTable failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("SubjectsTable failed to parse JSON: {0}")]
    ParsingError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata failed due to source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Metadata failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Metadata failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Metadata could not parse session start time '{0}'")]
    BadStartTime(String),
    #[error("Metadata could not format a timestamp: {0}")]
    FormatError(#[from] time::error::Format),
    #[error("Metadata sampling interval '{0}' must be positive, found {1}")]
    BadInterval(String, f64),
}

#[derive(Debug, Error)]
pub enum TiffStackError {
    #[error("TiffStack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("TiffStack failed to decode a TIFF file: {0}")]
    DecodeError(#[from] tiff::TiffError),
    #[error("TiffStack was given no TIFF files")]
    NoFiles,
    #[error("TiffStack found an unsupported sample format in {0:?}")]
    UnsupportedSampleFormat(PathBuf),
    #[error("TiffStack found mismatched frame dimensions in {path:?}: {found:?}, expected {expected:?}")]
    MismatchedDimensions {
        path: PathBuf,
        found: (usize, usize),
        expected: (usize, usize),
    },
    #[error("TiffStack frame {0} is out of range for {1:?}")]
    FrameOutOfRange(usize, PathBuf),
}

#[derive(Debug, Error)]
pub enum NwbError {
    #[error("NwbFile already contains a {0} named '{1}'")]
    Duplicate(&'static str, String),
    #[error("Device '{0}' does not exist; make sure it is defined in the metadata")]
    MissingDevice(String),
    #[error("ElectrodeGroup '{0}' does not exist")]
    MissingElectrodeGroup(String),
    #[error("ImagingPlane '{0}' does not exist")]
    MissingImagingPlane(String),
    #[error("Region index {0} is out of range for a table with {1} rows")]
    BadRegion(usize, usize),
    #[error("Trial stop time {1} is before start time {0}")]
    BadTrial(f64, f64),
    #[error("Trial has {0} parameter values; table has {1} columns")]
    BadTrialArity(usize, usize),
}

#[derive(Debug, Error)]
pub enum NwbWriterError {
    #[error("NwbWriter failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("NwbWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("NwbWriter failed to encode a string: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("NwbWriter failed due to TiffStack error: {0}")]
    TiffError(#[from] TiffStackError),
    #[error("NwbWriter failed to format a timestamp: {0}")]
    FormatError(#[from] time::error::Format),
}

#[derive(Debug, Error)]
pub enum NwbReaderError {
    #[error("NwbReader failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Could not open NWB file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("File {0:?} is not an NWB file (missing nwb_version)")]
    NotNwb(PathBuf),
    #[error("NWB file has no object at '{0}'")]
    MissingObject(String),
}

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("Interface failed due to source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Interface failed due to metadata error: {0}")]
    MetadataError(#[from] MetadataError),
    #[error("Interface failed due to NWB error: {0}")]
    NwbError(#[from] NwbError),
    #[error("Interface failed due to TiffStack error: {0}")]
    TiffError(#[from] TiffStackError),
    #[error("Interface requires metadata section '{0}'")]
    MissingMetadata(&'static str),
    #[error("Interface has no TIFF files for raw ophys data")]
    NoTiffFiles,
}

impl InterfaceError {
    /// A conversion step failing with this error can be skipped without losing the file
    pub fn is_skippable(&self) -> bool {
        match self {
            Self::SourceError(e) | Self::MetadataError(MetadataError::SourceError(e)) => {
                e.is_missing_data()
            }
            Self::NwbError(NwbError::BadTrial(..) | NwbError::BadTrialArity(..)) => true,
            Self::MetadataError(MetadataError::BadInterval(..)) => true,
            Self::TiffError(_) | Self::MissingMetadata(_) | Self::NoTiffFiles => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Converter failed due to source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Converter failed due to metadata error: {0}")]
    MetadataError(#[from] MetadataError),
    #[error("Converter failed due to interface error: {0}")]
    InterfaceError(#[from] InterfaceError),
    #[error("Converter failed due to NwbWriter error: {0}")]
    WriterError(#[from] NwbWriterError),
    #[error("Converter failed due to NwbReader error: {0}")]
    ReaderError(#[from] NwbReaderError),
    #[error("Converter read check failed for {path:?}: {reason}")]
    ReadCheckFailed { path: PathBuf, reason: String },
}

impl ConverterError {
    pub fn is_skippable(&self) -> bool {
        match self {
            Self::SourceError(e) => e.is_missing_data(),
            Self::InterfaceError(e) => e.is_skippable(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has no output directory and no raw data parent to default to")]
    NoOutputPath,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Sweep failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Sweep failed due to a bad glob pattern: {0}")]
    PatternError(#[from] glob::PatternError),
    #[error("Sweep failed while walking a directory: {0}")]
    GlobError(#[from] glob::GlobError),
    #[error("Sweep directory {0:?} does not exist")]
    BadDirectory(PathBuf),
    #[error("Sweep failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Converter error: {0}")]
    ConverterError(#[from] ConverterError),
    #[error("Processor failed due to Sweep error: {0}")]
    SweepError(#[from] SweepError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to SubjectsTable error: {0}")]
    SubjectsError(#[from] SubjectsError),
    #[error("Processor failed due to Metadata error: {0}")]
    MetadataError(#[from] MetadataError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor could not convert {0} cell(s)")]
    FailedCells(usize),
}
