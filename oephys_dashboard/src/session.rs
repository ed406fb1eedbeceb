use std::path::{Path, PathBuf};

use liboephys_nwb::error::{NwbReaderError, TiffStackError};
use liboephys_nwb::nwb_reader::NwbReader;
use liboephys_nwb::paths::fix_path;
use liboephys_nwb::roi::{PixelMask, Segment};
use liboephys_nwb::tiff_stack::{locate_frame, read_frame};
use liboephys_nwb::timeseries::TimeSeriesData;

const FILTERED_PATH: &str = "/processing/ecephys/filtered_membrane_voltage";
const RAW_EPHYS_PATH: &str = "/acquisition/raw_membrane_voltage";
const DFF_PATH: &str = "/processing/ophys/fluorescence/roi_response_series";
const RAW_OPHYS_PATH: &str = "/acquisition/raw_ophys";
const PLANE_SEGMENTATION_PATH: &str = "/processing/ophys/image_segmentation/plane_segmentation";

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Session failed due to NwbReader error: {0}")]
    Reader(#[from] NwbReaderError),
    #[error("Session failed due to TiffStack error: {0}")]
    Tiff(#[from] TiffStackError),
    #[error("File {0:?} is not an existing .nwb file")]
    NotNwbFile(PathBuf),
    #[error("Frame {0} is outside of the imaging data")]
    FrameOutOfRange(usize),
}

/// Where the imaging frames of a file live
#[derive(Debug)]
enum Imaging {
    Missing,
    Linked {
        files: Vec<PathBuf>,
        starting_frames: Vec<u64>,
    },
    Stored,
}

/// A greyscale frame ready to be uploaded as a texture
#[derive(Debug)]
pub struct GreyFrame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// Everything the dashboard shows for one NWB file
#[derive(Debug)]
pub struct Session {
    reader: NwbReader,
    pub ephys: Option<TimeSeriesData>,
    pub spikes: Vec<f64>,
    pub dff: Option<TimeSeriesData>,
    pub imaging_rate: f64,
    imaging: Imaging,
    mask: Option<PixelMask>,
}

/// Resolve a linked file name stored in the NWB file against the directory of that file
fn resolve_linked(nwb_path: &Path, file: &str) -> PathBuf {
    let fixed = fix_path(file);
    if fixed.is_absolute() {
        return fixed;
    }
    match nwb_path.parent() {
        Some(dir) => dir.join(fixed),
        None => fixed,
    }
}

/// Stretch a frame to the full 8-bit range
fn to_grey(width: usize, height: usize, values: impl Iterator<Item = u16> + Clone) -> GreyFrame {
    let min = values.clone().min().unwrap_or(0) as f32;
    let max = values.clone().max().unwrap_or(0) as f32;
    let scale = if max > min { 255.0 / (max - min) } else { 0.0 };
    GreyFrame {
        width,
        height,
        pixels: values.map(|v| ((v as f32 - min) * scale) as u8).collect(),
    }
}

impl Session {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        if !path.is_file() || path.extension().map(|e| e != "nwb").unwrap_or(true) {
            return Err(SessionError::NotNwbFile(path.to_path_buf()));
        }
        let reader = NwbReader::open(path)?;
        log::info!("Loading {}...", path.display());

        let ephys = if reader.has(FILTERED_PATH) {
            Some(reader.time_series(FILTERED_PATH)?)
        } else if reader.has(RAW_EPHYS_PATH) {
            Some(reader.time_series(RAW_EPHYS_PATH)?)
        } else {
            log::warn!("{} has no membrane voltage", path.display());
            None
        };
        let spikes = if reader.summary()?.n_units > 0 {
            reader.spike_times(0)?
        } else {
            Vec::new()
        };
        let dff = if reader.has(DFF_PATH) {
            Some(reader.time_series(DFF_PATH)?)
        } else {
            None
        };

        let (imaging, imaging_rate) = if reader.has(RAW_OPHYS_PATH) {
            let rate = reader.series_rate(RAW_OPHYS_PATH)?;
            let files = reader.external_files(RAW_OPHYS_PATH)?;
            if files.is_empty() {
                (Imaging::Stored, rate)
            } else {
                (
                    Imaging::Linked {
                        files: files.iter().map(|f| resolve_linked(path, f)).collect(),
                        starting_frames: reader.starting_frames(RAW_OPHYS_PATH)?,
                    },
                    rate,
                )
            }
        } else {
            (Imaging::Missing, dff.as_ref().map(|d| d.rate).unwrap_or(0.0))
        };
        let mask = if reader.has(PLANE_SEGMENTATION_PATH) {
            Some(reader.pixel_mask(PLANE_SEGMENTATION_PATH, 0)?)
        } else {
            None
        };

        Ok(Self {
            reader,
            ephys,
            spikes,
            dff,
            imaging_rate,
            imaging,
            mask,
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn has_imaging(&self) -> bool {
        !matches!(self.imaging, Imaging::Missing)
    }

    /// Time of the last sample of the longest trace
    pub fn max_t(&self) -> f64 {
        [self.ephys.as_ref(), self.dff.as_ref()]
            .iter()
            .flatten()
            .map(|s| s.max_t())
            .fold(0.0, f64::max)
    }

    /// Load one imaging frame as greyscale
    pub fn frame(&self, index: usize) -> Result<GreyFrame, SessionError> {
        let frame = match &self.imaging {
            Imaging::Missing => return Err(SessionError::FrameOutOfRange(index)),
            Imaging::Linked {
                files,
                starting_frames,
            } => {
                let (file, local) = locate_frame(starting_frames, index)
                    .ok_or(SessionError::FrameOutOfRange(index))?;
                let path = files
                    .get(file)
                    .ok_or(SessionError::FrameOutOfRange(index))?;
                read_frame(path, local)?
            }
            Imaging::Stored => match self.reader.stored_frame_shape(RAW_OPHYS_PATH)? {
                Some((n_frames, _, _)) if index < n_frames => {
                    self.reader.stored_frame(RAW_OPHYS_PATH, index)?
                }
                _ => return Err(SessionError::FrameOutOfRange(index)),
            },
        };
        let (height, width) = frame.dim();
        Ok(to_grey(width, height, frame.iter().copied()))
    }

    /// Outline of the soma ROI in pixel coordinates of a (height, width) frame
    pub fn outline(&self, height: usize, width: usize) -> Vec<Segment> {
        match &self.mask {
            Some(mask) => mask.to_matrix(height, width).compute_outline(),
            None => Vec::new(),
        }
    }
}
