use std::path::PathBuf;

use super::config::ConversionOptions;
use super::error::InterfaceError;
use super::interfaces::{ensure_device, DataInterface};
use super::metadata::{default_ophys, rate_from_interval, Metadata, OphysMetadata};
use super::nwb::{
    self, ImagingPlane, NwbFile, OpticalChannel, PlaneSegmentation, RoiResponseSeries, Timing,
    TwoPhotonData, TwoPhotonSeries,
};
use super::roi::pixel_mask_from_list;
use super::source::{SessionSources, FLUORESCENCE_NAME, OPHYS_DT_NAME, PIXEL_LIST_NAME};
use super::tiff_stack::TiffStack;

pub const OPHYS_MODULE_NAME: &str = "ophys";
const OPHYS_MODULE_DESCRIPTION: &str = "contains optical physiology processed data";

/// Two-photon imaging of the patched cell: the raw TIFF stacks and the segmented soma trace
#[derive(Debug)]
pub struct OphysInterface<'a> {
    sources: &'a SessionSources,
    paths_tiff: Vec<PathBuf>,
    paths_tiff_lowzoom: Vec<PathBuf>,
    indicator: Option<String>,
}

impl<'a> OphysInterface<'a> {
    pub fn new(
        sources: &'a SessionSources,
        paths_tiff: Vec<PathBuf>,
        paths_tiff_lowzoom: Vec<PathBuf>,
        indicator: Option<String>,
    ) -> Self {
        Self {
            sources,
            paths_tiff,
            paths_tiff_lowzoom,
            indicator,
        }
    }

    fn section(metadata: &Metadata) -> Result<&OphysMetadata, InterfaceError> {
        metadata
            .ophys
            .as_ref()
            .ok_or(InterfaceError::MissingMetadata("Ophys"))
    }

    /// Add the microscope and the imaging plane, reusing an existing plane of the same name
    pub fn add_imaging_plane(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
    ) -> Result<(), InterfaceError> {
        let ophys = Self::section(metadata)?;
        ensure_device(nwb, &ophys.device)?;
        let plane = &ophys.imaging_plane;
        nwb.create_imaging_plane(ImagingPlane {
            name: plane.name.clone(),
            description: plane.description.clone(),
            indicator: plane.indicator.clone(),
            device: plane.device.clone(),
            excitation_lambda: plane.excitation_lambda,
            location: plane.location.clone(),
            imaging_rate: plane.imaging_rate,
            optical_channels: plane
                .optical_channel
                .iter()
                .map(|ch| OpticalChannel {
                    name: ch.name.clone(),
                    description: ch.description.clone(),
                    emission_lambda: ch.emission_lambda,
                })
                .collect(),
        })?;
        Ok(())
    }

    /// Raw imaging frames, either linked to the TIFF files or stored in the file.
    /// A low-zoom stack, when present, is always linked
    pub fn add_acquisition(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
        link: bool,
    ) -> Result<(), InterfaceError> {
        if self.paths_tiff.is_empty() {
            return Err(InterfaceError::NoTiffFiles);
        }
        self.add_imaging_plane(nwb, metadata)?;
        let ophys = Self::section(metadata)?;
        let timing = Timing {
            starting_time: self.sources.ophys_starting_time()?,
            rate: ophys.imaging_plane.imaging_rate,
        };

        let stack = TiffStack::new(&self.paths_tiff)?;
        let data = if link {
            TwoPhotonData::External {
                files: stack.paths().to_vec(),
                starting_frame: stack.starting_frames(),
            }
        } else {
            TwoPhotonData::Stored {
                files: stack.paths().to_vec(),
                n_frames: stack.total_frames(),
                dimensions: stack.dimensions(),
            }
        };
        let series = &ophys.two_photon_series;
        nwb.add_acquisition(nwb::Acquisition::TwoPhoton(TwoPhotonSeries {
            name: series.name.clone(),
            description: series.description.clone(),
            imaging_plane: series.imaging_plane.clone(),
            data,
            timing,
        }))?;

        if !self.paths_tiff_lowzoom.is_empty() {
            let lowzoom = TiffStack::new(&self.paths_tiff_lowzoom)?;
            nwb.add_acquisition(nwb::Acquisition::TwoPhoton(TwoPhotonSeries {
                name: series.lowzoom_name.clone(),
                description: format!("{} (low zoom)", series.description),
                imaging_plane: series.imaging_plane.clone(),
                data: TwoPhotonData::External {
                    files: lowzoom.paths().to_vec(),
                    starting_frame: lowzoom.starting_frames(),
                },
                timing,
            }))?;
        }
        Ok(())
    }

    /// Segmented soma ROI and its fluorescence trace
    pub fn add_processed(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
    ) -> Result<(), InterfaceError> {
        self.add_imaging_plane(nwb, metadata)?;
        let ophys = Self::section(metadata)?;

        let geometry = self.sources.frame_geometry()?;
        let pixel_list = self.sources.read_vec(PIXEL_LIST_NAME)?;
        let mut plane_segmentation = PlaneSegmentation::new(
            &ophys.image_segmentation.plane_segmentation,
            &ophys.image_segmentation.description,
            &ophys.imaging_plane.name,
        );
        let roi = plane_segmentation.add_roi(pixel_mask_from_list(
            &pixel_list,
            geometry.lines_per_frame,
        ));
        let rois = plane_segmentation.create_roi_table_region("unique cell ROI", &[roi])?;

        let rate = rate_from_interval(OPHYS_DT_NAME, self.sources.ophys_dt()?)?;
        let response = RoiResponseSeries {
            name: ophys.fluorescence.roi_response_series.clone(),
            unit: ophys.fluorescence.unit.clone(),
            data: self.sources.read_vec(FLUORESCENCE_NAME)?,
            rois,
            plane_segmentation: plane_segmentation.name.clone(),
            timing: Timing {
                starting_time: self.sources.ophys_starting_time()?,
                rate,
            },
        };

        let module = nwb.processing_module(OPHYS_MODULE_NAME, OPHYS_MODULE_DESCRIPTION);
        module.add(nwb::DataInterface::ImageSegmentation {
            name: ophys.image_segmentation.name.clone(),
            plane_segmentations: vec![plane_segmentation],
        })?;
        module.add(nwb::DataInterface::Fluorescence {
            name: ophys.fluorescence.name.clone(),
            series: vec![response],
        })?;
        Ok(())
    }
}

impl DataInterface for OphysInterface<'_> {
    fn name(&self) -> &'static str {
        "Ophys"
    }

    fn get_metadata(&self, mut base: Metadata) -> Result<Metadata, InterfaceError> {
        if base.ophys.is_none() {
            let rate = rate_from_interval(OPHYS_DT_NAME, self.sources.ophys_dt()?)?;
            base.ophys = Some(default_ophys(rate, self.indicator.as_deref()));
        }
        Ok(base)
    }

    fn run_conversion(
        &self,
        nwb: &mut NwbFile,
        metadata: &Metadata,
        options: &ConversionOptions,
    ) -> Result<(), InterfaceError> {
        if options.add_ophys_processed {
            self.add_processed(nwb, metadata)?;
        }
        if options.add_ophys_acquisition {
            if self.paths_tiff.is_empty() {
                log::warn!(
                    "No TIFF files for {}. Skipping raw ophys...",
                    self.sources.processed.path().display()
                );
            } else {
                self.add_acquisition(nwb, metadata, options.link_raw_ophys)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::write_session_files;
    use crate::tiff_stack::tests::write_tiff;

    #[test]
    fn test_metadata_uses_indicator() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let sources = SessionSources::open(&raw, &processed, None).unwrap();
        let interface =
            OphysInterface::new(&sources, vec![], vec![], Some(String::from("GCaMP6s")));
        let metadata = interface.get_metadata(Metadata::default()).unwrap();
        let ophys = metadata.ophys.unwrap();
        assert_eq!(ophys.imaging_plane.indicator, "GCaMP6s");
        assert!((ophys.imaging_plane.imaging_rate - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_processed_and_linked_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let tiffs = vec![dir.path().join("101_a_2.tif"), dir.path().join("101_b_2.tif")];
        write_tiff(&tiffs[0], 3, 4, 4, 0);
        write_tiff(&tiffs[1], 2, 4, 4, 100);
        let lowzoom = vec![dir.path().join("102_2.tif")];
        write_tiff(&lowzoom[0], 1, 4, 4, 0);

        let sources = SessionSources::open(&raw, &processed, None).unwrap();
        let interface = OphysInterface::new(&sources, tiffs.clone(), lowzoom, None);
        let metadata = interface.get_metadata(Metadata::default()).unwrap();
        let mut nwb = NwbFile::new("1234", "session description", "1900-01-01T00:00:00Z");
        interface
            .run_conversion(&mut nwb, &metadata, &ConversionOptions::default())
            .unwrap();

        assert_eq!(nwb.imaging_planes.len(), 1);
        assert_eq!(nwb.devices.len(), 1);
        match nwb.acquisition("raw_ophys") {
            Some(nwb::Acquisition::TwoPhoton(series)) => {
                assert_eq!(
                    series.data,
                    TwoPhotonData::External {
                        files: tiffs,
                        starting_frame: vec![0, 3]
                    }
                );
                assert!((series.timing.starting_time - 0.002).abs() < 1e-12);
            }
            other => panic!("unexpected acquisition {other:?}"),
        }
        assert!(nwb.acquisition("raw_ophys_lowzoom").is_some());

        let module = nwb.get_processing_module(OPHYS_MODULE_NAME).unwrap();
        match module.get("image_segmentation") {
            Some(nwb::DataInterface::ImageSegmentation {
                plane_segmentations,
                ..
            }) => {
                let mask = &plane_segmentations[0].rois[0];
                assert_eq!(mask.len(), 3);
                assert_eq!((mask.pixels[2].x, mask.pixels[2].y), (2, 1));
            }
            other => panic!("unexpected interface {other:?}"),
        }
        assert!(module.get("fluorescence").is_some());
    }

    #[test]
    fn test_acquisition_without_tiffs() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "101");
        let sources = SessionSources::open(&raw, &processed, None).unwrap();
        let interface = OphysInterface::new(&sources, vec![], vec![], None);
        let metadata = interface.get_metadata(Metadata::default()).unwrap();
        let mut nwb = NwbFile::new("1234", "session description", "1900-01-01T00:00:00Z");
        assert!(matches!(
            interface.add_acquisition(&mut nwb, &metadata, true),
            Err(InterfaceError::NoTiffFiles)
        ));
    }
}
