use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use super::error::MetadataError;
use super::source::{SessionSources, TRACE_ID_NAME};
use super::subjects::SubjectsTable;

pub const DEFAULT_SESSION_DESCRIPTION: &str = "session description";
pub const DEFAULT_SESSION_START: &str = "1900-01-01 00:00:00";
pub const DEFAULT_INSTITUTION: &str = "Allen Institute for Brain Science";

/// Metadata which ends up on the root of the NWB file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NwbFileMetadata {
    pub session_description: String,
    pub identifier: String,
    pub session_start_time: String,
    pub institution: Option<String>,
    pub lab: Option<String>,
    pub experimenter: Option<Vec<String>>,
    pub pharmacology: Option<String>,
}

impl Default for NwbFileMetadata {
    fn default() -> Self {
        Self {
            session_description: String::from(DEFAULT_SESSION_DESCRIPTION),
            identifier: String::new(),
            session_start_time: String::from(DEFAULT_SESSION_START),
            institution: Some(String::from(DEFAULT_INSTITUTION)),
            lab: None,
            experimenter: None,
            pharmacology: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectMetadata {
    pub subject_id: String,
    pub genotype: Option<String>,
    pub age: Option<String>,
    pub species: Option<String>,
    pub sex: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMetadata {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalChannelMetadata {
    pub name: String,
    pub description: String,
    pub emission_lambda: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingPlaneMetadata {
    pub name: String,
    pub description: String,
    pub indicator: String,
    pub device: String,
    pub excitation_lambda: f64,
    pub location: String,
    pub imaging_rate: f64,
    pub optical_channel: Vec<OpticalChannelMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoPhotonSeriesMetadata {
    pub name: String,
    pub lowzoom_name: String,
    pub imaging_plane: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluorescenceMetadata {
    pub name: String,
    pub roi_response_series: String,
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSegmentationMetadata {
    pub name: String,
    pub plane_segmentation: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OphysMetadata {
    #[serde(rename = "Device")]
    pub device: DeviceMetadata,
    #[serde(rename = "ImagingPlane")]
    pub imaging_plane: ImagingPlaneMetadata,
    #[serde(rename = "TwoPhotonSeries")]
    pub two_photon_series: TwoPhotonSeriesMetadata,
    #[serde(rename = "Fluorescence")]
    pub fluorescence: FluorescenceMetadata,
    #[serde(rename = "ImageSegmentation")]
    pub image_segmentation: ImageSegmentationMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectrodeGroupMetadata {
    pub name: String,
    pub description: String,
    pub location: String,
    pub device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectricalSeriesMetadata {
    pub name: String,
    pub description: String,
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EcephysMetadata {
    #[serde(rename = "Device")]
    pub device: DeviceMetadata,
    #[serde(rename = "ElectrodeGroup")]
    pub electrode_group: ElectrodeGroupMetadata,
    #[serde(rename = "ElectricalSeries_raw")]
    pub electrical_series_raw: ElectricalSeriesMetadata,
    #[serde(rename = "ElectricalSeries_filtered")]
    pub electrical_series_filtered: ElectricalSeriesMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialsMetadata {
    /// Names of the sweep_table columns. Unnamed columns become `sweep_param_<n>`
    pub sweep_columns: Vec<String>,
}

impl TrialsMetadata {
    pub fn column_names(&self, n_columns: usize) -> Vec<String> {
        (0..n_columns)
            .map(|i| match self.sweep_columns.get(i) {
                Some(name) => name.clone(),
                None => format!("sweep_param_{i}"),
            })
            .collect()
    }
}

/// The full metadata of a conversion, in the same sections as the YAML sidecar file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(rename = "NWBFile")]
    pub nwbfile: NwbFileMetadata,
    #[serde(rename = "Subject", skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectMetadata>,
    #[serde(rename = "Ophys", skip_serializing_if = "Option::is_none")]
    pub ophys: Option<OphysMetadata>,
    #[serde(rename = "Ecephys", skip_serializing_if = "Option::is_none")]
    pub ecephys: Option<EcephysMetadata>,
    #[serde(rename = "Trials")]
    pub trials: TrialsMetadata,
}

/// Recursively merge overlay into base. Maps merge key by key; anything else is replaced
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Metadata {
    /// Merge a YAML document over this metadata
    pub fn merge_yaml(&mut self, overlay: Value) -> Result<(), MetadataError> {
        if overlay.is_null() {
            return Ok(());
        }
        let mut base = serde_yaml::to_value(&*self)?;
        merge_values(&mut base, overlay);
        *self = serde_yaml::from_value(base)?;
        Ok(())
    }

    /// Read a YAML sidecar file, without applying it
    pub fn read_overlay(path: &Path) -> Result<Value, MetadataError> {
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&yaml_str)?)
    }
}

/// Convert a sampling interval into a rate
pub fn rate_from_interval(name: &str, dt: f64) -> Result<f64, MetadataError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(1.0 / dt)
    } else {
        Err(MetadataError::BadInterval(name.to_string(), dt))
    }
}

/// Parse a session start time (`YYYY-MM-DD HH:MM:SS`, taken as UTC, or RFC 3339) and render it
/// as RFC 3339 in UTC
pub fn parse_session_start_time(value: &str) -> Result<String, MetadataError> {
    let naive_format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let datetime = match PrimitiveDateTime::parse(value, naive_format) {
        Ok(dt) => dt.assume_utc(),
        Err(_) => OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|_| MetadataError::BadStartTime(value.to_string()))?,
    };
    Ok(datetime.to_offset(UtcOffset::UTC).format(&Rfc3339)?)
}

/// Auto-fill the file and subject metadata from the session files
pub fn basic_metadata(
    sources: &SessionSources,
    subjects: &SubjectsTable,
) -> Result<Metadata, MetadataError> {
    let mut metadata = Metadata::default();

    metadata.nwbfile.identifier = if sources.has(TRACE_ID_NAME) {
        sources.session_id()?
    } else {
        uuid::Uuid::new_v4().to_string()
    };

    match sources.subject_id()? {
        Some(subject_id) => match subjects.get(&subject_id) {
            Some(info) => {
                metadata.nwbfile.pharmacology = Some(info.anesthesia.clone());
                metadata.subject = Some(SubjectMetadata {
                    subject_id,
                    genotype: Some(info.line.clone()),
                    age: Some(info.age.clone()),
                    ..Default::default()
                });
            }
            None => {
                log::warn!(
                    "Subject {} of file {} is not in the subjects table. Skipping subject info...",
                    subject_id,
                    sources.processed.path().display()
                );
                metadata.subject = Some(SubjectMetadata {
                    subject_id,
                    ..Default::default()
                });
            }
        },
        None => log::warn!(
            "File {} does not have 'aid' key. Skipping it...",
            sources.processed.path().display()
        ),
    }

    Ok(metadata)
}

/// Default ophys section. The indicator comes from the subject when it is known
pub fn default_ophys(imaging_rate: f64, indicator: Option<&str>) -> OphysMetadata {
    let device = String::from("Bruker 2-p microscope");
    OphysMetadata {
        device: DeviceMetadata {
            name: device.clone(),
            description: None,
        },
        imaging_plane: ImagingPlaneMetadata {
            name: String::from("ImagingPlane"),
            description: String::from("two-photon imaging plane"),
            indicator: indicator.unwrap_or("unknown").to_string(),
            device,
            excitation_lambda: 920.0,
            location: String::from("primary visual cortex - layer 2/3"),
            imaging_rate,
            optical_channel: vec![OpticalChannelMetadata {
                name: String::from("optical_channel"),
                description: String::from("2P Optical Channel"),
                emission_lambda: 510.0,
            }],
        },
        two_photon_series: TwoPhotonSeriesMetadata {
            name: String::from("raw_ophys"),
            lowzoom_name: String::from("raw_ophys_lowzoom"),
            imaging_plane: String::from("ImagingPlane"),
            description: String::from("raw two-photon imaging data"),
        },
        fluorescence: FluorescenceMetadata {
            name: String::from("fluorescence"),
            roi_response_series: String::from("roi_response_series"),
            unit: String::from("dF/F"),
        },
        image_segmentation: ImageSegmentationMetadata {
            name: String::from("image_segmentation"),
            plane_segmentation: String::from("plane_segmentation"),
            description: String::from("segmented soma of the recorded cell"),
        },
    }
}

/// Default ecephys section
pub fn default_ecephys(rate: f64) -> EcephysMetadata {
    let device = String::from("Device_ecephys");
    EcephysMetadata {
        device: DeviceMetadata {
            name: device.clone(),
            description: None,
        },
        electrode_group: ElectrodeGroupMetadata {
            name: String::from("ElectrodeGroup"),
            description: String::from("no description"),
            location: String::from("unknown"),
            device,
        },
        electrical_series_raw: ElectricalSeriesMetadata {
            name: String::from("raw_membrane_voltage"),
            description: String::from("raw membrane voltage"),
            rate,
        },
        electrical_series_filtered: ElectricalSeriesMetadata {
            name: String::from("filtered_membrane_voltage"),
            description: String::from("filtered membrane voltage"),
            rate,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::write_session_files;

    #[test]
    fn test_basic_metadata_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (raw, processed) = write_session_files(dir.path(), "7");
        let sources = SessionSources::open(&raw, &processed, None).unwrap();
        let subjects = SubjectsTable::new(None).unwrap();

        let metadata = basic_metadata(&sources, &subjects).unwrap();
        assert_eq!(metadata.nwbfile.identifier, "1234");
        assert_eq!(metadata.nwbfile.pharmacology.as_deref(), Some("Urethane"));
        let subject = metadata.subject.unwrap();
        assert_eq!(subject.subject_id, "300049");
        assert_eq!(subject.genotype.as_deref(), Some("Emx1-s"));
        assert_eq!(subject.age.as_deref(), Some("63d"));
    }

    #[test]
    fn test_merge_yaml_overrides_nested() {
        let mut metadata = Metadata {
            ophys: Some(default_ophys(30.0, Some("GCaMP6f"))),
            ..Default::default()
        };
        let overlay: Value = serde_yaml::from_str(
            "NWBFile:\n  session_description: drifting gratings\nOphys:\n  ImagingPlane:\n    excitation_lambda: 940\n",
        )
        .unwrap();
        metadata.merge_yaml(overlay).unwrap();
        assert_eq!(metadata.nwbfile.session_description, "drifting gratings");
        assert_eq!(metadata.nwbfile.session_start_time, DEFAULT_SESSION_START);
        let ophys = metadata.ophys.unwrap();
        assert_eq!(ophys.imaging_plane.excitation_lambda, 940.0);
        assert_eq!(ophys.imaging_plane.indicator, "GCaMP6f");
        assert_eq!(ophys.imaging_plane.imaging_rate, 30.0);
    }

    #[test]
    fn test_merge_adds_missing_section() {
        let mut metadata = Metadata::default();
        let overlay: Value =
            serde_yaml::from_str("Subject:\n  subject_id: '12'\n  species: Mus musculus\n")
                .unwrap();
        metadata.merge_yaml(overlay).unwrap();
        let subject = metadata.subject.unwrap();
        assert_eq!(subject.subject_id, "12");
        assert_eq!(subject.species.as_deref(), Some("Mus musculus"));
    }

    #[test]
    fn test_session_start_time() {
        assert_eq!(
            parse_session_start_time(DEFAULT_SESSION_START).unwrap(),
            "1900-01-01T00:00:00Z"
        );
        assert_eq!(
            parse_session_start_time("2020-05-04T10:00:00+02:00").unwrap(),
            "2020-05-04T08:00:00Z"
        );
        assert!(parse_session_start_time("yesterday").is_err());
    }

    #[test]
    fn test_rates_and_columns() {
        assert_eq!(rate_from_interval("dte", 0.5).unwrap(), 2.0);
        assert!(rate_from_interval("dte", 0.0).is_err());
        let trials = TrialsMetadata {
            sweep_columns: vec![String::from("orientation")],
        };
        assert_eq!(
            trials.column_names(2),
            vec![String::from("orientation"), String::from("sweep_param_1")]
        );
    }
}
