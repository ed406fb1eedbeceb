use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::ConfigError;

const DEFAULT_OUTPUT_DIR: &str = "nwb_converted";

/// Structure representing the application configuration. Contains pathing and conversion options
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub raw_path: PathBuf,
    pub processed_path: PathBuf,
    pub calibration_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub subjects_path: Option<PathBuf>,
    pub metadata_path: Option<PathBuf>,
    pub zoom_pairs: BTreeMap<String, String>,
    pub link_raw_ophys: bool,
    pub add_ophys_processed: bool,
    pub add_ophys_acquisition: bool,
    pub add_spiking_data: bool,
    pub add_ecephys_raw: bool,
    pub add_ecephys_filtered: bool,
    pub add_trials: bool,
    pub read_check: bool,
    pub ids: Option<Vec<usize>>,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. All paths will be empty/invalid
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from("None"),
            processed_path: PathBuf::from("None"),
            calibration_path: None,
            output_path: None,
            subjects_path: None,
            metadata_path: None,
            zoom_pairs: BTreeMap::new(),
            link_raw_ophys: true,
            add_ophys_processed: true,
            add_ophys_acquisition: true,
            add_spiking_data: true,
            add_ecephys_raw: true,
            add_ecephys_filtered: true,
            add_trials: true,
            read_check: true,
            ids: None,
            n_threads: 1,
        }
    }
}

/// The subset of the Config which controls what a single conversion writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub link_raw_ophys: bool,
    pub add_ophys_processed: bool,
    pub add_ophys_acquisition: bool,
    pub add_spiking_data: bool,
    pub add_ecephys_raw: bool,
    pub add_ecephys_filtered: bool,
    pub add_trials: bool,
    pub read_check: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Config::default().conversion_options()
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Get the output directory, creating it if needed.
    ///
    /// Defaults to `nwb_converted` next to the calibration data, or next to the raw data
    /// directory when there is no calibration data.
    pub fn get_output_directory(&self) -> Result<PathBuf, ConfigError> {
        let output = match (&self.output_path, &self.calibration_path) {
            (Some(out), _) => out.clone(),
            (None, Some(cal)) => cal.join(DEFAULT_OUTPUT_DIR),
            (None, None) => self
                .raw_path
                .parent()
                .ok_or(ConfigError::NoOutputPath)?
                .join(DEFAULT_OUTPUT_DIR),
        };
        if !output.exists() {
            std::fs::create_dir_all(&output)?;
        }
        Ok(output)
    }

    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            link_raw_ophys: self.link_raw_ophys,
            add_ophys_processed: self.add_ophys_processed,
            add_ophys_acquisition: self.add_ophys_acquisition,
            add_spiking_data: self.add_spiking_data,
            add_ecephys_raw: self.add_ecephys_raw,
            add_ecephys_filtered: self.add_ecephys_filtered,
            add_trials: self.add_trials,
            read_check: self.read_check,
        }
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_calibration(&self) -> bool {
        self.calibration_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "raw_path: /data/raw\nprocessed_path: /data/processed\nids: [0, 2]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.raw_path, PathBuf::from("/data/raw"));
        assert_eq!(config.ids, Some(vec![0, 2]));
        assert!(config.link_raw_ophys);
        assert_eq!(config.n_threads, 1);
        assert!(!config.has_calibration());
    }

    #[test]
    fn test_missing_config_file() {
        let res = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(res, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_output_directory_defaults_to_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            calibration_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let out = config.get_output_directory().unwrap();
        assert_eq!(out, dir.path().join(DEFAULT_OUTPUT_DIR));
        assert!(out.exists());
    }

    #[test]
    fn test_template_roundtrips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.conversion_options(), config.conversion_options());
        assert!(back.is_n_threads_valid());
    }
}
