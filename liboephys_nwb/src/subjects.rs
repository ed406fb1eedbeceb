use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::error::SubjectsError;

/// Load the default subjects table for windows
#[cfg(target_family = "windows")]
fn load_default_subjects() -> String {
    String::from(include_str!("data\\subjects_info.json"))
}

/// Load the default subjects table for macos and linux
#[cfg(target_family = "unix")]
fn load_default_subjects() -> String {
    String::from(include_str!("data/subjects_info.json"))
}

/// Per-animal information that is not stored in the recording files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub line: String,
    pub age: String,
    pub anesthesia: String,
    #[serde(default)]
    pub indicator: Option<String>,
}

/// SubjectsTable maps an animal id (the `aid` field of the processed data) to its SubjectInfo.
///
/// The table is a JSON object keyed by the id string. A table for the known animals is bundled
/// with the library and used when no path is given.
#[derive(Debug, Clone, Default)]
pub struct SubjectsTable {
    map: FxHashMap<String, SubjectInfo>,
}

impl SubjectsTable {
    /// Create a new SubjectsTable
    /// If the path is None, we load the default that is bundled with the library
    pub fn new(path: Option<&Path>) -> Result<Self, SubjectsError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_subjects();
        }

        let map: FxHashMap<String, SubjectInfo> = serde_json::from_str(&contents)?;
        Ok(Self { map })
    }

    pub fn get(&self, subject_id: &str) -> Option<&SubjectInfo> {
        self.map.get(subject_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_table() {
        let table = SubjectsTable::new(None).unwrap();
        assert_eq!(table.len(), 22);
        let info = table.get("300049").unwrap();
        assert_eq!(info.line, "Emx1-s");
        assert_eq!(info.age, "63d");
        assert_eq!(info.anesthesia, "Urethane");
        assert_eq!(info.indicator.as_deref(), Some("GCaMP6s"));
        assert!(table.get("1").is_none());
    }

    #[test]
    fn test_custom_table_without_indicator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"42": {{"line": "Cux2-f", "age": "80d", "anesthesia": "Isoflurane"}}}}"#
        )
        .unwrap();
        let table = SubjectsTable::new(Some(file.path())).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("42").unwrap().indicator, None);
    }

    #[test]
    fn test_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            SubjectsTable::new(Some(file.path())),
            Err(SubjectsError::ParsingError(_))
        ));
    }
}
