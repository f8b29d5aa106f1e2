use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{InputFormat, StudyIdentity};
use crate::error::VlmdError;
use crate::layout;
use crate::place::ArtifactSet;

pub const STATUS_DRAFT: &str = "Draft";

/// `Project` section of `metadata.yaml`. Fields are declared in the order
/// they appear in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(rename = "APPL_ID", default, skip_serializing_if = "Option::is_none")]
    pub appl_id: Option<String>,
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "HDP_ID")]
    pub hdp_id: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ProjectTitle")]
    pub project_title: String,
    #[serde(rename = "ProjectType")]
    pub project_type: String,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub input_filepath: String,
    pub inputtype: InputFormat,
    pub output_filepath: String,
    pub relative_input_filepath: String,
    pub relative_output_filepath: String,
}

impl ManifestEntry {
    pub fn new(format: InputFormat, artifacts: &ArtifactSet) -> Self {
        Self {
            input_filepath: artifacts.input.remote.clone(),
            inputtype: format,
            output_filepath: artifacts.json.remote.clone(),
            relative_input_filepath: artifacts.input.relative.clone(),
            relative_output_filepath: artifacts.json.relative.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Project")]
    pub project: ProjectSection,
    #[serde(flatten)]
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(identity: &StudyIdentity, filename: &str, today: NaiveDate) -> Self {
        Self {
            project: ProjectSection {
                appl_id: identity.appl_id.clone(),
                filename: filename.to_string(),
                hdp_id: identity.hdp_id.to_string(),
                last_modified: today.format("%Y-%m-%d").to_string(),
                project_title: identity.project_title.clone(),
                project_type: identity.project_type.clone(),
                status: STATUS_DRAFT.to_string(),
            },
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: ManifestEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn to_yaml(&self) -> Result<String, VlmdError> {
        serde_yaml::to_string(self).map_err(|err| VlmdError::Manifest(err.to_string()))
    }
}

pub struct ManifestWriter;

impl ManifestWriter {
    /// Replaces `path` in one step, so an existing manifest always describes
    /// a finished conversion.
    pub fn write(path: &Utf8Path, manifest: &Manifest) -> Result<(), VlmdError> {
        let yaml = manifest.to_yaml()?;
        layout::write_bytes_atomic(path, yaml.as_bytes())
    }

    pub fn read(path: &Utf8Path) -> Result<Manifest, VlmdError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| VlmdError::Manifest(format!("read {path}: {err}")))?;
        serde_yaml::from_str(&content).map_err(|err| VlmdError::Manifest(format!("{path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HdpId;

    fn identity(appl_id: Option<&str>) -> StudyIdentity {
        StudyIdentity {
            hdp_id: "HDP00001".parse::<HdpId>().unwrap(),
            appl_id: appl_id.map(str::to_string),
            project_title: "Pain Study".to_string(),
            project_type: "Research Programs".to_string(),
        }
    }

    #[test]
    fn appl_id_is_omitted_when_unknown() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let yaml = Manifest::new(&identity(None), "survey", date)
            .to_yaml()
            .unwrap();
        assert!(!yaml.contains("APPL_ID"));
        assert!(yaml.contains("LastModified: 2025-03-04"));
        assert!(yaml.contains("Status: Draft"));
    }

    #[test]
    fn project_section_comes_first() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let yaml = Manifest::new(&identity(Some("10001")), "survey", date)
            .to_yaml()
            .unwrap();
        assert!(yaml.starts_with("Project:\n  APPL_ID: '10001'\n"));
    }
}
