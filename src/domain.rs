use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::VlmdError;

static HDP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HDP\d+$").expect("static HDP id pattern"));

/// Format identifiers understood by the conversion tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InputFormat {
    Stata,
    CsvDataDict,
    CsvData,
    RedcapCsv,
}

impl InputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            InputFormat::Stata => "stata",
            InputFormat::CsvDataDict => "csv-data-dict",
            InputFormat::CsvData => "csv-data",
            InputFormat::RedcapCsv => "redcap-csv",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputFormat {
    type Err = VlmdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stata" => Ok(InputFormat::Stata),
            "csv-data-dict" => Ok(InputFormat::CsvDataDict),
            "csv-data" => Ok(InputFormat::CsvData),
            "redcap-csv" => Ok(InputFormat::RedcapCsv),
            _ => Err(VlmdError::InvalidFormat(value.to_string())),
        }
    }
}

/// How CSV files without a pre-built data-dictionary suffix are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Try generic `csv-data` first, then `redcap-csv`.
    #[default]
    Fallback,
    /// Resolve straight to `redcap-csv`.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HdpId(String);

impl HdpId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HdpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HdpId {
    type Err = VlmdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !HDP_ID_RE.is_match(&normalized) {
            return Err(VlmdError::InvalidHdpId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for HdpId {
    type Error = VlmdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HdpId> for String {
    fn from(value: HdpId) -> Self {
        value.0
    }
}

/// Title used when the lookup service has no project title for a study.
pub const TITLE_NOT_FOUND: &str = "NOT FOUND";

pub const DEFAULT_PROJECT_TYPE: &str = "Research Programs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyIdentity {
    pub hdp_id: HdpId,
    pub appl_id: Option<String>,
    pub project_title: String,
    pub project_type: String,
}

/// Folder and manifest key for a dictionary: the file stem with spaces
/// replaced by underscores.
pub fn dictionary_name(stem: &str) -> String {
    stem.replace(' ', "_")
}
