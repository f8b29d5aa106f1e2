use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum VlmdError {
    #[error("invalid HDP id: {0}")]
    InvalidHdpId(String),

    #[error("invalid input format: {0}")]
    InvalidFormat(String),

    #[error("unrecognized data dictionary format: {0}")]
    UnrecognizedFormat(String),

    #[error("no candidate format produced a valid conversion for {0}")]
    ConversionInvalid(String),

    #[error("conversion output already exists: {0}")]
    OutputExists(String),

    #[error("conversion reported success but expected output is missing: {0}")]
    MissingExpectedOutput(String),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("another file of this run already maps to {0}")]
    DuplicateStem(String),

    #[error("metadata lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("metadata request failed: {0}")]
    LookupHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    LookupStatus { status: u16, message: String },

    #[error("invalid path: {0}")]
    #[diagnostic(help("check that the directory exists and is readable"))]
    InvalidPath(PathBuf),

    #[error("path exists but is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("invalid study folder name: {0}")]
    #[diagnostic(help("--project must be a single folder name without separators or `..`"))]
    InvalidStudyDir(String),

    #[error("required tool not found: {0}")]
    #[diagnostic(help("install the converter or pass --converter / set VLMD_CONVERTER"))]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credentials: {0}")]
    #[diagnostic(help("set API_URL and API_TOKEN in the environment or a .env file"))]
    MissingCredentials(String),

    #[error("REDCap request failed: {0}")]
    RedcapHttp(String),

    #[error("REDCap returned status {status}: {message}")]
    RedcapStatus { status: u16, message: String },
}
