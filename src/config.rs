use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::convert::DEFAULT_CONVERTER;
use crate::domain::{DEFAULT_PROJECT_TYPE, DetectionStrategy};
use crate::error::VlmdError;
use crate::mds::DEFAULT_MDS_URL;
use crate::place::DEFAULT_REMOTE_BASE;

pub const CONFIG_FILE: &str = "convert2vlmd.json";
pub const SCHEMA_VERSION: u32 = 1;

pub const ENV_MDS_URL: &str = "MDS_URL";
pub const ENV_CONVERTER: &str = "VLMD_CONVERTER";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub mds_url: Option<String>,
    #[serde(default)]
    pub remote_base_url: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub strategy: Option<DetectionStrategy>,
    #[serde(default)]
    pub converter: Option<ConverterEntry>,
}

/// `"vlmd"` or `{"program": "python", "args": ["-m", "vlmd"]}`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConverterEntry {
    Shorthand(String),
    Detailed(ConverterEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConverterEntryObject {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ConverterCommand {
    /// Splits a command line on whitespace; the first word is the program.
    pub fn parse(value: &str) -> Result<Self, VlmdError> {
        let mut words = value.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| VlmdError::ConfigParse("converter command is empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

impl Default for ConverterCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_CONVERTER.to_string(),
            args: Vec::new(),
        }
    }
}

/// Values taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub mds_url: Option<String>,
    pub converter: Option<String>,
}

impl Environment {
    pub fn from_env() -> Self {
        Self {
            mds_url: non_empty_var(ENV_MDS_URL),
            converter: non_empty_var(ENV_CONVERTER),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mds_url: Option<String>,
    pub project_type: Option<String>,
    pub strategy: Option<DetectionStrategy>,
    pub converter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub mds_url: String,
    pub remote_base_url: String,
    pub project_type: String,
    pub strategy: DetectionStrategy,
    pub converter: ConverterCommand,
    pub source: Option<PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./convert2vlmd.json`, then the user config
    /// directory. Only an explicit path is required to exist.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>, VlmdError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(VlmdError::ConfigRead(path.to_path_buf()));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Ok(Some(local));
        }
        let user = BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("convert2vlmd").join(CONFIG_FILE))
            .filter(|path| path.is_file());
        Ok(user)
    }

    pub fn load(path: &Path) -> Result<Config, VlmdError> {
        let content =
            fs::read_to_string(path).map_err(|_| VlmdError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| VlmdError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        explicit: Option<&Path>,
        env: &Environment,
        overrides: &Overrides,
    ) -> Result<ResolvedConfig, VlmdError> {
        let source = Self::locate(explicit)?;
        let config = match &source {
            Some(path) => Self::load(path)?,
            None => Config::default(),
        };
        let mut resolved = Self::resolve_config(config, env, overrides)?;
        resolved.source = source;
        Ok(resolved)
    }

    /// Command line beats environment, which beats the file, which beats the
    /// built-in defaults.
    pub fn resolve_config(
        config: Config,
        env: &Environment,
        overrides: &Overrides,
    ) -> Result<ResolvedConfig, VlmdError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version > SCHEMA_VERSION {
            return Err(VlmdError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let converter = match (&overrides.converter, &env.converter, config.converter) {
            (Some(value), _, _) | (None, Some(value), _) => ConverterCommand::parse(value)?,
            (None, None, Some(ConverterEntry::Shorthand(value))) => {
                ConverterCommand::parse(&value)?
            }
            (None, None, Some(ConverterEntry::Detailed(obj))) => {
                if obj.program.trim().is_empty() {
                    return Err(VlmdError::ConfigParse(
                        "converter program is empty".to_string(),
                    ));
                }
                ConverterCommand {
                    program: obj.program,
                    args: obj.args,
                }
            }
            (None, None, None) => ConverterCommand::default(),
        };

        let mds_url = overrides
            .mds_url
            .clone()
            .or_else(|| env.mds_url.clone())
            .or(config.mds_url)
            .unwrap_or_else(|| DEFAULT_MDS_URL.to_string());

        Ok(ResolvedConfig {
            schema_version,
            mds_url,
            remote_base_url: config
                .remote_base_url
                .unwrap_or_else(|| DEFAULT_REMOTE_BASE.to_string()),
            project_type: overrides
                .project_type
                .clone()
                .or(config.project_type)
                .unwrap_or_else(|| DEFAULT_PROJECT_TYPE.to_string()),
            strategy: overrides.strategy.or(config.strategy).unwrap_or_default(),
            converter,
            source: None,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
