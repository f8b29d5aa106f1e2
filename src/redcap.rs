//! One-shot REDCap compliance check: the dictionary is submitted to a REDCap
//! project's metadata import endpoint and the verdict is read back.

use std::fs;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::error::VlmdError;

pub const ENV_API_URL: &str = "API_URL";
pub const ENV_API_TOKEN: &str = "API_TOKEN";

#[derive(Debug, Clone)]
pub struct RedcapCredentials {
    pub api_url: String,
    pub token: String,
}

impl RedcapCredentials {
    pub fn from_env() -> Result<Self, VlmdError> {
        Ok(Self {
            api_url: required_var(ENV_API_URL)?,
            token: required_var(ENV_API_TOKEN)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedcapResponse {
    pub status: u16,
    pub body: String,
}

pub trait RedcapClient: Send + Sync {
    /// Submits `csv` as project metadata and returns the raw reply.
    fn import_metadata(&self, csv: &str) -> Result<RedcapResponse, VlmdError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum RedcapValidation {
    Compliant { status: u16, imported: Value },
    Rejected { status: u16, errors: Vec<String> },
}

impl RedcapValidation {
    pub fn is_compliant(&self) -> bool {
        matches!(self, RedcapValidation::Compliant { .. })
    }
}

/// 200 means the dictionary was accepted; 4xx carries the reasons in the
/// `error` field, one per line. A 5xx reply is no verdict at all.
pub fn interpret_response(response: &RedcapResponse) -> Result<RedcapValidation, VlmdError> {
    let status = response.status;
    if status == 200 {
        let imported = serde_json::from_str(&response.body)
            .unwrap_or_else(|_| Value::String(response.body.trim().to_string()));
        return Ok(RedcapValidation::Compliant { status, imported });
    }
    if status >= 500 {
        return Err(VlmdError::RedcapStatus {
            status,
            message: response.body.clone(),
        });
    }

    let errors = match serde_json::from_str::<Value>(&response.body) {
        Ok(value) => match value.get("error").and_then(Value::as_str) {
            Some(message) if !message.trim().is_empty() => message
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            _ => vec![format!("HTTP {status} - {}", response.body.trim())],
        },
        Err(_) => vec![format!("HTTP {status} - unable to parse response")],
    };
    Ok(RedcapValidation::Rejected { status, errors })
}

pub fn validate_file<C: RedcapClient + ?Sized>(
    client: &C,
    path: &Utf8Path,
) -> Result<RedcapValidation, VlmdError> {
    if !path.as_std_path().is_file() {
        return Err(VlmdError::InvalidPath(path.as_std_path().to_path_buf()));
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("read {path}: {err}")))?;
    let response = client.import_metadata(&content)?;
    interpret_response(&response)
}

#[derive(Clone)]
pub struct RedcapHttpClient {
    client: Client,
    credentials: RedcapCredentials,
}

impl RedcapHttpClient {
    pub fn new(credentials: RedcapCredentials) -> Result<Self, VlmdError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("convert2vlmd/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VlmdError::RedcapHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| VlmdError::RedcapHttp(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl RedcapClient for RedcapHttpClient {
    fn import_metadata(&self, csv: &str) -> Result<RedcapResponse, VlmdError> {
        let form = [
            ("token", self.credentials.token.as_str()),
            ("content", "metadata"),
            ("format", "csv"),
            ("data", csv),
            ("returnFormat", "json"),
        ];
        let response = self
            .client
            .post(&self.credentials.api_url)
            .form(&form)
            .send()
            .map_err(|err| VlmdError::RedcapHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| VlmdError::RedcapHttp(err.to_string()))?;
        Ok(RedcapResponse { status, body })
    }
}

fn required_var(name: &str) -> Result<String, VlmdError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| VlmdError::MissingCredentials(name.to_string()))
}
