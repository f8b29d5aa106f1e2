//! HEAL metadata service (MDS) client and study identity resolution.
//!
//! Responses are read through a typed projection of the fields the pipeline
//! needs:
//!
//! - `gen3_discovery._hdp_uid`
//! - `gen3_discovery.appl_id`
//! - `nih_reporter.project_title`
//! - `nih_reporter.appl_id`
//!
//! A recursive search for `appl_id` remains as a fallback for records that
//! carry the award number somewhere else. It walks objects depth-first in key
//! order (serde_json maps iterate sorted), checking a key before descending
//! into its value, so the first match is deterministic.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::{HdpId, StudyIdentity, TITLE_NOT_FOUND};
use crate::error::VlmdError;
use crate::progress::{Phase, ProgressEvent, ProgressSink};

pub const DEFAULT_MDS_URL: &str = "https://healdata.org/mds/metadata";

pub trait MetadataClient: Send + Sync {
    /// Study record for one HDP id.
    fn fetch_study(&self, hdp_id: &HdpId) -> Result<Value, VlmdError>;
    /// Mapping of HDP id to study record for every study under an award.
    fn fetch_by_appl_id(&self, appl_id: &str) -> Result<Value, VlmdError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudyRecord {
    #[serde(default)]
    pub gen3_discovery: Option<Gen3Discovery>,
    #[serde(default)]
    pub nih_reporter: Option<NihReporter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Gen3Discovery {
    #[serde(default, rename = "_hdp_uid", deserialize_with = "lenient_id")]
    pub hdp_uid: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub appl_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NihReporter {
    #[serde(default, deserialize_with = "lenient_id")]
    pub project_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub appl_id: Option<String>,
}

impl StudyRecord {
    pub fn from_value(value: &Value) -> Result<Self, VlmdError> {
        if !value.is_object() {
            return Err(VlmdError::LookupUnavailable(
                "metadata response is not an object".to_string(),
            ));
        }
        Self::deserialize(value)
            .map_err(|err| VlmdError::LookupUnavailable(format!("malformed study record: {err}")))
    }

    pub fn project_title(&self) -> Option<&str> {
        self.nih_reporter
            .as_ref()
            .and_then(|reporter| reporter.project_title.as_deref())
    }

    pub fn hdp_uid(&self) -> Option<&str> {
        self.gen3_discovery
            .as_ref()
            .and_then(|discovery| discovery.hdp_uid.as_deref())
    }

    /// Award number from the typed paths, `gen3_discovery` first.
    pub fn appl_id(&self) -> Option<&str> {
        self.gen3_discovery
            .as_ref()
            .and_then(|discovery| discovery.appl_id.as_deref())
            .or_else(|| {
                self.nih_reporter
                    .as_ref()
                    .and_then(|reporter| reporter.appl_id.as_deref())
            })
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_id))
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// First usable value stored under `target` anywhere in `value`.
pub fn find_key(value: &Value, target: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == target {
                    if let Some(found) = value_as_id(child) {
                        return Some(found);
                    }
                }
                if let Some(found) = find_key(child, target) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_key(item, target)),
        _ => None,
    }
}

/// HDP id of the study registered under an award. When the award maps to
/// several studies the lexicographically smallest HDP id is chosen.
pub fn hdp_id_from_award_response(response: &Value) -> Result<Option<HdpId>, VlmdError> {
    let Some(map) = response.as_object() else {
        return Err(VlmdError::LookupUnavailable(
            "award lookup response is not an object".to_string(),
        ));
    };
    let mut candidates = Vec::new();
    for (key, value) in map {
        let record = StudyRecord::from_value(value)?;
        let raw = record.hdp_uid().unwrap_or(key.as_str());
        if let Ok(id) = raw.parse::<HdpId>() {
            candidates.push(id);
        }
    }
    candidates.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    candidates.dedup();
    Ok(candidates.into_iter().next())
}

#[derive(Debug, Clone)]
pub struct IdentityRequest {
    pub hdp_id: Option<HdpId>,
    pub appl_id: Option<String>,
    pub project_type: String,
}

/// Manual entry of a project title the lookup service does not know.
pub trait TitlePrompt {
    fn prompt_title(&self, hdp_id: &HdpId) -> Result<Option<String>, VlmdError>;
}

/// Keeps the `NOT FOUND` sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl TitlePrompt for NoPrompt {
    fn prompt_title(&self, _hdp_id: &HdpId) -> Result<Option<String>, VlmdError> {
        Ok(None)
    }
}

/// Resolves the identity shared by every file of a run. Fails when the
/// study cannot be found at all; a missing title or award number degrades
/// to the sentinel and to `None` respectively.
pub fn resolve_identity<C: MetadataClient + ?Sized>(
    client: &C,
    request: IdentityRequest,
    prompt: &dyn TitlePrompt,
    sink: &dyn ProgressSink,
) -> Result<StudyIdentity, VlmdError> {
    let hdp_id = match (request.hdp_id, request.appl_id.as_deref()) {
        (Some(hdp_id), _) => hdp_id,
        (None, Some(appl_id)) => {
            sink.event(ProgressEvent::info(
                Phase::Resolve,
                format!("resolving hdp_id from appl_id {appl_id}"),
            ));
            let response = client
                .fetch_by_appl_id(appl_id)
                .map_err(|err| VlmdError::LookupUnavailable(err.to_string()))?;
            let count = response.as_object().map(|map| map.len()).unwrap_or(0);
            if count > 1 {
                sink.event(ProgressEvent::warn(
                    Phase::Resolve,
                    format!("appl_id {appl_id} maps to {count} studies; using the first hdp_id"),
                ));
            }
            hdp_id_from_award_response(&response)?.ok_or_else(|| {
                VlmdError::LookupUnavailable(format!("no study registered for appl_id {appl_id}"))
            })?
        }
        (None, None) => {
            return Err(VlmdError::LookupUnavailable(
                "either an hdp_id or an appl_id is required".to_string(),
            ));
        }
    };

    sink.event(ProgressEvent::info(
        Phase::Resolve,
        format!("fetching project metadata for {hdp_id}"),
    ));
    let response = client
        .fetch_study(&hdp_id)
        .map_err(|err| VlmdError::LookupUnavailable(format!("{hdp_id}: {err}")))?;
    let record = StudyRecord::from_value(&response)?;

    if let Some(uid) = record.hdp_uid() {
        if !uid.eq_ignore_ascii_case(hdp_id.as_str()) {
            sink.event(ProgressEvent::warn(
                Phase::Resolve,
                format!("record reports _hdp_uid {uid}, keeping requested {hdp_id}"),
            ));
        }
    }

    let project_title = match record.project_title() {
        Some(title) => title.to_string(),
        None => {
            sink.event(ProgressEvent::warn(
                Phase::Resolve,
                format!("project title not found for {hdp_id}"),
            ));
            match prompt.prompt_title(&hdp_id)? {
                Some(title) if !title.trim().is_empty() => title.trim().to_string(),
                _ => TITLE_NOT_FOUND.to_string(),
            }
        }
    };

    let appl_id = match request.appl_id {
        Some(appl_id) => Some(appl_id),
        None => record
            .appl_id()
            .map(str::to_string)
            .or_else(|| find_key(&response, "appl_id")),
    };
    match &appl_id {
        Some(appl_id) => sink.event(ProgressEvent::info(
            Phase::Resolve,
            format!("appl_id: {appl_id}"),
        )),
        None => sink.event(ProgressEvent::warn(
            Phase::Resolve,
            "appl_id not found; proceeding without an award number",
        )),
    }

    Ok(StudyIdentity {
        hdp_id,
        appl_id,
        project_title,
        project_type: request.project_type,
    })
}

#[derive(Clone)]
pub struct MdsHttpClient {
    client: Client,
    base_url: String,
}

impl MdsHttpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, VlmdError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("convert2vlmd/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VlmdError::LookupHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| VlmdError::LookupHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn study_url(&self, hdp_id: &HdpId) -> String {
        format!("{}/{}", self.base_url, hdp_id.as_str())
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, VlmdError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "metadata request failed".to_string());
        Err(VlmdError::LookupStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, VlmdError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(VlmdError::LookupHttp(err.to_string()));
                }
            }
        }
    }

    fn get_json<F>(&self, make_req: F) -> Result<Value, VlmdError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let response = self.send_with_retries(make_req)?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| VlmdError::LookupHttp(err.to_string()))
    }
}

impl MetadataClient for MdsHttpClient {
    fn fetch_study(&self, hdp_id: &HdpId) -> Result<Value, VlmdError> {
        let url = self.study_url(hdp_id);
        self.get_json(|| self.client.get(&url))
    }

    fn fetch_by_appl_id(&self, appl_id: &str) -> Result<Value, VlmdError> {
        self.get_json(|| {
            self.client.get(&self.base_url).query(&[
                ("data", "True"),
                ("offset", "0"),
                ("nih_reporter.appl_id", appl_id),
            ])
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
