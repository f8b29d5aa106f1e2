#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use vlmd_pipeline::convert::{ConversionReport, ConversionRequest, Converter};
use vlmd_pipeline::domain::{DEFAULT_PROJECT_TYPE, HdpId, InputFormat, StudyIdentity};
use vlmd_pipeline::error::VlmdError;
use vlmd_pipeline::mds::MetadataClient;
use vlmd_pipeline::progress::{EventLevel, ProgressEvent, ProgressSink};

/// Writes a CSV and a JSON dictionary for every request, contents derived
/// from the request alone.
#[derive(Default)]
pub struct FakeConverter {
    invalid: HashSet<InputFormat>,
    failing: HashSet<InputFormat>,
    skip_json: bool,
    output_exists: bool,
    calls: Mutex<Vec<InputFormat>>,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports failed template checks for `format`.
    pub fn invalid_for(mut self, format: InputFormat) -> Self {
        self.invalid.insert(format);
        self
    }

    /// Errors out with an extraction failure for `format`.
    pub fn failing_for(mut self, format: InputFormat) -> Self {
        self.failing.insert(format);
        self
    }

    pub fn without_json(mut self) -> Self {
        self.skip_json = true;
        self
    }

    pub fn reporting_existing_output(mut self) -> Self {
        self.output_exists = true;
        self
    }

    pub fn calls(&self) -> Vec<InputFormat> {
        self.calls.lock().unwrap().clone()
    }
}

pub fn expected_json(title: &str, format: InputFormat) -> String {
    format!("{{\"title\": \"{title}\", \"inputtype\": \"{format}\"}}\n")
}

impl Converter for FakeConverter {
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<ConversionReport, VlmdError> {
        self.calls.lock().unwrap().push(request.format);
        if self.output_exists {
            return Err(VlmdError::OutputExists(request.output.to_string()));
        }
        if self.failing.contains(&request.format) {
            return Err(VlmdError::Extraction(format!(
                "cannot read {} as {}",
                request.input, request.format
            )));
        }
        fs::write(
            request.output.as_std_path(),
            format!("title,inputtype\n{},{}\n", request.properties.title, request.format),
        )
        .unwrap();
        if !self.skip_json {
            fs::write(
                request.output.with_extension("json").as_std_path(),
                expected_json(&request.properties.title, request.format),
            )
            .unwrap();
        }
        let valid = !self.invalid.contains(&request.format);
        Ok(ConversionReport::new(valid, valid))
    }
}

#[derive(Default)]
pub struct FakeMds {
    pub studies: HashMap<String, Value>,
    pub awards: HashMap<String, Value>,
    pub calls: Mutex<usize>,
}

impl MetadataClient for FakeMds {
    fn fetch_study(&self, hdp_id: &HdpId) -> Result<Value, VlmdError> {
        *self.calls.lock().unwrap() += 1;
        self.studies
            .get(hdp_id.as_str())
            .cloned()
            .ok_or_else(|| VlmdError::LookupStatus {
                status: 404,
                message: "not found".to_string(),
            })
    }

    fn fetch_by_appl_id(&self, appl_id: &str) -> Result<Value, VlmdError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .awards
            .get(appl_id)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.level == EventLevel::Warn)
            .map(|event| event.message)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn identity() -> StudyIdentity {
    StudyIdentity {
        hdp_id: "HDP00001".parse().unwrap(),
        appl_id: None,
        project_title: "Pain Study".to_string(),
        project_type: DEFAULT_PROJECT_TYPE.to_string(),
    }
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

pub fn write_file(dir: &Utf8Path, name: &str, content: &str) -> Utf8PathBuf {
    let path = dir.join(name);
    fs::write(path.as_std_path(), content).unwrap();
    path
}

/// Every file below `root` with its contents and modification time.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, (Vec<u8>, SystemTime)> {
    let mut files = BTreeMap::new();
    collect(root, &mut files);
    files
}

fn collect(dir: &Path, files: &mut BTreeMap<PathBuf, (Vec<u8>, SystemTime)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(&path, files);
        } else {
            let content = fs::read(&path).unwrap();
            let modified = fs::metadata(&path).unwrap().modified().unwrap();
            files.insert(path, (content, modified));
        }
    }
}
