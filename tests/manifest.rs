use std::fs;

use chrono::NaiveDate;

use vlmd_pipeline::domain::{InputFormat, StudyIdentity};
use vlmd_pipeline::manifest::{Manifest, ManifestEntry, ManifestWriter};

fn identity() -> StudyIdentity {
    StudyIdentity {
        hdp_id: "HDP00001".parse().unwrap(),
        appl_id: Some("10001".to_string()),
        project_title: "Pain Study".to_string(),
        project_type: "Research Programs".to_string(),
    }
}

fn entry() -> ManifestEntry {
    ManifestEntry {
        input_filepath: "https://example.org/HDP00001/input/survey.csv".to_string(),
        inputtype: InputFormat::RedcapCsv,
        output_filepath: "https://example.org/HDP00001/vlmd/survey/HDP00001_survey.json"
            .to_string(),
        relative_input_filepath: "../input/survey.csv".to_string(),
        relative_output_filepath: "../survey/HDP00001_survey.json".to_string(),
    }
}

#[test]
fn manifest_yaml_layout() {
    let mut manifest = Manifest::new(
        &identity(),
        "survey",
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    );
    manifest.insert("survey", entry());

    let yaml = manifest.to_yaml().unwrap();
    let expected = "\
Project:
  APPL_ID: '10001'
  Filename: survey
  HDP_ID: HDP00001
  LastModified: 2025-06-01
  ProjectTitle: Pain Study
  ProjectType: Research Programs
  Status: Draft
survey:
  input_filepath: https://example.org/HDP00001/input/survey.csv
  inputtype: redcap-csv
  output_filepath: https://example.org/HDP00001/vlmd/survey/HDP00001_survey.json
  relative_input_filepath: ../input/survey.csv
  relative_output_filepath: ../survey/HDP00001_survey.json
";
    assert_eq!(yaml, expected);
}

#[test]
fn written_manifest_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("survey/metadata.yaml")).unwrap();
    let mut manifest = Manifest::new(
        &identity(),
        "survey",
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
    );
    manifest.insert("survey", entry());

    ManifestWriter::write(&path, &manifest).unwrap();

    assert_eq!(ManifestWriter::read(&path).unwrap(), manifest);
    let leftovers = fs::read_dir(dir.path().join("survey"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 1);
}

#[test]
fn unreadable_manifest_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("metadata.yaml")).unwrap();
    fs::write(path.as_std_path(), "Project: [unterminated").unwrap();
    assert!(ManifestWriter::read(&path).is_err());
}
