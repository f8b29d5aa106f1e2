mod common;

use assert_matches::assert_matches;
use camino::Utf8Path;

use vlmd_pipeline::convert::{
    AttemptStatus, CommandConverter, ConversionInvoker, ConversionJob, ConversionOutcome,
    ConversionRequest, Converter, DictionaryProperties,
};
use vlmd_pipeline::domain::InputFormat;
use vlmd_pipeline::error::VlmdError;

use common::{FakeConverter, RecordingSink, utf8, write_file};

const CANDIDATES: [InputFormat; 2] = [InputFormat::CsvData, InputFormat::RedcapCsv];

fn job<'a>(input: &'a Utf8Path, staging: &'a Utf8Path) -> ConversionJob<'a> {
    ConversionJob {
        input,
        candidates: &CANDIDATES,
        output_name: "HDP00001_survey.csv",
        title: "survey",
        overwrite: false,
        staging,
    }
}

#[test]
fn first_valid_attempt_wins() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());
    let input = write_file(&root, "survey.csv", "a,b\n");
    let staging = root.join("staging");

    let converter = FakeConverter::new();
    let outcome = ConversionInvoker::new(&converter)
        .run(&job(&input, &staging), &RecordingSink::default())
        .unwrap();

    let accepted = outcome.accepted().unwrap();
    assert_eq!(accepted.format, InputFormat::CsvData);
    assert_eq!(accepted.status, AttemptStatus::Valid);
    assert_eq!(outcome.attempts().len(), 1);
    assert!(accepted.json_output().is_file());
}

#[test]
fn attempts_do_not_share_an_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());
    let input = write_file(&root, "survey.csv", "a,b\n");
    let staging = root.join("staging");

    let converter = FakeConverter::new().invalid_for(InputFormat::CsvData);
    let outcome = ConversionInvoker::new(&converter)
        .run(&job(&input, &staging), &RecordingSink::default())
        .unwrap();

    let attempts = outcome.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, AttemptStatus::Invalid);
    assert_eq!(attempts[1].status, AttemptStatus::Valid);
    assert_ne!(attempts[0].output_dir(), attempts[1].output_dir());
    assert_eq!(outcome.accepted().unwrap().format, InputFormat::RedcapCsv);
}

#[test]
fn failed_attempt_moves_on_to_next_format() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());
    let input = write_file(&root, "survey.csv", "a,b\n");
    let staging = root.join("staging");

    let converter = FakeConverter::new().failing_for(InputFormat::CsvData);
    let sink = RecordingSink::default();
    let outcome = ConversionInvoker::new(&converter)
        .run(&job(&input, &staging), &sink)
        .unwrap();

    assert_matches!(outcome.attempts()[0].status, AttemptStatus::Failed(_));
    assert_eq!(outcome.accepted().unwrap().format, InputFormat::RedcapCsv);
    assert_eq!(sink.warnings().len(), 1);
}

#[test]
fn existing_output_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());
    let input = write_file(&root, "survey.csv", "a,b\n");
    let staging = root.join("staging");

    let converter = FakeConverter::new().reporting_existing_output();
    let outcome = ConversionInvoker::new(&converter)
        .run(&job(&input, &staging), &RecordingSink::default())
        .unwrap();

    assert_matches!(
        outcome,
        ConversionOutcome::AlreadyConverted {
            format: InputFormat::CsvData,
            ..
        }
    );
    assert_eq!(converter.calls(), vec![InputFormat::CsvData]);
}

#[test]
fn exhaustion_is_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let root = utf8(dir.path());
    let input = write_file(&root, "survey.csv", "a,b\n");
    let staging = root.join("staging");

    let converter = FakeConverter::new()
        .invalid_for(InputFormat::CsvData)
        .invalid_for(InputFormat::RedcapCsv);
    let outcome = ConversionInvoker::new(&converter)
        .run(&job(&input, &staging), &RecordingSink::default())
        .unwrap();

    assert_matches!(outcome, ConversionOutcome::Exhausted { ref attempts } if attempts.len() == 2);
    assert!(outcome.accepted().is_none());
}

#[test]
fn missing_converter_program_is_reported() {
    let err = CommandConverter::locate("definitely-not-a-vlmd-converter", Vec::new()).unwrap_err();
    assert_matches!(err, VlmdError::MissingTool(_));
}

#[cfg(unix)]
mod command {
    use super::*;

    fn run_script(body: &str) -> Result<vlmd_pipeline::convert::ConversionReport, VlmdError> {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path());
        let script = write_file(&root, "convert.sh", body);
        let input = write_file(&root, "survey.csv", "a,b\n");
        let output = root.join("HDP00001_survey.csv");
        let properties = DictionaryProperties {
            title: "survey".to_string(),
            description: "test".to_string(),
        };
        let converter = CommandConverter::new("sh", vec![script.to_string()]);
        converter.convert(&ConversionRequest {
            input: &input,
            format: InputFormat::RedcapCsv,
            output: &output,
            properties: &properties,
            overwrite: false,
        })
    }

    #[test]
    fn stdout_report_is_parsed() {
        let report = run_script(
            "printf '%s' '{\"errors\": {\"csvtemplate\": {\"valid\": true}, \"jsontemplate\": {\"valid\": true}}}'\n",
        )
        .unwrap();
        assert!(report.is_valid());
    }

    #[test]
    fn exit_17_means_output_exists() {
        let err = run_script("exit 17\n").unwrap_err();
        assert_matches!(err, VlmdError::OutputExists(_));
    }

    #[test]
    fn exit_65_means_schema_validation_failure() {
        let err = run_script("echo 'missing name column' >&2\nexit 65\n").unwrap_err();
        assert_matches!(err, VlmdError::SchemaValidation(message) if message == "missing name column");
    }

    #[test]
    fn other_failures_are_extraction_errors() {
        let err = run_script("exit 3\n").unwrap_err();
        assert_matches!(err, VlmdError::Extraction(_));
    }

    #[test]
    fn empty_stdout_is_an_extraction_error() {
        let err = run_script("exit 0\n").unwrap_err();
        assert_matches!(err, VlmdError::Extraction(_));
    }
}
