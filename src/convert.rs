use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::InputFormat;
use crate::error::VlmdError;
use crate::progress::{Phase, ProgressEvent, ProgressSink};

/// Exit status a converter uses to say its output already exists (EEXIST).
pub const EXIT_OUTPUT_EXISTS: i32 = 17;
/// Exit status a converter uses for schema validation failures (EX_DATAERR).
pub const EXIT_SCHEMA_INVALID: i32 = 65;

pub const DEFAULT_CONVERTER: &str = "vlmd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictionaryProperties {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest<'a> {
    pub input: &'a Utf8Path,
    pub format: InputFormat,
    /// Requested CSV output; the JSON output sits next to it with a `.json`
    /// extension.
    pub output: &'a Utf8Path,
    pub properties: &'a DictionaryProperties,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateValidity {
    #[serde(default)]
    pub valid: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportErrors {
    #[serde(default)]
    pub csvtemplate: TemplateValidity,
    #[serde(default)]
    pub jsontemplate: TemplateValidity,
}

/// Validation summary returned by the converter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionReport {
    #[serde(default)]
    pub errors: ReportErrors,
}

impl ConversionReport {
    pub fn new(csv_valid: bool, json_valid: bool) -> Self {
        Self {
            errors: ReportErrors {
                csvtemplate: TemplateValidity { valid: csv_valid },
                jsontemplate: TemplateValidity { valid: json_valid },
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.csvtemplate.valid && self.errors.jsontemplate.valid
    }
}

/// External routine turning a data dictionary into VLMD records.
///
/// Signals a pre-existing output with [`VlmdError::OutputExists`], and
/// conversion failures with [`VlmdError::SchemaValidation`] or
/// [`VlmdError::Extraction`].
pub trait Converter: Send + Sync {
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<ConversionReport, VlmdError>;
}

/// Runs a converter program:
///
/// ```text
/// <program> [args..] <input> --inputtype <fmt> --outputfile <csv>
///           --title <title> --description <text> [--overwrite]
/// ```
///
/// and reads the JSON validation report from its stdout.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Looks `program` up on `PATH` unless it is already a path.
    pub fn locate(program: &str, args: Vec<String>) -> Result<Self, VlmdError> {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            if candidate.is_file() {
                return Ok(Self::new(candidate, args));
            }
            return Err(VlmdError::MissingTool(program.to_string()));
        }
        find_in_path(program)
            .map(|path| Self::new(path, args))
            .ok_or_else(|| VlmdError::MissingTool(program.to_string()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command_args(&self, request: &ConversionRequest<'_>) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            request.input.to_string(),
            "--inputtype".to_string(),
            request.format.to_string(),
            "--outputfile".to_string(),
            request.output.to_string(),
            "--title".to_string(),
            request.properties.title.clone(),
            "--description".to_string(),
            request.properties.description.clone(),
        ]);
        if request.overwrite {
            args.push("--overwrite".to_string());
        }
        args
    }
}

impl Converter for CommandConverter {
    fn convert(&self, request: &ConversionRequest<'_>) -> Result<ConversionReport, VlmdError> {
        let output = Command::new(&self.program)
            .args(self.command_args(request))
            .output()
            .map_err(|err| {
                VlmdError::Extraction(format!("{}: {err}", self.program.display()))
            })?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                stderr
            };
            return Err(match output.status.code() {
                Some(EXIT_OUTPUT_EXISTS) => VlmdError::OutputExists(request.output.to_string()),
                Some(EXIT_SCHEMA_INVALID) => VlmdError::SchemaValidation(message),
                _ => VlmdError::Extraction(message),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(VlmdError::Extraction(
                "converter produced no validation report".to_string(),
            ));
        }
        serde_json::from_str(stdout.trim())
            .map_err(|err| VlmdError::Extraction(format!("unreadable validation report: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum AttemptStatus {
    Valid,
    Invalid,
    Failed(String),
    AlreadyConverted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionAttempt {
    pub format: InputFormat,
    pub status: AttemptStatus,
    pub csv_template_valid: bool,
    pub json_template_valid: bool,
    /// CSV output requested for this attempt.
    pub output: Utf8PathBuf,
    /// Files the converter left in this attempt's directory.
    pub artifacts: Vec<Utf8PathBuf>,
}

impl ConversionAttempt {
    pub fn output_dir(&self) -> Option<&Utf8Path> {
        self.output.parent()
    }

    pub fn json_output(&self) -> Utf8PathBuf {
        self.output.with_extension("json")
    }
}

#[derive(Debug, Clone)]
pub enum ConversionOutcome {
    /// The last attempt is the accepted one.
    Converted { attempts: Vec<ConversionAttempt> },
    AlreadyConverted {
        format: InputFormat,
        attempts: Vec<ConversionAttempt>,
    },
    Exhausted { attempts: Vec<ConversionAttempt> },
}

impl ConversionOutcome {
    pub fn attempts(&self) -> &[ConversionAttempt] {
        match self {
            ConversionOutcome::Converted { attempts }
            | ConversionOutcome::AlreadyConverted { attempts, .. }
            | ConversionOutcome::Exhausted { attempts } => attempts,
        }
    }

    pub fn accepted(&self) -> Option<&ConversionAttempt> {
        match self {
            ConversionOutcome::Converted { attempts } => attempts.last(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionJob<'a> {
    pub input: &'a Utf8Path,
    pub candidates: &'a [InputFormat],
    /// File name of the CSV output, e.g. `HDP00001_survey.csv`.
    pub output_name: &'a str,
    pub title: &'a str,
    pub overwrite: bool,
    /// Each attempt gets its own subdirectory here.
    pub staging: &'a Utf8Path,
}

pub struct ConversionInvoker<'a, C: Converter + ?Sized> {
    converter: &'a C,
}

impl<'a, C: Converter + ?Sized> ConversionInvoker<'a, C> {
    pub fn new(converter: &'a C) -> Self {
        Self { converter }
    }

    /// Tries every candidate format in order until one yields a report whose
    /// CSV and JSON template checks both pass.
    pub fn run(
        &self,
        job: &ConversionJob<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<ConversionOutcome, VlmdError> {
        let file = job.input.file_name().unwrap_or(job.input.as_str()).to_string();
        let mut attempts = Vec::with_capacity(job.candidates.len());

        for (index, format) in job.candidates.iter().copied().enumerate() {
            let attempt_dir = job.staging.join(format!("{}-{format}", index + 1));
            fs::create_dir_all(attempt_dir.as_std_path())
                .map_err(|err| VlmdError::Filesystem(format!("create {attempt_dir}: {err}")))?;
            let output = attempt_dir.join(job.output_name);
            let properties = DictionaryProperties {
                title: job.title.to_string(),
                description: format!("Data dictionary converted from {format} input"),
            };
            sink.event(
                ProgressEvent::info(Phase::Convert, format!("converting with input type {format}"))
                    .with_file(&file),
            );

            let request = ConversionRequest {
                input: job.input,
                format,
                output: &output,
                properties: &properties,
                overwrite: job.overwrite,
            };
            let result = self.converter.convert(&request);
            let artifacts = list_files(&attempt_dir)?;
            let mut attempt = ConversionAttempt {
                format,
                status: AttemptStatus::Invalid,
                csv_template_valid: false,
                json_template_valid: false,
                output,
                artifacts,
            };

            match result {
                Err(VlmdError::OutputExists(_)) => {
                    sink.event(
                        ProgressEvent::info(Phase::Convert, "already processed").with_file(&file),
                    );
                    attempt.status = AttemptStatus::AlreadyConverted;
                    attempts.push(attempt);
                    return Ok(ConversionOutcome::AlreadyConverted { format, attempts });
                }
                Err(err) => {
                    sink.event(
                        ProgressEvent::warn(
                            Phase::Convert,
                            format!("conversion with {format} failed: {err}"),
                        )
                        .with_file(&file),
                    );
                    attempt.status = AttemptStatus::Failed(err.to_string());
                    attempts.push(attempt);
                }
                Ok(report) => {
                    attempt.csv_template_valid = report.errors.csvtemplate.valid;
                    attempt.json_template_valid = report.errors.jsontemplate.valid;
                    if report.is_valid() {
                        attempt.status = AttemptStatus::Valid;
                        attempts.push(attempt);
                        sink.event(
                            ProgressEvent::info(
                                Phase::Convert,
                                format!("valid conversion with input type {format}"),
                            )
                            .with_file(&file),
                        );
                        return Ok(ConversionOutcome::Converted { attempts });
                    }
                    sink.event(
                        ProgressEvent::info(
                            Phase::Convert,
                            format!(
                                "conversion with {format} invalid (csvtemplate={}, jsontemplate={}), trying next input type if available",
                                report.errors.csvtemplate.valid, report.errors.jsontemplate.valid
                            ),
                        )
                        .with_file(&file),
                    );
                    attempts.push(attempt);
                }
            }
        }

        Ok(ConversionOutcome::Exhausted { attempts })
    }
}

fn list_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, VlmdError> {
    let mut files = Vec::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("read {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| VlmdError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|_| VlmdError::Filesystem("non-utf8 file path in output".to_string()))?;
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_requires_both_templates() {
        let report: ConversionReport = serde_json::from_str(
            r#"{"errors": {"csvtemplate": {"valid": true, "errors": []}, "jsontemplate": {"valid": false}}}"#,
        )
        .unwrap();
        assert!(!report.is_valid());
        assert!(ConversionReport::new(true, true).is_valid());
    }

    #[test]
    fn command_arguments_follow_request() {
        let converter = CommandConverter::new("vlmd", vec!["extract".to_string()]);
        let properties = DictionaryProperties {
            title: "survey".to_string(),
            description: "desc".to_string(),
        };
        let request = ConversionRequest {
            input: Utf8Path::new("in/survey.csv"),
            format: InputFormat::RedcapCsv,
            output: Utf8Path::new("out/HDP00001_survey.csv"),
            properties: &properties,
            overwrite: true,
        };
        let args = converter.command_args(&request);
        assert_eq!(args[0], "extract");
        assert_eq!(args[1], "in/survey.csv");
        assert!(args.windows(2).any(|w| w[0] == "--inputtype" && w[1] == "redcap-csv"));
        assert_eq!(args.last().map(String::as_str), Some("--overwrite"));
    }
}
