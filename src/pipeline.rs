use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::convert::{ConversionInvoker, ConversionJob, ConversionOutcome, Converter};
use crate::detect::detect_formats;
use crate::domain::{DetectionStrategy, InputFormat, StudyIdentity, dictionary_name};
use crate::error::VlmdError;
use crate::layout::StudyLayout;
use crate::manifest::{Manifest, ManifestEntry, ManifestWriter};
use crate::place::{ArtifactPlacer, DEFAULT_REMOTE_BASE, Placement};
use crate::progress::{Phase, ProgressEvent, ProgressSink};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub overwrite: bool,
    pub strategy: DetectionStrategy,
    pub remote_base: String,
    /// Date stamped into `LastModified`; today when unset.
    pub today: Option<NaiveDate>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            strategy: DetectionStrategy::default(),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            today: None,
        }
    }
}

/// Terminal state of one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileOutcome {
    Placed,
    SkippedUnrecognized,
    SkippedAlreadyProcessed,
    SkippedDuplicateStem,
    FailedAllFormats,
    FailedMissingOutput,
    Failed,
}

impl FileOutcome {
    pub fn label(self) -> &'static str {
        match self {
            FileOutcome::Placed => "placed",
            FileOutcome::SkippedUnrecognized => "skipped (unrecognized format)",
            FileOutcome::SkippedAlreadyProcessed => "skipped (already processed)",
            FileOutcome::SkippedDuplicateStem => "skipped (duplicate name)",
            FileOutcome::FailedAllFormats => "failed (no valid conversion)",
            FileOutcome::FailedMissingOutput => "failed (missing output)",
            FileOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: String,
    pub outcome: FileOutcome,
    pub format: Option<InputFormat>,
    pub manifest: Option<Utf8PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileReport {
    fn new(file: &str, outcome: FileOutcome) -> Self {
        Self {
            file: file.to_string(),
            outcome,
            format: None,
            manifest: None,
            message: None,
        }
    }

    fn with_format(mut self, format: InputFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn with_manifest(mut self, manifest: Utf8PathBuf) -> Self {
        self.manifest = Some(manifest);
        self
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub study_dir: Utf8PathBuf,
    pub files_found: usize,
    pub files_converted: usize,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn outcome_of(&self, file: &str) -> Option<FileOutcome> {
        self.files
            .iter()
            .find(|report| report.file == file)
            .map(|report| report.outcome)
    }
}

/// Fails when the clean study directory or the output root is missing or is
/// not a directory.
pub fn validate_paths(source_dir: &Utf8Path, output_root: &Utf8Path) -> Result<(), VlmdError> {
    let source = source_dir.as_std_path();
    if !source.exists() {
        return Err(VlmdError::InvalidPath(source.to_path_buf()));
    }
    if !source.is_dir() {
        return Err(VlmdError::NotADirectory(source.to_path_buf()));
    }
    let output = output_root.as_std_path();
    if !output.exists() {
        return Err(VlmdError::InvalidPath(output.to_path_buf()));
    }
    if !output.is_dir() {
        return Err(VlmdError::NotADirectory(output.to_path_buf()));
    }
    Ok(())
}

/// Lists regular, non-hidden files directly inside `dir`, sorted by name.
pub fn discover_files(
    dir: &Utf8Path,
    sink: &dyn ProgressSink,
) -> Result<Vec<Utf8PathBuf>, VlmdError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("read {dir}: {err}")))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| VlmdError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
            sink.event(ProgressEvent::warn(
                Phase::Discover,
                format!("skipping non-UTF-8 file name in {dir}"),
            ));
            continue;
        };
        let hidden = path
            .file_name()
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

pub struct StudyPipeline<C: Converter> {
    converter: C,
    options: PipelineOptions,
}

impl<C: Converter> StudyPipeline<C> {
    pub fn new(converter: C, options: PipelineOptions) -> Self {
        Self { converter, options }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Converts every file of `source_dir` into `layout`. Per-file failures
    /// end up in the summary; only unusable paths abort the run.
    pub fn run(
        &self,
        source_dir: &Utf8Path,
        layout: &StudyLayout,
        identity: &StudyIdentity,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, VlmdError> {
        validate_paths(source_dir, layout.output_root())?;

        let files = discover_files(source_dir, sink)?;
        sink.event(ProgressEvent::info(
            Phase::Discover,
            format!("found {} file(s) in {source_dir}", files.len()),
        ));

        let placer = ArtifactPlacer::new(layout, &self.options.remote_base);
        let today = self.options.today.unwrap_or_else(|| Local::now().date_naive());
        let mut claimed = HashSet::new();
        let mut reports = Vec::with_capacity(files.len());

        for file in &files {
            let report =
                self.process_file(file, layout, identity, &placer, today, &mut claimed, sink);
            reports.push(report);
        }

        let converted = reports
            .iter()
            .filter(|report| report.outcome == FileOutcome::Placed)
            .count();
        sink.event(ProgressEvent::info(
            Phase::Summary,
            format!(
                "found {} file(s) in {source_dir}; conversion valid for {converted} file(s)",
                files.len()
            ),
        ));

        Ok(RunSummary {
            study_dir: layout.study_root(),
            files_found: files.len(),
            files_converted: converted,
            files: reports,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn process_file(
        &self,
        source: &Utf8Path,
        layout: &StudyLayout,
        identity: &StudyIdentity,
        placer: &ArtifactPlacer<'_>,
        today: NaiveDate,
        claimed: &mut HashSet<String>,
        sink: &dyn ProgressSink,
    ) -> FileReport {
        let file = source.file_name().unwrap_or(source.as_str());

        let Some(candidates) = detect_formats(file, self.options.strategy) else {
            sink.event(
                ProgressEvent::info(Phase::Detect, "unrecognized input type, skipping")
                    .with_file(file),
            );
            return FileReport::new(file, FileOutcome::SkippedUnrecognized)
                .with_message(VlmdError::UnrecognizedFormat(file.to_string()).to_string());
        };
        let stem = source.file_stem().unwrap_or(file);
        let name = dictionary_name(stem);

        if claimed.contains(&name) {
            let err = VlmdError::DuplicateStem(name.clone());
            sink.event(ProgressEvent::warn(Phase::Detect, err.to_string()).with_file(file));
            return FileReport::new(file, FileOutcome::SkippedDuplicateStem)
                .with_message(err.to_string());
        }

        let manifest_path = layout.manifest_path(&name);
        if manifest_path.as_std_path().is_file() && !self.options.overwrite {
            sink.event(
                ProgressEvent::info(
                    Phase::Detect,
                    format!("already processed ({manifest_path} exists)"),
                )
                .with_file(file),
            );
            claimed.insert(name);
            return FileReport::new(file, FileOutcome::SkippedAlreadyProcessed)
                .with_manifest(manifest_path);
        }

        let candidate_list = candidates
            .iter()
            .map(|format| format.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        sink.event(
            ProgressEvent::debug(Phase::Detect, format!("candidate input types: {candidate_list}"))
                .with_file(file),
        );

        let result = self.convert_and_place(
            source,
            &name,
            &candidates,
            layout,
            identity,
            placer,
            today,
            sink,
        );
        match result {
            Ok(report) => {
                // A failed file leaves the name free for another source.
                if matches!(
                    report.outcome,
                    FileOutcome::Placed | FileOutcome::SkippedAlreadyProcessed
                ) {
                    claimed.insert(name);
                }
                report
            }
            Err(err) => {
                sink.event(ProgressEvent::error(Phase::Place, err.to_string()).with_file(file));
                FileReport::new(file, FileOutcome::Failed).with_message(err.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_and_place(
        &self,
        source: &Utf8Path,
        name: &str,
        candidates: &[InputFormat],
        layout: &StudyLayout,
        identity: &StudyIdentity,
        placer: &ArtifactPlacer<'_>,
        today: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<FileReport, VlmdError> {
        let file = source.file_name().unwrap_or(source.as_str());
        layout.ensure_study_dirs()?;
        let staging = layout.staging_dir()?;
        let staging_path = Utf8Path::from_path(staging.path()).ok_or_else(|| {
            VlmdError::Filesystem(format!("non-UTF-8 staging path {}", staging.path().display()))
        })?;

        let output_stem = format!("{}_{name}", identity.hdp_id);
        let output_name = format!("{output_stem}.csv");
        let job = ConversionJob {
            input: source,
            candidates,
            output_name: &output_name,
            title: name,
            overwrite: self.options.overwrite,
            staging: staging_path,
        };
        let outcome = ConversionInvoker::new(&self.converter).run(&job, sink)?;

        let attempt = match &outcome {
            ConversionOutcome::AlreadyConverted { format, .. } => {
                return Ok(FileReport::new(file, FileOutcome::SkippedAlreadyProcessed)
                    .with_format(*format));
            }
            ConversionOutcome::Exhausted { attempts } => {
                sink.event(
                    ProgressEvent::warn(
                        Phase::Convert,
                        format!(
                            "no valid conversion after {} attempt(s), nothing written",
                            attempts.len()
                        ),
                    )
                    .with_file(file),
                );
                let tried = candidates
                    .iter()
                    .map(|format| format.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                let err = VlmdError::ConversionInvalid(format!("{file} (tried {tried})"));
                return Ok(FileReport::new(file, FileOutcome::FailedAllFormats)
                    .with_message(err.to_string()));
            }
            ConversionOutcome::Converted { .. } => match outcome.accepted() {
                Some(attempt) => attempt,
                None => {
                    return Ok(FileReport::new(file, FileOutcome::FailedAllFormats));
                }
            },
        };

        let placement = Placement {
            attempt,
            source,
            name,
            output_stem: &output_stem,
            overwrite: self.options.overwrite,
        };
        let placed = match placer.place(&placement, sink) {
            Ok(placed) => placed,
            Err(err @ VlmdError::MissingExpectedOutput(_)) => {
                sink.event(ProgressEvent::error(Phase::Place, err.to_string()).with_file(file));
                return Ok(FileReport::new(file, FileOutcome::FailedMissingOutput)
                    .with_format(attempt.format)
                    .with_message(err.to_string()));
            }
            Err(err) => return Err(err),
        };

        let mut manifest = Manifest::new(identity, name, today);
        manifest.insert(name, ManifestEntry::new(attempt.format, &placed.artifacts));
        let manifest_path = layout.manifest_path(name);
        if let Err(err) = ManifestWriter::write(&manifest_path, &manifest) {
            placer.rollback(placed, name, sink);
            return Err(err);
        }
        placed.commit();
        sink.event(
            ProgressEvent::info(Phase::Manifest, format!("wrote {manifest_path}")).with_file(file),
        );

        Ok(FileReport::new(file, FileOutcome::Placed)
            .with_format(attempt.format)
            .with_manifest(manifest_path))
    }
}
