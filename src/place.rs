use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;

use crate::convert::ConversionAttempt;
use crate::error::VlmdError;
use crate::layout::{self, INPUT_DIR, StudyLayout, VLMD_DIR};
use crate::progress::{Phase, ProgressEvent, ProgressSink};

pub const DEFAULT_REMOTE_BASE: &str =
    "https://github.com/heal-data-stewards/heal-data-dictionaries/tree/main/data-dictionaries";

/// One placed file in its three coordinate systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPath {
    pub path: Utf8PathBuf,
    /// Tree URL of the file once the study directory is pushed.
    pub remote: String,
    /// Reference used inside `metadata.yaml`.
    pub relative: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSet {
    pub json: ArtifactPath,
    pub csv: Option<ArtifactPath>,
    pub input: ArtifactPath,
    /// Every file written under `vlmd/`, `json` and `csv` included.
    pub outputs: Vec<Utf8PathBuf>,
}

impl ArtifactSet {
    pub fn paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.outputs
            .iter()
            .map(Utf8PathBuf::as_path)
            .chain(std::iter::once(self.input.path.as_path()))
    }
}

/// Rewrites local paths under a study root into remote and relative
/// references:
///
/// - `<root>/input/<rest>` → `<base>/<study>/input/<rest>` and `../input/<rest>`
/// - `<root>/vlmd/<rest>` → `<base>/<study>/vlmd/<rest>` and `../<rest>`
///
/// Remote segments are percent-encoded; relative ones are kept verbatim.
#[derive(Debug, Clone)]
pub struct PathScheme {
    study_root: Utf8PathBuf,
    remote_study: String,
}

impl PathScheme {
    pub fn new(layout: &StudyLayout, remote_base: &str) -> Self {
        Self {
            study_root: layout.study_root(),
            remote_study: format!(
                "{}/{}",
                remote_base.trim_end_matches('/'),
                urlencoding::encode(layout.study_dir())
            ),
        }
    }

    pub fn artifact_path(&self, path: &Utf8Path) -> Result<ArtifactPath, VlmdError> {
        let relative = path.strip_prefix(&self.study_root).map_err(|_| {
            VlmdError::Filesystem(format!("{path} is outside {}", self.study_root))
        })?;
        let mut components = relative.components();
        let section = match components.next() {
            Some(Utf8Component::Normal(section)) => section,
            _ => {
                return Err(VlmdError::Filesystem(format!(
                    "{path} is not under input/ or vlmd/"
                )));
            }
        };
        let segments = components
            .map(|component| component.as_str())
            .collect::<Vec<_>>();
        let rest = segments.join("/");
        if rest.is_empty() {
            return Err(VlmdError::Filesystem(format!("{path} names a directory")));
        }
        let relative = match section {
            INPUT_DIR => format!("../{INPUT_DIR}/{rest}"),
            VLMD_DIR => format!("../{rest}"),
            other => {
                return Err(VlmdError::Filesystem(format!(
                    "{path} is under {other}/, expected input/ or vlmd/"
                )));
            }
        };
        let encoded = segments
            .iter()
            .map(|segment| urlencoding::encode(segment))
            .collect::<Vec<_>>()
            .join("/");
        Ok(ArtifactPath {
            path: path.to_path_buf(),
            remote: format!("{}/{section}/{encoded}", self.remote_study),
            relative,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Placement<'a> {
    pub attempt: &'a ConversionAttempt,
    pub source: &'a Utf8Path,
    /// Dictionary name: the `vlmd/<name>/` folder.
    pub name: &'a str,
    /// Stem shared by every output of the attempt, e.g. `HDP00001_survey`.
    pub output_stem: &'a str,
    pub overwrite: bool,
}

/// Files moved aside by a placement, restored if the placement is rolled
/// back and discarded once it is committed.
#[derive(Debug, Default)]
struct Displaced {
    dir: Option<(TempDir, Utf8PathBuf)>,
    moved: Vec<(Utf8PathBuf, Utf8PathBuf)>,
}

impl Displaced {
    fn stash(&mut self, layout: &StudyLayout, path: &Utf8Path) -> Result<(), VlmdError> {
        let std_path = path.as_std_path();
        if !std_path.exists() {
            return Ok(());
        }
        if !std_path.is_file() {
            return Err(VlmdError::Filesystem(format!(
                "{path} is in the way and is not a regular file"
            )));
        }
        let dir_path = match self.dir.as_ref().map(|(_, dir_path)| dir_path.clone()) {
            Some(dir_path) => dir_path,
            None => {
                let dir = layout.backup_dir()?;
                let dir_path = Utf8Path::from_path(dir.path())
                    .ok_or_else(|| {
                        VlmdError::Filesystem(format!(
                            "non-UTF-8 backup path {}",
                            dir.path().display()
                        ))
                    })?
                    .to_path_buf();
                self.dir = Some((dir, dir_path.clone()));
                dir_path
            }
        };
        let file_name = path.file_name().unwrap_or("artifact");
        let backup = dir_path.join(format!("{}-{file_name}", self.moved.len()));
        fs::rename(std_path, backup.as_std_path())
            .map_err(|err| VlmdError::Filesystem(format!("move aside {path}: {err}")))?;
        self.moved.push((path.to_path_buf(), backup));
        Ok(())
    }

    fn restore(self, sink: &dyn ProgressSink) {
        for (original, backup) in self.moved.iter().rev() {
            if let Err(err) = fs::rename(backup.as_std_path(), original.as_std_path()) {
                sink.event(ProgressEvent::error(
                    Phase::Place,
                    format!("could not restore {original} from {backup}: {err}"),
                ));
            }
        }
    }
}

/// A placed set whose previous artifacts are still recoverable.
#[derive(Debug)]
pub struct Placed {
    pub artifacts: ArtifactSet,
    created_dir: bool,
    displaced: Displaced,
}

impl Placed {
    /// Drops the files this placement replaced.
    pub fn commit(self) -> ArtifactSet {
        self.artifacts
    }
}

pub struct ArtifactPlacer<'a> {
    layout: &'a StudyLayout,
    scheme: PathScheme,
}

impl<'a> ArtifactPlacer<'a> {
    pub fn new(layout: &'a StudyLayout, remote_base: &str) -> Self {
        Self {
            layout,
            scheme: PathScheme::new(layout, remote_base),
        }
    }

    pub fn scheme(&self) -> &PathScheme {
        &self.scheme
    }

    /// Copies the accepted outputs into `vlmd/<name>/` and the source into
    /// `input/`. Files already there are moved aside first; a failed
    /// placement removes what it wrote and puts them back.
    pub fn place(
        &self,
        placement: &Placement<'_>,
        sink: &dyn ProgressSink,
    ) -> Result<Placed, VlmdError> {
        let json_source = placement.attempt.json_output();
        if !json_source.as_std_path().is_file() {
            return Err(VlmdError::MissingExpectedOutput(json_source.to_string()));
        }

        let prefix = format!("{}.", placement.output_stem);
        let outputs = placement
            .attempt
            .artifacts
            .iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| name.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();

        let file_dir = self.layout.file_dir(placement.name);
        let created_dir = !file_dir.as_std_path().exists();
        let mut written = Vec::new();
        let mut displaced = Displaced::default();
        let result = self.copy_all(
            placement,
            &outputs,
            &file_dir,
            &mut written,
            &mut displaced,
            sink,
        );
        match result {
            Ok(artifacts) => Ok(Placed {
                artifacts,
                created_dir,
                displaced,
            }),
            Err(err) => {
                remove_placed(&written, created_dir.then_some(file_dir.as_path()), sink);
                displaced.restore(sink);
                Err(err)
            }
        }
    }

    fn copy_all(
        &self,
        placement: &Placement<'_>,
        outputs: &[&Utf8PathBuf],
        file_dir: &Utf8Path,
        written: &mut Vec<Utf8PathBuf>,
        displaced: &mut Displaced,
        sink: &dyn ProgressSink,
    ) -> Result<ArtifactSet, VlmdError> {
        layout::ensure_dir(file_dir)?;
        let source_name = placement.source.file_name().ok_or_else(|| {
            VlmdError::Filesystem(format!("{} has no file name", placement.source))
        })?;

        let mut json = None;
        let mut csv = None;
        for output in outputs {
            let Some(name) = output.file_name() else {
                continue;
            };
            let dest = file_dir.join(name);
            displaced.stash(self.layout, &dest)?;
            layout::copy_file_atomic(output, &dest)?;
            written.push(dest.clone());
            match dest.extension() {
                Some("json") => json = Some(dest),
                Some("csv") => csv = Some(dest),
                _ => {}
            }
        }
        let json = json.ok_or_else(|| {
            let expected = file_dir.join(format!("{}.json", placement.output_stem));
            VlmdError::MissingExpectedOutput(expected.to_string())
        })?;

        let input_dest = self.layout.input_copy_path(source_name);
        if input_dest.as_std_path().exists() && !placement.overwrite {
            sink.event(
                ProgressEvent::warn(
                    Phase::Place,
                    format!("replacing stale input copy {input_dest} left by an unfinished run"),
                )
                .with_file(source_name),
            );
        }
        displaced.stash(self.layout, &input_dest)?;
        layout::copy_file_atomic(placement.source, &input_dest)?;
        written.push(input_dest.clone());

        sink.event(
            ProgressEvent::info(
                Phase::Place,
                format!("placed {} output file(s) in {file_dir}", outputs.len()),
            )
            .with_file(source_name),
        );

        Ok(ArtifactSet {
            json: self.scheme.artifact_path(&json)?,
            csv: csv.map(|path| self.scheme.artifact_path(&path)).transpose()?,
            input: self.scheme.artifact_path(&input_dest)?,
            outputs: written
                .iter()
                .filter(|path| path.starts_with(file_dir))
                .cloned()
                .collect(),
        })
    }

    /// Undoes a placement whose manifest could not be committed: the new
    /// files go away and the ones they replaced come back.
    pub fn rollback(&self, placed: Placed, name: &str, sink: &dyn ProgressSink) {
        let paths = placed
            .artifacts
            .paths()
            .map(Utf8Path::to_path_buf)
            .collect::<Vec<_>>();
        let dir = self.layout.file_dir(name);
        remove_placed(&paths, placed.created_dir.then_some(dir.as_path()), sink);
        placed.displaced.restore(sink);
    }
}

fn remove_placed(paths: &[Utf8PathBuf], dir: Option<&Utf8Path>, sink: &dyn ProgressSink) {
    for path in paths {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => sink.event(ProgressEvent::error(
                Phase::Place,
                format!("could not remove {path}: {err}"),
            )),
        }
    }
    if let Some(dir) = dir
        && let Err(err) = fs::remove_dir(dir.as_std_path())
    {
        sink.event(ProgressEvent::warn(
            Phase::Place,
            format!("could not remove {dir}: {err}"),
        ));
    }
}
