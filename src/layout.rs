use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::{Builder, TempDir};

use crate::error::VlmdError;

pub const DATA_DICTIONARIES_DIR: &str = "data-dictionaries";
pub const INPUT_DIR: &str = "input";
pub const VLMD_DIR: &str = "vlmd";
pub const MANIFEST_FILE: &str = "metadata.yaml";

/// Canonical output tree of one study:
///
/// ```text
/// <output_root>/data-dictionaries/<study_dir>/
///     input/                 original dictionaries
///     vlmd/<name>/           converted outputs + metadata.yaml
/// ```
#[derive(Debug, Clone)]
pub struct StudyLayout {
    output_root: Utf8PathBuf,
    study_dir: String,
}

impl StudyLayout {
    pub fn new(output_root: impl Into<Utf8PathBuf>, study_dir: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            study_dir: study_dir.into(),
        }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn study_dir(&self) -> &str {
        &self.study_dir
    }

    pub fn study_root(&self) -> Utf8PathBuf {
        self.output_root
            .join(DATA_DICTIONARIES_DIR)
            .join(&self.study_dir)
    }

    pub fn input_dir(&self) -> Utf8PathBuf {
        self.study_root().join(INPUT_DIR)
    }

    pub fn vlmd_dir(&self) -> Utf8PathBuf {
        self.study_root().join(VLMD_DIR)
    }

    pub fn file_dir(&self, name: &str) -> Utf8PathBuf {
        self.vlmd_dir().join(name)
    }

    pub fn manifest_path(&self, name: &str) -> Utf8PathBuf {
        self.file_dir(name).join(MANIFEST_FILE)
    }

    pub fn input_copy_path(&self, file_name: &str) -> Utf8PathBuf {
        self.input_dir().join(file_name)
    }

    pub fn ensure_study_dirs(&self) -> Result<(), VlmdError> {
        ensure_dir(&self.input_dir())?;
        ensure_dir(&self.vlmd_dir())
    }

    /// Scratch directory next to the outputs so placement never crosses
    /// filesystems. Removed when the returned guard drops.
    pub fn staging_dir(&self) -> Result<TempDir, VlmdError> {
        Builder::new()
            .prefix(".vlmd-staging")
            .tempdir_in(self.study_root().as_std_path())
            .map_err(|err| VlmdError::Filesystem(err.to_string()))
    }

    /// Holds files an overwrite displaces until its manifest is committed.
    pub fn backup_dir(&self) -> Result<TempDir, VlmdError> {
        Builder::new()
            .prefix(".vlmd-backup")
            .tempdir_in(self.study_root().as_std_path())
            .map_err(|err| VlmdError::Filesystem(err.to_string()))
    }
}

/// Accepts a study folder name only when it is one plain path component.
pub fn validate_study_dir(name: &str) -> Result<&str, VlmdError> {
    let mut components = Utf8Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Utf8Component::Normal(component)), None)
            if component == name && !name.contains(['/', '\\']) =>
        {
            Ok(name)
        }
        _ => Err(VlmdError::InvalidStudyDir(name.to_string())),
    }
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), VlmdError> {
    if path.as_std_path().exists() {
        if path.as_std_path().is_dir() {
            return Ok(());
        }
        return Err(VlmdError::NotADirectory(path.as_std_path().to_path_buf()));
    }
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("create {path}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), VlmdError> {
    let parent = path
        .parent()
        .ok_or_else(|| VlmdError::Filesystem(format!("no parent directory for {path}")))?;
    ensure_dir(parent)?;
    let mut temp = Builder::new()
        .prefix(".vlmd-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| VlmdError::Filesystem(err.to_string()))?;
    std::io::Write::write_all(&mut temp, content)
        .map_err(|err| VlmdError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), VlmdError> {
    let parent = dest
        .parent()
        .ok_or_else(|| VlmdError::Filesystem("invalid destination path".to_string()))?;
    ensure_dir(parent)?;
    let temp = Builder::new()
        .prefix(".vlmd-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| VlmdError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| VlmdError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| VlmdError::Filesystem(format!("persist {dest}: {}", err.error)))?;
    Ok(())
}
