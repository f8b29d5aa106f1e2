use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use vlmd_pipeline::error::VlmdError;
use vlmd_pipeline::layout::{
    StudyLayout, copy_file_atomic, ensure_dir, validate_study_dir, write_bytes_atomic,
};

#[test]
fn layout_paths() {
    let layout = StudyLayout::new("/repo", "HDP00001");
    assert_eq!(
        layout.study_root(),
        Utf8PathBuf::from("/repo/data-dictionaries/HDP00001")
    );
    assert!(layout.vlmd_dir().ends_with("HDP00001/vlmd"));
    assert!(layout.file_dir("survey").ends_with("vlmd/survey"));
    assert!(
        layout
            .input_copy_path("survey.csv")
            .ends_with("HDP00001/input/survey.csv")
    );
}

#[test]
fn project_override_names_the_study_folder() {
    let layout = StudyLayout::new("/repo", "pain-consortium");
    assert!(
        layout
            .manifest_path("survey")
            .ends_with("data-dictionaries/pain-consortium/vlmd/survey/metadata.yaml")
    );
}

#[test]
fn ensure_study_dirs_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let layout = StudyLayout::new(&root, "HDP00001");

    layout.ensure_study_dirs().unwrap();
    layout.ensure_study_dirs().unwrap();

    assert!(layout.input_dir().is_dir());
    assert!(layout.vlmd_dir().is_dir());
}

#[test]
fn file_in_place_of_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let blocked = root.join("blocked");
    fs::write(blocked.as_std_path(), "x").unwrap();

    let err = ensure_dir(&blocked).unwrap_err();
    assert_matches!(err, VlmdError::NotADirectory(_));
}

#[test]
fn atomic_writes_replace_content() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let target = root.join("nested/out.json");

    write_bytes_atomic(&target, b"first").unwrap();
    write_bytes_atomic(&target, b"second").unwrap();
    assert_eq!(fs::read_to_string(target.as_std_path()).unwrap(), "second");

    let copy = root.join("copy/out.json");
    copy_file_atomic(&target, &copy).unwrap();
    assert_eq!(fs::read_to_string(copy.as_std_path()).unwrap(), "second");
    assert_eq!(fs::read_dir(root.join("nested").as_std_path()).unwrap().count(), 1);
}

#[test]
fn staging_dir_is_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let layout = StudyLayout::new(&root, "HDP00001");
    layout.ensure_study_dirs().unwrap();

    let staging = layout.staging_dir().unwrap();
    let path = staging.path().to_path_buf();
    assert!(path.starts_with(layout.study_root().as_std_path()));
    drop(staging);
    assert!(!path.exists());
}

#[test]
fn study_folder_must_be_a_single_component() {
    assert_eq!(validate_study_dir("pain-consortium").unwrap(), "pain-consortium");
    assert_eq!(validate_study_dir("Pain Study 2").unwrap(), "Pain Study 2");
    for bad in ["../x", "a/b", "..", ".", "/abs", "x/", "a\\b"] {
        assert_matches!(
            validate_study_dir(bad),
            Err(VlmdError::InvalidStudyDir(name)) if name == bad
        );
    }
}
