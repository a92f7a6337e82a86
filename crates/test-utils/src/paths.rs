//! Temporary directories for filesystem-driven tests.

use std::path::PathBuf;

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Creates a temporary directory holding empty files with the given names.
///
/// Used to stage boundary archives for the startup bootstrap.
pub fn temp_dir_with_files(names: &[&str]) -> (tempfile::TempDir, Vec<PathBuf>) {
    let dir = tempfile::Builder::new()
        .prefix("boundaries")
        .tempdir()
        .expect("Failed to create temporary test directory");

    let paths = names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"PK").expect("Failed to write fixture file");
            path
        })
        .collect();

    (dir, paths)
}
