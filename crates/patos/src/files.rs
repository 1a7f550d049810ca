//! Filesystem plumbing for the driver: mirroring the input tree into the
//! output directory and discovering input files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use walkdir::WalkDir;

use crate::error::DriverError;

pub fn directory_exists(path: &Path) -> bool {
    path.is_dir()
}

/// Recursively copies `source` into `destination`, creating directories as
/// needed and overwriting existing files.
pub fn copy_directory(source: &Path, destination: &Path) -> Result<(), DriverError> {
    if !directory_exists(source) {
        return Err(DriverError::MissingDirectory {
            path: source.to_path_buf(),
        });
    }
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| DriverError::Io {
            path: source.to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir stays under its root");
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|source| DriverError::Io {
                path: target.clone(),
                source,
            })?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| DriverError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::copy(entry.path(), &target).map_err(|source| DriverError::Io {
                path: target.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

/// All files below `directory` with the given extension (no leading dot),
/// as paths relative to `directory`, in a stable order.
pub fn find_files_recursively(directory: &Path, extension: &str) -> Result<Vec<PathBuf>, DriverError> {
    if !directory_exists(directory) {
        return Err(DriverError::MissingDirectory {
            path: directory.to_path_buf(),
        });
    }
    let mut result = Vec::new();
    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry.map_err(|e| DriverError::Io {
            path: directory.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) == Some(extension) {
            let relative = entry
                .path()
                .strip_prefix(directory)
                .expect("walkdir stays under its root");
            debug!("found input file: {}", relative.display());
            result.push(relative.to_path_buf());
        }
    }
    Ok(result)
}

pub fn make_directories(path: &Path) -> Result<(), DriverError> {
    fs::create_dir_all(path).map_err(|source| DriverError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_nested_trees_and_finds_inputs() {
        let source = tempfile::tempdir().unwrap();
        let destination = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("sub")).unwrap();
        fs::write(source.path().join("a.m"), "int x;").unwrap();
        fs::write(source.path().join("sub/b.m"), "int y;").unwrap();
        fs::write(source.path().join("sub/header.h"), "int z;").unwrap();

        copy_directory(source.path(), destination.path()).unwrap();
        let files = find_files_recursively(destination.path(), "m").unwrap();
        assert_eq!(files, vec![PathBuf::from("a.m"), PathBuf::from("sub/b.m")]);
        assert!(destination.path().join("sub/header.h").is_file());
    }

    #[test]
    fn missing_directory_is_reported() {
        let missing = Path::new("/nonexistent/patos-input");
        assert!(copy_directory(missing, Path::new("/tmp")).is_err());
        assert!(find_files_recursively(missing, "m").is_err());
    }
}
