use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::variant::ModelVariant;

#[derive(Debug, Error)]
pub enum LocalImportError {
    #[error("model folder {0} does not exist or is not a directory")]
    MissingSource(PathBuf),
    #[error("model folder is missing required files: {0}")]
    MissingFiles(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Copies a user-supplied model folder into the destination instead of
/// downloading, after validating that every expected file is present.
pub fn import_local(
    variant: ModelVariant,
    source_dir: &Path,
    destination: &Path,
) -> Result<Vec<PathBuf>, LocalImportError> {
    if !source_dir.is_dir() {
        return Err(LocalImportError::MissingSource(source_dir.to_path_buf()));
    }

    let expected = variant.expected_file_names();
    let missing: Vec<&str> = expected
        .iter()
        .filter(|name| !source_dir.join(name.as_str()).is_file())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(LocalImportError::MissingFiles(missing.join(", ")));
    }

    fs::create_dir_all(destination)?;
    let mut copied = Vec::with_capacity(expected.len());
    for name in &expected {
        let target = destination.join(name);
        fs::copy(source_dir.join(name), &target)?;
        info!("copied {name}");
        copied.push(target);
    }
    Ok(copied)
}
