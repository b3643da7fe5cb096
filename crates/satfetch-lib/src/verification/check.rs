use super::content_digest_hasher::{VerificationError, verify_file};
use crate::catalog::{Catalog, Item, ItemId};
use eyre::{Result, WrapErr};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileProblem {
    Missing,
    SizeMismatch { expected: u64, actual: u64 },
    ChecksumMismatch { expected: String, actual: String },
}

impl std::fmt::Display for FileProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileProblem::Missing => write!(f, "missing"),
            FileProblem::SizeMismatch { expected, actual } => {
                write!(f, "size is {actual} bytes, expected {expected}")
            }
            FileProblem::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum is {actual}, expected {expected}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorruptFile {
    pub path: PathBuf,
    pub item: Item,
    pub problem: FileProblem,
}

/// Compares the size and checksum of `<directory>/<filename>` for every id with the catalog's
/// metadata. Corrupt files are removed when `delete` is set; missing ones are only reported.
pub async fn check_files(
    catalog: &Catalog,
    ids: &[ItemId],
    directory: &Path,
    file_extension: &str,
    delete: bool,
) -> Result<Vec<CorruptFile>> {
    let mut corrupt = Vec::new();

    for id in ids {
        let item = catalog
            .resolve(id)
            .await
            .wrap_err_with(|| format!("Failed to fetch metadata for {id}"))?;
        let path = directory.join(item.filename(file_extension));
        tracing::debug!(id = %id, path = %path.display(), "Checking");

        let Some(problem) = inspect_file(&path, &item).await? else {
            continue;
        };
        tracing::info!(id = %id, path = %path.display(), %problem, "Corrupt product file");

        if delete && problem != FileProblem::Missing {
            tokio::fs::remove_file(&path)
                .await
                .wrap_err_with(|| format!("Failed to delete corrupt file: {}", path.display()))?;
            tracing::info!(path = %path.display(), "Deleted corrupt file");
        }
        corrupt.push(CorruptFile {
            path,
            item,
            problem,
        });
    }

    Ok(corrupt)
}

async fn inspect_file(path: &Path, item: &Item) -> Result<Option<FileProblem>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Some(FileProblem::Missing)),
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("Failed to stat {}", path.display()));
        }
    };
    if metadata.len() != item.size {
        return Ok(Some(FileProblem::SizeMismatch {
            expected: item.size,
            actual: metadata.len(),
        }));
    }

    match verify_file(path, &item.checksum).await {
        Ok(()) => Ok(None),
        Err(VerificationError::VerificationFailed { expected, actual }) => {
            Ok(Some(FileProblem::ChecksumMismatch {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            }))
        }
        Err(err) => Err(err).wrap_err_with(|| format!("Failed to verify {}", path.display())),
    }
}
