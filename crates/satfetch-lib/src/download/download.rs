use super::partial::{PartialState, inspect_partial, partial_path, remove_if_exists};
use super::types::{DownloadOptions, DownloadOutcome, FailureReason, SkipReason};
use crate::catalog::Item;
use crate::transport::{
    ByteRange, Transport, TransportError, TransportRequest,
};
use crate::verification::content_digest_hasher::{VerificationError, verify_file};
use futures::StreamExt;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Transfers single items into `<destination>/<filename>`, resuming from
/// `<filename>.incomplete` when a previous attempt left one behind.
pub struct Downloader {
    transport: Arc<dyn Transport>,
    verify_checksum: bool,
    file_extension: String,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>, options: &DownloadOptions) -> Self {
        Self {
            transport,
            verify_checksum: options.verify_checksum,
            file_extension: options.file_extension.clone(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn final_path(&self, item: &Item, destination: &Path) -> PathBuf {
        destination.join(item.filename(&self.file_extension))
    }

    pub async fn download(
        &self,
        item: &Item,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let final_path = self.final_path(item, destination);
        self.download_to(item, &final_path, cancel).await
    }

    /// Like [`Downloader::download`] with an explicit final path.
    pub async fn download_to(
        &self,
        item: &Item,
        final_path: &Path,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, final_path) else {
            tracing::debug!(id = %item.id, path = %final_path.display(), "Download already in progress");
            return DownloadOutcome::Skipped(SkipReason::AlreadyInProgress);
        };

        match self.transfer(item, final_path, cancel).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                tracing::debug!(id = %item.id, path = %final_path.display(), %reason, "Download failed");
                DownloadOutcome::Failed(reason)
            }
        }
    }

    async fn transfer(
        &self,
        item: &Item,
        final_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, FailureReason> {
        if tokio::fs::try_exists(final_path).await.map_err(io_failure)? {
            tracing::debug!(id = %item.id, path = %final_path.display(), "File already exists, skipping download");
            return Ok(succeeded(final_path, 0));
        }
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_failure)?;
        }

        let partial = partial_path(final_path);
        let offset = match inspect_partial(&partial, item.size).await.map_err(io_failure)? {
            PartialState::Fresh => 0,
            PartialState::Resume { offset } => offset,
            PartialState::Oversized { len } => {
                warn!(id = %item.id, path = %partial.display(), len, expected = item.size, "Partial file is larger than the product, deleting");
                remove_if_exists(&partial).await.map_err(io_failure)?;
                0
            }
            PartialState::Complete => match self.verify(item, &partial).await {
                Ok(()) => {
                    finalize(&partial, final_path).await?;
                    info!(id = %item.id, path = %final_path.display(), "Completed partial file verified");
                    return Ok(succeeded(final_path, 0));
                }
                Err(FailureReason::InvalidChecksum { .. }) => {
                    warn!(id = %item.id, path = %partial.display(), "Complete partial file has the wrong checksum, downloading again");
                    remove_if_exists(&partial).await.map_err(io_failure)?;
                    0
                }
                Err(other) => return Err(other),
            },
        };

        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let mut request = TransportRequest::get(&item.download_url);
        if offset > 0 {
            request = request.with_range(ByteRange::from_offset(offset));
        }
        info!(
            id = %item.id,
            path = %final_path.display(),
            offset,
            size = item.size,
            expected_digest = item.checksum.digest_hex(),
            "Downloading"
        );
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FailureReason::Cancelled),
            response = self.transport.send(request) => response.map_err(transport_failure)?,
        };

        let append = match response.status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => true,
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                if offset > 0 {
                    tracing::debug!(id = %item.id, offset, "Server ignored the range request, restarting from 0");
                }
                false
            }
            StatusCode::ACCEPTED => return Err(FailureReason::Offline),
            StatusCode::UNAUTHORIZED => return Err(FailureReason::Unauthorized),
            // 403 is a quota or flow limit, never a credentials problem; the cause tells them apart.
            status => {
                return Err(FailureReason::Http {
                    status: status.as_u16(),
                    cause: response.cause_message().map(str::to_string),
                });
            }
        };

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&partial)
            .await
            .map_err(io_failure)?;
        let mut writer = BufWriter::new(file);
        let mut written = if append { offset } else { 0 };
        let start = written;
        let mut body = response.body;

        while written < item.size {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    writer.flush().await.map_err(io_failure)?;
                    tracing::debug!(id = %item.id, written, "Download cancelled, keeping partial file");
                    return Err(FailureReason::Cancelled);
                }
                chunk = body.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    writer.flush().await.map_err(io_failure)?;
                    return Err(transport_failure(err));
                }
                None => break,
            };
            // Anything past the declared size is dropped.
            let remaining = item.size - written;
            let keep = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            writer.write_all(&chunk[..keep]).await.map_err(io_failure)?;
            written += keep as u64;
        }
        writer.flush().await.map_err(io_failure)?;
        drop(writer);

        if written < item.size {
            return Err(FailureReason::Network {
                reason: format!(
                    "connection closed after {written} of {} bytes",
                    item.size
                ),
            });
        }

        if let Err(reason) = self.verify(item, &partial).await {
            if matches!(reason, FailureReason::InvalidChecksum { .. }) {
                warn!(id = %item.id, path = %partial.display(), %reason, "Downloaded file failed verification, deleting");
                remove_if_exists(&partial).await.map_err(io_failure)?;
            }
            return Err(reason);
        }
        finalize(&partial, final_path).await?;
        info!(id = %item.id, path = %final_path.display(), "Downloaded and verified");
        Ok(succeeded(final_path, written - start))
    }

    async fn verify(&self, item: &Item, path: &Path) -> Result<(), FailureReason> {
        if !self.verify_checksum {
            return Ok(());
        }
        verify_file(path, &item.checksum)
            .await
            .map_err(|err| match err {
                VerificationError::VerificationFailed { expected, actual } => {
                    FailureReason::InvalidChecksum {
                        expected: hex::encode(expected),
                        actual: hex::encode(actual),
                    }
                }
                VerificationError::Io { source, .. } => io_failure(source),
            })
    }
}

struct InFlightGuard<'a> {
    registry: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(registry: &'a Mutex<HashSet<PathBuf>>, path: &Path) -> Option<Self> {
        let inserted = registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf());
        inserted.then(|| Self {
            registry,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.path);
    }
}

fn succeeded(path: &Path, bytes_written: u64) -> DownloadOutcome {
    DownloadOutcome::Succeeded {
        path: path.to_path_buf(),
        bytes_written,
    }
}

async fn finalize(partial: &Path, final_path: &Path) -> Result<(), FailureReason> {
    tokio::fs::rename(partial, final_path)
        .await
        .map_err(io_failure)
}

fn io_failure(err: std::io::Error) -> FailureReason {
    match err.kind() {
        ErrorKind::StorageFull => FailureReason::InsufficientSpace,
        _ => FailureReason::Io(err.to_string()),
    }
}

fn transport_failure(err: TransportError) -> FailureReason {
    match err {
        TransportError::InvalidRequest { .. } => FailureReason::Metadata(err.to_string()),
        err => FailureReason::Network {
            reason: err.to_string(),
        },
    }
}
