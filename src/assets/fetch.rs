use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use sysinfo::Disks;
use thiserror::Error;
use tracing::{info, warn};

use crate::provision::{CancelFlag, ProgressEvent, ProgressReporter};

use super::checksum::compute_sha256;
use super::manifest::FetchManifest;
use super::transport::{AssetTransport, TransportError};
use super::variant::{AssetFile, ModelVariant};

const MAX_FILE_RETRIES: u32 = 3;
const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(
        "not enough disk space: need {}, have {}",
        format_gb(*needed_bytes),
        format_gb(*available_bytes)
    )]
    InsufficientSpace {
        needed_bytes: u64,
        available_bytes: u64,
    },
    #[error("fetch manifest: {0}")]
    Manifest(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Free-space lookup for a destination path. Trait seam so the
/// insufficient-space precondition is testable on any machine.
pub trait DiskProbe {
    /// `None` when no mount covering `path` could be identified.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

pub struct SysDiskProbe;

impl DiskProbe for SysDiskProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStatus {
    Complete,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FileFailureKind {
    Network,
    Integrity,
    Io,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub relative_path: String,
    pub kind: FileFailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub status: FetchStatus,
    /// Files written this run, in completion order.
    pub fetched: Vec<PathBuf>,
    /// Files already present and verified; no network request was made.
    pub skipped: Vec<PathBuf>,
    pub failed: Option<FileFailure>,
}

impl FetchOutcome {
    /// Paths of every asset accounted for, fetched or skipped.
    #[must_use]
    pub fn model_paths(&self) -> Vec<PathBuf> {
        self.fetched
            .iter()
            .chain(self.skipped.iter())
            .cloned()
            .collect()
    }
}

enum FileDisposition {
    Fetched(PathBuf),
    Skipped(PathBuf),
}

enum StreamError {
    Transport(TransportError),
    /// Read error mid-body; the connection dropped, resume is worth trying.
    Body(std::io::Error),
    /// Local write error; retrying will not help.
    Disk(std::io::Error),
}

impl StreamError {
    fn is_transient(&self) -> bool {
        match self {
            StreamError::Transport(err) => err.is_transient(),
            StreamError::Body(_) => true,
            StreamError::Disk(_) => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            StreamError::Transport(err) => err.to_string(),
            StreamError::Body(err) => format!("connection interrupted: {err}"),
            StreamError::Disk(err) => format!("write failed: {err}"),
        }
    }

    fn kind(&self) -> FileFailureKind {
        match self {
            StreamError::Transport(_) | StreamError::Body(_) => FileFailureKind::Network,
            StreamError::Disk(_) => FileFailureKind::Io,
        }
    }
}

/// Downloads a variant's asset files sequentially, resuming partial
/// transfers and skipping files a previous run already verified.
pub struct AssetFetcher<'a> {
    transport: &'a dyn AssetTransport,
    disk: &'a dyn DiskProbe,
    reporter: &'a ProgressReporter,
    cancel: &'a CancelFlag,
    retry_backoff: Duration,
}

impl<'a> AssetFetcher<'a> {
    pub fn new(
        transport: &'a dyn AssetTransport,
        disk: &'a dyn DiskProbe,
        reporter: &'a ProgressReporter,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            transport,
            disk,
            reporter,
            cancel,
            retry_backoff: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn fetch(
        &self,
        variant: ModelVariant,
        destination: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_files(
            &variant.asset_files(),
            variant.expected_size_bytes(),
            destination,
        )
    }

    /// Core fetch loop. The disk-space precondition runs before any network
    /// activity; a failed file aborts the remaining list.
    pub fn fetch_files(
        &self,
        files: &[AssetFile],
        expected_total_bytes: u64,
        destination: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        fs::create_dir_all(destination)?;

        // 10% margin for temp files alongside the assets themselves.
        let needed_bytes = expected_total_bytes + expected_total_bytes / 10;
        match self.disk.available_bytes(destination) {
            Some(available_bytes) if available_bytes < needed_bytes => {
                return Err(FetchError::InsufficientSpace {
                    needed_bytes,
                    available_bytes,
                });
            }
            Some(_) => {}
            None => warn!(
                "could not determine free space for {}; continuing",
                destination.display()
            ),
        }

        let mut manifest =
            FetchManifest::load(destination).map_err(|err| FetchError::Manifest(err.to_string()))?;

        let mut outcome = FetchOutcome {
            status: FetchStatus::Complete,
            fetched: Vec::new(),
            skipped: Vec::new(),
            failed: None,
        };

        for file in files {
            if self.cancel.is_cancelled() {
                info!("fetch cancelled before {}", file.relative_path);
                outcome.status = FetchStatus::Cancelled;
                break;
            }
            match self.process_file(file, destination, &mut manifest) {
                Ok(FileDisposition::Fetched(path)) => outcome.fetched.push(path),
                Ok(FileDisposition::Skipped(path)) => outcome.skipped.push(path),
                Err(failure) => {
                    // Remaining files are interdependent with this one; a
                    // partial asset set is not independently useful.
                    outcome.status = FetchStatus::Failed;
                    outcome.failed = Some(failure);
                    break;
                }
            }
        }

        Ok(outcome)
    }

    fn process_file(
        &self,
        file: &AssetFile,
        destination: &Path,
        manifest: &mut FetchManifest,
    ) -> Result<FileDisposition, FileFailure> {
        let final_path = destination.join(&file.relative_path);

        if final_path.exists() {
            if let Some(disposition) = self.check_existing(file, &final_path, manifest) {
                return Ok(disposition);
            }
        }

        let staging = staging_path(&final_path);
        self.download_with_resume(file, &staging)?;

        let mut checksum = None;
        if let Some(expected) = &file.expected_checksum {
            let actual = hash_or_failure(file, &staging)?;
            if &actual != expected {
                warn!(
                    "{}: checksum mismatch, re-downloading from scratch",
                    file.relative_path
                );
                let _ = fs::remove_file(&staging);
                self.download_with_resume(file, &staging)?;
                let actual = hash_or_failure(file, &staging)?;
                if &actual != expected {
                    let _ = fs::remove_file(&staging);
                    return Err(FileFailure {
                        relative_path: file.relative_path.clone(),
                        kind: FileFailureKind::Integrity,
                        reason: format!("expected checksum {expected}, got {actual}"),
                    });
                }
                checksum = Some(actual);
            } else {
                checksum = Some(actual);
            }
        }

        let size = fs::metadata(&staging).map(|meta| meta.len()).unwrap_or(0);
        fs::rename(&staging, &final_path).map_err(|err| FileFailure {
            relative_path: file.relative_path.clone(),
            kind: FileFailureKind::Io,
            reason: format!("move into place failed: {err}"),
        })?;

        manifest.record(&file.relative_path, size, checksum);
        if let Err(error) = manifest.save() {
            warn!("failed to persist fetch manifest: {error:?}");
        }

        self.reporter.emit(ProgressEvent::FileCompleted {
            relative_path: file.relative_path.clone(),
        });
        Ok(FileDisposition::Fetched(final_path))
    }

    /// Decides whether an already-present file can be kept as-is.
    fn check_existing(
        &self,
        file: &AssetFile,
        final_path: &Path,
        manifest: &mut FetchManifest,
    ) -> Option<FileDisposition> {
        let size = fs::metadata(final_path).map(|meta| meta.len()).unwrap_or(0);
        if size == 0 {
            return None;
        }

        if manifest.is_verified(&file.relative_path, size) {
            self.emit_skipped(file);
            return Some(FileDisposition::Skipped(final_path.to_path_buf()));
        }

        match &file.expected_checksum {
            Some(expected) => match compute_sha256(final_path) {
                Ok(actual) if &actual == expected => {
                    manifest.record(&file.relative_path, size, Some(actual));
                    let _ = manifest.save();
                    self.emit_skipped(file);
                    Some(FileDisposition::Skipped(final_path.to_path_buf()))
                }
                _ => {
                    // Stale or corrupt copy; re-download it.
                    let _ = fs::remove_file(final_path);
                    None
                }
            },
            None => {
                manifest.record(&file.relative_path, size, None);
                let _ = manifest.save();
                self.emit_skipped(file);
                Some(FileDisposition::Skipped(final_path.to_path_buf()))
            }
        }
    }

    fn emit_skipped(&self, file: &AssetFile) {
        info!("{} already present, skipping", file.relative_path);
        self.reporter.emit(ProgressEvent::FileSkipped {
            relative_path: file.relative_path.clone(),
        });
    }

    /// Interrupted transfers resume from the staged byte offset, with
    /// linearly increasing backoff between attempts.
    fn download_with_resume(&self, file: &AssetFile, staging: &Path) -> Result<(), FileFailure> {
        let mut attempts = 0u32;
        loop {
            let offset = fs::metadata(staging).map(|meta| meta.len()).unwrap_or(0);
            match self.stream_once(file, staging, offset) {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() && attempts < MAX_FILE_RETRIES => {
                    attempts += 1;
                    warn!(
                        "{}: {} (retry {attempts}/{MAX_FILE_RETRIES})",
                        file.relative_path,
                        error.describe()
                    );
                    thread::sleep(self.retry_backoff * attempts);
                }
                Err(error) => {
                    return Err(FileFailure {
                        relative_path: file.relative_path.clone(),
                        kind: error.kind(),
                        reason: error.describe(),
                    });
                }
            }
        }
    }

    fn stream_once(
        &self,
        file: &AssetFile,
        staging: &Path,
        offset: u64,
    ) -> Result<(), StreamError> {
        let download = self
            .transport
            .open(&file.remote_url, offset)
            .map_err(StreamError::Transport)?;

        self.reporter.emit(ProgressEvent::FileStarted {
            relative_path: file.relative_path.clone(),
            resumed_from: download.resumed_from,
        });

        // A server that refused the range restarted the body; truncate.
        let mut out = if download.resumed_from > 0 {
            OpenOptions::new()
                .append(true)
                .open(staging)
                .map_err(StreamError::Disk)?
        } else {
            File::create(staging).map_err(StreamError::Disk)?
        };

        let mut reader = download.reader;
        let mut downloaded = download.resumed_from;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buffer).map_err(StreamError::Body)?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read]).map_err(StreamError::Disk)?;
            downloaded += read as u64;
            self.reporter.emit(ProgressEvent::FileProgress {
                relative_path: file.relative_path.clone(),
                bytes_downloaded: downloaded,
                total_bytes: download.total_len,
            });
        }
        Ok(())
    }
}

fn hash_or_failure(file: &AssetFile, path: &Path) -> Result<String, FileFailure> {
    compute_sha256(path).map_err(|err| FileFailure {
        relative_path: file.relative_path.clone(),
        kind: FileFailureKind::Io,
        reason: format!("hashing failed: {err}"),
    })
}

fn staging_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".into());
    name.push_str(".partial");
    final_path.with_file_name(name)
}

pub(crate) fn format_gb(bytes: u64) -> String {
    format!("{:.2}GB", bytes as f64 / 1e9)
}
