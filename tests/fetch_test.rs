//! Asset fetcher tests
//!
//! Exercise resume, idempotency, integrity, and the disk-space precondition
//! through an in-memory transport that records every request.

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chatterbox_provision::assets::{
    AssetFetcher, AssetFile, AssetTransport, DiskProbe, Download, FetchError, FetchStatus,
    FileFailureKind, TransportError,
};
use chatterbox_provision::provision::{CancelFlag, ProgressReporter};

const PAYLOAD: &[u8] = b"chatterbox model checkpoint bytes";

struct FixedDisk(Option<u64>);

impl DiskProbe for FixedDisk {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

/// In-memory asset host. Records requested offsets and can be told to
/// ignore range requests or to drop the first connection mid-body.
struct MemTransport {
    payload: Vec<u8>,
    honor_range: bool,
    interrupt_first_call_after: Option<usize>,
    offsets: Mutex<Vec<u64>>,
}

impl MemTransport {
    fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            honor_range: true,
            interrupt_first_call_after: None,
            offsets: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }

    fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

struct InterruptedReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for InterruptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let limit = buf.len().min(self.remaining);
        let read = self.inner.read(&mut buf[..limit])?;
        self.remaining -= read;
        Ok(read)
    }
}

impl AssetTransport for MemTransport {
    fn open(&self, _url: &str, offset: u64) -> Result<Download, TransportError> {
        let call_index = {
            let mut offsets = self.offsets.lock().unwrap();
            offsets.push(offset);
            offsets.len() - 1
        };

        let resumed_from = if self.honor_range { offset } else { 0 };
        let body = self.payload[resumed_from as usize..].to_vec();
        let total_len = Some(self.payload.len() as u64);

        let reader: Box<dyn Read> = match self.interrupt_first_call_after {
            Some(after) if call_index == 0 => Box::new(InterruptedReader {
                inner: Cursor::new(body),
                remaining: after,
            }),
            _ => Box::new(Cursor::new(body)),
        };

        Ok(Download {
            reader,
            resumed_from,
            total_len,
        })
    }
}

fn asset_file(checksum: Option<&str>) -> AssetFile {
    AssetFile {
        relative_path: "model.bin".to_string(),
        remote_url: "https://assets.example/model.bin".to_string(),
        expected_checksum: checksum.map(str::to_string),
    }
}

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("chatterbox-fetch-{label}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn fetch_with(
    transport: &MemTransport,
    disk: &FixedDisk,
    files: &[AssetFile],
    destination: &Path,
) -> Result<chatterbox_provision::assets::FetchOutcome, FetchError> {
    let reporter = ProgressReporter::disabled();
    let cancel = CancelFlag::new();
    AssetFetcher::new(transport, disk, &reporter, &cancel)
        .with_retry_backoff(Duration::ZERO)
        .fetch_files(files, PAYLOAD.len() as u64, destination)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let path = std::env::temp_dir().join(format!("chatterbox-fetch-hash-{}", std::process::id()));
    fs::write(&path, bytes).unwrap();
    let hash = chatterbox_provision::assets::compute_sha256(&path).unwrap();
    let _ = fs::remove_file(&path);
    hash
}

#[test]
fn fresh_fetch_downloads_from_offset_zero() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("fresh");

    let outcome = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Complete);
    assert_eq!(transport.offsets(), vec![0]);
    assert_eq!(fs::read(dest.join("model.bin")).unwrap(), PAYLOAD);
    assert!(!dest.join("model.bin.partial").exists());
}

#[test]
fn partial_file_resumes_from_its_byte_offset() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("resume");
    fs::write(dest.join("model.bin.partial"), &PAYLOAD[..5]).unwrap();

    let outcome = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Complete);
    assert_eq!(transport.offsets(), vec![5]);
    assert_eq!(fs::read(dest.join("model.bin")).unwrap(), PAYLOAD);
}

#[test]
fn server_ignoring_range_restarts_the_file() {
    let mut transport = MemTransport::new(PAYLOAD);
    transport.honor_range = false;
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("no-range");
    fs::write(dest.join("model.bin.partial"), &PAYLOAD[..5]).unwrap();

    let outcome = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Complete);
    // The range was requested, the server ignored it, and the result must
    // still be byte-exact.
    assert_eq!(transport.offsets(), vec![5]);
    assert_eq!(fs::read(dest.join("model.bin")).unwrap(), PAYLOAD);
}

#[test]
fn second_fetch_makes_zero_network_requests() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("idempotent");

    let first = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();
    assert_eq!(first.status, FetchStatus::Complete);
    let requests_after_first = transport.request_count();

    let second = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();

    assert_eq!(second.status, FetchStatus::Complete);
    assert_eq!(transport.request_count(), requests_after_first);
    assert_eq!(second.skipped.len(), 1);
    assert!(second.fetched.is_empty());
}

#[test]
fn insufficient_space_fails_before_any_network_call() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(2_000_000_000));
    let dest = scratch_dir("space");

    let error = {
        let reporter = ProgressReporter::disabled();
        let cancel = CancelFlag::new();
        AssetFetcher::new(&transport, &disk, &reporter, &cancel)
            .fetch_files(&[asset_file(None)], 9_060_000_000, &dest)
            .unwrap_err()
    };

    match error {
        FetchError::InsufficientSpace {
            needed_bytes,
            available_bytes,
        } => {
            // 10% margin on top of the variant size.
            assert_eq!(needed_bytes, 9_966_000_000);
            assert_eq!(available_bytes, 2_000_000_000);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.request_count(), 0);
}

#[test]
fn interrupted_transfer_resumes_not_restarts() {
    let mut transport = MemTransport::new(PAYLOAD);
    transport.interrupt_first_call_after = Some(4);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("interrupt");

    let outcome = fetch_with(&transport, &disk, &[asset_file(None)], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Complete);
    assert_eq!(transport.offsets(), vec![0, 4]);
    assert_eq!(fs::read(dest.join("model.bin")).unwrap(), PAYLOAD);
}

#[test]
fn checksum_mismatch_redownloads_once_then_fails() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("integrity");
    let file = asset_file(Some("0000000000000000000000000000000000000000000000000000000000000000"));

    let outcome = fetch_with(&transport, &disk, &[file], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Failed);
    let failure = outcome.failed.expect("failure recorded");
    assert_eq!(failure.kind, FileFailureKind::Integrity);
    // One original download plus exactly one scratch re-download.
    assert_eq!(transport.request_count(), 2);
    assert!(!dest.join("model.bin").exists());
}

#[test]
fn matching_checksum_passes_and_is_skipped_next_run() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("checksum-ok");
    let file = asset_file(Some(&sha256_hex(PAYLOAD)));

    let first = fetch_with(&transport, &disk, std::slice::from_ref(&file), &dest).unwrap();
    assert_eq!(first.status, FetchStatus::Complete);

    let second = fetch_with(&transport, &disk, &[file], &dest).unwrap();
    assert_eq!(second.status, FetchStatus::Complete);
    assert_eq!(second.skipped.len(), 1);
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn failed_file_aborts_the_remaining_list() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("fail-fast");
    let bad = AssetFile {
        relative_path: "first.bin".to_string(),
        remote_url: "https://assets.example/first.bin".to_string(),
        expected_checksum: Some("not-a-real-checksum".to_string()),
    };
    let never_fetched = AssetFile {
        relative_path: "second.bin".to_string(),
        remote_url: "https://assets.example/second.bin".to_string(),
        expected_checksum: None,
    };

    let outcome = fetch_with(&transport, &disk, &[bad, never_fetched], &dest).unwrap();

    assert_eq!(outcome.status, FetchStatus::Failed);
    assert_eq!(outcome.failed.unwrap().relative_path, "first.bin");
    assert!(!dest.join("second.bin").exists());
    // Two attempts for the first file, none for the second.
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn cancellation_stops_between_files() {
    let transport = MemTransport::new(PAYLOAD);
    let disk = FixedDisk(Some(u64::MAX));
    let dest = scratch_dir("cancel");
    let reporter = ProgressReporter::disabled();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = AssetFetcher::new(&transport, &disk, &reporter, &cancel)
        .fetch_files(&[asset_file(None)], PAYLOAD.len() as u64, &dest)
        .unwrap();

    assert_eq!(outcome.status, FetchStatus::Cancelled);
    assert_eq!(transport.request_count(), 0);
}
