mod checksum;
mod fetch;
mod local;
mod manifest;
mod transport;
mod variant;

pub use checksum::compute_sha256;
pub use fetch::{
    AssetFetcher, DiskProbe, FetchError, FetchOutcome, FetchStatus, FileFailure, FileFailureKind,
    SysDiskProbe,
};
pub use local::{import_local, LocalImportError};
pub use manifest::FetchManifest;
pub use transport::{AssetTransport, Download, HttpTransport, TransportError};
pub use variant::{AssetFile, ModelVariant};
