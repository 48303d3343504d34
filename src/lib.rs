//! Environment provisioner for the Chatterbox TTS model family.
//!
//! Detects the host's compute backend, resolves a deterministic dependency
//! plan for it, builds an isolated python environment, and fetches the
//! chosen model variant's asset files with resume and integrity checking.

pub mod assets;
pub mod hardware;
pub mod plan;
pub mod provision;
pub mod venv;

pub use assets::ModelVariant;
pub use provision::{
    CancelFlag, Orchestrator, ProgressEvent, ProgressReporter, ProvisionOptions, ProvisionStatus,
    ProvisioningResult,
};
