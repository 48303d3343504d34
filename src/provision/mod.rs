mod cancel;
mod orchestrator;
mod progress;

pub use cancel::CancelFlag;
pub use orchestrator::{
    Orchestrator, ProvisionError, ProvisionOptions, ProvisionStatus, ProvisioningResult,
};
pub use progress::{ProgressEvent, ProgressReporter};
