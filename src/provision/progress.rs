use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use crate::hardware::HardwareProfile;
use crate::plan::PlanAdvisory;

/// Discrete pipeline notifications consumed by the external GUI/CLI. The
/// pipeline itself renders nothing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum ProgressEvent {
    DetectionCompleted {
        profile: HardwareProfile,
    },
    PlanResolved {
        actions: usize,
        advisories: Vec<PlanAdvisory>,
    },
    EnvironmentCreated {
        path: PathBuf,
    },
    ActionStarted {
        name: String,
    },
    ActionCompleted {
        name: String,
    },
    ActionFailed {
        name: String,
        required: bool,
        reason: String,
    },
    FileStarted {
        relative_path: String,
        resumed_from: u64,
    },
    FileProgress {
        relative_path: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    FileCompleted {
        relative_path: String,
    },
    FileSkipped {
        relative_path: String,
    },
}

/// Fan-out handle for [`ProgressEvent`]s. A disconnected or absent consumer
/// never stalls the pipeline.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Reporter paired with a receiver for a consumer to drain.
    #[must_use]
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Reporter that drops every event; for headless library use and tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
