use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::assets::{
    import_local, AssetFetcher, AssetTransport, DiskProbe, FetchError, FetchStatus, HttpTransport,
    LocalImportError, ModelVariant, SysDiskProbe,
};
use crate::hardware::{self, DetectionError};
use crate::plan;
use crate::venv::{
    ActionFailure, BuildOptions, BuildStatus, CommandRunner, EnvError, EnvironmentBuilder,
    ProcessRunner,
};

use super::cancel::CancelFlag;
use super::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub target_dir: PathBuf,
    pub variant: ModelVariant,
    pub overwrite: bool,
    /// When set, model files are copied from this folder instead of
    /// downloaded.
    pub local_model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStatus {
    Success,
    PartialFailure,
    Failure,
}

impl ProvisionStatus {
    /// Process exit code for the scripted entry point.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            ProvisionStatus::Success => 0,
            ProvisionStatus::PartialFailure => 1,
            ProvisionStatus::Failure => 2,
        }
    }
}

/// Final report of one provisioning run, handed to the GUI/CLI for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningResult {
    pub status: ProvisionStatus,
    pub completed_actions: Vec<String>,
    pub failed_actions: Vec<ActionFailure>,
    pub environment_path: Option<PathBuf>,
    pub model_paths: Vec<PathBuf>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ProvisioningResult {
    fn failure(reason: String, cancelled: bool) -> Self {
        Self {
            status: ProvisionStatus::Failure,
            completed_actions: Vec::new(),
            failed_actions: Vec::new(),
            environment_path: None,
            model_paths: Vec::new(),
            cancelled,
            failure_reason: Some(reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Environment(#[from] EnvError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    LocalImport(#[from] LocalImportError),
    #[error("provisioning cancelled")]
    Cancelled,
}

/// Sequences detection, plan resolution, environment building, and asset
/// fetching for one exclusive target directory. The caller must not run two
/// provisioning runs against the same directory concurrently.
pub struct Orchestrator {
    reporter: ProgressReporter,
    cancel: CancelFlag,
    runner: Box<dyn CommandRunner>,
    transport: Box<dyn AssetTransport>,
    disk: Box<dyn DiskProbe>,
}

impl Orchestrator {
    pub fn new(reporter: ProgressReporter, cancel: CancelFlag) -> Result<Self> {
        Ok(Self {
            reporter,
            cancel,
            runner: Box::new(ProcessRunner),
            transport: Box::new(HttpTransport::new()?),
            disk: Box::new(SysDiskProbe),
        })
    }

    /// Constructor with every external effect injected; used by tests.
    pub fn with_components(
        reporter: ProgressReporter,
        cancel: CancelFlag,
        runner: Box<dyn CommandRunner>,
        transport: Box<dyn AssetTransport>,
        disk: Box<dyn DiskProbe>,
    ) -> Self {
        Self {
            reporter,
            cancel,
            runner,
            transport,
            disk,
        }
    }

    /// Single entry point for both the scripted and GUI surfaces. Never
    /// panics or returns a raw error; every outcome is a structured result.
    pub fn provision(&self, options: &ProvisionOptions) -> ProvisioningResult {
        match self.run(options) {
            Ok(result) => result,
            Err(err) => {
                let cancelled = matches!(err, ProvisionError::Cancelled);
                if cancelled {
                    info!("provisioning cancelled");
                } else {
                    error!("provisioning failed: {err}");
                }
                ProvisioningResult::failure(err.to_string(), cancelled)
            }
        }
    }

    fn run(&self, options: &ProvisionOptions) -> Result<ProvisioningResult, ProvisionError> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let profile = hardware::detect()?;
        self.reporter.emit(ProgressEvent::DetectionCompleted {
            profile: profile.clone(),
        });

        let plan = plan::resolve(&profile, options.variant);
        for advisory in &plan.advisories {
            warn!("plan advisory: {advisory:?}");
        }
        self.reporter.emit(ProgressEvent::PlanResolved {
            actions: plan.actions.len(),
            advisories: plan.advisories.clone(),
        });

        // Plan-level disk precondition: assets plus build artifacts.
        if let Some(available_bytes) = self.disk.available_bytes(probe_root(&options.target_dir))
        {
            if available_bytes < plan.required_free_bytes {
                return Err(FetchError::InsufficientSpace {
                    needed_bytes: plan.required_free_bytes,
                    available_bytes,
                }
                .into());
            }
        }

        let builder = EnvironmentBuilder::new(&*self.runner, &self.reporter, &self.cancel);
        let build = builder.build(
            &plan,
            &options.target_dir,
            profile.os,
            &BuildOptions {
                overwrite: options.overwrite,
            },
        )?;
        if build.cancelled {
            return Err(ProvisionError::Cancelled);
        }
        if build.status == BuildStatus::Failure {
            let reason = build
                .failed
                .as_ref()
                .map(|failure| format!("required action {} failed: {}", failure.name, failure.diagnostic))
                .unwrap_or_else(|| "environment build failed".into());
            let mut failed_actions = build.warnings.clone();
            failed_actions.extend(build.failed.clone());
            return Ok(ProvisioningResult {
                status: ProvisionStatus::Failure,
                completed_actions: build.completed,
                failed_actions,
                environment_path: Some(build.env_path),
                model_paths: Vec::new(),
                cancelled: false,
                failure_reason: Some(reason),
            });
        }

        let models_dir = options
            .target_dir
            .join("models")
            .join(options.variant.dir_name());
        let model_paths = match &options.local_model_dir {
            Some(source) => import_local(options.variant, source, &models_dir)?,
            None => {
                let fetcher =
                    AssetFetcher::new(&*self.transport, &*self.disk, &self.reporter, &self.cancel);
                let fetch = fetcher.fetch(options.variant, &models_dir)?;
                match fetch.status {
                    FetchStatus::Cancelled => return Err(ProvisionError::Cancelled),
                    FetchStatus::Failed => {
                        let reason = fetch
                            .failed
                            .as_ref()
                            .map(|failure| {
                                format!("asset {} failed: {}", failure.relative_path, failure.reason)
                            })
                            .unwrap_or_else(|| "asset fetch failed".into());
                        return Ok(ProvisioningResult {
                            status: ProvisionStatus::Failure,
                            completed_actions: build.completed,
                            failed_actions: build.warnings,
                            environment_path: Some(build.env_path),
                            model_paths: fetch.model_paths(),
                            cancelled: false,
                            failure_reason: Some(reason),
                        });
                    }
                    FetchStatus::Complete => fetch.model_paths(),
                }
            }
        };

        let clean = build.warnings.is_empty() && plan.advisories.is_empty();
        Ok(ProvisioningResult {
            status: if clean {
                ProvisionStatus::Success
            } else {
                ProvisionStatus::PartialFailure
            },
            completed_actions: build.completed,
            failed_actions: build.warnings,
            environment_path: Some(build.env_path),
            model_paths,
            cancelled: false,
            failure_reason: None,
        })
    }
}

/// Closest existing path to probe free space against: the target itself, or
/// its parent before the target is created.
fn probe_root(target: &Path) -> &Path {
    if target.exists() {
        target
    } else {
        target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."))
    }
}
