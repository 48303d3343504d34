use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::hardware::OsKind;
use crate::plan::{DependencyPlan, InstallAction};
use crate::provision::{CancelFlag, ProgressEvent, ProgressReporter};

use super::runner::CommandRunner;

const INSTALL_RETRIES: u32 = 2;
const DIAGNOSTIC_LIMIT: usize = 2000;

/// Packages whose import must succeed for the install to count as healthy.
const CRITICAL_IMPORTS: [&str; 13] = [
    "torch",
    "torchaudio",
    "librosa",
    "safetensors",
    "transformers",
    "diffusers",
    "conformer",
    "s3tokenizer",
    "resemble_perth",
    "einops",
    "huggingface_hub",
    "soundfile",
    "audioread",
];

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("target directory {0} already exists and is not empty (pass overwrite to replace it)")]
    TargetNotEmpty(PathBuf),
    #[error("no usable python interpreter found on PATH")]
    MissingInterpreter,
    #[error("failed to create virtual environment: {0}")]
    Creation(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailure {
    pub name: String,
    pub required: bool,
    pub diagnostic: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub env_path: PathBuf,
    pub completed: Vec<String>,
    /// Non-required actions (and post-install import checks) that failed.
    pub warnings: Vec<ActionFailure>,
    /// The required action that aborted the build, if any.
    pub failed: Option<ActionFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub overwrite: bool,
}

struct VenvPaths {
    python: PathBuf,
    pip: PathBuf,
}

fn venv_paths(target: &Path, os: OsKind) -> VenvPaths {
    match os {
        OsKind::Windows => VenvPaths {
            python: target.join("Scripts").join("python.exe"),
            pip: target.join("Scripts").join("pip.exe"),
        },
        OsKind::Linux => VenvPaths {
            python: target.join("bin").join("python"),
            pip: target.join("bin").join("pip"),
        },
    }
}

/// Creates an isolated python environment and applies a dependency plan's
/// install actions strictly in order; installers conflict when run
/// concurrently against the same environment, so nothing is parallel here.
pub struct EnvironmentBuilder<'a> {
    runner: &'a dyn CommandRunner,
    reporter: &'a ProgressReporter,
    cancel: &'a CancelFlag,
    retry_backoff: Duration,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        reporter: &'a ProgressReporter,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            runner,
            reporter,
            cancel,
            retry_backoff: Duration::from_secs(3),
        }
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn build(
        &self,
        plan: &DependencyPlan,
        target: &Path,
        os: OsKind,
        options: &BuildOptions,
    ) -> Result<BuildOutcome, EnvError> {
        self.prepare_target(target, options)?;
        let paths = self.create_venv(target, os)?;
        self.ensure_pip(&paths);

        let mut outcome = BuildOutcome {
            status: BuildStatus::Success,
            env_path: target.to_path_buf(),
            completed: Vec::new(),
            warnings: Vec::new(),
            failed: None,
            cancelled: false,
        };

        for action in &plan.actions {
            if self.cancel.is_cancelled() {
                info!("build cancelled before {}", action.name);
                outcome.status = BuildStatus::Failure;
                outcome.cancelled = true;
                return Ok(outcome);
            }

            self.reporter.emit(ProgressEvent::ActionStarted {
                name: action.name.clone(),
            });
            match self.run_action(&paths, action) {
                Ok(()) => {
                    outcome.completed.push(action.name.clone());
                    self.reporter.emit(ProgressEvent::ActionCompleted {
                        name: action.name.clone(),
                    });
                }
                Err(diagnostic) => {
                    let failure = ActionFailure {
                        name: action.name.clone(),
                        required: action.required,
                        diagnostic,
                    };
                    self.reporter.emit(ProgressEvent::ActionFailed {
                        name: failure.name.clone(),
                        required: failure.required,
                        reason: failure.diagnostic.clone(),
                    });
                    if action.required {
                        // No rollback: the environment stays in place for
                        // inspection; retry-from-scratch is the caller's call.
                        outcome.status = BuildStatus::Failure;
                        outcome.failed = Some(failure);
                        return Ok(outcome);
                    }
                    warn!("optional action {} failed, continuing", action.name);
                    outcome.warnings.push(failure);
                }
            }
        }

        self.verify_imports(&paths, &mut outcome);
        Ok(outcome)
    }

    fn prepare_target(&self, target: &Path, options: &BuildOptions) -> Result<(), EnvError> {
        if target.exists() {
            let occupied = fs::read_dir(target)?.next().is_some();
            if occupied && !options.overwrite {
                return Err(EnvError::TargetNotEmpty(target.to_path_buf()));
            }
            if occupied {
                info!("removing existing environment at {}", target.display());
                fs::remove_dir_all(target)?;
            }
        }
        Ok(())
    }

    fn create_venv(&self, target: &Path, os: OsKind) -> Result<VenvPaths, EnvError> {
        let target_arg = target.to_string_lossy().into_owned();
        let args = vec!["-m".to_string(), "venv".to_string(), target_arg];

        let mut last_failure = None;
        for candidate in ["python3", "python"] {
            match self.runner.run(Path::new(candidate), &args) {
                Ok(output) if output.success => {
                    info!("virtual environment created at {}", target.display());
                    self.reporter.emit(ProgressEvent::EnvironmentCreated {
                        path: target.to_path_buf(),
                    });
                    return Ok(venv_paths(target, os));
                }
                Ok(output) => last_failure = Some(output.diagnostic().to_string()),
                Err(_) => continue,
            }
        }
        match last_failure {
            Some(diagnostic) => Err(EnvError::Creation(trim_diagnostic(&diagnostic))),
            None => Err(EnvError::MissingInterpreter),
        }
    }

    fn ensure_pip(&self, paths: &VenvPaths) {
        if paths.pip.exists() {
            return;
        }
        let args = vec![
            "-m".to_string(),
            "ensurepip".to_string(),
            "--upgrade".to_string(),
        ];
        if let Err(error) = self.runner.run(&paths.python, &args) {
            warn!("ensurepip failed: {error}");
        }
    }

    /// Executes one install action, retrying transient network failures up
    /// to [`INSTALL_RETRIES`] extra times with a fixed backoff.
    fn run_action(&self, paths: &VenvPaths, action: &InstallAction) -> Result<(), String> {
        let (program, mut args) = if paths.pip.exists() {
            (paths.pip.clone(), vec!["install".to_string()])
        } else {
            (
                paths.python.clone(),
                vec!["-m".to_string(), "pip".to_string(), "install".to_string()],
            )
        };
        args.push("--upgrade".to_string());
        args.push(action.target.clone());
        args.extend(action.extra_args.iter().cloned());

        let mut attempt = 0u32;
        loop {
            match self.runner.run(&program, &args) {
                Ok(output) if output.success => return Ok(()),
                Ok(output) => {
                    let diagnostic = trim_diagnostic(output.diagnostic());
                    if is_transient_failure(&diagnostic) && attempt < INSTALL_RETRIES {
                        attempt += 1;
                        warn!(
                            "{}: network failure, retry {attempt}/{INSTALL_RETRIES}",
                            action.name
                        );
                        thread::sleep(self.retry_backoff);
                        continue;
                    }
                    return Err(diagnostic);
                }
                Err(error) => return Err(format!("failed to invoke installer: {error}")),
            }
        }
    }

    /// Post-install health check: every critical package must import inside
    /// the new environment. Failures are warnings, not fatal errors.
    fn verify_imports(&self, paths: &VenvPaths, outcome: &mut BuildOutcome) {
        for package in CRITICAL_IMPORTS {
            let args = vec!["-c".to_string(), format!("import {package}")];
            let ok = self
                .runner
                .run(&paths.python, &args)
                .map(|output| output.success)
                .unwrap_or(false);
            if !ok {
                warn!("verification failed: import {package}");
                outcome.warnings.push(ActionFailure {
                    name: format!("verify:{package}"),
                    required: false,
                    diagnostic: format!("package {package} is not importable"),
                });
            }
        }
    }
}

/// Installer output that signals a transient network condition, worth a
/// retry with the same arguments.
fn is_transient_failure(diagnostic: &str) -> bool {
    const PATTERNS: [&str; 6] = [
        "connection",
        "timed out",
        "temporary failure",
        "temporarily unavailable",
        "network is unreachable",
        "proxy",
    ];
    let lower = diagnostic.to_ascii_lowercase();
    PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn trim_diagnostic(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= DIAGNOSTIC_LIMIT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - DIAGNOSTIC_LIMIT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
