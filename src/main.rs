use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use tracing::metadata::LevelFilter;

use chatterbox_provision::{
    CancelFlag, ModelVariant, Orchestrator, ProgressEvent, ProgressReporter, ProvisionOptions,
    ProvisionStatus,
};

const DEFAULT_TARGET: &str = "Chatterbox_TTS";

/// Progress lines stay readable for multi-gigabyte files by reporting in
/// 256 MiB increments.
const PROGRESS_STRIDE: u64 = 256 * 1024 * 1024;

fn setup_logging() {
    let filter = std::env::var("CHATTERBOX_LOG")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(LevelFilter::INFO);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn usage() {
    eprintln!(
        "usage: chatterbox-provision [--target DIR] [--variant original|turbo] \
         [--overwrite] [--local-models DIR]"
    );
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<ProvisionOptions, String> {
    let mut options = ProvisionOptions {
        target_dir: PathBuf::from(DEFAULT_TARGET),
        variant: ModelVariant::Original,
        overwrite: false,
        local_model_dir: None,
    };

    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--target" => {
                options.target_dir =
                    PathBuf::from(args.next().ok_or("--target requires a directory")?);
            }
            "--variant" | "--model" => {
                options.variant = args.next().ok_or("--variant requires a value")?.parse()?;
            }
            "--overwrite" => options.overwrite = true,
            "--local-models" => {
                options.local_model_dir = Some(PathBuf::from(
                    args.next().ok_or("--local-models requires a directory")?,
                ));
            }
            "--help" | "-h" => return Err(String::new()),
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(options)
}

struct ProgressPrinter {
    last_reported: u64,
}

impl ProgressPrinter {
    fn new() -> Self {
        Self { last_reported: 0 }
    }

    fn render(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::DetectionCompleted { profile } => {
                println!("Detected: {} / {} backend", profile.os, profile.accelerator);
            }
            ProgressEvent::PlanResolved { actions, advisories } => {
                println!("Resolved {actions} install actions");
                for advisory in advisories {
                    println!("  ! advisory: {advisory:?}");
                }
            }
            ProgressEvent::EnvironmentCreated { path } => {
                println!("Virtual environment created at {}", path.display());
            }
            ProgressEvent::ActionStarted { name } => println!("Installing {name}..."),
            ProgressEvent::ActionCompleted { name } => println!("  + {name}"),
            ProgressEvent::ActionFailed {
                name,
                required,
                reason,
            } => {
                let severity = if required { "error" } else { "warning" };
                println!("  ! {name} failed ({severity}): {reason}");
            }
            ProgressEvent::FileStarted {
                relative_path,
                resumed_from,
            } => {
                self.last_reported = resumed_from;
                if resumed_from > 0 {
                    println!("Resuming {relative_path} from byte {resumed_from}...");
                } else {
                    println!("Downloading {relative_path}...");
                }
            }
            ProgressEvent::FileProgress {
                relative_path,
                bytes_downloaded,
                total_bytes,
            } => {
                if bytes_downloaded >= self.last_reported + PROGRESS_STRIDE {
                    self.last_reported = bytes_downloaded;
                    let downloaded_mib = bytes_downloaded / (1024 * 1024);
                    match total_bytes {
                        Some(total) => println!(
                            "  ... {relative_path}: {downloaded_mib} MiB of {} MiB",
                            total / (1024 * 1024)
                        ),
                        None => println!("  ... {relative_path}: {downloaded_mib} MiB"),
                    }
                }
            }
            ProgressEvent::FileCompleted { relative_path } => println!("  + {relative_path}"),
            ProgressEvent::FileSkipped { relative_path } => {
                println!("  = {relative_path} already present")
            }
        }
    }
}

fn main() -> ExitCode {
    setup_logging();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("error: {message}");
            }
            usage();
            return ExitCode::from(2);
        }
    };

    let (reporter, events) = ProgressReporter::channel();
    let printer = thread::spawn(move || {
        let mut printer = ProgressPrinter::new();
        for event in events {
            printer.render(event);
        }
    });

    let cancel = CancelFlag::new();
    let orchestrator = match Orchestrator::new(reporter, cancel) {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            eprintln!("error: {error:?}");
            return ExitCode::from(2);
        }
    };

    let result = orchestrator.provision(&options);
    // Dropping the orchestrator closes the event channel so the printer
    // thread drains and exits.
    drop(orchestrator);
    let _ = printer.join();

    println!();
    match result.status {
        ProvisionStatus::Success => println!("Provisioning complete."),
        ProvisionStatus::PartialFailure => {
            println!("Provisioning completed with warnings:");
            for failure in &result.failed_actions {
                println!("  ! {}: {}", failure.name, failure.diagnostic);
            }
        }
        ProvisionStatus::Failure => {
            println!(
                "Provisioning failed: {}",
                result
                    .failure_reason
                    .as_deref()
                    .unwrap_or("unknown failure")
            );
        }
    }
    if let Some(path) = &result.environment_path {
        println!("Environment: {}", path.display());
    }
    if !result.model_paths.is_empty() {
        println!("Model files: {}", result.model_paths.len());
    }

    ExitCode::from(result.status.exit_code() as u8)
}
