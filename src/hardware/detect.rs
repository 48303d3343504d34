use std::path::Path;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::profile::{
    AcceleratorKind, GpuGeneration, HardwareProfile, InterpreterVersion, OsKind, ShellKind,
};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("unsupported operating system: {0} (only linux and windows are supported)")]
    UnsupportedOs(String),
}

static GPU_PATTERNS: Lazy<Vec<(Regex, GpuGeneration)>> = Lazy::new(|| {
    [
        (r"(?i)rtx\s*50\d{2}", GpuGeneration::Blackwell),
        (r"(?i)(rtx\s*40\d{2}|\bL40S?\b|\bL4\b)", GpuGeneration::Ada),
        (
            r"(?i)(rtx\s*30\d{2}|rtx\s*a\d{3,4}|\bA100\b|\bA30\b|\bA40\b|\bA10\b)",
            GpuGeneration::Ampere,
        ),
        (
            r"(?i)(rtx\s*20\d{2}|gtx\s*16\d{2}|titan\s*rtx|\bT4\b)",
            GpuGeneration::Turing,
        ),
    ]
    .iter()
    .map(|(pattern, generation)| {
        (
            Regex::new(pattern).expect("invalid gpu pattern"),
            *generation,
        )
    })
    .collect()
});

/// Takes the read-only host snapshot a provisioning run starts from.
///
/// Fails only when the OS itself is unsupported. A missing accelerator
/// degrades to [`AcceleratorKind::Cpu`] and a missing interpreter leaves
/// [`HardwareProfile::interpreter`] unset for the resolver to flag.
pub fn detect() -> Result<HardwareProfile, DetectionError> {
    let os = OsKind::from_host()
        .ok_or_else(|| DetectionError::UnsupportedOs(std::env::consts::OS.to_string()))?;
    let shell = detect_shell(os);
    let interpreter = detect_interpreter();
    if interpreter.is_none() {
        warn!("no python interpreter found on PATH");
    }
    let (accelerator, gpu_generation) = detect_accelerator(os);

    let profile = HardwareProfile {
        os,
        shell,
        interpreter,
        accelerator,
        gpu_generation,
    };
    info!(
        "detected host: os={} accelerator={} interpreter={}",
        profile.os,
        profile.accelerator,
        profile
            .interpreter
            .map(|version| version.to_string())
            .unwrap_or_else(|| "none".into()),
    );
    Ok(profile)
}

/// Maps an `nvidia-smi` device name to a known architecture tag.
/// Unrecognized names yield `None`; the resolver falls back to the most
/// widely compatible wheel in that case.
#[must_use]
pub fn classify_gpu_name(name: &str) -> Option<GpuGeneration> {
    GPU_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(name))
        .map(|(_, generation)| *generation)
}

fn detect_shell(os: OsKind) -> ShellKind {
    match os {
        OsKind::Linux => {
            if std::env::var_os("SHELL").is_some() {
                ShellKind::Posix
            } else {
                ShellKind::Unknown
            }
        }
        OsKind::Windows => {
            if std::env::var_os("PSModulePath").is_some() {
                ShellKind::Powershell
            } else if std::env::var_os("COMSPEC").is_some() {
                ShellKind::Cmd
            } else {
                ShellKind::Unknown
            }
        }
    }
}

fn detect_interpreter() -> Option<InterpreterVersion> {
    for candidate in ["python3", "python"] {
        let Ok(output) = Command::new(candidate).arg("--version").output() else {
            continue;
        };
        if !output.status.success() {
            continue;
        }
        // Older interpreters print the version to stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stdout.trim().is_empty() {
            stderr
        } else {
            stdout
        };
        if let Some(version) = InterpreterVersion::parse(&text) {
            debug!("interpreter {candidate} reports {version}");
            return Some(version);
        }
    }
    None
}

fn detect_accelerator(os: OsKind) -> (AcceleratorKind, Option<GpuGeneration>) {
    if let Some(name) = probe_nvidia_gpu() {
        let generation = classify_gpu_name(&name);
        if generation.is_none() {
            warn!("unrecognized NVIDIA device name: {name}");
        }
        return (AcceleratorKind::Cuda, generation);
    }
    if probe_rocm(os) {
        return (AcceleratorKind::Rocm, None);
    }
    (AcceleratorKind::Cpu, None)
}

fn probe_nvidia_gpu() -> Option<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let name = stdout.lines().next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn probe_rocm(os: OsKind) -> bool {
    if os != OsKind::Linux {
        // ROCm detection still reports AMD hardware on windows; the
        // resolver downgrades it to a cpu plan with an advisory.
        return false;
    }
    let smi = Command::new("rocm-smi")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    smi || Path::new("/opt/rocm").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_consumer_cards_by_series() {
        assert_eq!(
            classify_gpu_name("NVIDIA GeForce RTX 3080"),
            Some(GpuGeneration::Ampere)
        );
        assert_eq!(
            classify_gpu_name("NVIDIA GeForce RTX 4090"),
            Some(GpuGeneration::Ada)
        );
        assert_eq!(
            classify_gpu_name("NVIDIA GeForce RTX 5080"),
            Some(GpuGeneration::Blackwell)
        );
        assert_eq!(
            classify_gpu_name("NVIDIA GeForce RTX 2070 SUPER"),
            Some(GpuGeneration::Turing)
        );
    }

    #[test]
    fn classifies_datacenter_cards() {
        assert_eq!(
            classify_gpu_name("NVIDIA A100-SXM4-80GB"),
            Some(GpuGeneration::Ampere)
        );
        assert_eq!(classify_gpu_name("Tesla T4"), Some(GpuGeneration::Turing));
        assert_eq!(classify_gpu_name("NVIDIA L40S"), Some(GpuGeneration::Ada));
    }

    #[test]
    fn unknown_names_yield_none() {
        assert_eq!(classify_gpu_name("Quadro P5000"), None);
        assert_eq!(classify_gpu_name("Matrox G200"), None);
        assert_eq!(classify_gpu_name(""), None);
    }
}
