use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OsKind {
    Linux,
    Windows,
}

impl OsKind {
    pub fn from_host() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(OsKind::Linux),
            "windows" => Some(OsKind::Windows),
            _ => None,
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsKind::Linux => write!(f, "linux"),
            OsKind::Windows => write!(f, "windows"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ShellKind {
    Posix,
    Powershell,
    Cmd,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AcceleratorKind {
    Cuda,
    Rocm,
    Cpu,
}

impl fmt::Display for AcceleratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorKind::Cuda => write!(f, "cuda"),
            AcceleratorKind::Rocm => write!(f, "rocm"),
            AcceleratorKind::Cpu => write!(f, "cpu"),
        }
    }
}

/// NVIDIA architecture tags the resolver knows how to match wheels against.
/// Ordering is chronological so generation thresholds can compare directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum GpuGeneration {
    Turing,
    Ampere,
    Ada,
    Blackwell,
}

impl GpuGeneration {
    /// Prebuilt attention kernels are only published for Ampere and newer.
    #[must_use]
    pub fn supports_prebuilt_kernels(self) -> bool {
        self >= GpuGeneration::Ampere
    }

    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            GpuGeneration::Turing => "turing",
            GpuGeneration::Ampere => "ampere",
            GpuGeneration::Ada => "ada",
            GpuGeneration::Blackwell => "blackwell",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct InterpreterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl InterpreterVersion {
    #[must_use]
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `python --version` output such as `Python 3.11.4`.
    pub fn parse(text: &str) -> Option<Self> {
        let raw = text.trim().strip_prefix("Python").unwrap_or(text).trim();
        let mut parts = raw.split('.');
        let major = parts.next()?.trim().parse().ok()?;
        let minor = parts.next()?.trim().parse().ok()?;
        let patch = parts
            .next()
            .and_then(|part| {
                part.trim()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .ok()
            })
            .unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }

    /// The chatterbox-tts framework pins tightly to [3.11.0, 3.12.0).
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.major == 3 && self.minor == 11
    }

    /// Wheel filename tag, e.g. `cp311`.
    #[must_use]
    pub fn cp_tag(&self) -> String {
        format!("cp{}{}", self.major, self.minor)
    }
}

impl fmt::Display for InterpreterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Immutable snapshot of the host taken once per provisioning run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub os: OsKind,
    pub shell: ShellKind,
    /// `None` when no python interpreter could be probed; the resolver
    /// treats that the same as an out-of-range interpreter.
    pub interpreter: Option<InterpreterVersion>,
    pub accelerator: AcceleratorKind,
    pub gpu_generation: Option<GpuGeneration>,
}
