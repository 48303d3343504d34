mod detect;
mod profile;

pub use detect::{classify_gpu_name, detect, DetectionError};
pub use profile::{
    AcceleratorKind, GpuGeneration, HardwareProfile, InterpreterVersion, OsKind, ShellKind,
};
