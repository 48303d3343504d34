mod builder;
mod runner;

pub use builder::{
    ActionFailure, BuildOptions, BuildOutcome, BuildStatus, EnvError, EnvironmentBuilder,
};
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
