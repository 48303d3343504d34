mod action;
mod resolver;

pub use action::{DependencyPlan, InstallAction, PlanAdvisory, SourceKind};
pub use resolver::resolve;
