use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Installed from a package index, possibly a non-default one.
    Index,
    /// Installed from a prebuilt wheel URL.
    DirectUrl,
}

/// One ordered step of a [`DependencyPlan`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallAction {
    pub name: String,
    /// Package requirement specifier or wheel URL.
    pub target: String,
    pub source_kind: SourceKind,
    /// Non-required actions may fail without aborting the build.
    pub required: bool,
    /// Extra installer arguments, e.g. companion pins or `--index-url`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl InstallAction {
    pub fn index(name: &str, target: &str) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            source_kind: SourceKind::Index,
            required: true,
            extra_args: Vec::new(),
        }
    }

    pub fn direct_url(name: &str, url: String) -> Self {
        Self {
            name: name.into(),
            target: url,
            source_kind: SourceKind::DirectUrl,
            required: true,
            extra_args: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PlanAdvisory {
    /// Interpreter outside [3.11.0, 3.12.0); every action downgraded to
    /// best-effort rather than refusing outright.
    IncompatibleInterpreter,
    /// Detected accelerator has no supported path on this OS; the plan was
    /// downgraded to cpu.
    IncompatibleHardware,
    /// GPU device name did not match a known generation; the most widely
    /// compatible kernel wheel was selected.
    UnknownGpuGeneration,
}

/// Ordered install actions for one `(HardwareProfile, ModelVariant)` pair.
///
/// Produced by [`crate::plan::resolve`], which is pure: identical inputs
/// always yield an identical plan.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyPlan {
    pub actions: Vec<InstallAction>,
    pub advisories: Vec<PlanAdvisory>,
    /// Disk-space precondition: model assets plus build artifact overhead.
    pub required_free_bytes: u64,
}

impl DependencyPlan {
    #[must_use]
    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|action| action.name == name)
    }

    /// True when the interpreter advisory downgraded the whole plan.
    #[must_use]
    pub fn is_best_effort(&self) -> bool {
        self.advisories
            .contains(&PlanAdvisory::IncompatibleInterpreter)
    }
}
