use crate::assets::ModelVariant;
use crate::hardware::{AcceleratorKind, HardwareProfile, InterpreterVersion, OsKind};

use super::action::{DependencyPlan, InstallAction, PlanAdvisory};

const TORCH_PINS: [&str; 3] = ["torch==2.6.0", "torchvision==0.21.0", "torchaudio==2.6.0"];
const CPU_INDEX: &str = "https://download.pytorch.org/whl/cpu";
const ROCM_INDEX: &str = "https://download.pytorch.org/whl/rocm6.2.4";
const CUDA_INDEX: &str = "https://download.pytorch.org/whl/cu124";

const FLASH_ATTN_REPO: &str =
    "https://github.com/mjun0812/flash-attention-prebuild-wheels/releases/download";
const FLASH_ATTN_BUILD: &str = "flash_attn-2.7.4+cu124torch2.6";

/// Pinned runtime dependencies of chatterbox-tts, installed one at a time so
/// a single bad pin does not sink the rest.
const CORE_DEPENDENCIES: [&str; 17] = [
    "numpy>=1.24.0,<1.26.0",
    "librosa==0.11.0",
    "safetensors==0.5.3",
    "huggingface_hub>=0.23.2,<1.0",
    "transformers==4.46.3",
    "diffusers==0.29.0",
    "einops",
    "s3tokenizer",
    "conformer==0.3.2",
    "resemble-perth==1.0.1",
    "pykakasi==2.3.0",
    "gradio==5.44.1",
    "soundfile>=0.12.1",
    "audioread>=2.1.9",
    "omegaconf>=2.3.0",
    "pyloudnorm",
    "spacy-pkuseg",
];

/// Accelerator wheels dominate the install footprint; cpu builds are far
/// smaller than the cuda/rocm ones.
fn build_overhead_bytes(accelerator: AcceleratorKind) -> u64 {
    match accelerator {
        AcceleratorKind::Cuda | AcceleratorKind::Rocm => 7_000_000_000,
        AcceleratorKind::Cpu => 2_500_000_000,
    }
}

/// Maps a hardware profile and requested model variant to an ordered list of
/// install actions. Pure and total: every profile resolves to a plan, with
/// an all-cpu plan as the universal fallback.
pub fn resolve(profile: &HardwareProfile, variant: ModelVariant) -> DependencyPlan {
    let mut advisories = Vec::new();

    let interpreter_supported = profile
        .interpreter
        .map_or(false, |version| version.is_supported());
    if !interpreter_supported {
        advisories.push(PlanAdvisory::IncompatibleInterpreter);
    }

    // ROCm ships for linux only; AMD hardware on windows has no supported
    // path, so the plan downgrades to cpu.
    let accelerator = match (profile.accelerator, profile.os) {
        (AcceleratorKind::Rocm, OsKind::Windows) => {
            advisories.push(PlanAdvisory::IncompatibleHardware);
            AcceleratorKind::Cpu
        }
        (kind, _) => kind,
    };

    let mut actions = Vec::new();
    match accelerator {
        AcceleratorKind::Cpu => actions.push(torch_action("pytorch-cpu", CPU_INDEX)),
        AcceleratorKind::Rocm => actions.push(torch_action("pytorch-rocm", ROCM_INDEX)),
        AcceleratorKind::Cuda => {
            actions.push(torch_action("pytorch-cuda", CUDA_INDEX));
            actions.push(attention_kernel_action(profile, &mut advisories));
        }
    }

    for pin in CORE_DEPENDENCIES {
        let name = pin
            .split(['=', '>', '<'])
            .next()
            .unwrap_or(pin)
            .to_string();
        actions.push(InstallAction::index(&name, pin).optional());
    }

    // The framework package installs last; its dependency set is pinned
    // above, so it goes in without resolving its own.
    actions.push(
        InstallAction::index("chatterbox-tts", "chatterbox-tts").with_args(["--no-deps"]),
    );

    if !interpreter_supported {
        for action in &mut actions {
            action.required = false;
        }
    }

    DependencyPlan {
        actions,
        advisories,
        required_free_bytes: variant.expected_size_bytes() + build_overhead_bytes(accelerator),
    }
}

fn torch_action(name: &str, index_url: &str) -> InstallAction {
    InstallAction::index(name, TORCH_PINS[0]).with_args([
        TORCH_PINS[1],
        TORCH_PINS[2],
        "--index-url",
        index_url,
    ])
}

/// Selects the prebuilt flash-attention wheel for a CUDA host. A known
/// Ampere-or-newer generation gets the wheel as a required step; an unknown
/// or older generation falls back to the same generic build marked
/// best-effort, since inference works without it.
fn attention_kernel_action(
    profile: &HardwareProfile,
    advisories: &mut Vec<PlanAdvisory>,
) -> InstallAction {
    let tag = profile
        .interpreter
        .unwrap_or(InterpreterVersion::new(3, 11, 0))
        .cp_tag();
    let url = flash_attn_wheel_url(profile.os, &tag);

    match profile.gpu_generation {
        Some(generation) if generation.supports_prebuilt_kernels() => InstallAction::direct_url(
            &format!("flash-attention-{}", generation.tag()),
            url,
        ),
        Some(_) => InstallAction::direct_url("flash-attention-generic", url).optional(),
        None => {
            advisories.push(PlanAdvisory::UnknownGpuGeneration);
            InstallAction::direct_url("flash-attention-generic", url).optional()
        }
    }
}

fn flash_attn_wheel_url(os: OsKind, tag: &str) -> String {
    match os {
        OsKind::Linux => format!(
            "{FLASH_ATTN_REPO}/v0.3.18/{FLASH_ATTN_BUILD}-{tag}-{tag}-linux_x86_64.whl"
        ),
        OsKind::Windows => format!(
            "{FLASH_ATTN_REPO}/v0.3.9/{FLASH_ATTN_BUILD}-{tag}-{tag}-win_amd64.whl"
        ),
    }
}
