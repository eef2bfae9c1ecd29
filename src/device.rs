//! Execution device selection.
//!
//! The device is chosen once, when the [`ModelHandle`](crate::model::ModelHandle)
//! is built: an accelerator if ONNX Runtime reports one, otherwise the CPU.

use std::{fmt, str::FromStr};

use ort::ep::{self, ExecutionProvider};
use serde::Serialize;

/// Compute device the model session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// NVIDIA GPU through the CUDA execution provider.
    Cuda,
    /// Apple Neural Engine / GPU through the CoreML execution provider.
    #[value(name = "coreml")]
    CoreMl,
    Cpu,
}

impl Device {
    /// Pick the best available device, preferring CUDA, then CoreML.
    ///
    /// An accelerator only counts when its execution provider is compiled in
    /// (the `cuda` / `coreml` features) and the runtime reports it usable.
    pub fn probe() -> Self {
        Self::probe_with(|device| match device {
            Device::Cuda => cfg!(feature = "cuda") && ep::CUDA::default().is_available().unwrap_or(false),
            Device::CoreMl => {
                cfg!(feature = "coreml") && ep::CoreML::default().is_available().unwrap_or(false)
            }
            Device::Cpu => true,
        })
    }

    /// Probe order with an injectable availability check.
    pub(crate) fn probe_with(available: impl Fn(Device) -> bool) -> Self {
        [Device::Cuda, Device::CoreMl]
            .into_iter()
            .find(|&d| available(d))
            .unwrap_or(Device::Cpu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::CoreMl => "coreml",
            Device::Cpu => "cpu",
        }
    }

    pub fn is_accelerated(self) -> bool {
        self != Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Device::Cuda),
            "coreml" | "mps" => Ok(Device::CoreMl),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device: {other}")),
        }
    }
}
