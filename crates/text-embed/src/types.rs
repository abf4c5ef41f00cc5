//! Configuration for the candle text services.

use std::path::PathBuf;

use candle_core::{DType, Device};
use serde::Deserialize;

/// Device selection for text encoder inference.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DeviceConfig {
    #[serde(rename = "cpu")]
    #[default]
    Cpu,
    /// CUDA GPU with the given ordinal.
    #[serde(rename = "cuda")]
    Cuda { ordinal: usize },
}

impl DeviceConfig {
    pub fn to_candle_device(&self) -> anyhow::Result<Device> {
        match self {
            DeviceConfig::Cpu => Ok(Device::Cpu),
            DeviceConfig::Cuda { ordinal } => Ok(Device::new_cuda(*ordinal)?),
        }
    }
}

/// Weights dtype for `device`: F32 on CPU, F16 on accelerators.
pub(crate) fn dtype_for(device: &Device) -> DType {
    match device {
        Device::Cpu => DType::F32,
        _ => DType::F16,
    }
}

/// Where a text encoder's files live and how to run it.
///
/// `model_path` is a local directory holding `tokenizer.json`,
/// `model.safetensors` and, for BERT, `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TextEncoderConfig {
    pub model_path: PathBuf,
    /// Token limit per question. Defaults to 77 (the CLIP context length).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_max_tokens() -> usize {
    77
}

impl TextEncoderConfig {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            max_tokens: default_max_tokens(),
            device: DeviceConfig::default(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub(crate) fn tokenizer_path(&self) -> PathBuf {
        self.model_path.join("tokenizer.json")
    }

    pub(crate) fn weights_path(&self) -> PathBuf {
        self.model_path.join("model.safetensors")
    }

    pub(crate) fn config_path(&self) -> PathBuf {
        self.model_path.join("config.json")
    }
}
