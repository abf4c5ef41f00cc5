//! CLIP ViT-B/32 text tower as a [`SentenceEmbedder`].

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use puzzle_net::SentenceEmbedder;
use tokenizers::Tokenizer;

use crate::types::{dtype_for, TextEncoderConfig};

/// Width of CLIP ViT-B/32 text features.
pub const CLIP_DIM: usize = 512;

/// CLIP text encoder producing one L2-normalized 512-d vector per question.
pub struct ClipTextEncoder {
    model: ClipModel,
    tokenizer: Tokenizer,
    max_tokens: usize,
    device: Device,
}

impl ClipTextEncoder {
    /// Load tokenizer and weights from `config.model_path`.
    pub fn load(config: &TextEncoderConfig) -> anyhow::Result<Self> {
        let device = config.device.to_candle_device()?;
        let dtype = dtype_for(&device);
        tracing::info!(
            model_path = %config.model_path.display(),
            ?dtype,
            "Loading CLIP text encoder"
        );

        let tokenizer = Tokenizer::from_file(config.tokenizer_path())
            .map_err(|e| anyhow::anyhow!("Failed to load CLIP tokenizer: {e}"))?;
        let weights = config.weights_path();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], dtype, &device) }
            .with_context(|| format!("Failed to map {}", weights.display()))?;
        let model = ClipModel::new(vb, &ClipConfig::vit_base_patch32())?;

        Ok(Self {
            model,
            tokenizer,
            max_tokens: config.max_tokens,
            device,
        })
    }
}

impl SentenceEmbedder for ClipTextEncoder {
    fn dim(&self) -> usize {
        CLIP_DIM
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("CLIP tokenization failed: {e}"))?;
        let ids = pad_ids(encoding.get_ids(), self.max_tokens);
        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let features = self.model.get_text_features(&input_ids)?;
        let normalized = l2_normalize(&features.to_dtype(DType::F32)?)?;
        Ok(normalized.squeeze(0)?.to_vec1::<f32>()?)
    }
}

/// Fit token ids to exactly `max_len`: zero padded, or truncated with the
/// final (end-of-text) token kept in the last position.
pub(crate) fn pad_ids(ids: &[u32], max_len: usize) -> Vec<u32> {
    let mut out = ids.to_vec();
    if out.len() > max_len {
        let last = out[out.len() - 1];
        out.truncate(max_len);
        if let Some(slot) = out.last_mut() {
            *slot = last;
        }
    }
    out.resize(max_len, 0);
    out
}

/// L2-normalize along the last dimension.
pub(crate) fn l2_normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    tensor.broadcast_div(&norm.clamp(1e-12, f64::MAX)?)
}
