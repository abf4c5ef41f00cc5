//! BERT encoder as a [`WordEmbedder`]: one hidden-state vector per word
//! piece of the question.

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use puzzle_net::WordEmbedder;
use tokenizers::Tokenizer;

use crate::types::{dtype_for, TextEncoderConfig};

pub struct BertWordEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    hidden_size: usize,
    max_tokens: usize,
    device: Device,
}

impl BertWordEmbedder {
    /// Load `config.json`, tokenizer and weights from `config.model_path`.
    pub fn load(config: &TextEncoderConfig) -> anyhow::Result<Self> {
        let device = config.device.to_candle_device()?;
        let dtype = dtype_for(&device);

        let config_path = config.config_path();
        let config_json = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let bert_config: Config = serde_json::from_str(&config_json)
            .context("Failed to parse BERT config.json")?;

        tracing::info!(
            model_path = %config.model_path.display(),
            hidden_size = bert_config.hidden_size,
            ?dtype,
            "Loading BERT word embedder"
        );

        let tokenizer = Tokenizer::from_file(config.tokenizer_path())
            .map_err(|e| anyhow::anyhow!("Failed to load BERT tokenizer: {e}"))?;
        let weights = config.weights_path();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], dtype, &device) }
            .with_context(|| format!("Failed to map {}", weights.display()))?;
        let model = BertModel::load(vb, &bert_config)?;

        Ok(Self {
            model,
            tokenizer,
            hidden_size: bert_config.hidden_size,
            max_tokens: config.max_tokens,
            device,
        })
    }
}

impl WordEmbedder for BertWordEmbedder {
    fn dim(&self) -> usize {
        self.hidden_size
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<Vec<f32>>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("BERT tokenization failed: {e}"))?;
        let ids = truncate_keeping_sep(encoding.get_ids(), self.max_tokens);

        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, None)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec2::<f32>()?;
        Ok(strip_special(hidden))
    }
}

/// Cut `ids` to at most `max_len` tokens, keeping the final `[SEP]` in the
/// last position so only word pieces are lost.
pub(crate) fn truncate_keeping_sep(ids: &[u32], max_len: usize) -> Vec<u32> {
    let mut out = ids.to_vec();
    if out.len() > max_len && max_len > 0 {
        let sep = out[out.len() - 1];
        out.truncate(max_len);
        out[max_len - 1] = sep;
    }
    out
}

/// Drop the `[CLS]` and `[SEP]` rows framing a single-sentence encoding.
pub(crate) fn strip_special(mut hidden: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    if hidden.len() < 2 {
        return Vec::new();
    }
    hidden.pop();
    hidden.remove(0);
    hidden
}
