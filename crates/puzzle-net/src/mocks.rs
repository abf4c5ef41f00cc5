//! Deterministic stand-ins for the image backbone and the text services, for
//! tests without pretrained weights.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::config::BackboneKind;
use crate::embedders::{SentenceEmbedder, WordEmbedder};
use crate::model::vision::ImageBackbone;

// ---------------------------------------------------------------------------
// MockBackbone
// ---------------------------------------------------------------------------

/// Backbone that pools each image to its mean and spreads it over
/// `feature_dim` channels with fixed frequencies.
///
/// Equal images give equal features; different images almost always differ.
#[derive(Debug, Clone)]
pub struct MockBackbone {
    name: String,
    frequencies: Vec<f32>,
}

impl MockBackbone {
    pub fn new(name: &str, feature_dim: usize) -> Self {
        let frequencies = (0..feature_dim).map(|j| 1.0 + j as f32 * 0.37).collect();
        Self {
            name: name.to_string(),
            frequencies,
        }
    }

    pub fn for_kind(kind: BackboneKind) -> Self {
        Self::new(kind.as_str(), kind.feature_dim())
    }

    pub fn resnet18() -> Self {
        Self::for_kind(BackboneKind::Resnet18)
    }

    pub fn resnet50() -> Self {
        Self::for_kind(BackboneKind::Resnet50)
    }
}

impl<B: Backend> ImageBackbone<B> for MockBackbone {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_dim(&self) -> usize {
        self.frequencies.len()
    }

    fn forward(&self, images: Tensor<B, 4>) -> anyhow::Result<Tensor<B, 4>> {
        let [batch, channels, height, width] = images.dims();
        let dim = self.frequencies.len();
        let means = images
            .reshape([batch, channels * height * width])
            .mean_dim(1);
        let frequencies = Tensor::<B, 2>::from_data(
            TensorData::new(self.frequencies.clone(), [1, dim]),
            &means.device(),
        );
        let features = means.matmul(frequencies).add_scalar(0.5).sin();
        Ok(features.reshape([batch, dim, 1, 1]))
    }
}

// ---------------------------------------------------------------------------
// Text services
// ---------------------------------------------------------------------------

/// Hash-style word vector: byte sums folded over `dim` buckets.
fn word_vector(word: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0_f32; dim];
    for (i, byte) in word.bytes().enumerate() {
        v[(i + byte as usize) % dim] += byte as f32 / 255.0;
    }
    v
}

/// One vector per whitespace-separated word.
#[derive(Debug, Clone)]
pub struct MockWordEmbedder {
    dim: usize,
}

impl MockWordEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl WordEmbedder for MockWordEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(text
            .split_whitespace()
            .map(|w| word_vector(w, self.dim))
            .collect())
    }
}

/// Mean of the word vectors, L2-normalized.
#[derive(Debug, Clone)]
pub struct MockSentenceEmbedder {
    dim: usize,
}

impl MockSentenceEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl SentenceEmbedder for MockSentenceEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut sum = vec![0.0_f32; self.dim];
        for word in text.split_whitespace() {
            for (s, v) in sum.iter_mut().zip(word_vector(word, self.dim)) {
                *s += v;
            }
        }
        let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            sum.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(sum)
    }
}
