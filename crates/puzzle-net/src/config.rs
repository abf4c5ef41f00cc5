//! Model configuration: shared width, backbone, text strategy, answer mode
//! and the active puzzle set.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ReasonerError, Result};
use crate::vocab::check_decode_window;

/// Pretrained image backbones with a known pooled feature width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackboneKind {
    Resnet18,
    Resnet50,
}

impl BackboneKind {
    /// Width of the pooled feature vector the backbone emits.
    pub fn feature_dim(self) -> usize {
        match self {
            Self::Resnet18 => 512,
            Self::Resnet50 => 2048,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resnet18 => "resnet18",
            Self::Resnet50 => "resnet50",
        }
    }
}

impl FromStr for BackboneKind {
    type Err = ReasonerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "resnet18" => Ok(Self::Resnet18),
            "resnet50" => Ok(Self::Resnet50),
            other => Err(ReasonerError::UnknownBackbone(other.to_string())),
        }
    }
}

/// How questions become a shared-width embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEmbedding {
    /// Learned token embedding + two-layer bidirectional LSTM.
    Standard,
    /// Tokens decoded to text, re-embedded per word by an external service,
    /// then a GRU.
    Bert,
    /// Sentence vectors from an external contrastive text encoder.
    Clip,
}

impl TextEmbedding {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Bert => "bert",
            Self::Clip => "clip",
        }
    }
}

impl fmt::Display for TextEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEmbedding {
    type Err = ReasonerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(Self::Standard),
            "bert" => Ok(Self::Bert),
            "clip" => Ok(Self::Clip),
            other => Err(ReasonerError::UnsupportedTextEmbedding(other.to_string())),
        }
    }
}

/// Answer representation of fixed-output puzzles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// One logit per registry class.
    Classifier,
    /// A single scalar.
    Regression,
}

/// Which registry puzzles get a slot in the banks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PuzzleSelection {
    /// Every puzzle in the registry.
    All,
    /// An explicit subset, in any order.
    Only { ids: Vec<u32> },
}

/// Configuration for [`crate::PuzzleNet`] and [`crate::PuzzleReasoner`].
#[derive(Config, Debug)]
pub struct PuzzleNetConfig {
    /// Image backbone identifier (`resnet18`, `resnet50`).
    pub backbone: String,
    /// Question encoding strategy.
    pub text_embedding: TextEmbedding,
    /// Shared embedding width of image, question and joint embeddings.
    #[config(default = 128)]
    pub feat_size: usize,
    /// Width of the recurrent question encoders.
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = "AnswerMode::Classifier")]
    pub answer_mode: AnswerMode,
    #[config(default = "PuzzleSelection::All")]
    pub puzzles: PuzzleSelection,
    /// One image head for every puzzle instead of one per puzzle.
    #[config(default = false)]
    pub single_image_head: bool,
    /// Let gradients reach the image backbone.
    #[config(default = false)]
    pub train_backbone: bool,
    /// Row norm cap of the learned token embedding.
    #[config(default = 1.0)]
    pub embedding_max_norm: f64,
    /// Token window used when decoding questions back to text.
    #[config(default = 70)]
    pub decode_window: usize,
    /// Per-word vector width of the word embedding service.
    #[config(default = 768)]
    pub word_dim: usize,
    /// Sentence vector width of the contrastive text encoder.
    #[config(default = 512)]
    pub sentence_dim: usize,
    /// Path to the JSON vocabulary.
    pub vocab_path: Option<String>,
}

impl PuzzleNetConfig {
    pub fn backbone_kind(&self) -> Result<BackboneKind> {
        self.backbone.parse()
    }

    /// Range checks that do not depend on the registry or services.
    pub fn validate(&self) -> Result<()> {
        check_decode_window(self.decode_window)
    }

    /// Output width of a fixed decoder for a puzzle with `registry_classes`.
    pub fn output_classes(&self, registry_classes: usize) -> usize {
        match self.answer_mode {
            AnswerMode::Classifier => registry_classes,
            AnswerMode::Regression => 1,
        }
    }
}
