//! Trainable body of the reasoner: image heads, question encoder, fusion
//! and answer bank.

use burn::prelude::*;
use tracing::info;

use super::answer::{AnswerBank, PuzzleOutputs};
use super::fusion::Fusion;
use super::image_head::ImageHeads;
use super::question::{QuestionEncoder, QuestionEncoding, QuestionInput};
use crate::config::PuzzleNetConfig;
use crate::error::{ReasonerError, Result};
use crate::routing::{Partition, RoutingTable};

/// Everything with trainable weights except the image backbone.
///
/// ```text
/// features (b, d_vis) ──▶ ImageHeads ──┐
///                                      ├─▶ Fusion (b, w) ──▶ AnswerBank ──▶ PuzzleOutputs
/// question ──▶ QuestionEncoder ────────┘
/// ```
#[derive(Module, Debug)]
pub struct PuzzleNet<B: Backend> {
    image_heads: ImageHeads<B>,
    question: QuestionEncoder<B>,
    fusion: Fusion<B>,
    answers: AnswerBank<B>,
    feat_size: usize,
}

impl PuzzleNetConfig {
    /// Build the network for `routing`.
    ///
    /// `feature_dim` is the backbone's pooled width; `vocab_size` is needed by
    /// the standard question strategy only.
    pub fn init<B: Backend>(
        &self,
        routing: &RoutingTable,
        feature_dim: usize,
        vocab_size: Option<usize>,
        device: &B::Device,
    ) -> Result<PuzzleNet<B>> {
        if self.feat_size == 0 {
            return Err(ReasonerError::WidthMismatch {
                component: "shared embedding",
                expected: 1,
                actual: 0,
            });
        }
        let image_heads = if self.single_image_head {
            ImageHeads::shared(feature_dim, self.feat_size, device)
        } else {
            ImageHeads::per_puzzle(routing, feature_dim, self.feat_size, device)
        };
        let question = QuestionEncoder::new(self, vocab_size, device)?;
        let fusion = Fusion::new(self.feat_size, self.feat_size, question.output_width(), device)?;
        let answers = AnswerBank::new(routing, self.feat_size, device);

        let net = PuzzleNet {
            image_heads,
            question,
            fusion,
            answers,
            feat_size: self.feat_size,
        };
        info!(
            text_embedding = %self.text_embedding,
            puzzles = routing.ids().len(),
            image_heads = net.image_heads.len(),
            answer_bank = net.answers.len(),
            params = net.num_params(),
            "Built puzzle network"
        );
        Ok(net)
    }
}

impl<B: Backend> PuzzleNet<B> {
    pub fn feat_size(&self) -> usize {
        self.feat_size
    }

    pub fn image_heads(&self) -> &ImageHeads<B> {
        &self.image_heads
    }

    pub fn question_encoder(&self) -> &QuestionEncoder<B> {
        &self.question
    }

    pub fn answer_bank(&self) -> &AnswerBank<B> {
        &self.answers
    }

    /// Joint embedding `(batch, feat_size)` of image features and questions.
    pub fn joint_embedding(
        &self,
        features: Tensor<B, 2>,
        question: QuestionInput<B>,
        partition: &Partition,
    ) -> Result<Tensor<B, 2>> {
        let image = self.image_heads.forward(features, partition, self.feat_size)?;
        let question = self.question.encode(question)?;
        Ok(self.fusion.forward(image, question))
    }

    /// Full forward pass from backbone features to per-puzzle predictions.
    pub fn forward(
        &self,
        features: Tensor<B, 2>,
        question: QuestionInput<B>,
        partition: &Partition,
    ) -> Result<PuzzleOutputs<B>> {
        if features.dims()[0] == 0 {
            return Ok(PuzzleOutputs::default());
        }
        let joint = self.joint_embedding(features, question, partition)?;
        self.answers.decode(joint, partition)
    }
}
