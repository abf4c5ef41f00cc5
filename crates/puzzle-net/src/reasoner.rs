//! End-to-end reasoner: image backbone, question preparation and the routed
//! [`PuzzleNet`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::prelude::*;
use tracing::{debug, info};

use crate::checkpoint::{checkpoint_name, load_checkpoint, load_config, save_checkpoint};
use crate::config::{PuzzleNetConfig, TextEmbedding};
use crate::embedders::{SentenceEmbedder, WordEmbedder};
use crate::error::{ReasonerError, Result};
use crate::model::bridge::{embeddings_to_tensor, sequences_to_tensor, tensor_to_token_rows, tokens_to_tensor};
use crate::model::vision::{ImageBackbone, VisionEncoder};
use crate::model::{PuzzleNet, PuzzleOutputs, QuestionInput};
use crate::registry::PuzzleRegistry;
use crate::routing::RoutingTable;
use crate::vocab::Vocabulary;

/// Collaborators the question strategies may need.
///
/// `standard` needs a vocabulary, `bert` a word embedder and `clip` a
/// sentence embedder. `bert` and `clip` also need the vocabulary when fed
/// token ids, since those are decoded back to text first.
#[derive(Clone, Default)]
pub struct TextServices {
    pub vocabulary: Option<Vocabulary>,
    pub word_embedder: Option<Arc<dyn WordEmbedder>>,
    pub sentence_embedder: Option<Arc<dyn SentenceEmbedder>>,
}

impl std::fmt::Debug for TextServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextServices")
            .field("vocabulary", &self.vocabulary.as_ref().map(Vocabulary::len))
            .field("word_embedder", &self.word_embedder.as_ref().map(|e| e.dim()))
            .field("sentence_embedder", &self.sentence_embedder.as_ref().map(|e| e.dim()))
            .finish()
    }
}

impl TextServices {
    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = Some(vocabulary);
        self
    }

    pub fn with_word_embedder(mut self, embedder: Arc<dyn WordEmbedder>) -> Self {
        self.word_embedder = Some(embedder);
        self
    }

    pub fn with_sentence_embedder(mut self, embedder: Arc<dyn SentenceEmbedder>) -> Self {
        self.sentence_embedder = Some(embedder);
        self
    }
}

/// Questions as handed to [`PuzzleReasoner::forward`].
#[derive(Debug, Clone)]
pub enum QuestionBatch<B: Backend> {
    /// Padded token ids `(batch, seq_len)`, index 0 being padding.
    Tokens(Tensor<B, 2, Int>),
    /// Raw question strings.
    Text(Vec<String>),
    /// Already in the configured strategy's representation.
    Embedded(QuestionInput<B>),
}

impl<B: Backend> QuestionBatch<B> {
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Tokens(t) => t.dims()[0],
            Self::Text(texts) => texts.len(),
            Self::Embedded(input) => input.batch_size(),
        }
    }
}

/// The assembled model.
#[derive(Debug)]
pub struct PuzzleReasoner<B: Backend> {
    config: PuzzleNetConfig,
    routing: RoutingTable,
    vision: VisionEncoder<B>,
    net: PuzzleNet<B>,
    services: TextServices,
    max_question_len: usize,
    device: B::Device,
}

impl<B: Backend> PuzzleReasoner<B> {
    /// Assemble a reasoner from configuration.
    ///
    /// The vocabulary is taken from `services` or, failing that, loaded from
    /// `config.vocab_path`.
    pub fn new(
        config: PuzzleNetConfig,
        registry: &PuzzleRegistry,
        backbone: Arc<dyn ImageBackbone<B>>,
        mut services: TextServices,
        device: &B::Device,
    ) -> Result<Self> {
        let kind = config.backbone_kind()?;
        config.validate()?;

        if services.vocabulary.is_none() {
            if let Some(path) = &config.vocab_path {
                services.vocabulary = Some(Vocabulary::load(Path::new(path))?);
            }
        }
        check_services(&config, &services)?;

        let routing = RoutingTable::build(&config, registry)?;
        let vision = VisionEncoder::new(backbone, kind, config.train_backbone)?;
        let vocab_size = services.vocabulary.as_ref().map(Vocabulary::len);
        let net = config.init::<B>(&routing, vision.feature_dim(), vocab_size, device)?;

        info!(
            backbone = kind.as_str(),
            text_embedding = %config.text_embedding,
            puzzles = ?routing.ids(),
            single_image_head = config.single_image_head,
            train_backbone = config.train_backbone,
            "Puzzle reasoner ready"
        );

        Ok(Self {
            config,
            routing,
            vision,
            net,
            services,
            max_question_len: registry.max_question_len(),
            device: device.clone(),
        })
    }

    /// Rebuild a reasoner from the config and weights of checkpoint `stem`
    /// (the checkpoint path without extension).
    pub fn from_checkpoint(
        stem: &Path,
        registry: &PuzzleRegistry,
        backbone: Arc<dyn ImageBackbone<B>>,
        services: TextServices,
        device: &B::Device,
    ) -> Result<Self> {
        let config = load_config(stem)?;
        let mut reasoner = Self::new(config, registry, backbone, services, device)?;
        reasoner.net = load_checkpoint(stem, reasoner.net.clone(), &reasoner.routing, device)?;
        Ok(reasoner)
    }

    pub fn config(&self) -> &PuzzleNetConfig {
        &self.config
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn net(&self) -> &PuzzleNet<B> {
        &self.net
    }

    /// Replace the network, e.g. after an optimizer step.
    pub fn set_net(&mut self, net: PuzzleNet<B>) {
        self.net = net;
    }

    pub fn vision(&self) -> &VisionEncoder<B> {
        &self.vision
    }

    /// Predict answers for a mixed-puzzle batch.
    ///
    /// `images`, `questions` and `puzzle_ids` must agree on batch size. The
    /// result holds exactly the distinct ids of `puzzle_ids`.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        questions: QuestionBatch<B>,
        puzzle_ids: &[u32],
    ) -> Result<PuzzleOutputs<B>> {
        let batch = images.dims()[0];
        let question_rows = questions.batch_size();
        if batch != question_rows || batch != puzzle_ids.len() {
            return Err(ReasonerError::BatchMismatch {
                images: batch,
                questions: question_rows,
                ids: puzzle_ids.len(),
            });
        }

        if batch == 0 {
            return Ok(PuzzleOutputs::default());
        }

        let partition = self.routing.partition(puzzle_ids)?;
        debug!(batch, puzzles = ?partition.ids(), "Routing batch");

        let features = self.vision.forward(images)?;
        let question = self.prepare_question(questions)?;
        self.net.forward(features, question, &partition)
    }

    /// Turn `questions` into the configured strategy's representation.
    pub fn prepare_question(&self, questions: QuestionBatch<B>) -> Result<QuestionInput<B>> {
        let texts = match (self.config.text_embedding, questions) {
            (_, QuestionBatch::Embedded(input)) => return Ok(input),
            (TextEmbedding::Standard, QuestionBatch::Tokens(tokens)) => {
                return Ok(QuestionInput::Tokens(tokens))
            }
            (TextEmbedding::Standard, QuestionBatch::Text(texts)) => {
                let vocab = self.vocabulary()?;
                let rows: Vec<Vec<u32>> = texts
                    .iter()
                    .map(|t| vocab.encode(t, self.max_question_len))
                    .collect();
                return Ok(QuestionInput::Tokens(tokens_to_tensor(&rows, &self.device)?));
            }
            (_, QuestionBatch::Tokens(tokens)) => self.decode_tokens(tokens)?,
            (_, QuestionBatch::Text(texts)) => texts,
        };

        match self.config.text_embedding {
            TextEmbedding::Bert => {
                let embedder = self.word_embedder()?;
                let sequences = texts
                    .iter()
                    .map(|t| embedder.embed(t))
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map_err(ReasonerError::TextService)?;
                Ok(QuestionInput::WordVectors(sequences_to_tensor(
                    &sequences,
                    self.max_question_len,
                    self.config.word_dim,
                    &self.device,
                )?))
            }
            TextEmbedding::Clip => {
                let embedder = self.sentence_embedder()?;
                let vectors = embedder
                    .embed_batch(&texts)
                    .map_err(ReasonerError::TextService)?;
                Ok(QuestionInput::Sentences(embeddings_to_tensor(
                    &vectors,
                    self.config.sentence_dim,
                    &self.device,
                )?))
            }
            TextEmbedding::Standard => Err(ReasonerError::QuestionKind {
                strategy: TextEmbedding::Standard.as_str(),
                given: "text",
            }),
        }
    }

    /// Recover question text from padded token rows.
    pub fn decode_tokens(&self, tokens: Tensor<B, 2, Int>) -> Result<Vec<String>> {
        let vocab = self.vocabulary()?;
        tensor_to_token_rows(tokens)
            .iter()
            .enumerate()
            .map(|(i, row)| vocab.decode_question(row, i, self.config.decode_window))
            .collect()
    }

    /// Save the network as `ckpt_{backbone}_{strategy}_{seed}` under `dir`.
    pub fn save(&self, dir: &Path, seed: u64) -> Result<PathBuf> {
        save_checkpoint(&self.net, &self.config, &self.routing, dir, seed)
    }

    /// Replace the network weights with checkpoint `seed` from `dir`.
    pub fn restore(&mut self, dir: &Path, seed: u64) -> Result<()> {
        let name = checkpoint_name(&self.config.backbone, self.config.text_embedding, seed);
        self.net = load_checkpoint(&dir.join(name), self.net.clone(), &self.routing, &self.device)?;
        Ok(())
    }

    fn vocabulary(&self) -> Result<&Vocabulary> {
        self.services.vocabulary.as_ref().ok_or_else(|| {
            ReasonerError::MissingVocabulary(self.config.vocab_path.clone().unwrap_or_default().into())
        })
    }

    fn word_embedder(&self) -> Result<&Arc<dyn WordEmbedder>> {
        self.services
            .word_embedder
            .as_ref()
            .ok_or(ReasonerError::MissingTextService {
                strategy: TextEmbedding::Bert.as_str(),
                service: "word embedder",
            })
    }

    fn sentence_embedder(&self) -> Result<&Arc<dyn SentenceEmbedder>> {
        self.services
            .sentence_embedder
            .as_ref()
            .ok_or(ReasonerError::MissingTextService {
                strategy: TextEmbedding::Clip.as_str(),
                service: "sentence embedder",
            })
    }
}

/// Reject a configuration whose strategy lacks its collaborator, or whose
/// collaborator emits the wrong width.
fn check_services(config: &PuzzleNetConfig, services: &TextServices) -> Result<()> {
    match config.text_embedding {
        TextEmbedding::Standard => {
            if services.vocabulary.is_none() {
                return Err(ReasonerError::MissingVocabulary(
                    config.vocab_path.clone().unwrap_or_default().into(),
                ));
            }
        }
        TextEmbedding::Bert => {
            let embedder = services.word_embedder.as_ref().ok_or(ReasonerError::MissingTextService {
                strategy: TextEmbedding::Bert.as_str(),
                service: "word embedder",
            })?;
            if embedder.dim() != config.word_dim {
                return Err(ReasonerError::WidthMismatch {
                    component: "word embedder",
                    expected: config.word_dim,
                    actual: embedder.dim(),
                });
            }
        }
        TextEmbedding::Clip => {
            let embedder = services
                .sentence_embedder
                .as_ref()
                .ok_or(ReasonerError::MissingTextService {
                    strategy: TextEmbedding::Clip.as_str(),
                    service: "sentence embedder",
                })?;
            if embedder.dim() != config.sentence_dim {
                return Err(ReasonerError::WidthMismatch {
                    component: "sentence embedder",
                    expected: config.sentence_dim,
                    actual: embedder.dim(),
                });
            }
        }
    }
    Ok(())
}
