//! Question encoders: three interchangeable strategies mapping a question
//! batch to `(batch, feat_size)`.
//!
//! | strategy | input | body |
//! |----------|-------|------|
//! | standard | token ids `(b, s)` | max-norm embedding, 2-layer BiLSTM, mean over time, linear |
//! | bert     | word vectors `(b, max_qlen, word_dim)` | GRU, mean over time, linear |
//! | clip     | sentence vectors `(b, sentence_dim)` | linear, ReLU, linear |
//!
//! Each output ends in a ReLU.

use burn::nn::gru::{Gru, GruConfig};
use burn::nn::{BiLstm, BiLstmConfig, Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::config::{PuzzleNetConfig, TextEmbedding};
use crate::error::{ReasonerError, Result};

/// A batch of questions in one of the three accepted representations.
#[derive(Debug, Clone)]
pub enum QuestionInput<B: Backend> {
    /// Padded token ids `(batch, seq_len)`.
    Tokens(Tensor<B, 2, Int>),
    /// Per-word vectors `(batch, max_qlen, word_dim)`.
    WordVectors(Tensor<B, 3>),
    /// Sentence vectors `(batch, sentence_dim)`.
    Sentences(Tensor<B, 2>),
}

impl<B: Backend> QuestionInput<B> {
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Tokens(t) => t.dims()[0],
            Self::WordVectors(t) => t.dims()[0],
            Self::Sentences(t) => t.dims()[0],
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tokens(_) => "token",
            Self::WordVectors(_) => "word-vector",
            Self::Sentences(_) => "sentence",
        }
    }
}

/// Question representation to shared-width embedding.
pub trait QuestionEncoding<B: Backend> {
    fn encode(&self, input: QuestionInput<B>) -> Result<Tensor<B, 2>>;

    /// Width of the produced embedding.
    fn output_width(&self) -> usize;
}

/// Token embedding whose looked-up rows are rescaled to at most `max_norm`.
#[derive(Module, Debug)]
pub struct MaxNormEmbedding<B: Backend> {
    embedding: Embedding<B>,
    num_embeddings: usize,
    max_norm: f64,
}

impl<B: Backend> MaxNormEmbedding<B> {
    pub fn new(num_embeddings: usize, d_model: usize, max_norm: f64, device: &B::Device) -> Self {
        Self {
            embedding: EmbeddingConfig::new(num_embeddings, d_model).init(device),
            num_embeddings,
            max_norm,
        }
    }

    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let [batch, seq_len] = tokens.dims();
        if batch * seq_len > 0 {
            let max_token: i64 = tokens.clone().max().into_scalar().elem();
            if max_token < 0 || max_token as usize >= self.num_embeddings {
                return Err(ReasonerError::InvalidVocabulary(format!(
                    "token id {max_token} outside vocabulary of {}",
                    self.num_embeddings
                )));
            }
        }
        let x = self.embedding.forward(tokens);
        let norms = x.clone().powf_scalar(2.0).sum_dim(2).sqrt();
        let scale = norms
            .add_scalar(1e-7)
            .recip()
            .mul_scalar(self.max_norm)
            .clamp_max(1.0);
        Ok(x * scale)
    }
}

/// Standard strategy: learned embedding and a two-layer bidirectional LSTM.
#[derive(Module, Debug)]
pub struct RecurrentQuestionEncoder<B: Backend> {
    embedding: MaxNormEmbedding<B>,
    lstm1: BiLstm<B>,
    lstm2: BiLstm<B>,
    projection: Linear<B>,
    feat_size: usize,
}

impl<B: Backend> RecurrentQuestionEncoder<B> {
    pub fn new(vocab_size: usize, config: &PuzzleNetConfig, device: &B::Device) -> Self {
        let h = config.hidden_size;
        Self {
            embedding: MaxNormEmbedding::new(vocab_size, h, config.embedding_max_norm, device),
            lstm1: BiLstmConfig::new(h, h, true).init(device),
            lstm2: BiLstmConfig::new(2 * h, h, true).init(device),
            projection: LinearConfig::new(2 * h, config.feat_size).init(device),
            feat_size: config.feat_size,
        }
    }
}

impl<B: Backend> QuestionEncoding<B> for RecurrentQuestionEncoder<B> {
    fn encode(&self, input: QuestionInput<B>) -> Result<Tensor<B, 2>> {
        let tokens = match input {
            QuestionInput::Tokens(tokens) => tokens,
            other => {
                return Err(ReasonerError::QuestionKind {
                    strategy: TextEmbedding::Standard.as_str(),
                    given: other.kind(),
                })
            }
        };
        let x = self.embedding.forward(tokens)?;
        let (x, _) = self.lstm1.forward(x, None);
        let (x, _) = self.lstm2.forward(x, None);
        Ok(relu(self.projection.forward(mean_over_time(x))))
    }

    fn output_width(&self) -> usize {
        self.feat_size
    }
}

/// Bert strategy: externally embedded words through a GRU.
#[derive(Module, Debug)]
pub struct WordVectorQuestionEncoder<B: Backend> {
    gru: Gru<B>,
    projection: Linear<B>,
    word_dim: usize,
    feat_size: usize,
}

impl<B: Backend> WordVectorQuestionEncoder<B> {
    pub fn new(config: &PuzzleNetConfig, device: &B::Device) -> Self {
        Self {
            gru: GruConfig::new(config.word_dim, config.hidden_size, true).init(device),
            projection: LinearConfig::new(config.hidden_size, config.feat_size).init(device),
            word_dim: config.word_dim,
            feat_size: config.feat_size,
        }
    }
}

impl<B: Backend> QuestionEncoding<B> for WordVectorQuestionEncoder<B> {
    fn encode(&self, input: QuestionInput<B>) -> Result<Tensor<B, 2>> {
        let words = match input {
            QuestionInput::WordVectors(words) => words,
            other => {
                return Err(ReasonerError::QuestionKind {
                    strategy: TextEmbedding::Bert.as_str(),
                    given: other.kind(),
                })
            }
        };
        let [_, _, dim] = words.dims();
        if dim != self.word_dim {
            return Err(ReasonerError::WidthMismatch {
                component: "word embedding",
                expected: self.word_dim,
                actual: dim,
            });
        }
        let x = self.gru.forward(words, None);
        Ok(relu(self.projection.forward(mean_over_time(x))))
    }

    fn output_width(&self) -> usize {
        self.feat_size
    }
}

/// Clip strategy: sentence vectors through a two-layer projection.
#[derive(Module, Debug)]
pub struct SentenceQuestionEncoder<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    sentence_dim: usize,
    feat_size: usize,
}

impl<B: Backend> SentenceQuestionEncoder<B> {
    pub fn new(config: &PuzzleNetConfig, device: &B::Device) -> Self {
        Self {
            linear1: LinearConfig::new(config.sentence_dim, config.hidden_size).init(device),
            linear2: LinearConfig::new(config.hidden_size, config.feat_size).init(device),
            sentence_dim: config.sentence_dim,
            feat_size: config.feat_size,
        }
    }
}

impl<B: Backend> QuestionEncoding<B> for SentenceQuestionEncoder<B> {
    fn encode(&self, input: QuestionInput<B>) -> Result<Tensor<B, 2>> {
        let sentences = match input {
            QuestionInput::Sentences(sentences) => sentences,
            other => {
                return Err(ReasonerError::QuestionKind {
                    strategy: TextEmbedding::Clip.as_str(),
                    given: other.kind(),
                })
            }
        };
        let [_, dim] = sentences.dims();
        if dim != self.sentence_dim {
            return Err(ReasonerError::WidthMismatch {
                component: "sentence embedding",
                expected: self.sentence_dim,
                actual: dim,
            });
        }
        let x = relu(self.linear1.forward(sentences));
        Ok(relu(self.linear2.forward(x)))
    }

    fn output_width(&self) -> usize {
        self.feat_size
    }
}

/// The configured strategy, fixed at construction.
#[derive(Module, Debug)]
pub enum QuestionEncoder<B: Backend> {
    Recurrent(RecurrentQuestionEncoder<B>),
    WordVectors(WordVectorQuestionEncoder<B>),
    Sentence(SentenceQuestionEncoder<B>),
}

impl<B: Backend> QuestionEncoder<B> {
    /// Build the encoder for `config.text_embedding`.
    ///
    /// `vocab_size` is required by the standard strategy only.
    pub fn new(
        config: &PuzzleNetConfig,
        vocab_size: Option<usize>,
        device: &B::Device,
    ) -> Result<Self> {
        Ok(match config.text_embedding {
            TextEmbedding::Standard => {
                let vocab_size = vocab_size.ok_or_else(|| {
                    ReasonerError::MissingVocabulary(
                        config.vocab_path.clone().unwrap_or_default().into(),
                    )
                })?;
                Self::Recurrent(RecurrentQuestionEncoder::new(vocab_size, config, device))
            }
            TextEmbedding::Bert => Self::WordVectors(WordVectorQuestionEncoder::new(config, device)),
            TextEmbedding::Clip => Self::Sentence(SentenceQuestionEncoder::new(config, device)),
        })
    }

    pub fn strategy(&self) -> TextEmbedding {
        match self {
            Self::Recurrent(_) => TextEmbedding::Standard,
            Self::WordVectors(_) => TextEmbedding::Bert,
            Self::Sentence(_) => TextEmbedding::Clip,
        }
    }
}

impl<B: Backend> QuestionEncoding<B> for QuestionEncoder<B> {
    fn encode(&self, input: QuestionInput<B>) -> Result<Tensor<B, 2>> {
        match self {
            Self::Recurrent(enc) => enc.encode(input),
            Self::WordVectors(enc) => enc.encode(input),
            Self::Sentence(enc) => enc.encode(input),
        }
    }

    fn output_width(&self) -> usize {
        match self {
            Self::Recurrent(enc) => enc.output_width(),
            Self::WordVectors(enc) => enc.output_width(),
            Self::Sentence(enc) => enc.output_width(),
        }
    }
}

/// `(batch, time, d)` -> `(batch, d)` by averaging over time.
fn mean_over_time<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    x.mean_dim(1).squeeze::<2>(1)
}
