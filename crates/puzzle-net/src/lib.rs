//! Per-puzzle routed vision-language answer model.
//!
//! A shared trunk (image backbone, question encoder, fusion) feeds banks of
//! per-puzzle image heads and answer decoders. Each example in a mixed batch
//! is routed by its puzzle id; predictions come back keyed by id, either a
//! `(rows, classes)` tensor or a fixed-length sequence of per-step tensors.
//!
//! Bank slot 0 is a placeholder; slot `k + 1` belongs to the `k`-th smallest
//! configured puzzle id (see [`RoutingTable`]).

pub mod checkpoint;
pub mod config;
pub mod embedders;
pub mod error;
pub mod mocks;
pub mod model;
pub mod reasoner;
pub mod registry;
pub mod routing;
pub mod vocab;

pub use config::{AnswerMode, BackboneKind, PuzzleNetConfig, PuzzleSelection, TextEmbedding};
pub use embedders::{SentenceEmbedder, WordEmbedder};
pub use error::{ReasonerError, Result};
pub use model::{ImageBackbone, PuzzleNet, PuzzleOutputs, PuzzlePrediction, QuestionInput};
pub use reasoner::{PuzzleReasoner, QuestionBatch, TextServices};
pub use registry::{PuzzleEntry, PuzzleRegistry};
pub use routing::{DecoderKind, Partition, RoutingTable};
pub use vocab::Vocabulary;
