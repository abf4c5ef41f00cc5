use std::path::PathBuf;

/// Errors raised while building or running a puzzle model.
///
/// Every variant is fatal for the call that produced it. Nothing in this
/// crate retries or falls back to a partial result.
#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    /// Backbone identifier has no known feature width.
    #[error("unknown backbone `{0}`")]
    UnknownBackbone(String),

    /// Text-embedding strategy string did not parse.
    #[error("unsupported text embedding strategy `{0}`")]
    UnsupportedTextEmbedding(String),

    /// The strategy needs a vocabulary and none was found.
    #[error("vocabulary file not found: {}", .0.display())]
    MissingVocabulary(PathBuf),

    /// Vocabulary was readable but malformed.
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// The strategy needs an external text service that was not supplied.
    #[error("text embedding strategy `{strategy}` requires a {service}")]
    MissingTextService {
        strategy: &'static str,
        service: &'static str,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Registry file or entries failed validation.
    #[error("invalid puzzle registry: {0}")]
    InvalidRegistry(String),

    /// A configured puzzle id has no registry entry.
    #[error("puzzle {0} is configured but missing from the registry")]
    UnknownPuzzle(u32),

    /// A batch carries a puzzle id that has no slot in the banks.
    #[error("puzzle {0} is not routed by this model")]
    UnroutedPuzzle(u32),

    /// Images, questions and puzzle ids disagree on batch size.
    #[error("batch size mismatch: {images} images, {questions} questions, {ids} puzzle ids")]
    BatchMismatch {
        images: usize,
        questions: usize,
        ids: usize,
    },

    /// Two components disagree on a feature width.
    #[error("{component}: expected width {expected}, got {actual}")]
    WidthMismatch {
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Backbone output cannot be reduced to `[batch, width]`.
    #[error("backbone output {dims:?} has non-singleton spatial dims")]
    FeatureShape { dims: [usize; 4] },

    /// Question representation does not match the configured strategy.
    #[error("text embedding strategy `{strategy}` cannot encode {given} questions")]
    QuestionKind {
        strategy: &'static str,
        given: &'static str,
    },

    /// A token row contains only padding.
    #[error("question row {row} contains no tokens")]
    EmptyQuestion { row: usize },

    /// A sequence decoder step produced or received the wrong shape.
    #[error("puzzle {puzzle}, decode step {step}: expected {expected:?}, got {actual:?}")]
    DecodeStep {
        puzzle: u32,
        step: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Checkpoint missing or not an exact match for the live model.
    #[error("checkpoint {}: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    /// The image backbone failed.
    #[error("image backbone error: {0}")]
    Backbone(#[source] anyhow::Error),

    /// An external text service failed.
    #[error("text service error: {0}")]
    TextService(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = ReasonerError> = std::result::Result<T, E>;
