//! External text services consumed by the `bert` and `clip` question
//! strategies.
//!
//! Both run outside burn and return plain vectors; see
//! [`crate::model::bridge`] for the conversion to tensors. The `text-embed`
//! crate provides candle-backed implementations.

/// Per-word vectors for a question, e.g. the hidden states of a BERT
/// encoder with the special tokens removed.
pub trait WordEmbedder: Send + Sync {
    /// Width of each word vector.
    fn dim(&self) -> usize;

    /// One `dim()`-wide vector per word piece of `text`.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// One vector per question from a contrastive text encoder.
pub trait SentenceEmbedder: Send + Sync {
    fn dim(&self) -> usize;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed several questions. The default calls [`Self::embed`] per text.
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
