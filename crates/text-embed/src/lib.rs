//! candle-backed text services for the `bert` and `clip` question
//! strategies of `puzzle-net`.
//!
//! - [`ClipTextEncoder`]: CLIP ViT-B/32 text tower, one 512-d unit vector
//!   per question
//! - [`BertWordEmbedder`]: BERT hidden states, one vector per word piece
//!
//! Both load from a local model directory; see [`TextEncoderConfig`].

pub mod bert;
pub mod clip;
pub mod types;

pub use bert::BertWordEmbedder;
pub use clip::{ClipTextEncoder, CLIP_DIM};
pub use types::{DeviceConfig, TextEncoderConfig};
