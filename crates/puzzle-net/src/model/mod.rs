//! Model components: vision encoder, image head bank, question encoders,
//! fusion, answer decoder bank, and the tensor bridge from external text
//! services.

pub mod answer;
pub mod bridge;
pub mod fusion;
pub mod image_head;
pub mod net;
pub mod question;
pub mod vision;

pub use answer::{AnswerBank, PuzzleOutputs, PuzzlePrediction};
pub use net::PuzzleNet;
pub use question::{QuestionEncoder, QuestionEncoding, QuestionInput};
pub use vision::{ImageBackbone, VisionEncoder};
