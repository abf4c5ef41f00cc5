//! Fusion of the per-row image and question embeddings.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::error::{ReasonerError, Result};

/// Joins image and question embeddings into one joint embedding.
///
/// ```text
/// cat(image, question) (batch, 2w) -> Linear -> ReLU -> Linear -> ReLU -> (batch, w)
/// ```
#[derive(Module, Debug)]
pub struct Fusion<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    width: usize,
}

impl<B: Backend> Fusion<B> {
    /// Build for shared width `width`, given the widths the two encoders
    /// actually emit.
    pub fn new(
        width: usize,
        image_width: usize,
        question_width: usize,
        device: &B::Device,
    ) -> Result<Self> {
        for (component, actual) in [("image head", image_width), ("question encoder", question_width)] {
            if actual != width {
                return Err(ReasonerError::WidthMismatch {
                    component,
                    expected: width,
                    actual,
                });
            }
        }
        Ok(Self {
            linear1: LinearConfig::new(2 * width, width).init(device),
            linear2: LinearConfig::new(width, width).init(device),
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn forward(&self, image: Tensor<B, 2>, question: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = Tensor::cat(vec![image, question], 1);
        let x = relu(self.linear1.forward(x));
        relu(self.linear2.forward(x))
    }
}
