//! Image head bank: backbone features to the shared embedding width, either
//! through one shared head or through one head per puzzle.

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use crate::error::{ReasonerError, Result};
use crate::routing::{Partition, RoutingTable};

/// Two linear layers with a ReLU between them.
///
/// ```text
/// (batch, d_input) -> Linear -> ReLU -> Linear -> (batch, d_output)
/// ```
#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
}

impl<B: Backend> ProjectionHead<B> {
    pub fn new(d_input: usize, d_output: usize, device: &B::Device) -> Self {
        Self {
            linear1: LinearConfig::new(d_input, d_output).init(device),
            linear2: LinearConfig::new(d_output, d_output).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.linear1.forward(x));
        self.linear2.forward(x)
    }
}

/// One slot of the per-puzzle bank.
#[derive(Module, Debug)]
pub enum ImageHeadSlot<B: Backend> {
    /// Slot 0. Never routed to.
    Placeholder(Linear<B>),
    Head(ProjectionHead<B>),
}

/// Image heads, shared or per puzzle.
#[derive(Module, Debug)]
pub enum ImageHeads<B: Backend> {
    Shared(ProjectionHead<B>),
    PerPuzzle(Vec<ImageHeadSlot<B>>),
}

impl<B: Backend> ImageHeads<B> {
    /// A single head applied to every example.
    pub fn shared(feature_dim: usize, feat_size: usize, device: &B::Device) -> Self {
        Self::Shared(ProjectionHead::new(feature_dim, feat_size, device))
    }

    /// A placeholder at slot 0, then one head per configured puzzle in slot
    /// order.
    pub fn per_puzzle(
        routing: &RoutingTable,
        feature_dim: usize,
        feat_size: usize,
        device: &B::Device,
    ) -> Self {
        let mut slots = Vec::with_capacity(routing.bank_len());
        slots.push(ImageHeadSlot::Placeholder(
            LinearConfig::new(feat_size, 1).init(device),
        ));
        for _ in routing.ids() {
            slots.push(ImageHeadSlot::Head(ProjectionHead::new(
                feature_dim,
                feat_size,
                device,
            )));
        }
        Self::PerPuzzle(slots)
    }

    /// Number of bank slots; 1 for the shared head.
    pub fn len(&self) -> usize {
        match self {
            Self::Shared(_) => 1,
            Self::PerPuzzle(slots) => slots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Project `(batch, feature_dim)` features to `(batch, feat_size)`.
    ///
    /// Per-puzzle mode runs each group's head on that group's rows only and
    /// scatters the ReLU'd result back to the original rows.
    pub fn forward(
        &self,
        features: Tensor<B, 2>,
        partition: &Partition,
        feat_size: usize,
    ) -> Result<Tensor<B, 2>> {
        let slots = match self {
            Self::Shared(head) => return Ok(head.forward(features)),
            Self::PerPuzzle(slots) => slots,
        };

        let [batch, _] = features.dims();
        let device = features.device();
        let mut output = Tensor::<B, 2>::zeros([batch, feat_size], &device);
        for group in partition.groups() {
            let head = match slots.get(group.slot) {
                Some(ImageHeadSlot::Head(head)) => head,
                _ => return Err(ReasonerError::UnroutedPuzzle(group.id)),
            };
            let rows = group.row_tensor::<B>(&device);
            let embedded = relu(head.forward(features.clone().select(0, rows.clone())));
            output = output.select_assign(0, rows, embedded);
        }
        Ok(output)
    }
}
