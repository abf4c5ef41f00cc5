//! Vision encoder around an opaque pretrained image backbone.

use std::sync::Arc;

use burn::prelude::*;

use crate::config::BackboneKind;
use crate::error::{ReasonerError, Result};

/// Pretrained feature extractor with its classification layer removed.
///
/// `forward` maps `(batch, channels, height, width)` images to pooled
/// features `(batch, feature_dim, 1, 1)`. Implementations live outside this
/// crate; weights and preprocessing are their concern.
pub trait ImageBackbone<B: Backend>: Send + Sync {
    /// Identifier matching [`BackboneKind::as_str`].
    fn name(&self) -> &str;

    /// Width of the pooled feature vector.
    fn feature_dim(&self) -> usize;

    fn forward(&self, images: Tensor<B, 4>) -> anyhow::Result<Tensor<B, 4>>;
}

/// Backbone plus freeze policy, producing `(batch, feature_dim)` features.
#[derive(Clone)]
pub struct VisionEncoder<B: Backend> {
    backbone: Arc<dyn ImageBackbone<B>>,
    feature_dim: usize,
    trainable: bool,
}

impl<B: Backend> std::fmt::Debug for VisionEncoder<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionEncoder")
            .field("backbone", &self.backbone.name())
            .field("feature_dim", &self.feature_dim)
            .field("trainable", &self.trainable)
            .finish()
    }
}

impl<B: Backend> VisionEncoder<B> {
    /// Wrap `backbone`, checking it against the configured backbone kind.
    pub fn new(
        backbone: Arc<dyn ImageBackbone<B>>,
        kind: BackboneKind,
        trainable: bool,
    ) -> Result<Self> {
        if backbone.name() != kind.as_str() {
            return Err(ReasonerError::UnknownBackbone(backbone.name().to_string()));
        }
        if backbone.feature_dim() != kind.feature_dim() {
            return Err(ReasonerError::WidthMismatch {
                component: "image backbone",
                expected: kind.feature_dim(),
                actual: backbone.feature_dim(),
            });
        }
        Ok(Self {
            backbone,
            feature_dim: kind.feature_dim(),
            trainable,
        })
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    /// Extract `(batch, feature_dim)` features.
    ///
    /// A frozen backbone's output is detached, so no gradient reaches it.
    pub fn forward(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let [batch, ..] = images.dims();
        let raw = self
            .backbone
            .forward(images)
            .map_err(ReasonerError::Backbone)?;
        let raw = if self.trainable { raw } else { raw.detach() };
        let features = squeeze_features(raw)?;

        let [rows, width] = features.dims();
        if rows != batch {
            return Err(ReasonerError::WidthMismatch {
                component: "image backbone batch",
                expected: batch,
                actual: rows,
            });
        }
        if width != self.feature_dim {
            return Err(ReasonerError::WidthMismatch {
                component: "image backbone",
                expected: self.feature_dim,
                actual: width,
            });
        }
        Ok(features)
    }
}

/// Drop the trailing `1 x 1` spatial dims of pooled features.
///
/// The batch axis is always kept, including for a batch of one.
pub fn squeeze_features<B: Backend>(raw: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
    let dims = raw.dims();
    let [batch, channels, height, width] = dims;
    if height != 1 || width != 1 {
        return Err(ReasonerError::FeatureShape { dims });
    }
    Ok(raw.reshape([batch, channels]))
}
