//! Checkpoint naming, saving and strict loading of [`PuzzleNet`] weights.
//!
//! A checkpoint named `ckpt_{backbone}_{strategy}_{seed}` in `dir` is three
//! files:
//!
//! - `{name}.mpk`: network record (`NamedMpkFileRecorder`, full precision)
//! - `{name}.json`: the [`PuzzleNetConfig`] it was built from
//! - `{name}.meta.json`: [`CheckpointMeta`], checked on load
//!
//! The image backbone is not part of the checkpoint.

use std::path::{Path, PathBuf};

use burn::module::{ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::{Deserialize, Serialize};

use crate::config::{PuzzleNetConfig, TextEmbedding};
use crate::error::{ReasonerError, Result};
use crate::model::PuzzleNet;
use crate::routing::RoutingTable;

/// Metadata saved alongside each checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub seed: u64,
    pub num_params: usize,
    /// Configured puzzle ids, ascending (the routing order).
    pub puzzle_ids: Vec<u32>,
    pub text_embedding: TextEmbedding,
}

/// `ckpt_{backbone}_{strategy}_{seed}`.
pub fn checkpoint_name(backbone: &str, strategy: TextEmbedding, seed: u64) -> String {
    format!("ckpt_{backbone}_{strategy}_{seed}")
}

fn checkpoint_error(path: &Path, reason: impl Into<String>) -> ReasonerError {
    ReasonerError::Checkpoint {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Save `net` and its config under `dir`. Returns the weights path.
pub fn save_checkpoint<B: Backend>(
    net: &PuzzleNet<B>,
    config: &PuzzleNetConfig,
    routing: &RoutingTable,
    dir: &Path,
    seed: u64,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = checkpoint_name(&config.backbone, config.text_embedding, seed);
    let stem = dir.join(&name);

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    net.clone()
        .save_file(stem.clone(), &recorder)
        .map_err(|e| checkpoint_error(&stem, format!("failed to save weights: {e}")))?;

    config.save(stem.with_extension("json"))?;

    let meta = CheckpointMeta {
        seed,
        num_params: net.num_params(),
        puzzle_ids: routing.ids().to_vec(),
        text_embedding: config.text_embedding,
    };
    serde_json::to_writer_pretty(
        std::fs::File::create(stem.with_extension("meta.json"))?,
        &meta,
    )
    .map_err(|e| checkpoint_error(&stem, format!("failed to write metadata: {e}")))?;

    tracing::info!(
        path = %stem.display(),
        seed,
        num_params = meta.num_params,
        "Checkpoint saved (weights + config + meta)"
    );
    Ok(stem.with_extension("mpk"))
}

/// Read the model config saved with checkpoint `stem`.
pub fn load_config(stem: &Path) -> Result<PuzzleNetConfig> {
    let path = stem.with_extension("json");
    PuzzleNetConfig::load(&path).map_err(|e| checkpoint_error(&path, format!("invalid config: {e}")))
}

/// Read the metadata of checkpoint `stem` (path without extension).
pub fn load_meta(stem: &Path) -> Result<CheckpointMeta> {
    let path = stem.with_extension("meta.json");
    let file = std::fs::File::open(&path)
        .map_err(|e| checkpoint_error(&path, format!("cannot open metadata: {e}")))?;
    serde_json::from_reader(file)
        .map_err(|e| checkpoint_error(&path, format!("invalid metadata: {e}")))
}

/// Float parameter shapes in visit order.
struct ShapeCollector {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

/// Shapes of every float parameter of `net`, in module order.
pub fn parameter_shapes<B: Backend>(net: &PuzzleNet<B>) -> Vec<Vec<usize>> {
    let mut collector = ShapeCollector { shapes: Vec::new() };
    net.visit(&mut collector);
    collector.shapes
}

/// Load weights from checkpoint `stem` into `fresh`, a network built from
/// the same configuration.
///
/// Strict: a missing file, an undecodable record, a different puzzle set,
/// a parameter count that differs from `fresh` or any parameter whose
/// shape differs from its counterpart in `fresh` is an error.
pub fn load_checkpoint<B: Backend>(
    stem: &Path,
    fresh: PuzzleNet<B>,
    routing: &RoutingTable,
    device: &B::Device,
) -> Result<PuzzleNet<B>> {
    let weights = stem.with_extension("mpk");
    if !weights.is_file() {
        return Err(checkpoint_error(&weights, "weights file not found"));
    }

    let meta = load_meta(stem)?;
    if meta.puzzle_ids != routing.ids() {
        return Err(checkpoint_error(
            stem,
            format!(
                "saved for puzzles {:?}, model routes {:?}",
                meta.puzzle_ids,
                routing.ids()
            ),
        ));
    }

    let expected = fresh.num_params();
    let expected_shapes = parameter_shapes(&fresh);
    if meta.num_params != expected {
        return Err(checkpoint_error(
            stem,
            format!("saved {} parameters, model has {expected}", meta.num_params),
        ));
    }

    let net = fresh
        .load_file(
            stem.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| checkpoint_error(&weights, format!("failed to load weights: {e}")))?;
    if net.num_params() != expected {
        return Err(checkpoint_error(
            &weights,
            format!("loaded {} parameters, model has {expected}", net.num_params()),
        ));
    }
    let loaded_shapes = parameter_shapes(&net);
    if loaded_shapes.len() != expected_shapes.len() {
        return Err(checkpoint_error(
            &weights,
            format!(
                "loaded {} tensors, model has {}",
                loaded_shapes.len(),
                expected_shapes.len()
            ),
        ));
    }
    if let Some((index, (loaded, wanted))) = loaded_shapes
        .iter()
        .zip(&expected_shapes)
        .enumerate()
        .find(|(_, (loaded, wanted))| loaded != wanted)
    {
        return Err(checkpoint_error(
            &weights,
            format!("tensor {index} has shape {loaded:?}, model expects {wanted:?}"),
        ));
    }

    tracing::info!(path = %stem.display(), seed = meta.seed, "Checkpoint loaded");
    Ok(net)
}
