//! Puzzle id to bank slot mapping and per-batch partitioning.
//!
//! Bank slot 0 is a placeholder; slot `i >= 1` belongs to the `(i-1)`-th
//! smallest configured puzzle id. The table is derived from the sorted id
//! list alone, so it is identical for any ordering of the configured ids.

use std::collections::BTreeMap;

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::config::{PuzzleNetConfig, PuzzleSelection};
use crate::error::{ReasonerError, Result};
use crate::registry::PuzzleRegistry;

/// Which decoder a bank slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// Feed-forward head emitting `num_classes` values per example.
    Fixed { num_classes: usize },
    /// Recurrent decoder emitting `num_classes` values per step.
    Sequence { num_classes: usize },
}

impl DecoderKind {
    pub fn num_classes(self) -> usize {
        match self {
            Self::Fixed { num_classes } | Self::Sequence { num_classes } => num_classes,
        }
    }

    pub fn is_sequence(self) -> bool {
        matches!(self, Self::Sequence { .. })
    }
}

/// Immutable routing structure shared by the image head and answer banks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    /// Configured ids, ascending. Slot of `ids[k]` is `k + 1`.
    ids: Vec<u32>,
    kinds: Vec<DecoderKind>,
    slots: BTreeMap<u32, usize>,
    max_decode_steps: usize,
}

impl RoutingTable {
    /// Resolve the configured puzzle set against the registry.
    pub fn build(config: &PuzzleNetConfig, registry: &PuzzleRegistry) -> Result<Self> {
        let mut ids = match &config.puzzles {
            PuzzleSelection::All => registry.ids(),
            PuzzleSelection::Only { ids } => ids.clone(),
        };
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(ReasonerError::InvalidRegistry(
                "no puzzles configured".to_string(),
            ));
        }

        let mut kinds = Vec::with_capacity(ids.len());
        for &id in &ids {
            let entry = registry.get(id).ok_or(ReasonerError::UnknownPuzzle(id))?;
            let num_classes = config.output_classes(entry.num_classes);
            kinds.push(if entry.sequential {
                DecoderKind::Sequence { num_classes }
            } else {
                DecoderKind::Fixed { num_classes }
            });
        }
        let slots = ids.iter().enumerate().map(|(k, &id)| (id, k + 1)).collect();

        Ok(Self {
            ids,
            kinds,
            slots,
            max_decode_steps: registry.max_decode_steps(),
        })
    }

    /// Configured ids, ascending.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Number of bank slots, placeholder included.
    pub fn bank_len(&self) -> usize {
        self.ids.len() + 1
    }

    /// Decoder kinds in slot order, placeholder excluded.
    pub fn kinds(&self) -> &[DecoderKind] {
        &self.kinds
    }

    pub fn slot_of(&self, id: u32) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// Puzzle id held by `slot`; `None` for the placeholder or out of range.
    pub fn id_at(&self, slot: usize) -> Option<u32> {
        slot.checked_sub(1).and_then(|k| self.ids.get(k).copied())
    }

    pub fn kind_at(&self, slot: usize) -> Option<DecoderKind> {
        slot.checked_sub(1).and_then(|k| self.kinds.get(k).copied())
    }

    pub fn kind_of(&self, id: u32) -> Option<DecoderKind> {
        self.slot_of(id).and_then(|slot| self.kind_at(slot))
    }

    pub fn max_decode_steps(&self) -> usize {
        self.max_decode_steps
    }

    /// Group batch rows by puzzle id.
    ///
    /// Groups come out in ascending id order; rows inside a group keep their
    /// input order. Any id without a slot fails the whole batch.
    pub fn partition(&self, puzzle_ids: &[u32]) -> Result<Partition> {
        let mut rows: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (row, &id) in puzzle_ids.iter().enumerate() {
            if !self.slots.contains_key(&id) {
                return Err(ReasonerError::UnroutedPuzzle(id));
            }
            rows.entry(id).or_default().push(row);
        }
        let groups = rows
            .into_iter()
            .map(|(id, rows)| PuzzleGroup {
                id,
                slot: self.slots[&id],
                rows,
            })
            .collect();
        Ok(Partition {
            batch_size: puzzle_ids.len(),
            groups,
        })
    }
}

/// Rows of one batch that share a puzzle id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleGroup {
    pub id: u32,
    /// Bank slot of `id`.
    pub slot: usize,
    /// Original batch rows, ascending.
    pub rows: Vec<usize>,
}

impl PuzzleGroup {
    /// Row indices as an index tensor for `select` / `select_assign`.
    pub fn row_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1, Int> {
        let rows: Vec<i64> = self.rows.iter().map(|&r| r as i64).collect();
        Tensor::from_data(TensorData::new(rows, [self.rows.len()]), device)
    }
}

/// A batch split into per-puzzle groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    batch_size: usize,
    groups: Vec<PuzzleGroup>,
}

impl Partition {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn groups(&self) -> &[PuzzleGroup] {
        &self.groups
    }

    /// Distinct ids of the batch, ascending.
    pub fn ids(&self) -> Vec<u32> {
        self.groups.iter().map(|g| g.id).collect()
    }
}
