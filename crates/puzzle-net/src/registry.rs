//! Puzzle catalog: per-id answer schema plus the global decoding limits.
//!
//! The registry is an immutable value handed to model construction. It is
//! usually deserialized from TOML:
//!
//! ```toml
//! max_decode_steps = 10
//! max_question_len = 110
//! placeholder_value = 256
//!
//! [[puzzles]]
//! id = 1
//! num_classes = 257
//!
//! [[puzzles]]
//! id = 16
//! num_classes = 257
//! sequential = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ReasonerError, Result};

/// Answer schema of one puzzle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PuzzleEntry {
    /// Puzzle id, 1-based.
    pub id: u32,
    /// Number of answer classes in classification mode.
    pub num_classes: usize,
    /// Whether the answer is an ordered multi-step output.
    #[serde(default)]
    pub sequential: bool,
}

/// Raw TOML shape, validated into [`PuzzleRegistry`].
#[derive(Debug, Deserialize)]
struct RegistryToml {
    #[serde(default = "default_max_decode_steps")]
    max_decode_steps: usize,
    #[serde(default = "default_max_question_len")]
    max_question_len: usize,
    #[serde(default = "default_placeholder_value")]
    placeholder_value: i64,
    puzzles: Vec<PuzzleEntry>,
}

fn default_max_decode_steps() -> usize {
    10
}
fn default_max_question_len() -> usize {
    110
}
fn default_placeholder_value() -> i64 {
    256
}

/// Validated puzzle catalog keyed by puzzle id.
#[derive(Debug, Clone, PartialEq)]
pub struct PuzzleRegistry {
    entries: BTreeMap<u32, PuzzleEntry>,
    max_decode_steps: usize,
    max_question_len: usize,
    placeholder_value: i64,
}

impl PuzzleRegistry {
    /// Build a registry from entries and the default limits.
    pub fn new(entries: impl IntoIterator<Item = PuzzleEntry>) -> Result<Self> {
        Self::with_limits(
            entries,
            default_max_decode_steps(),
            default_max_question_len(),
            default_placeholder_value(),
        )
    }

    /// Build a registry with explicit decoding limits.
    pub fn with_limits(
        entries: impl IntoIterator<Item = PuzzleEntry>,
        max_decode_steps: usize,
        max_question_len: usize,
        placeholder_value: i64,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.id == 0 {
                return Err(ReasonerError::InvalidRegistry(
                    "puzzle id 0 is reserved".to_string(),
                ));
            }
            if entry.num_classes == 0 {
                return Err(ReasonerError::InvalidRegistry(format!(
                    "puzzle {} declares zero answer classes",
                    entry.id
                )));
            }
            if map.insert(entry.id, entry).is_some() {
                return Err(ReasonerError::InvalidRegistry(format!(
                    "puzzle {} is listed twice",
                    entry.id
                )));
            }
        }
        if map.is_empty() {
            return Err(ReasonerError::InvalidRegistry(
                "registry lists no puzzles".to_string(),
            ));
        }
        if max_question_len == 0 {
            return Err(ReasonerError::InvalidRegistry(
                "max_question_len must be positive".to_string(),
            ));
        }
        if max_decode_steps == 0 {
            tracing::warn!("max_decode_steps = 0; sequence puzzles will decode to empty outputs");
        }

        Ok(Self {
            entries: map,
            max_decode_steps,
            max_question_len,
            placeholder_value,
        })
    }

    /// Parse and validate a registry from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RegistryToml =
            toml::from_str(contents).map_err(|e| ReasonerError::InvalidRegistry(e.to_string()))?;
        Self::with_limits(
            raw.puzzles,
            raw.max_decode_steps,
            raw.max_question_len,
            raw.placeholder_value,
        )
    }

    /// Load a registry from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let registry = Self::from_toml_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            puzzles = registry.num_puzzles(),
            sequential = registry.sequential_ids().len(),
            "Loaded puzzle registry"
        );
        Ok(registry)
    }

    pub fn num_puzzles(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: u32) -> Option<&PuzzleEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// All puzzle ids, ascending.
    pub fn ids(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    /// Ids whose answers are decoded step by step, ascending.
    pub fn sequential_ids(&self) -> Vec<u32> {
        self.entries
            .values()
            .filter(|e| e.sequential)
            .map(|e| e.id)
            .collect()
    }

    pub fn num_classes(&self, id: u32) -> Option<usize> {
        self.entries.get(&id).map(|e| e.num_classes)
    }

    pub fn is_sequential(&self, id: u32) -> Option<bool> {
        self.entries.get(&id).map(|e| e.sequential)
    }

    /// Fixed number of steps every sequence decoder runs.
    pub fn max_decode_steps(&self) -> usize {
        self.max_decode_steps
    }

    /// Length word-vector questions are padded or truncated to.
    pub fn max_question_len(&self) -> usize {
        self.max_question_len
    }

    /// Value used for unfilled answer slots in targets.
    pub fn placeholder_value(&self) -> i64 {
        self.placeholder_value
    }
}
