//! Question vocabulary: token ids to words and back.
//!
//! Stored as JSON, `{"idx2word": ["<pad>", "<start>", "<end>", "<unk>", ...]}`.
//! Index 0 is always padding.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ReasonerError, Result};

pub const PAD_TOKEN: &str = "<pad>";
pub const START_TOKEN: &str = "<start>";
pub const END_TOKEN: &str = "<end>";
pub const UNK_TOKEN: &str = "<unk>";

/// Tokens dropped from the end of a long question's decode window.
pub const LONG_WINDOW_TRIM: usize = 4;

/// A decode window must keep at least one token after the trim.
pub fn check_decode_window(window: usize) -> Result<()> {
    if window <= LONG_WINDOW_TRIM {
        return Err(ReasonerError::InvalidConfig(format!(
            "decode_window {window} must exceed the long-question trim of {LONG_WINDOW_TRIM}"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct VocabularyJson {
    idx2word: Vec<String>,
}

/// Bidirectional word/index mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    idx2word: Vec<String>,
    word2idx: HashMap<String, u32>,
}

impl Vocabulary {
    /// Build a vocabulary from its index-ordered word list.
    pub fn new(idx2word: Vec<String>) -> Result<Self> {
        if idx2word.first().map(String::as_str) != Some(PAD_TOKEN) {
            return Err(ReasonerError::InvalidVocabulary(format!(
                "index 0 must be {PAD_TOKEN}"
            )));
        }
        let mut word2idx = HashMap::with_capacity(idx2word.len());
        for (idx, word) in idx2word.iter().enumerate() {
            if word2idx.insert(word.clone(), idx as u32).is_some() {
                return Err(ReasonerError::InvalidVocabulary(format!(
                    "word `{word}` appears twice"
                )));
            }
        }
        for special in [START_TOKEN, END_TOKEN, UNK_TOKEN] {
            if !word2idx.contains_key(special) {
                return Err(ReasonerError::InvalidVocabulary(format!(
                    "missing special token {special}"
                )));
            }
        }
        Ok(Self { idx2word, word2idx })
    }

    /// Load a vocabulary from JSON. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReasonerError::MissingVocabulary(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let raw: VocabularyJson = serde_json::from_str(&contents)
            .map_err(|e| ReasonerError::InvalidVocabulary(e.to_string()))?;
        let vocab = Self::new(raw.idx2word)?;
        tracing::info!(path = %path.display(), size = vocab.len(), "Loaded vocabulary");
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.idx2word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx2word.is_empty()
    }

    pub fn word(&self, idx: u32) -> Option<&str> {
        self.idx2word.get(idx as usize).map(String::as_str)
    }

    pub fn index(&self, word: &str) -> Option<u32> {
        self.word2idx.get(word).copied()
    }

    fn special(&self, token: &str) -> u32 {
        // Presence checked in `new`.
        self.word2idx.get(token).copied().unwrap_or(0)
    }

    /// Tokenize `text` into exactly `max_len` ids: `<start> words.. <end>`,
    /// unknown words as `<unk>`, truncated or zero padded.
    pub fn encode(&self, text: &str, max_len: usize) -> Vec<u32> {
        let unk = self.special(UNK_TOKEN);
        let mut ids = Vec::with_capacity(max_len);
        ids.push(self.special(START_TOKEN));
        ids.extend(
            text.split_whitespace()
                .map(|w| self.index(&w.to_lowercase()).unwrap_or(unk)),
        );
        ids.push(self.special(END_TOKEN));
        ids.resize(max_len, 0);
        ids
    }

    /// Recover question text from a padded token row.
    ///
    /// With `x` the position of the last non-zero token, keeps `row[1..x]`
    /// when `x < window` and `row[x - window + 4..x]` otherwise, so the
    /// leading `<start>` and the trailing `<end>` are dropped. A row with no
    /// non-zero token is an error, and so is a window no wider than the trim.
    pub fn decode_question(&self, row: &[i64], row_index: usize, window: usize) -> Result<String> {
        check_decode_window(window)?;
        let last = row
            .iter()
            .rposition(|&t| t != 0)
            .ok_or(ReasonerError::EmptyQuestion { row: row_index })?;
        let start = if last < window {
            1
        } else {
            last - window.saturating_sub(LONG_WINDOW_TRIM)
        };
        let words: Vec<&str> = row
            .get(start..last)
            .unwrap_or(&[])
            .iter()
            .map(|&t| {
                u32::try_from(t)
                    .ok()
                    .and_then(|t| self.word(t))
                    .unwrap_or(UNK_TOKEN)
            })
            .collect();
        Ok(words.join(" "))
    }
}
