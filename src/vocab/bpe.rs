//! Byte-pair vocabularies (`tokenizer.json`)

use super::byte_unicode::decode_surface;
use super::special::{SpecialToken, SpecialTokens, TokenizerConfig};
use super::{TokenizerModel, VocabEntry, Vocabulary};
use crate::error::{ConvertError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// File holding the merge-table vocabulary
pub const TOKENIZER_JSON_FILE: &str = "tokenizer.json";

/// Read access to a byte-level merge-table vocabulary
pub trait BytePairSource {
    /// Number of ids the tokenizer defines (max id + 1)
    fn vocab_size(&self) -> usize;

    /// Byte-level surface string for `id`
    fn id_to_surface(&self, id: u32) -> Option<&str>;

    /// Id of a surface string
    fn token_to_id(&self, surface: &str) -> Option<u32>;

    /// Merge rules, `"left right"`, in priority order
    fn merges(&self) -> &[String];

    /// Surfaces are byte-level encoded and need [`decode_surface`]
    fn is_byte_level(&self) -> bool {
        true
    }
}

/// Token bytes for a surface string of `source`
pub(crate) fn surface_bytes(source: &impl BytePairSource, surface: &str) -> Vec<u8> {
    if source.is_byte_level() {
        decode_surface(surface)
    } else {
        surface.as_bytes().to_vec()
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerFile {
    model: TokenizerModelSection,
    #[serde(default)]
    added_tokens: Vec<AddedTokenRecord>,
}

#[derive(Debug, Deserialize)]
struct TokenizerModelSection {
    #[serde(default)]
    vocab: ModelVocab,
    #[serde(default)]
    merges: Vec<MergeRule>,
}

/// BPE models map surface to id; Unigram models list `[piece, score]`
/// pairs whose position is the id
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelVocab {
    Map(BTreeMap<String, u32>),
    List(Vec<(String, f64)>),
}

impl Default for ModelVocab {
    fn default() -> Self {
        Self::Map(BTreeMap::new())
    }
}

impl ModelVocab {
    fn is_byte_level(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// `(surface, id)` pairs in a stable order
    fn into_entries(self) -> Vec<(String, u32)> {
        match self {
            Self::Map(map) => map.into_iter().collect(),
            Self::List(pieces) => pieces
                .into_iter()
                .zip(0u32..)
                .map(|((piece, _score), id)| (piece, id))
                .collect(),
        }
    }
}

/// Newer tokenizers store merges as `[left, right]` pairs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MergeRule {
    Joined(String),
    Pair([String; 2]),
}

impl MergeRule {
    fn into_joined(self) -> String {
        match self {
            Self::Joined(rule) => rule,
            Self::Pair([left, right]) => format!("{left} {right}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddedTokenRecord {
    id: u32,
    content: String,
}

/// HuggingFace `tokenizer.json`
#[derive(Debug, Clone, Default)]
pub struct HfTokenizerJson {
    by_surface: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
    merges: Vec<String>,
    size: usize,
    byte_level: bool,
}

impl HfTokenizerJson {
    /// Load `tokenizer.json` from a checkpoint directory
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or
    /// [`ConvertError::TokenizerParse`] if it is malformed.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(TOKENIZER_JSON_FILE);
        let text = std::fs::read_to_string(&path)?;
        Self::from_json(&text).map_err(|message| ConvertError::TokenizerParse {
            file: path,
            message,
        })
    }

    /// Load `tokenizer.json` when the checkpoint has one
    ///
    /// # Errors
    ///
    /// Same as [`HfTokenizerJson::load`].
    pub fn load_optional(model_dir: &Path) -> Result<Option<Self>> {
        if model_dir.join(TOKENIZER_JSON_FILE).is_file() {
            Self::load(model_dir).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Parse `tokenizer.json` content
    ///
    /// # Errors
    ///
    /// Returns the parser message when the JSON does not have a `model`
    /// section with a vocabulary.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        let file: TokenizerFile = serde_json::from_str(json).map_err(|e| e.to_string())?;

        let byte_level = file.model.vocab.is_byte_level();
        let mut by_surface = HashMap::new();
        let mut by_id = HashMap::new();
        for (surface, id) in file.model.vocab.into_entries() {
            by_id.entry(id).or_insert_with(|| surface.clone());
            by_surface.insert(surface, id);
        }
        // added tokens override the model vocabulary by id
        for added in file.added_tokens {
            by_id.insert(added.id, added.content.clone());
            by_surface.insert(added.content, added.id);
        }
        let size = by_id.keys().max().map_or(0, |&max| max as usize + 1);
        let merges = file
            .model
            .merges
            .into_iter()
            .map(MergeRule::into_joined)
            .collect();

        Ok(Self {
            by_surface,
            by_id,
            merges,
            size,
            byte_level,
        })
    }
}

impl BytePairSource for HfTokenizerJson {
    fn vocab_size(&self) -> usize {
        self.size
    }

    fn id_to_surface(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    fn token_to_id(&self, surface: &str) -> Option<u32> {
        self.by_surface.get(surface).copied()
    }

    fn merges(&self) -> &[String] {
        &self.merges
    }

    fn is_byte_level(&self) -> bool {
        self.byte_level
    }
}

/// Builds a [`Vocabulary`] from a byte-pair source
pub struct BytePairExtractor<S> {
    source: S,
    tokenizer_config: TokenizerConfig,
}

impl<S: BytePairSource> BytePairExtractor<S> {
    #[must_use]
    pub fn new(source: S, tokenizer_config: TokenizerConfig) -> Self {
        Self {
            source,
            tokenizer_config,
        }
    }

    /// Extract `declared_size` entries (the tokenizer's own size when `None`)
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::VocabularyOverflow`] when the tokenizer
    /// defines an id at or beyond the declared size.
    pub fn extract(&self, declared_size: Option<usize>) -> Result<Vocabulary> {
        let native = self.source.vocab_size();
        let size = declared_size.unwrap_or(native);
        if native > size {
            return Err(ConvertError::VocabularyOverflow {
                id: u32::try_from(native - 1).unwrap_or(u32::MAX),
                declared: size,
            });
        }

        let mut entries = Vec::with_capacity(size);
        let mut placeholders = 0usize;
        for id in 0..size {
            let entry = match u32::try_from(id).ok().and_then(|id| self.source.id_to_surface(id)) {
                Some(surface) => VocabEntry::normal(surface_bytes(&self.source, surface)),
                None => {
                    tracing::warn!(id, "no surface form for token id, padding with placeholder");
                    placeholders += 1;
                    VocabEntry::placeholder(id)
                }
            };
            entries.push(entry);
        }

        let mut special_tokens = SpecialTokens::default();
        for token in SpecialToken::ALL {
            let Some(surface) = self.tokenizer_config.surface(token) else {
                continue;
            };
            match self.source.token_to_id(surface) {
                Some(id) if (id as usize) < size => special_tokens.set(token, id),
                _ => tracing::debug!(?token, surface, "special token not in vocabulary"),
            }
        }

        tracing::info!(
            tokens = entries.len(),
            placeholders,
            merges = self.source.merges().len(),
            "extracted byte-pair vocabulary"
        );

        Ok(Vocabulary {
            model: TokenizerModel::Gpt2,
            entries,
            merges: self.source.merges().to_vec(),
            special_tokens,
        })
    }
}
