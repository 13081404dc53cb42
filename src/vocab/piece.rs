//! Piece-score vocabularies (`tokenizer.model` plus optional extensions)

use super::bpe::{surface_bytes, BytePairSource};
use super::special::SpecialTokens;
use super::{TokenKind, TokenizerModel, VocabEntry, Vocabulary};
use crate::error::{ConvertError, Result};
use std::collections::HashMap;
use std::path::Path;

/// File listing tokens appended after the piece model's own ids
pub const ADDED_TOKENS_FILE: &str = "added_tokens.json";

/// Score given to every appended added token
pub const ADDED_TOKEN_SCORE: f32 = -1000.0;

/// Read access to a piece-score model
pub trait PieceSource {
    /// Number of pieces in the model
    fn vocab_size(&self) -> usize;

    /// Piece text for `id`
    fn id_to_piece(&self, id: u32) -> Option<&str>;

    /// Piece score for `id`
    fn score(&self, id: u32) -> f32;

    fn is_unknown(&self, id: u32) -> bool;
    fn is_control(&self, id: u32) -> bool;
    fn is_unused(&self, id: u32) -> bool;
    fn is_byte(&self, id: u32) -> bool;

    /// Special ids declared by the model itself
    fn special_ids(&self) -> SpecialTokens;
}

/// Classify one native id; the classes are mutually exclusive
fn classify(source: &impl PieceSource, id: u32) -> TokenKind {
    if source.is_byte(id) {
        TokenKind::Byte
    } else if source.is_unused(id) {
        TokenKind::Unused
    } else if source.is_control(id) {
        TokenKind::Control
    } else if source.is_unknown(id) {
        TokenKind::Unknown
    } else {
        TokenKind::Normal
    }
}

/// Tokens from `added_tokens.json`, sorted by declared id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddedTokens {
    tokens: Vec<(String, u32)>,
}

impl AddedTokens {
    /// Load `added_tokens.json` when the checkpoint has one
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::TokenizerParse`] if the file is not a map of
    /// token text to id.
    pub fn load_optional(model_dir: &Path) -> Result<Option<Self>> {
        let path = model_dir.join(ADDED_TOKENS_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let map: HashMap<String, u32> =
            serde_json::from_str(&text).map_err(|e| ConvertError::TokenizerParse {
                file: path,
                message: e.to_string(),
            })?;
        Ok(Some(Self::new(map)))
    }

    #[must_use]
    pub fn new(map: impl IntoIterator<Item = (String, u32)>) -> Self {
        let mut tokens: Vec<(String, u32)> = map.into_iter().collect();
        tokens.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Self { tokens }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Deferred load of the secondary tokenizer
type ExpansionLoader<S> = Box<dyn Fn() -> Result<Option<S>>>;

enum Expansion<S> {
    Absent,
    Loaded(S),
    Deferred(ExpansionLoader<S>),
}

/// Builds a [`Vocabulary`] from a piece model, appending added tokens and
/// expanding from a secondary byte-pair tokenizer up to the declared size
pub struct PieceScoreExtractor<P, S> {
    pieces: P,
    added: Option<AddedTokens>,
    expansion: Expansion<S>,
}

impl<P: PieceSource, S: BytePairSource> PieceScoreExtractor<P, S> {
    #[must_use]
    pub fn new(pieces: P) -> Self {
        Self {
            pieces,
            added: None,
            expansion: Expansion::Absent,
        }
    }

    #[must_use]
    pub fn with_added_tokens(mut self, added: Option<AddedTokens>) -> Self {
        self.added = added;
        self
    }

    #[must_use]
    pub fn with_expansion(mut self, expansion: Option<S>) -> Self {
        self.expansion = expansion.map_or(Expansion::Absent, Expansion::Loaded);
        self
    }

    /// Secondary tokenizer loaded only if the declared size leaves a gap
    #[must_use]
    pub fn with_expansion_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Option<S>> + 'static,
    {
        self.expansion = Expansion::Deferred(Box::new(loader));
        self
    }

    /// Extract the vocabulary, expanded to `declared_size` when it exceeds
    /// the native and added tokens
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::VocabularyOverflow`] when the native and
    /// added tokens alone exceed `declared_size`, and propagates errors of a
    /// deferred secondary tokenizer load.
    pub fn extract(&self, declared_size: Option<usize>) -> Result<Vocabulary> {
        let native = self.pieces.vocab_size();
        let mut entries = Vec::with_capacity(declared_size.unwrap_or(native).max(native));

        for id in 0..native {
            let Ok(id32) = u32::try_from(id) else {
                break;
            };
            let entry = match self.pieces.id_to_piece(id32) {
                Some(piece) => VocabEntry {
                    text: piece.as_bytes().to_vec(),
                    score: self.pieces.score(id32),
                    kind: classify(&self.pieces, id32),
                },
                None => VocabEntry::placeholder(id),
            };
            entries.push(entry);
        }

        if let Some(added) = &self.added {
            for (text, declared_id) in &added.tokens {
                let id = entries.len();
                if *declared_id as usize != id {
                    tracing::warn!(
                        token = %text,
                        declared_id,
                        appended_at = id,
                        "added token id disagrees with its appended position"
                    );
                }
                entries.push(VocabEntry {
                    text: text.as_bytes().to_vec(),
                    score: ADDED_TOKEN_SCORE,
                    kind: TokenKind::UserDefined,
                });
            }
        }

        if let Some(declared) = declared_size {
            if entries.len() > declared {
                return Err(ConvertError::VocabularyOverflow {
                    id: u32::try_from(entries.len() - 1).unwrap_or(u32::MAX),
                    declared,
                });
            }
            if entries.len() < declared {
                self.expand(&mut entries, declared)?;
            }
        }

        tracing::info!(
            tokens = entries.len(),
            native,
            added = self.added.as_ref().map_or(0, AddedTokens::len),
            "extracted piece-score vocabulary"
        );

        Ok(Vocabulary {
            model: TokenizerModel::Llama,
            entries,
            merges: Vec::new(),
            special_tokens: self.pieces.special_ids(),
        })
    }

    fn expand(&self, entries: &mut Vec<VocabEntry>, declared: usize) -> Result<()> {
        match &self.expansion {
            Expansion::Absent => fill_gap::<S>(None, entries, declared),
            Expansion::Loaded(secondary) => fill_gap(Some(secondary), entries, declared),
            Expansion::Deferred(load) => fill_gap(load()?.as_ref(), entries, declared),
        }
        Ok(())
    }
}

fn fill_gap<S: BytePairSource>(secondary: Option<&S>, entries: &mut Vec<VocabEntry>, declared: usize) {
    let start = entries.len();
    let Some(secondary) = secondary else {
        tracing::warn!(
            from = start,
            to = declared,
            "declared vocabulary exceeds the piece model and no tokenizer.json is present, padding with placeholders"
        );
        entries.extend((start..declared).map(VocabEntry::placeholder));
        return;
    };

    for id in start..declared {
        let surface = u32::try_from(id).ok().and_then(|id| secondary.id_to_surface(id));
        let entry = match surface {
            Some(surface) => VocabEntry::normal(surface_bytes(secondary, surface)),
            None => {
                tracing::warn!(id, "id not in tokenizer.json, padding with placeholder");
                VocabEntry::placeholder(id)
            }
        };
        entries.push(entry);
    }
    tracing::info!(merged = declared - start, "expanded vocabulary from tokenizer.json");
}
