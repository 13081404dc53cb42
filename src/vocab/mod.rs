//! Vocabulary extraction
//!
//! Two source formats are reconciled into one ordered token table:
//!
//! - **Byte-pair** (`tokenizer.json`): byte-level surface strings decoded
//!   through the [`byte_unicode`] bijection, merge table forwarded as-is.
//! - **Piece-score** (`tokenizer.model`): SentencePiece pieces with scores and
//!   token classes, extended by `added_tokens.json` and, when the
//!   configuration declares a larger vocabulary, by `tokenizer.json`.
//!
//! Ids are contiguous from 0; gaps get a `[PAD<id>]` placeholder.

pub mod byte_unicode;

mod bpe;
mod piece;
mod sentencepiece;
mod special;


#[cfg(test)]
pub(crate) use sentencepiece::encode as piece_model_encoding;

pub use bpe::{BytePairExtractor, BytePairSource, HfTokenizerJson, TOKENIZER_JSON_FILE};
pub use piece::{AddedTokens, PieceScoreExtractor, PieceSource, ADDED_TOKENS_FILE, ADDED_TOKEN_SCORE};
pub use sentencepiece::{Piece, PieceType, SentencePieceModel, PIECE_MODEL_FILE};
pub use special::{SpecialToken, SpecialTokens, TokenizerConfig, TOKENIZER_CONFIG_FILE};

use crate::arch::ArchitectureDescriptor;
use crate::error::{ConvertError, Result};
use crate::hparams::HyperParams;
use std::path::Path;

/// GGUF token type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TokenKind {
    Normal = 1,
    Unknown = 2,
    Control = 3,
    UserDefined = 4,
    Unused = 5,
    Byte = 6,
}

impl TokenKind {
    /// Code written to `tokenizer.ggml.token_type`
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// One vocabulary slot
#[derive(Debug, Clone, PartialEq)]
pub struct VocabEntry {
    /// Token bytes (not necessarily valid UTF-8)
    pub text: Vec<u8>,
    pub score: f32,
    pub kind: TokenKind,
}

impl VocabEntry {
    /// Normal token with score 0.0
    #[must_use]
    pub fn normal(text: Vec<u8>) -> Self {
        Self {
            text,
            score: 0.0,
            kind: TokenKind::Normal,
        }
    }

    /// Synthesized stand-in for an id with no surface form
    #[must_use]
    pub fn placeholder(id: usize) -> Self {
        Self::normal(placeholder_text(id).into_bytes())
    }
}

/// Text of the placeholder for `id`
#[must_use]
pub fn placeholder_text(id: usize) -> String {
    format!("[PAD{id}]")
}

/// `tokenizer.ggml.model` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerModel {
    /// Byte-level BPE with merges
    Gpt2,
    /// SentencePiece
    Llama,
}

impl TokenizerModel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gpt2 => "gpt2",
            Self::Llama => "llama",
        }
    }
}

/// Canonical token table for one checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    pub model: TokenizerModel,
    /// Entries in id order
    pub entries: Vec<VocabEntry>,
    /// Merge rules (byte-pair only)
    pub merges: Vec<String>,
    pub special_tokens: SpecialTokens,
}

impl Vocabulary {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill special ids the tokenizer did not declare from the
    /// configuration, then apply the architecture's fixed ids
    pub fn reconcile_special_tokens(&mut self, desc: &ArchitectureDescriptor, hparams: &HyperParams) {
        self.special_tokens.fill_missing(&hparams.special_tokens);
        for &(token, id) in desc.fixed_special_tokens {
            self.special_tokens.set(token, id);
        }
        for (token, id) in self.special_tokens.iter() {
            if id as usize >= self.entries.len() {
                tracing::warn!(?token, id, size = self.entries.len(), "special token id outside vocabulary");
            }
        }
    }
}

/// Which extractor a checkpoint directory selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabVariant {
    BytePair,
    PieceScore,
}

/// Select the extractor for `model_dir`
///
/// A piece model wins over `tokenizer.json`, which then only serves as the
/// expansion source.
///
/// # Errors
///
/// Returns [`ConvertError::MissingVocabularyFile`] when the architecture
/// requires a piece model that is absent, or
/// [`ConvertError::NoVocabularySource`] when neither file exists.
pub fn select_variant(model_dir: &Path, desc: &ArchitectureDescriptor) -> Result<VocabVariant> {
    let has_piece_model = model_dir.join(PIECE_MODEL_FILE).is_file();
    if has_piece_model {
        return Ok(VocabVariant::PieceScore);
    }
    if desc.requires_piece_model {
        return Err(ConvertError::MissingVocabularyFile {
            architecture: desc.gguf_name.to_string(),
            file: PIECE_MODEL_FILE.to_string(),
        });
    }
    if model_dir.join(TOKENIZER_JSON_FILE).is_file() {
        return Ok(VocabVariant::BytePair);
    }
    Err(ConvertError::NoVocabularySource {
        dir: model_dir.to_path_buf(),
    })
}

/// Extract the vocabulary of the checkpoint in `model_dir`
///
/// # Errors
///
/// Propagates selection, parse and overflow errors.
pub fn extract(
    model_dir: &Path,
    desc: &ArchitectureDescriptor,
    hparams: &HyperParams,
) -> Result<Vocabulary> {
    let variant = select_variant(model_dir, desc)?;
    tracing::info!(?variant, "loading vocabulary");

    let mut vocab = match variant {
        VocabVariant::PieceScore => {
            let model = SentencePieceModel::load(model_dir)?;
            let dir = model_dir.to_path_buf();
            PieceScoreExtractor::new(model)
                .with_added_tokens(AddedTokens::load_optional(model_dir)?)
                .with_expansion_loader(move || HfTokenizerJson::load_optional(&dir))
                .extract(hparams.vocab_size)?
        }
        VocabVariant::BytePair => {
            let tokenizer = HfTokenizerJson::load(model_dir)?;
            BytePairExtractor::new(tokenizer, TokenizerConfig::load_optional(model_dir)?)
                .extract(hparams.vocab_size)?
        }
    };

    vocab.reconcile_special_tokens(desc, hparams);
    Ok(vocab)
}
