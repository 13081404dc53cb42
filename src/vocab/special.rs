//! Special-token roles and their id assignments.

use crate::error::{ConvertError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// File naming the special-token surface forms
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Role a special token plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecialToken {
    /// Beginning of sequence
    Bos,
    /// End of sequence
    Eos,
    /// Unknown
    Unk,
    /// Separator
    Sep,
    /// Padding
    Pad,
}

impl SpecialToken {
    /// Every role, in metadata emission order
    pub const ALL: [Self; 5] = [Self::Bos, Self::Eos, Self::Unk, Self::Sep, Self::Pad];

    /// `config.json` key holding the id
    #[must_use]
    pub const fn config_id_key(self) -> &'static str {
        match self {
            Self::Bos => "bos_token_id",
            Self::Eos => "eos_token_id",
            Self::Unk => "unk_token_id",
            Self::Sep => "sep_token_id",
            Self::Pad => "pad_token_id",
        }
    }

    /// `tokenizer_config.json` key holding the surface form
    #[must_use]
    pub const fn tokenizer_config_key(self) -> &'static str {
        match self {
            Self::Bos => "bos_token",
            Self::Eos => "eos_token",
            Self::Unk => "unk_token",
            Self::Sep => "sep_token",
            Self::Pad => "pad_token",
        }
    }

    /// GGUF metadata key
    #[must_use]
    pub const fn gguf_key(self) -> &'static str {
        match self {
            Self::Bos => "tokenizer.ggml.bos_token_id",
            Self::Eos => "tokenizer.ggml.eos_token_id",
            Self::Unk => "tokenizer.ggml.unknown_token_id",
            // key name as consumed by GGUF readers
            Self::Sep => "tokenizer.ggml.seperator_token_id",
            Self::Pad => "tokenizer.ggml.padding_token_id",
        }
    }
}

/// Special-token id assignments, at most one id per role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    ids: BTreeMap<SpecialToken, u32>,
}

impl SpecialTokens {
    /// Id assigned to `token`
    #[must_use]
    pub fn get(&self, token: SpecialToken) -> Option<u32> {
        self.ids.get(&token).copied()
    }

    /// Assign `id` to `token`, replacing any earlier assignment
    pub fn set(&mut self, token: SpecialToken, id: u32) {
        self.ids.insert(token, id);
    }

    /// Take every assignment from `fallback` whose role is still unassigned
    pub fn fill_missing(&mut self, fallback: &Self) {
        for (&token, &id) in &fallback.ids {
            self.ids.entry(token).or_insert(id);
        }
    }

    /// Assignments in role order
    pub fn iter(&self) -> impl Iterator<Item = (SpecialToken, u32)> + '_ {
        self.ids.iter().map(|(&token, &id)| (token, id))
    }

    /// Number of assigned roles
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no role is assigned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A special token declared either as a bare string or as an added-token
/// record with a `content` field
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TokenSpec {
    Plain(String),
    Added { content: String },
}

impl TokenSpec {
    fn content(&self) -> &str {
        match self {
            Self::Plain(content) | Self::Added { content } => content,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfigFile {
    #[serde(default)]
    bos_token: Option<TokenSpec>,
    #[serde(default)]
    eos_token: Option<TokenSpec>,
    #[serde(default)]
    unk_token: Option<TokenSpec>,
    #[serde(default)]
    sep_token: Option<TokenSpec>,
    #[serde(default)]
    pad_token: Option<TokenSpec>,
}

/// Surface forms of the special tokens from `tokenizer_config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizerConfig {
    surfaces: BTreeMap<SpecialToken, String>,
}

impl TokenizerConfig {
    /// Load `tokenizer_config.json` from `model_dir`; absent file is empty
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::TokenizerParse`] if the file is malformed.
    pub fn load_optional(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(TOKENIZER_CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Self::from_json(&text).map_err(|message| ConvertError::TokenizerParse {
            file: path,
            message,
        })
    }

    /// Parse `tokenizer_config.json` content
    ///
    /// # Errors
    ///
    /// Returns the parser message when the JSON is malformed.
    pub fn from_json(json: &str) -> std::result::Result<Self, String> {
        let file: TokenizerConfigFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let declared = [
            (SpecialToken::Bos, file.bos_token),
            (SpecialToken::Eos, file.eos_token),
            (SpecialToken::Unk, file.unk_token),
            (SpecialToken::Sep, file.sep_token),
            (SpecialToken::Pad, file.pad_token),
        ];
        let surfaces = declared
            .into_iter()
            .filter_map(|(token, spec)| spec.map(|spec| (token, spec.content().to_string())))
            .collect();
        Ok(Self { surfaces })
    }

    /// Declared surface form for `token`
    #[must_use]
    pub fn surface(&self, token: SpecialToken) -> Option<&str> {
        self.surfaces.get(&token).map(String::as_str)
    }
}
