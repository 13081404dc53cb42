//! Error types for checkpoint conversion
//!
//! Every fatal condition names the tensor, key, id or file that triggered it,
//! so a failed run can be diagnosed from the message alone.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Errors that abort a conversion run
#[derive(Debug, Error)]
pub enum ConvertError {
    /// `config.json` names an architecture outside the registry
    #[error("Model architecture not supported: {tag}")]
    UnsupportedArchitecture { tag: String },

    /// Required hyperparameter absent under every alias, with no default
    #[error("Missing hyperparameter '{key}' in config.json")]
    MissingHyperParam { key: String },

    /// Hyperparameter present but of the wrong type or out of range
    #[error("Invalid hyperparameter '{key}': {message}")]
    InvalidHyperParam { key: String, message: String },

    /// Neither tokenizer.model nor tokenizer.json present
    #[error("No vocabulary source found in {dir} (expected tokenizer.model or tokenizer.json)")]
    NoVocabularySource { dir: PathBuf },

    /// Architecture mandates a vocabulary file that is missing
    #[error("{architecture} requires {file}, which is missing")]
    MissingVocabularyFile { architecture: String, file: String },

    /// Tokenizer defines an id the declared vocabulary cannot hold
    #[error("Token id {id} exceeds declared vocabulary size {declared}")]
    VocabularyOverflow { id: u32, declared: usize },

    /// Source tensor key has no canonical name
    #[error("Can not map tensor '{name}'")]
    UnmappedTensor { name: String },

    /// Source tensor uses a dtype that cannot be coerced to a float
    #[error("Unsupported dtype {dtype} for tensor '{name}'")]
    UnsupportedDtype { name: String, dtype: String },

    /// Tensor shape incompatible with a layout transform
    #[error("Shape mismatch for tensor '{name}': {message}")]
    ShapeMismatch { name: String, message: String },

    /// No checkpoint file in the model directory
    #[error("No checkpoint found in {dir} (expected model.safetensors or model-NNNNN-of-NNNNN.safetensors)")]
    NoCheckpoint { dir: PathBuf },

    /// Sharded checkpoint with a gap in its numbering
    #[error("Missing checkpoint shard {index} of {total}")]
    MissingShard { index: usize, total: usize },

    /// PyTorch pickle checkpoints may execute arbitrary code on load
    #[error("SECURITY: refusing PyTorch pickle checkpoint {file}; convert it to SafeTensors or pass --allow-pickle")]
    PickleCheckpoint { file: PathBuf },

    /// Pickle checkpoint archive is malformed or holds an unreadable tensor
    #[error("Failed to read PyTorch checkpoint {file}: {message}")]
    PickleParse { file: PathBuf, message: String },

    /// JSON configuration file is malformed
    #[error("Failed to parse {file}: {message}")]
    ConfigParse { file: PathBuf, message: String },

    /// SafeTensors shard is malformed
    #[error("Failed to parse SafeTensors shard {file}: {message}")]
    SafeTensorsParse { file: PathBuf, message: String },

    /// Tokenizer file is malformed
    #[error("Failed to parse tokenizer {file}: {message}")]
    TokenizerParse { file: PathBuf, message: String },

    /// Writer called out of order (metadata after tensors, use after finalize)
    #[error("Writer state error: {message}")]
    WriterState { message: String },

    /// GGUF file is malformed
    #[error("Invalid GGUF file: {message}")]
    GgufParse { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Whether the error comes from the checkpoint's own files rather than the
    /// environment
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::WriterState { .. })
    }

    /// Whether the error is a refusal on security grounds
    #[must_use]
    pub fn is_security_risk(&self) -> bool {
        matches!(self, Self::PickleCheckpoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmapped_tensor_names_the_tensor() {
        let err = ConvertError::UnmappedTensor {
            name: "model.layers.0.mystery.weight".into(),
        };
        assert!(err.to_string().contains("model.layers.0.mystery.weight"));
    }

    #[test]
    fn test_missing_hyperparam_names_the_key() {
        let err = ConvertError::MissingHyperParam {
            key: "rms_norm_eps".into(),
        };
        assert!(err.to_string().contains("rms_norm_eps"));
    }

    #[test]
    fn test_pickle_is_security_risk() {
        let err = ConvertError::PickleCheckpoint {
            file: PathBuf::from("pytorch_model.bin"),
        };
        assert!(err.is_security_risk());
        assert!(err.is_input_error());
        assert!(err.to_string().contains("--allow-pickle"));
    }

    #[test]
    fn test_io_is_not_input_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConvertError = io_err.into();
        assert!(matches!(err, ConvertError::Io(_)));
        assert!(!err.is_input_error());
    }

    #[test]
    fn test_all_error_variants_display() {
        let errors: Vec<ConvertError> = vec![
            ConvertError::UnsupportedArchitecture { tag: "t".into() },
            ConvertError::MissingHyperParam { key: "k".into() },
            ConvertError::InvalidHyperParam {
                key: "k".into(),
                message: "m".into(),
            },
            ConvertError::NoVocabularySource {
                dir: PathBuf::from("d"),
            },
            ConvertError::MissingVocabularyFile {
                architecture: "plamo".into(),
                file: "tokenizer.model".into(),
            },
            ConvertError::VocabularyOverflow { id: 9, declared: 5 },
            ConvertError::UnmappedTensor { name: "n".into() },
            ConvertError::UnsupportedDtype {
                name: "n".into(),
                dtype: "F8_E4M3".into(),
            },
            ConvertError::ShapeMismatch {
                name: "n".into(),
                message: "m".into(),
            },
            ConvertError::NoCheckpoint {
                dir: PathBuf::from("d"),
            },
            ConvertError::MissingShard { index: 2, total: 3 },
            ConvertError::PickleCheckpoint {
                file: PathBuf::from("f"),
            },
            ConvertError::PickleParse {
                file: PathBuf::from("f"),
                message: "m".into(),
            },
            ConvertError::ConfigParse {
                file: PathBuf::from("f"),
                message: "m".into(),
            },
            ConvertError::SafeTensorsParse {
                file: PathBuf::from("f"),
                message: "m".into(),
            },
            ConvertError::TokenizerParse {
                file: PathBuf::from("f"),
                message: "m".into(),
            },
            ConvertError::WriterState {
                message: "m".into(),
            },
            ConvertError::GgufParse {
                message: "m".into(),
            },
        ];

        for err in errors {
            let msg = err.to_string();
            assert!(!msg.is_empty(), "Error display should not be empty: {err:?}");
        }
    }
}
