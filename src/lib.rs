//! Convertir: HuggingFace checkpoint to GGUF conversion
//!
//! Converts GPT-2, LLaMA and PLaMo checkpoints (SafeTensors shards plus
//! `config.json` and tokenizer files) into a single GGUF model file:
//! - Architecture registry with per-family naming and layout rules
//! - Typed hyperparameter extraction with alias resolution
//! - Byte-pair (`tokenizer.json`) and piece-score (`tokenizer.model`)
//!   vocabulary extraction
//! - Tensor renaming, head-layout reversal and f32/f16 dtype policy
//! - Streaming GGUF v3 writer and header reader
//!
//! # Example
//!
//! ```no_run
//! use convertir::convert::{ConvertOptions, Converter};
//! use convertir::writer::GgufWriter;
//! use std::path::Path;
//!
//! let dir = Path::new("models/gpt2");
//! let options = ConvertOptions::new();
//! let mut writer = GgufWriter::create(options.default_output_path(dir))?;
//! Converter::new(options).convert(dir, &mut writer)?;
//! # Ok::<(), convertir::error::ConvertError>(())
//! ```

pub mod arch;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod hparams;
pub mod shard;
pub mod tensor;
pub mod vocab;
pub mod writer;

pub use convert::{ConversionReport, ConvertOptions, Converter};
pub use error::{ConvertError, Result};
