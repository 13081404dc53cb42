//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! convertir convert models/open-llama-3b
//! convertir convert models/gpt2 --outtype f32 --outfile gpt2.gguf
//! convertir convert models/plamo-13b --vocab-only
//! convertir -v convert models/open-llama-3b --dry-run
//! convertir inspect models/open-llama-3b/ggml-model-f16.gguf
//! ```

mod core;
mod types;

#[cfg(test)]
mod tests;

pub use core::{parse_args, Cli, Command, ConvertArgs, InspectArgs};
pub use types::OutType;
