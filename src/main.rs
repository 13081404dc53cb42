//! Convertir CLI
//!
//! Converts HuggingFace checkpoints into GGUF model files.
//!
//! # Usage
//!
//! ```bash
//! # Convert with f16 weights (default) to <dir>/ggml-model-f16.gguf
//! convertir convert models/open-llama-3b
//!
//! # Full precision, explicit output path
//! convertir convert models/gpt2 --outtype f32 --outfile gpt2.gguf
//!
//! # Vocabulary and metadata only
//! convertir convert models/plamo-13b --vocab-only
//!
//! # Run the pipeline without writing anything
//! convertir -v convert models/open-llama-3b --dry-run
//!
//! # Summarize a written file
//! convertir inspect models/open-llama-3b/ggml-model-f16.gguf
//! ```

use clap::Parser;
use convertir::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
