//! Core CLI types - Cli, Command and the per-command argument structs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::types::OutType;

/// Convertir: HuggingFace checkpoint to GGUF converter
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "convertir")]
#[command(author = "PAIML")]
#[command(version)]
#[command(about = "Convert GPT-2, LLaMA and PLaMo checkpoints into GGUF model files")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Convert a checkpoint directory into a GGUF file
    Convert(ConvertArgs),

    /// Summarize a GGUF file
    Inspect(InspectArgs),
}

/// Arguments for the convert command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ConvertArgs {
    /// Directory holding config.json, the tokenizer files and the weights
    #[arg(value_name = "MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Output precision (f32 or f16)
    #[arg(long, default_value = "f16")]
    pub outtype: OutType,

    /// Output path; defaults to <MODEL_DIR>/ggml-model-<outtype>.gguf
    #[arg(long)]
    pub outfile: Option<PathBuf>,

    /// Write metadata and vocabulary only
    #[arg(long)]
    pub vocab_only: bool,

    /// Run the whole pipeline without writing a file
    #[arg(long)]
    pub dry_run: bool,

    /// Read PyTorch pickle checkpoints (SECURITY RISK: may execute code)
    #[arg(long)]
    pub allow_pickle: bool,
}

/// Arguments for the inspect command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InspectArgs {
    /// GGUF file to summarize
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Parse arguments from an iterator (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
