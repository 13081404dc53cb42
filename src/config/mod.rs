//! Command-line configuration
//!
//! Run-side settings come from CLI flags only; model-side settings are read
//! from the checkpoint's own JSON files.

pub mod cli;

pub use cli::{parse_args, Cli, Command, ConvertArgs, InspectArgs, OutType};
