//! Inspect command implementation

use crate::arch;
use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::InspectArgs;
use crate::writer::{read_summary_file, GgufSummary, KEY_ARCHITECTURE};

const TENSOR_PREVIEW: usize = 20;

pub(super) fn run_inspect(args: InspectArgs, level: LogLevel) -> Result<(), String> {
    let file_size = std::fs::metadata(&args.file)
        .map_err(|e| format!("Failed to read {}: {e}", args.file.display()))?
        .len();
    let summary = read_summary_file(&args.file).map_err(|e| e.to_string())?;

    log_model_info(level, &summary, file_size);
    if level == LogLevel::Verbose {
        log_metadata(level, &summary);
        log_tensor_details(level, &summary);
    }
    Ok(())
}

fn log_model_info(level: LogLevel, summary: &GgufSummary, file_size: u64) {
    let architecture = summary
        .metadata_value(KEY_ARCHITECTURE)
        .and_then(|value| value.as_str())
        .unwrap_or("unknown");
    let name = summary
        .metadata_value("general.name")
        .and_then(|value| value.as_str())
        .unwrap_or("unnamed");
    let params = summary
        .tensors
        .iter()
        .try_fold(0u64, |acc, info| acc.checked_add(info.element_count()?));

    log(level, LogLevel::Normal, "GGUF Model Information:");
    log(level, LogLevel::Normal, &format!("  Name: {name}"));
    log(
        level,
        LogLevel::Normal,
        &format!("  Architecture: {}", describe_architecture(architecture)),
    );
    log(level, LogLevel::Normal, &format!("  Version: {}", summary.version));
    log(
        level,
        LogLevel::Normal,
        &format!("  File size: {:.2} MB", file_size as f64 / 1_000_000.0),
    );
    log(
        level,
        LogLevel::Normal,
        &params.map_or_else(
            || "  Parameters: overflow".to_string(),
            |params| format!("  Parameters: {:.2}M", params as f64 / 1e6),
        ),
    );
    log(
        level,
        LogLevel::Normal,
        &format!("  Metadata keys: {}", summary.metadata.len()),
    );
    log(
        level,
        LogLevel::Normal,
        &format!("  Tensors: {}", summary.tensors.len()),
    );
}

fn log_metadata(level: LogLevel, summary: &GgufSummary) {
    log(level, LogLevel::Verbose, "\nMetadata:");
    for (key, value) in &summary.metadata {
        log(level, LogLevel::Verbose, &format!("  {key} = {value}"));
    }
}

fn log_tensor_details(level: LogLevel, summary: &GgufSummary) {
    log(level, LogLevel::Verbose, "\nTensor Details:");
    for info in summary.tensors.iter().take(TENSOR_PREVIEW) {
        let dtype = info
            .dtype()
            .map_or_else(|| format!("type {}", info.ggml_type), |d| d.to_string());
        log(
            level,
            LogLevel::Verbose,
            &format!("  {}: {:?} ({dtype})", info.name, info.shape()),
        );
    }
    if summary.tensors.len() > TENSOR_PREVIEW {
        log(
            level,
            LogLevel::Verbose,
            &format!("  ... and {} more tensors", summary.tensors.len() - TENSOR_PREVIEW),
        );
    }
}

/// Architecture name with the checkpoint class it is converted from, when known
pub(super) fn describe_architecture(name: &str) -> String {
    match arch::by_gguf_name(name) {
        Some(desc) => format!("{name} (from {})", desc.hf_class),
        None => name.to_string(),
    }
}
