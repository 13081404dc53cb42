//! Convert command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::ConvertArgs;
use crate::convert::{ConvertOptions, Converter};
use crate::writer::{GgufWriter, MemoryWriter};

pub(super) fn run_convert(args: ConvertArgs, level: LogLevel) -> Result<(), String> {
    if !args.model_dir.is_dir() {
        return Err(format!(
            "Model directory not found: {}",
            args.model_dir.display()
        ));
    }

    let options = ConvertOptions::new()
        .precision(args.outtype.into())
        .vocab_only(args.vocab_only)
        .allow_pickle(args.allow_pickle);
    let converter = Converter::new(options);

    if args.dry_run {
        let mut writer = MemoryWriter::discarding();
        let report = converter
            .convert(&args.model_dir, &mut writer)
            .map_err(|e| e.to_string())?;
        log(level, LogLevel::Normal, &format!("Dry run: {report}"));
        log_tensor_list(level, &writer);
        return Ok(());
    }

    let outfile = args
        .outfile
        .unwrap_or_else(|| options.default_output_path(&args.model_dir));
    let mut writer = GgufWriter::create(&outfile).map_err(|e| e.to_string())?;
    let report = converter
        .convert(&args.model_dir, &mut writer)
        .map_err(|e| e.to_string())?;

    log(
        level,
        LogLevel::Normal,
        &format!("Wrote {}: {report}", outfile.display()),
    );
    Ok(())
}

fn log_tensor_list(level: LogLevel, writer: &MemoryWriter) {
    log(level, LogLevel::Verbose, "\nTensors:");
    for tensor in writer.tensors() {
        log(
            level,
            LogLevel::Verbose,
            &format!("  {}: {:?} ({})", tensor.name, tensor.shape, tensor.dtype),
        );
    }
}
