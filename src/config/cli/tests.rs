//! CLI parsing tests

use super::*;
use crate::tensor::OutputPrecision;
use std::path::PathBuf;

#[test]
fn test_parse_convert_defaults() {
    let cli = parse_args(["convertir", "convert", "models/llama"]).unwrap();
    assert!(!cli.verbose);
    assert!(!cli.quiet);
    match cli.command {
        Command::Convert(args) => {
            assert_eq!(args.model_dir, PathBuf::from("models/llama"));
            assert_eq!(args.outtype, OutType::F16);
            assert!(args.outfile.is_none());
            assert!(!args.vocab_only);
            assert!(!args.dry_run);
            assert!(!args.allow_pickle);
        }
        Command::Inspect(_) => panic!("Expected Convert command"),
    }
}

#[test]
fn test_parse_convert_with_flags() {
    let cli = parse_args([
        "convertir",
        "-v",
        "convert",
        "models/gpt2",
        "--outtype",
        "f32",
        "--outfile",
        "out.gguf",
        "--vocab-only",
        "--dry-run",
        "--allow-pickle",
    ])
    .unwrap();
    assert!(cli.verbose);
    let Command::Convert(args) = cli.command else {
        panic!("Expected Convert command");
    };
    assert_eq!(args.outtype, OutType::F32);
    assert_eq!(args.outfile, Some(PathBuf::from("out.gguf")));
    assert!(args.vocab_only);
    assert!(args.dry_run);
    assert!(args.allow_pickle);
}

#[test]
fn test_parse_global_quiet_after_subcommand() {
    let cli = parse_args(["convertir", "inspect", "m.gguf", "--quiet"]).unwrap();
    assert!(cli.quiet);
    assert_eq!(
        cli.command,
        Command::Inspect(InspectArgs {
            file: PathBuf::from("m.gguf")
        })
    );
}

#[test]
fn test_parse_rejects_unknown_outtype() {
    assert!(parse_args(["convertir", "convert", "m", "--outtype", "q4_0"]).is_err());
}

#[test]
fn test_parse_requires_model_dir() {
    assert!(parse_args(["convertir", "convert"]).is_err());
}

#[test]
fn test_outtype_from_str() {
    assert_eq!("F16".parse::<OutType>(), Ok(OutType::F16));
    assert_eq!("0".parse::<OutType>(), Ok(OutType::F32));
    assert!("bf16".parse::<OutType>().is_err());
    assert_eq!(OutputPrecision::from(OutType::F32), OutputPrecision::Wide);
    assert_eq!(OutputPrecision::from(OutType::F16), OutputPrecision::Narrow);
}
