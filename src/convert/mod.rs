//! End-to-end checkpoint conversion
//!
//! [`Converter::convert`] drives one run: resolve the architecture, validate
//! hyperparameters, emit metadata and the vocabulary, then stream every
//! checkpoint tensor through name mapping and layout transforms into a
//! [`ModelWriter`]. Any fatal error returns before `finalize`.
//!
//! # Example
//!
//! ```no_run
//! use convertir::convert::{ConvertOptions, Converter};
//! use convertir::tensor::OutputPrecision;
//! use convertir::writer::GgufWriter;
//! use std::path::Path;
//!
//! let dir = Path::new("models/llama-7b");
//! let options = ConvertOptions::new().precision(OutputPrecision::Narrow);
//! let mut writer = GgufWriter::create(options.default_output_path(dir))?;
//! let report = Converter::new(options).convert(dir, &mut writer)?;
//! println!("{report}");
//! # Ok::<(), convertir::error::ConvertError>(())
//! ```

mod metadata;
mod report;


pub use metadata::{emit_architecture_metadata, emit_vocabulary, model_name};
pub use report::ConversionReport;

use crate::arch::{self, ArchitectureDescriptor};
use crate::error::Result;
use crate::hparams::{ConfigRecord, HyperParams};
use crate::shard::ShardIterator;
use crate::tensor::{LayoutTransformer, MappedName, OutputPrecision, TensorNameMapper};
use crate::vocab;
use crate::writer::ModelWriter;
use std::path::{Path, PathBuf};

/// Run-side options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Output precision
    pub precision: OutputPrecision,
    /// Emit metadata and vocabulary only
    pub vocab_only: bool,
    /// Read PyTorch pickle checkpoints (SECURITY RISK)
    pub allow_pickle: bool,
}

impl ConvertOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn precision(mut self, precision: OutputPrecision) -> Self {
        self.precision = precision;
        self
    }

    #[must_use]
    pub fn vocab_only(mut self, vocab_only: bool) -> Self {
        self.vocab_only = vocab_only;
        self
    }

    /// Allow PyTorch pickle checkpoints (SECURITY RISK)
    #[must_use]
    pub fn allow_pickle(mut self, allow: bool) -> Self {
        self.allow_pickle = allow;
        self
    }

    /// `<model_dir>/ggml-model-<f32|f16>.gguf`
    #[must_use]
    pub fn default_output_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(format!("ggml-model-{}.gguf", self.precision.as_str()))
    }
}

/// Architecture and validated hyperparameters for one run
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub desc: &'static ArchitectureDescriptor,
    pub hparams: HyperParams,
    pub model_dir: PathBuf,
}

impl ConversionContext {
    /// Read `config.json` from `model_dir` and resolve its architecture
    ///
    /// # Errors
    ///
    /// Returns config parse, unsupported-architecture and hyperparameter
    /// errors.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let record = ConfigRecord::load(model_dir)?;
        let desc = arch::resolve(record.architecture_tag()?)?;
        let hparams = HyperParams::extract(desc, &record)?;
        Ok(Self {
            desc,
            hparams,
            model_dir: model_dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.hparams.block_count
    }

    #[must_use]
    pub fn head_dim(&self) -> u32 {
        self.hparams.head_dim()
    }

    /// Vocabulary size declared by `config.json`
    #[must_use]
    pub fn declared_vocab_size(&self) -> Option<usize> {
        self.hparams.vocab_size
    }
}

/// Conversion pipeline
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    #[must_use]
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Convert the checkpoint in `model_dir` into `writer`
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any stage; `writer` is then left
    /// unfinalized.
    pub fn convert<W: ModelWriter + ?Sized>(
        &self,
        model_dir: &Path,
        writer: &mut W,
    ) -> Result<ConversionReport> {
        let ctx = ConversionContext::load(model_dir)?;
        tracing::info!(
            architecture = ctx.desc.gguf_name,
            blocks = ctx.block_count(),
            heads = ctx.hparams.head_count,
            kv_heads = ctx.hparams.head_count_kv,
            grouped_query = ctx.hparams.is_grouped_query(),
            head_dim = ctx.head_dim(),
            precision = self.options.precision.as_str(),
            "converting checkpoint"
        );

        let vocabulary = vocab::extract(model_dir, ctx.desc, &ctx.hparams)?;
        tracing::info!(
            size = vocabulary.len(),
            declared = ?ctx.declared_vocab_size(),
            model = vocabulary.model.as_str(),
            merges = vocabulary.merges.len(),
            "vocabulary ready"
        );

        emit_architecture_metadata(&ctx, self.options.precision, writer)?;
        emit_vocabulary(&vocabulary, writer)?;

        let mut report = ConversionReport::new(ctx.desc.gguf_name, vocabulary.len());
        if self.options.vocab_only {
            tracing::info!("vocab-only run, skipping tensors");
        } else {
            self.convert_tensors(&ctx, writer, &mut report)?;
        }

        writer.finalize()?;
        tracing::info!(
            tensors = report.tensors,
            skipped = report.skipped,
            "conversion complete"
        );
        Ok(report)
    }

    fn convert_tensors<W: ModelWriter + ?Sized>(
        &self,
        ctx: &ConversionContext,
        writer: &mut W,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let mapper = TensorNameMapper::new(ctx.desc, ctx.block_count());
        let transformer = LayoutTransformer::new(ctx.desc, &ctx.hparams, self.options.precision);

        let shards = ShardIterator::open_with(&ctx.model_dir, self.options.allow_pickle)?;
        tracing::info!(shards = shards.shard_count(), "reading checkpoint");
        for raw in shards {
            let raw = raw?;
            match mapper.map(&raw.name)? {
                MappedName::Skip => {
                    tracing::debug!(name = %raw.name, "skipping derivable buffer");
                    report.skipped += 1;
                }
                MappedName::Canonical(name) => {
                    let record = transformer.transform(name, raw)?;
                    report.record(&record);
                    writer.add_tensor(record)?;
                }
            }
        }
        Ok(())
    }
}
