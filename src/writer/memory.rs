//! In-memory writer recording every call in order

use super::{state_error, MetadataValue, ModelWriter, WriterPhase};
use crate::error::Result;
use crate::tensor::TensorRecord;

/// One recorded writer call
#[derive(Debug, Clone, PartialEq)]
pub enum WriterEvent {
    Metadata { key: String, value: MetadataValue },
    Tensor(TensorRecord),
}

/// Writer that keeps the event log instead of producing a file
///
/// Used for dry runs and tests. With [`MemoryWriter::discarding`] tensor
/// payloads are dropped and only names, shapes and dtypes are kept.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    events: Vec<WriterEvent>,
    keep_data: bool,
    phase: WriterPhase,
}

impl MemoryWriter {
    /// Writer that keeps tensor data
    #[must_use]
    pub fn new() -> Self {
        Self {
            keep_data: true,
            ..Self::default()
        }
    }

    /// Writer that drops tensor data
    #[must_use]
    pub fn discarding() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[WriterEvent] {
        &self.events
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.phase == WriterPhase::Finalized
    }

    /// Value recorded for `key`
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&MetadataValue> {
        self.events.iter().find_map(|event| match event {
            WriterEvent::Metadata { key: k, value } if k == key => Some(value),
            _ => None,
        })
    }

    /// Metadata keys in the order they were added
    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            WriterEvent::Metadata { key, .. } => Some(key.as_str()),
            WriterEvent::Tensor(_) => None,
        })
    }

    /// Tensors in the order they were added
    pub fn tensors(&self) -> impl Iterator<Item = &TensorRecord> {
        self.events.iter().filter_map(|event| match event {
            WriterEvent::Tensor(record) => Some(record),
            WriterEvent::Metadata { .. } => None,
        })
    }

    /// Recorded tensor named `name`
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorRecord> {
        self.tensors().find(|record| record.name == name)
    }
}

impl ModelWriter for MemoryWriter {
    fn add_metadata(&mut self, key: &str, value: MetadataValue) -> Result<()> {
        self.phase.check_metadata(key)?;
        if self.metadata(key).is_some() {
            return Err(state_error(format!("duplicate metadata key '{key}'")));
        }
        if let MetadataValue::Array(items) = &value {
            MetadataValue::array_element_type(items)?;
        }
        self.events.push(WriterEvent::Metadata {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn add_tensor(&mut self, mut tensor: TensorRecord) -> Result<()> {
        self.phase.begin_tensor(&tensor.name)?;
        if self.tensor(&tensor.name).is_some() {
            return Err(state_error(format!("duplicate tensor '{}'", tensor.name)));
        }
        if !self.keep_data {
            tensor.data = Vec::new();
        }
        self.events.push(WriterEvent::Tensor(tensor));
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.phase.finish()
    }
}
