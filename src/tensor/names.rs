//! Source tensor key → canonical name

use crate::arch::{ArchitectureDescriptor, BLOCK_PLACEHOLDER};
use crate::error::{ConvertError, Result};
use std::collections::HashMap;

const PARAM_SUFFIXES: [&str; 2] = [".weight", ".bias"];

/// Outcome of mapping one source key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedName {
    /// Emit under this canonical name
    Canonical(String),
    /// Derivable buffer, drop silently
    Skip,
}

/// Lookup table from source stems to canonical stems, expanded for every
/// block index of one checkpoint
#[derive(Debug, Clone)]
pub struct TensorNameMapper {
    stems: HashMap<String, String>,
    excluded: &'static [&'static str],
}

impl TensorNameMapper {
    /// Expand `desc`'s templates for blocks `0..block_count`
    #[must_use]
    pub fn new(desc: &ArchitectureDescriptor, block_count: u32) -> Self {
        let mut stems = HashMap::new();
        for &(source, canonical) in desc.tensor_table {
            if source.contains(BLOCK_PLACEHOLDER) {
                for bid in 0..block_count {
                    let bid = bid.to_string();
                    stems.insert(
                        source.replace(BLOCK_PLACEHOLDER, &bid),
                        canonical.replace(BLOCK_PLACEHOLDER, &bid),
                    );
                }
            } else {
                stems.insert(source.to_string(), canonical.to_string());
            }
        }
        Self {
            stems,
            excluded: desc.excluded_suffixes,
        }
    }

    /// Map a source key
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::UnmappedTensor`] for a key that is neither
    /// excluded nor a `.weight`/`.bias` of a stem in the table.
    pub fn map(&self, key: &str) -> Result<MappedName> {
        if self.excluded.iter().any(|suffix| key.ends_with(suffix)) {
            return Ok(MappedName::Skip);
        }

        PARAM_SUFFIXES
            .iter()
            .find_map(|suffix| key.strip_suffix(suffix).map(|stem| (stem, *suffix)))
            .and_then(|(stem, suffix)| self.stems.get(stem).map(|canonical| (canonical, suffix)))
            .map(|(canonical, suffix)| MappedName::Canonical(format!("{canonical}{suffix}")))
            .ok_or_else(|| ConvertError::UnmappedTensor {
                name: key.to_string(),
            })
    }

    /// Number of distinct source stems known
    #[must_use]
    pub fn len(&self) -> usize {
        self.stems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }
}
