//! Untyped `config.json` access with alias resolution.
//!
//! The record is read once and only queried through the typed getters below;
//! [`super::HyperParams`] is the closed structure the rest of the pipeline sees.

use crate::error::{ConvertError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// File name of the model configuration inside a checkpoint directory
pub const CONFIG_FILE: &str = "config.json";

/// Parsed `config.json`
#[derive(Debug, Clone)]
pub struct ConfigRecord {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigRecord {
    /// Load `config.json` from a checkpoint directory
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or
    /// [`ConvertError::ConfigParse`] if it is not a JSON object.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&text).map_err(|e| ConvertError::ConfigParse {
            file: path.clone(),
            message: e.to_string(),
        })?;
        Self::from_value(path, value)
    }

    /// Wrap an already-parsed JSON value
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::ConfigParse`] if `value` is not an object.
    pub fn from_value(path: impl Into<PathBuf>, value: Value) -> Result<Self> {
        let path = path.into();
        match value {
            Value::Object(values) => Ok(Self { path, values }),
            other => Err(ConvertError::ConfigParse {
                file: path,
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    /// Path the record was read from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The declared architecture tag, `architectures[0]`
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingHyperParam`] when no tag is declared.
    pub fn architecture_tag(&self) -> Result<&str> {
        self.values
            .get("architectures")
            .and_then(Value::as_array)
            .and_then(|tags| tags.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ConvertError::MissingHyperParam {
                key: "architectures".into(),
            })
    }

    /// First alias present with a non-null value
    #[must_use]
    pub fn lookup(&self, aliases: &[&'static str]) -> Option<(&'static str, &Value)> {
        aliases.iter().find_map(|&alias| match self.values.get(alias) {
            Some(Value::Null) | None => None,
            Some(value) => Some((alias, value)),
        })
    }

    /// Raw value for a single key, ignoring nulls
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Positive integer under any alias, `None` when absent
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidHyperParam`] when the value is not a
    /// positive integer that fits in `u32`.
    pub fn positive_u32(&self, aliases: &[&'static str]) -> Result<Option<u32>> {
        let Some((key, value)) = self.lookup(aliases) else {
            return Ok(None);
        };
        let raw = value.as_u64().ok_or_else(|| invalid(key, "expected a positive integer", value))?;
        if raw == 0 {
            return Err(invalid(key, "must be greater than zero", value));
        }
        u32::try_from(raw)
            .map(Some)
            .map_err(|_| invalid(key, "does not fit in 32 bits", value))
    }

    /// Positive integer under any alias, fatal when absent
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::MissingHyperParam`] naming every alias tried, or
    /// [`ConvertError::InvalidHyperParam`] for a malformed value.
    pub fn require_u32(&self, aliases: &[&'static str]) -> Result<u32> {
        self.positive_u32(aliases)?.ok_or_else(|| missing(aliases))
    }

    /// Float under any alias, `None` when absent
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidHyperParam`] for a non-numeric value.
    pub fn f32(&self, aliases: &[&'static str]) -> Result<Option<f32>> {
        let Some((key, value)) = self.lookup(aliases) else {
            return Ok(None);
        };
        value
            .as_f64()
            .map(|v| Some(v as f32))
            .ok_or_else(|| invalid(key, "expected a number", value))
    }

    /// Boolean under a single key, `None` when absent
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidHyperParam`] for a non-boolean value.
    pub fn bool(&self, key: &'static str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| invalid(key, "expected a boolean", value)),
        }
    }

    /// String under a single key, `None` when absent or not a string
    #[must_use]
    pub fn string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Token id under a single key; accepts an integer or a non-empty list
    /// (first element), `None` when absent
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidHyperParam`] for any other shape.
    pub fn token_id(&self, key: &'static str) -> Result<Option<u32>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let scalar = match value {
            Value::Array(items) => match items.first() {
                Some(first) => first,
                None => return Ok(None),
            },
            other => other,
        };
        scalar
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .map(Some)
            .ok_or_else(|| invalid(key, "expected a token id", value))
    }
}

/// Missing-key error naming every alias that was tried
pub(crate) fn missing(aliases: &[&str]) -> ConvertError {
    ConvertError::MissingHyperParam {
        key: aliases.join("/"),
    }
}

fn invalid(key: &str, expectation: &str, value: &Value) -> ConvertError {
    ConvertError::InvalidHyperParam {
        key: key.to_string(),
        message: format!("{expectation}, found {value}"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
