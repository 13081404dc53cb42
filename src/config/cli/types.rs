//! CLI value types

use crate::tensor::OutputPrecision;

/// Output precision flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutType {
    F32,
    #[default]
    F16,
}

impl std::str::FromStr for OutType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "f32" | "0" => Ok(OutType::F32),
            "f16" | "1" => Ok(OutType::F16),
            _ => Err(format!("Unknown output type: {s}. Valid types: f32, f16")),
        }
    }
}

impl From<OutType> for OutputPrecision {
    fn from(out: OutType) -> Self {
        match out {
            OutType::F32 => OutputPrecision::Wide,
            OutType::F16 => OutputPrecision::Narrow,
        }
    }
}
