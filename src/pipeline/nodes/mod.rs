//! Built-in node implementations.

pub mod bake;
pub mod export;
pub mod filter;
pub mod particle_fit;
pub mod reconstruct;
pub mod stack_source;

pub use bake::{BakeParams, BakeStackNode};
pub use export::{ExportFormat, ExportManifest, ExportParams, ExporterNode};
pub use filter::{FilterParams, FrameFilterNode};
pub use particle_fit::{FitParams, ParticleFitNode};
pub use reconstruct::{ReconstructParams, ReconstructionNode};
pub use stack_source::{StackParams, SyntheticStackNode};

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::value::ConfigValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn param_usize(key: &str, value: &ConfigValue) -> PipelineResult<usize> {
    value
        .as_usize()
        .ok_or_else(|| PipelineError::invalid_param(key, "expected a non-negative integer"))
}

pub(crate) fn param_positive(key: &str, value: &ConfigValue) -> PipelineResult<usize> {
    match param_usize(key, value)? {
        0 => Err(PipelineError::invalid_param(key, "must be at least 1")),
        n => Ok(n),
    }
}

pub(crate) fn param_f64(key: &str, value: &ConfigValue) -> PipelineResult<f64> {
    value
        .as_float()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PipelineError::invalid_param(key, "expected a finite number"))
}

pub(crate) fn param_str<'a>(key: &str, value: &'a ConfigValue) -> PipelineResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| PipelineError::invalid_param(key, "expected a string"))
}

/// Decode a node's typed parameters. `Null` means "keep the defaults".
pub(crate) fn decode_params<T: DeserializeOwned>(params: serde_json::Value) -> PipelineResult<Option<T>> {
    if params.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(params)?))
}

pub(crate) fn encode_params<T: Serialize>(params: &T) -> serde_json::Value {
    serde_json::to_value(params).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_helpers() {
        assert_eq!(param_usize("n", &ConfigValue::Int(3)).unwrap(), 3);
        assert!(param_usize("n", &ConfigValue::Int(-1)).is_err());
        assert!(param_positive("n", &ConfigValue::Int(0)).is_err());
        assert_eq!(param_f64("g", &ConfigValue::Int(2)).unwrap(), 2.0);
        assert!(param_f64("g", &ConfigValue::Float(f64::NAN)).is_err());
        assert_eq!(param_str("p", &ConfigValue::from("x")).unwrap(), "x");
        assert!(param_str("p", &ConfigValue::Bool(true)).is_err());
    }

    #[test]
    fn test_decode_null_keeps_defaults() {
        let decoded: Option<FilterParams> = decode_params(serde_json::Value::Null).unwrap();
        assert!(decoded.is_none());
        let decoded: Option<FilterParams> =
            decode_params(serde_json::json!({ "gain": 3.0 })).unwrap();
        assert_eq!(decoded.unwrap().gain, 3.0);
    }
}
