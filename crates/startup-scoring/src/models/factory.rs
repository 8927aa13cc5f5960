use crate::config::{ModelConfig, ModelType};
use crate::models::gbdt::GbdtRegressor;
use crate::models::regressor::Regressor;

/// Build the concrete tree ensemble a `ModelConfig` describes. Stored and
/// explained models need the concrete type, so callers that persist a model
/// use this instead of `build_model`.
pub fn build_ensemble(params: ModelConfig) -> GbdtRegressor {
    match params.model_type {
        ModelType::GBDT { .. } => GbdtRegressor::new(params),
    }
}

/// Build a boxed regressor from a `ModelConfig`.
pub fn build_model(params: ModelConfig) -> Box<dyn Regressor> {
    Box::new(build_ensemble(params))
}
