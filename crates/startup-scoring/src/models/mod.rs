//! Gradient-boosted regression trees, their explainer and the model seam.
pub mod factory;
pub mod gbdt;
pub mod quantize;
pub mod regressor;
pub mod shap;
pub mod tree;

pub use factory::{build_ensemble, build_model};
pub use gbdt::GbdtRegressor;
pub use regressor::Regressor;
pub use shap::TreeExplainer;
