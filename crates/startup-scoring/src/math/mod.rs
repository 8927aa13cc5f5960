//! Small dense matrix type used for feature matrices.
//!
//! Row-major `Array2` with just the operations the trainer, predictor and
//! retraining pipeline need (row access, row selection, stacking). Kept
//! dependency-free so feature matrices can be built and sliced cheaply.
pub mod matrix;

pub use matrix::{Array2, ShapeError};
