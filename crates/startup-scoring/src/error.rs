use std::error::Error;
use std::fmt;

/// Typed hard failures raised by the scoring engine.
///
/// Parse problems never show up here: record parsing always degrades to a
/// neutral default. Skipped and rolled-back retraining runs are outcomes,
/// not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// A stored model was trained on a different feature layout.
    FeatureMismatch {
        target: String,
        expected: usize,
        found: usize,
    },
    /// A record carries no usable field at all.
    EmptyRecord,
    /// Pseudo-labelling needs at least the `overall` model to be loaded.
    ModelsNotReady,
    /// Feature matrix and label vector disagree in length.
    ShapeMismatch { expected: usize, found: usize },
    /// Training was asked to run on zero samples.
    EmptyDataset,
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScoringError::FeatureMismatch {
                target,
                expected,
                found,
            } => write!(
                f,
                "Model for target '{}' was trained on a different feature layout ({} names expected, {} stored)",
                target, expected, found
            ),
            ScoringError::EmptyRecord => write!(f, "Record has no non-empty fields"),
            ScoringError::ModelsNotReady => {
                write!(f, "Scoring models are not loaded; train on ground truth first")
            }
            ScoringError::ShapeMismatch { expected, found } => write!(
                f,
                "Expected {} labels to match the feature matrix, found {}",
                expected, found
            ),
            ScoringError::EmptyDataset => write!(f, "Cannot train on an empty dataset"),
        }
    }
}

impl Error for ScoringError {}
