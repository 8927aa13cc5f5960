//! startup-scoring: proxy labelling, gradient-boosted scoring and
//! confidence-gated retraining for early-stage company profiles.
//!
//! The pipeline runs strictly downward:
//!
//! - [`labeler`] derives six heuristic scores from structured fields,
//! - [`features`] turns a record into a fixed 39-wide feature vector,
//! - [`trainer`] fits one boosted regressor per target with k-fold CV and
//!   saves versioned artifacts through [`store`],
//! - [`predictor`] serves clamped scores and TreeSHAP attributions from the
//!   latest artifacts,
//! - [`retrain`] folds unlabeled external records into the models, guarded by
//!   a ground-truth holdout.
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod io;
pub mod labeler;
pub mod logging;
pub mod math;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod record;
pub mod reliability;
pub mod retrain;
pub mod store;
pub mod target;
pub mod trainer;

pub use config::{load_config, ModelConfig, ModelType, RetrainConfig, ScoringConfig};
pub use dataset::GroundTruth;
pub use error::ScoringError;
pub use features::FeatureExtractor;
pub use predictor::{Explanation, PredictionResult, PredictorHandle, ScorePredictor};
pub use record::{ExternalRecord, RawRecord};
pub use retrain::{retrain, RetrainOutcome, RetrainStatus, RetrainingPipeline};
pub use store::ModelStore;
pub use target::Target;
pub use trainer::ModelTrainer;
