//! facerec-core — Persistent, incrementally-updatable face classifier.
//!
//! Maps labeled face crops to an LBPH model, predicts identities for new
//! crops, and reconciles label numbering across independent training
//! batches so incremental updates extend the model's identity space.

pub mod classifier;
pub mod dataset;
pub mod labels;
pub mod lbph;
pub mod recognizer;
pub mod retrain;
pub mod trainer;
pub mod types;

pub use classifier::{Classifier, ClassifierError, ClassifierPrediction};
pub use dataset::{Dataset, DatasetError};
pub use labels::{reconcile, LabelError, LabelTable, Reconciliation};
pub use lbph::{LbphClassifier, LbphParams};
pub use recognizer::{Recognizer, RecognizerError, RecognizerOptions, RecognizerState};
pub use retrain::{decide, refresh, BoxError, DatasetSource, RetrainDecision, RetrainError, RetrainReason};
pub use trainer::{TrainError, UpdateSummary};
pub use types::{FaceImage, FaceImageError, Label, Prediction};
